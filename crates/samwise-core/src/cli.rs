use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "samwise",
    version,
    about = "Samwise: tasks, tags and a calendar backlog from the terminal",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "samwiserc", global = true)]
    pub samwiserc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List tags and their colors
    Tags,
    /// Create a tag
    TagAdd {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
        #[arg(long, default_value = "#3b82f6")]
        color: String,
        /// Course the tag belongs to
        #[arg(long = "class")]
        class_id: Option<String>,
    },
    /// Rename or recolor a tag
    TagEdit {
        tag: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Delete a tag; its tasks move to None
    TagRm { tag: String },
    /// Create a task
    Add {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
        #[arg(long, default_value = "today", allow_hyphen_values = true)]
        date: String,
        /// Tag id or name
        #[arg(long)]
        tag: Option<String>,
        /// Subtask to create with the task; repeatable
        #[arg(long = "sub", action = ArgAction::Append)]
        subtasks: Vec<String>,
        #[arg(long)]
        pin: bool,
    },
    /// Change a task's name, date, tag or subtask list
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        date: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long = "sub", action = ArgAction::Append)]
        add_subtasks: Vec<String>,
        #[arg(long = "drop-sub", action = ArgAction::Append)]
        drop_subtasks: Vec<String>,
    },
    /// Mark a task and its subtasks complete
    Done { id: String },
    /// Mark a task and its subtasks incomplete
    Undone { id: String },
    /// Put a task in focus
    Pin { id: String },
    /// Take a task out of focus
    Unpin { id: String },
    /// Add a subtask to a task
    SubAdd {
        task: String,
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    SubDone { task: String, subtask: String },
    SubUndone { task: String, subtask: String },
    SubPin { task: String, subtask: String },
    SubUnpin { task: String, subtask: String },
    SubRm { task: String, subtask: String },
    /// Delete a task with its subtasks
    Rm { id: String },
    /// Restore the last deleted task
    Undo,
    /// Show tasks bucketed by day
    Backlog {
        /// four-days, biweekly or monthly
        #[arg(long)]
        mode: Option<String>,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i32,
        /// Also show completed tasks
        #[arg(long)]
        all: bool,
    },
    /// Show what is in focus
    Focus,
    /// Count tasks in a backlog window
    Count {
        #[arg(long)]
        mode: Option<String>,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i32,
        #[arg(long = "no-subtasks")]
        no_subtasks: bool,
        #[arg(long)]
        completed: bool,
    },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or
/// `rc.key:value`) overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "samwise",
            "rc.color=off",
            "backlog",
            "rc.backlog.mode:monthly",
        ]))
        .expect("preprocess");
        assert_eq!(pre.cleaned_args, args(&["samwise", "backlog"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.backlog.mode".to_string(), "monthly".to_string()),
            ]
        );
    }

    #[test]
    fn add_collects_name_words_and_subtasks() {
        let cli = GlobalCli::try_parse_from(args(&[
            "samwise",
            "add",
            "write",
            "essay",
            "--date",
            "+2d",
            "--sub",
            "outline",
            "--sub",
            "draft",
            "--rc",
            "color=off",
        ]))
        .expect("parse");
        assert_eq!(cli.rc_overrides.len(), 1);
        assert_eq!(
            cli.command,
            Some(Command::Add {
                name: vec!["write".to_string(), "essay".to_string()],
                date: "+2d".to_string(),
                tag: None,
                subtasks: vec!["outline".to_string(), "draft".to_string()],
                pin: false,
            })
        );
    }

    #[test]
    fn backlog_accepts_negative_offsets() {
        let cli =
            GlobalCli::try_parse_from(args(&["samwise", "backlog", "--offset", "-2"]))
                .expect("parse");
        assert!(matches!(
            cli.command,
            Some(Command::Backlog { offset: -2, .. })
        ));
    }
}
