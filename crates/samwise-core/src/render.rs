use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::calendar::{ColoredTask, OneDayTasks};
use crate::config::Config;
use crate::focus::FocusTask;
use crate::model::{Id, SubTask, Tag};
use crate::state::{State, SyncFailure};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            color: cfg.color_enabled() && io::stdout().is_terminal(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all)]
    pub fn print_tags(&self, state: &State) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_tags(&mut out, state)
    }

    pub fn write_tags<W: Write>(&self, mut out: W, state: &State) -> anyhow::Result<()> {
        let headers = vec![
            "ID".to_string(),
            "Name".to_string(),
            "Color".to_string(),
            "Class".to_string(),
            "Tasks".to_string(),
        ];
        let rows = state
            .tags()
            .values()
            .map(|tag| {
                let used = state.tasks().values().filter(|t| t.tag == tag.id).count();
                vec![
                    self.paint(tag.id.as_str(), "33"),
                    self.swatch(&tag.name, &tag.color),
                    tag.color.clone(),
                    tag.class_id.clone().unwrap_or_default(),
                    used.to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip_all)]
    pub fn print_backlog(
        &self,
        title: &str,
        days: &[OneDayTasks],
        state: &State,
        show_completed: bool,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_backlog(&mut out, title, days, state, show_completed)
    }

    pub fn write_backlog<W: Write>(
        &self,
        mut out: W,
        title: &str,
        days: &[OneDayTasks],
        state: &State,
        show_completed: bool,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(title, "1"))?;
        writeln!(out)?;

        let headers = vec![
            "Day".to_string(),
            "ID".to_string(),
            "Tag".to_string(),
            "Task".to_string(),
        ];
        let mut rows = Vec::new();
        for day in days {
            let label = day.date.format("%a %-m/%-d").to_string();
            let visible: Vec<&ColoredTask> = day
                .tasks
                .iter()
                .filter(|t| show_completed || !t.task.complete)
                .collect();
            if visible.is_empty() {
                rows.push(vec![label, String::new(), String::new(), String::new()]);
                continue;
            }
            for (idx, colored) in visible.into_iter().enumerate() {
                let day_cell = if idx == 0 { label.clone() } else { String::new() };
                rows.push(vec![
                    day_cell,
                    self.paint(colored.task.id.as_str(), "33"),
                    self.swatch(&tag_name(state, &colored.task.tag), &colored.color),
                    self.task_label(&colored.task.name, colored.task.complete, colored.task.in_focus),
                ]);
                for subtask in colored
                    .subtasks
                    .iter()
                    .filter(|s| show_completed || !s.complete)
                {
                    rows.push(self.subtask_row(subtask));
                }
            }
        }
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip_all)]
    pub fn print_focus(&self, focus: &[FocusTask], state: &State) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_focus(&mut out, focus, state)
    }

    pub fn write_focus<W: Write>(
        &self,
        mut out: W,
        focus: &[FocusTask],
        state: &State,
    ) -> anyhow::Result<()> {
        if focus.is_empty() {
            writeln!(out, "Nothing in focus.")?;
            return Ok(());
        }
        let headers = vec![
            "Due".to_string(),
            "ID".to_string(),
            "Tag".to_string(),
            "Task".to_string(),
        ];
        let colors = state.color_config();
        let mut rows = Vec::new();
        for item in focus {
            let task = &item.filtered.task;
            let color = colors.get(&task.tag).cloned().unwrap_or_default();
            rows.push(vec![
                state.date_key(&task.date).format("%-m/%-d/%Y").to_string(),
                self.paint(task.id.as_str(), "33"),
                self.swatch(&tag_name(state, &task.tag), &color),
                self.task_label(&task.name, task.complete, task.in_focus),
            ]);
            for subtask in &item.filtered.subtasks {
                rows.push(self.subtask_row(subtask));
            }
        }
        write_table(&mut out, headers, rows)
    }

    /// Failed persistence calls, newest
    /// last.
    pub fn print_failures(&self, failures: &[SyncFailure]) -> anyhow::Result<()> {
        let mut err = io::stderr().lock();
        for failure in failures {
            writeln!(
                err,
                "{} {:?} of {} did not persist: {}",
                self.paint("sync:", "31"),
                failure.op,
                failure.entity,
                failure.message
            )?;
        }
        Ok(())
    }

    fn subtask_row(&self, subtask: &SubTask) -> Vec<String> {
        vec![
            String::new(),
            self.paint(&format!("  {}", subtask.id), "2"),
            String::new(),
            format!(
                "  └ {}",
                self.task_label(&subtask.name, subtask.complete, subtask.in_focus)
            ),
        ]
    }

    fn task_label(&self, name: &str, complete: bool, in_focus: bool) -> String {
        let mut label = String::new();
        label.push_str(if complete { "[x] " } else { "[ ] " });
        if complete {
            label.push_str(&self.paint(name, "9"));
        } else {
            label.push_str(name);
        }
        if in_focus {
            label.push(' ');
            label.push_str(&self.paint("*", "35"));
        }
        label
    }

    fn swatch(&self, text: &str, color: &str) -> String {
        match parse_hex_color(color) {
            Some((r, g, b)) => self.paint(text, &format!("38;2;{r};{g};{b}")),
            None => text.to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn tag_name(state: &State, id: &Id) -> String {
    state
        .tag(id)
        .map(|t: &Tag| t.name.clone())
        .unwrap_or_else(|| id.to_string())
}

fn parse_hex_color(raw: &str) -> Option<(u8, u8, u8)> {
    let hex = raw.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_pads_by_display_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["A".to_string(), "B".to_string()],
            vec![
                vec!["日本".to_string(), "x".to_string()],
                vec!["\x1b[33mab\x1b[0m".to_string(), "y".to_string()],
            ],
        )
        .expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "A    B ");
        assert_eq!(lines[2], "日本 x ");
        assert_eq!(strip_ansi(lines[3]), "ab   y ");
    }

    #[test]
    fn hex_colors_parse() {
        assert_eq!(parse_hex_color("#ff0080"), Some((255, 0, 128)));
        assert_eq!(parse_hex_color("red"), None);
        assert_eq!(parse_hex_color("#fff"), None);
    }

    #[test]
    fn completed_and_focused_labels() {
        let r = Renderer::plain();
        assert_eq!(r.task_label("essay", true, false), "[x] essay");
        assert_eq!(r.task_label("essay", false, true), "[ ] essay *");
    }
}
