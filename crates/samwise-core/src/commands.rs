use std::path::Path;

use anyhow::{Context, anyhow, bail};
use chrono::Utc;
use chrono_tz::Tz;
use tracing::{debug, info, instrument};

use crate::action::Action;
use crate::backend::local::{load_undo_cache, save_undo_cache};
use crate::backend::{Backend, LocalBackend, RestBackend};
use crate::calendar::{
    DisplayMode, backlog_header_title, build_days_in_backlog, count_tasks,
};
use crate::cli::Command;
use crate::config::{BackendChoice, Config};
use crate::datetime::{local_today, parse_date_expr};
use crate::error::SyncError;
use crate::focus::focus_view;
use crate::model::{Id, SubTask, TaskDraft};
use crate::render::Renderer;
use crate::state::State;
use crate::store::{Session, Store};
use crate::sync::SyncCoordinator;

pub const UNDO_FILE: &str = "undo.data";

/// Runs one CLI command against the
/// configured backend on a single-threaded
/// runtime.
#[instrument(skip(cfg, data_dir, renderer, command))]
pub fn execute(
    cfg: &Config,
    data_dir: &Path,
    timezone: Tz,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        match cfg.backend() {
            BackendChoice::Local => {
                let backend = LocalBackend::open(data_dir)?;
                let session = Session::local(cfg.user());
                run_session(backend, session, cfg, data_dir, timezone, renderer, command).await
            }
            BackendChoice::Rest { url, token } => {
                info!(url = %url, "using REST backend");
                let backend = RestBackend::new(&url, token.clone())?;
                let session = Session {
                    user: cfg.user(),
                    token,
                };
                run_session(backend, session, cfg, data_dir, timezone, renderer, command).await
            }
        }
    })
}

async fn run_session<B: Backend>(
    backend: B,
    session: Session,
    cfg: &Config,
    data_dir: &Path,
    timezone: Tz,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let sync = SyncCoordinator::new(Store::new(timezone).shared(), backend);
    sync.initialize(session)
        .await
        .context("failed to load tasks from the backend")?;

    let undo_path = data_dir.join(UNDO_FILE);
    let cache = load_undo_cache(&undo_path)?;
    sync.store().lock().dispatch(Action::PatchUndo { cache });

    let result = apply(&sync, cfg, renderer, timezone, command).await;
    sync.settle().await;

    let state = sync.snapshot();
    save_undo_cache(&undo_path, state.undo())
        .with_context(|| format!("failed to save {}", undo_path.display()))?;

    let failures = state.sync_failures();
    if !failures.is_empty() {
        renderer.print_failures(failures)?;
        if result.is_ok() {
            bail!("{} change(s) did not persist", failures.len());
        }
    }
    result
}

async fn apply<B: Backend>(
    sync: &SyncCoordinator<B>,
    cfg: &Config,
    renderer: &Renderer,
    timezone: Tz,
    command: Command,
) -> anyhow::Result<()> {
    let now = Utc::now();
    debug!(?command, "dispatching command");

    match command {
        Command::Tags => renderer.print_tags(&sync.snapshot()),
        Command::TagAdd {
            name,
            color,
            class_id,
        } => {
            let name = name.join(" ");
            match sync.add_tag(&name, &color, class_id) {
                Some(_) => println!("Added tag '{}'.", name.trim()),
                None => println!("Nothing added: the tag name is empty."),
            }
            Ok(())
        }
        Command::TagEdit { tag, name, color } => {
            let state = sync.snapshot();
            let id = resolve_tag(&state, &tag)?;
            let mut edited = state
                .tag(&id)
                .cloned()
                .ok_or_else(|| SyncError::UnknownTag(id.clone()))?;
            if let Some(name) = name {
                edited.name = name;
            }
            if let Some(color) = color {
                edited.color = color;
            }
            sync.edit_tag(edited)?;
            println!("Updated tag {id}.");
            Ok(())
        }
        Command::TagRm { tag } => {
            let id = resolve_tag(&sync.snapshot(), &tag)?;
            sync.remove_tag(&id)?;
            println!("Removed tag {id}; its tasks moved to None.");
            Ok(())
        }
        Command::Add {
            name,
            date,
            tag,
            subtasks,
            pin,
        } => {
            let date = parse_date_expr(&date, now, timezone)?;
            let mut draft = TaskDraft::new(name.join(" "), date);
            if let Some(tag) = tag {
                draft = draft.with_tag(resolve_tag(&sync.snapshot(), &tag)?);
            }
            for subtask in subtasks {
                draft = draft.with_subtask(subtask);
            }
            if pin {
                draft = draft.pinned();
            }
            let label = draft.name.trim().to_string();
            match sync.add_task(draft)? {
                Some(_) => println!("Added task '{label}'."),
                None => println!("Nothing added: the task name is empty."),
            }
            Ok(())
        }
        Command::Edit {
            id,
            name,
            date,
            tag,
            add_subtasks,
            drop_subtasks,
        } => {
            let state = sync.snapshot();
            let id = Id::from(id.as_str());
            let mut item = state
                .task_with_subtasks(&id)
                .ok_or_else(|| SyncError::UnknownTask(id.clone()))?;
            if let Some(name) = name {
                item.task.name = name;
            }
            if let Some(date) = date {
                item.task.date = parse_date_expr(&date, now, timezone)?;
            }
            if let Some(tag) = tag {
                item.task.tag = resolve_tag(&state, &tag)?;
            }
            for raw in drop_subtasks {
                let sub_id = Id::from(raw.as_str());
                let before = item.subtasks.len();
                item.subtasks.retain(|s| s.id != sub_id);
                if item.subtasks.len() == before {
                    return Err(SyncError::UnknownSubTask {
                        task: id.clone(),
                        subtask: sub_id,
                    }
                    .into());
                }
            }
            let mut order = item.subtasks.iter().map(|s| s.order + 1).max().unwrap_or(0);
            for name in add_subtasks {
                item.subtasks.push(SubTask {
                    id: Id::temp(),
                    parent: id.clone(),
                    order,
                    name,
                    complete: false,
                    in_focus: false,
                });
                order += 1;
            }
            sync.edit_task(item).await?;
            println!("Updated task {id}.");
            Ok(())
        }
        Command::Done { id } => {
            let id = Id::from(id.as_str());
            sync.mark_task(&id, true)?;
            println!("Completed task {id}.");
            Ok(())
        }
        Command::Undone { id } => {
            let id = Id::from(id.as_str());
            sync.mark_task(&id, false)?;
            println!("Reopened task {id}.");
            Ok(())
        }
        Command::Pin { id } => {
            let id = Id::from(id.as_str());
            sync.toggle_task_pin(&id, true)?;
            println!("Task {id} is in focus.");
            Ok(())
        }
        Command::Unpin { id } => {
            let id = Id::from(id.as_str());
            sync.toggle_task_pin(&id, false)?;
            println!("Task {id} is out of focus.");
            Ok(())
        }
        Command::SubAdd { task, name } => {
            let task = Id::from(task.as_str());
            let name = name.join(" ");
            match sync.add_subtask(&task, &name)? {
                Some(_) => println!("Added subtask '{}' to task {task}.", name.trim()),
                None => println!("Nothing added: the subtask name is empty."),
            }
            Ok(())
        }
        Command::SubDone { task, subtask } => {
            let (task, subtask) = (Id::from(task.as_str()), Id::from(subtask.as_str()));
            sync.mark_subtask(&task, &subtask, true)?;
            println!("Completed subtask {subtask}.");
            Ok(())
        }
        Command::SubUndone { task, subtask } => {
            let (task, subtask) = (Id::from(task.as_str()), Id::from(subtask.as_str()));
            sync.mark_subtask(&task, &subtask, false)?;
            println!("Reopened subtask {subtask}.");
            Ok(())
        }
        Command::SubPin { task, subtask } => {
            let (task, subtask) = (Id::from(task.as_str()), Id::from(subtask.as_str()));
            sync.toggle_subtask_pin(&task, &subtask, true)?;
            println!("Subtask {subtask} is in focus.");
            Ok(())
        }
        Command::SubUnpin { task, subtask } => {
            let (task, subtask) = (Id::from(task.as_str()), Id::from(subtask.as_str()));
            sync.toggle_subtask_pin(&task, &subtask, false)?;
            println!("Subtask {subtask} is out of focus.");
            Ok(())
        }
        Command::SubRm { task, subtask } => {
            let (task, subtask) = (Id::from(task.as_str()), Id::from(subtask.as_str()));
            sync.remove_subtask(&task, &subtask)?;
            println!("Removed subtask {subtask}.");
            Ok(())
        }
        Command::Rm { id } => {
            let id = Id::from(id.as_str());
            sync.remove_task(&id)?;
            println!("Removed task {id}. Run `samwise undo` to restore it.");
            Ok(())
        }
        Command::Undo => {
            match sync.undo_delete() {
                Some(_) => println!("Restored the last deleted task."),
                None => println!("Nothing to undo."),
            }
            Ok(())
        }
        Command::Backlog { mode, offset, all } => {
            let mode = resolve_mode(cfg, mode.as_deref())?;
            let state = sync.snapshot();
            let today = local_today(now, timezone);
            let days = build_days_in_backlog(&state, &state.color_config(), mode, offset, today);
            let title = backlog_header_title(mode, offset, today);
            renderer.print_backlog(&title, &days, &state, all)
        }
        Command::Focus => {
            let state = sync.snapshot();
            renderer.print_focus(&focus_view(&state), &state)
        }
        Command::Count {
            mode,
            offset,
            no_subtasks,
            completed,
        } => {
            let mode = resolve_mode(cfg, mode.as_deref())?;
            let state = sync.snapshot();
            let today = local_today(now, timezone);
            let tasks: Vec<_> =
                build_days_in_backlog(&state, &state.color_config(), mode, offset, today)
                    .into_iter()
                    .flat_map(|day| day.tasks)
                    .collect();
            println!("{}", count_tasks(&tasks, !no_subtasks, completed));
            Ok(())
        }
    }
}

fn resolve_mode(cfg: &Config, raw: Option<&str>) -> anyhow::Result<DisplayMode> {
    match raw {
        Some(raw) => DisplayMode::parse(raw).ok_or_else(|| {
            anyhow!("invalid mode {raw:?}; expected four-days, biweekly or monthly")
        }),
        None => cfg.backlog_mode(),
    }
}

/// Finds a tag by id, or by name ignoring
/// case.
fn resolve_tag(state: &State, raw: &str) -> anyhow::Result<Id> {
    let by_id = Id::from(raw);
    if state.tag(&by_id).is_some() {
        return Ok(by_id);
    }
    let wanted = raw.trim().to_lowercase();
    let mut matches = state
        .tags()
        .values()
        .filter(|t| t.name.to_lowercase() == wanted);
    match (matches.next(), matches.next()) {
        (Some(tag), None) => Ok(tag.id.clone()),
        (Some(_), Some(_)) => Err(anyhow!("tag name {raw:?} is ambiguous; use its id")),
        (None, _) => Err(SyncError::UnknownTag(by_id).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::patch_tags;
    use crate::model::Tag;
    use crate::reducer::reduce;

    fn tag(id: &str, name: &str) -> Tag {
        Tag {
            id: Id::from(id),
            name: name.to_string(),
            color: "#123456".to_string(),
            class_id: None,
        }
    }

    #[test]
    fn tags_resolve_by_id_or_name() {
        let state = reduce(
            State::default(),
            &patch_tags(
                vec![tag("1", "CS 2112"), tag("2", "Gym"), tag("3", "gym")],
                vec![],
                vec![],
            ),
        );
        assert_eq!(resolve_tag(&state, "1").expect("by id"), Id::from("1"));
        assert_eq!(resolve_tag(&state, "cs 2112").expect("by name"), Id::from("1"));
        assert_eq!(resolve_tag(&state, "none").expect("none tag"), Id::none_tag());
        assert!(resolve_tag(&state, "gym").is_err());
        assert!(resolve_tag(&state, "missing").is_err());
    }
}
