use crate::model::TaskWithSubTasks;
use crate::state::State;

/// A task as it appears in the focus
/// list. `filtered` keeps only what is in
/// focus; `original` is the full task.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusTask {
  pub original: TaskWithSubTasks,
  pub filtered: TaskWithSubTasks
}

/// Tasks that are in focus with all their
/// subtasks, and tasks with focused
/// subtasks showing only those. Ordered
/// by date, then id.
pub fn focus_view(state: &State) -> Vec<FocusTask> {
  let mut out: Vec<FocusTask> = state
    .tasks()
    .keys()
    .filter_map(|id| state.task_with_subtasks(id))
    .filter_map(|original| {
      if original.task.in_focus {
        return Some(FocusTask {
          filtered: original.clone(),
          original
        });
      }
      let subtasks: Vec<_> = original
        .subtasks
        .iter()
        .filter(|s| s.in_focus)
        .cloned()
        .collect();
      if subtasks.is_empty() {
        return None;
      }
      Some(FocusTask {
        filtered: TaskWithSubTasks {
          task: original.task.clone(),
          subtasks
        },
        original
      })
    })
    .collect();
  out.sort_by(|a, b| {
    a.original
      .task
      .date
      .cmp(&b.original.task.date)
      .then_with(|| {
        a.original.task.id.cmp(&b.original.task.id)
      })
  });
  out
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    Utc
  };

  use super::*;
  use crate::action::{
    patch_subtasks,
    patch_tasks
  };
  use crate::model::{
    Id,
    SubTask,
    Task
  };
  use crate::reducer::reduce;

  fn task(
    id: &str,
    days: i64,
    in_focus: bool
  ) -> Task {
    Task {
      id: Id::from(id),
      name: id.to_string(),
      tag: Id::none_tag(),
      date: Utc::now() + Duration::days(days),
      complete: false,
      in_focus
    }
  }

  fn subtask(
    id: &str,
    parent: &str,
    in_focus: bool
  ) -> SubTask {
    SubTask {
      id: Id::from(id),
      parent: Id::from(parent),
      order: 0,
      name: id.to_string(),
      complete: false,
      in_focus
    }
  }

  #[test]
  fn focus_lists_whole_tasks_and_focused_subtasks() {
    let state = reduce(
      reduce(
        State::default(),
        &patch_tasks(
          vec![
            task("late", 3, true),
            task("early", 1, false),
            task("hidden", 0, false),
          ],
          vec![],
          vec![]
        )
      ),
      &patch_subtasks(
        vec![
          subtask("e1", "early", true),
          subtask("e2", "early", false),
          subtask("l1", "late", false),
        ],
        vec![],
        vec![]
      )
    );

    let view = focus_view(&state);
    let ids: Vec<&str> = view
      .iter()
      .map(|f| f.original.task.id.as_str())
      .collect();
    assert_eq!(ids, vec!["early", "late"]);
    assert_eq!(view[0].filtered.subtasks.len(), 1);
    assert_eq!(view[0].original.subtasks.len(), 2);
    assert_eq!(view[1].filtered.subtasks.len(), 1);
  }
}
