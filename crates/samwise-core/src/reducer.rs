//! Pure state transitions. Nothing here
//! performs I/O; persistence belongs to
//! [`crate::sync`].

use std::collections::BTreeSet;

use tracing::{
  trace,
  warn
};

use crate::action::Action;
use crate::model::{
  Id,
  SubTask,
  Tag,
  Task,
  TaskWithSubTasks
};
use crate::state::{
  State,
  SyncOp
};

pub fn reduce(
  mut state: State,
  action: &Action
) -> State {
  trace!(kind = action.kind(), "reduce");
  match action {
    | Action::PatchTags {
      created,
      edited,
      deleted
    } => {
      for tag in created.iter().chain(edited) {
        state.upsert_tag(tag.clone());
      }
      for id in deleted {
        state.remove_tag(id);
      }
    }
    | Action::PatchTasks {
      created,
      edited,
      deleted
    } => {
      for task in created.iter().chain(edited) {
        state.upsert_task(task.clone());
      }
      for id in deleted {
        if state.remove_task(id).is_none() {
          trace!(task = %id, "deleted task was already gone");
        }
      }
    }
    | Action::PatchSubTasks {
      created,
      edited,
      deleted
    } => {
      for subtask in created.iter().chain(edited)
      {
        insert_subtask(&mut state, subtask.clone());
      }
      for id in deleted {
        state.remove_subtask(id);
      }
    }
    | Action::PatchSettings { settings } => {
      state.settings = settings.clone();
    }
    | Action::PatchBannerMessages { change } => {
      state.banner_message_status.extend(
        change
          .iter()
          .map(|(k, v)| (k.clone(), *v))
      );
    }
    | Action::PatchUndo { cache } => {
      state.undo = cache.clone();
    }
    | Action::BackendPatchLoadedData {
      tags,
      tasks,
      subtasks
    } => {
      state = load(state, tags, tasks, subtasks);
    }
    | Action::AddTag { tag } => {
      state.upsert_tag(tag.clone());
      state.bump(&tag.id);
      state.pending_creates.insert(tag.id.clone());
    }
    | Action::EditTag { tag } => {
      if tag.is_none_tag()
        || !state.tags.contains_key(&tag.id)
      {
        warn!(tag = %tag.id, "ignoring edit of unknown or protected tag");
      } else {
        state.upsert_tag(tag.clone());
        state.bump(&tag.id);
      }
    }
    | Action::RemoveTag { id } => {
      if state.remove_tag(id).is_some() {
        state.bump(id);
      }
    }
    | Action::AddNewTask { item } => {
      state.replace_task_with_subtasks(item);
      state.bump(&item.task.id);
      state
        .pending_creates
        .insert(item.task.id.clone());
      for id in item.subtask_ids() {
        state.pending_creates.insert(id.clone());
      }
    }
    | Action::AddSubTask { task_id, subtask } => {
      let mut subtask = subtask.clone();
      subtask.parent = task_id.clone();
      let id = subtask.id.clone();
      if insert_subtask(&mut state, subtask) {
        state.bump(task_id);
        state.pending_creates.insert(id);
      }
    }
    | Action::EditTask { item } => {
      state = edit_task(state, item);
    }
    | Action::MarkTask { id, complete } => {
      if let Some(mut item) =
        state.task_with_subtasks(id)
      {
        item.set_complete(*complete);
        state.replace_task_with_subtasks(&item);
        state.bump(id);
      }
    }
    | Action::MarkSubTask {
      task_id,
      subtask_id,
      complete
    } => {
      if let Some(mut subtask) =
        owned_subtask(&state, task_id, subtask_id)
      {
        subtask.complete = *complete;
        state.upsert_subtask(subtask);
        state.bump(task_id);
      }
    }
    | Action::TogglePin { id, in_focus } => {
      if let Some(mut item) =
        state.task_with_subtasks(id)
      {
        item.set_in_focus(*in_focus);
        state.replace_task_with_subtasks(&item);
        state.bump(id);
      }
    }
    | Action::ToggleSubTaskPin {
      task_id,
      subtask_id,
      in_focus
    } => {
      if let Some(mut subtask) =
        owned_subtask(&state, task_id, subtask_id)
      {
        subtask.in_focus = *in_focus;
        state.upsert_subtask(subtask);
        if *in_focus
          && let Some(parent) =
            state.tasks.get(task_id)
          && parent.in_focus
        {
          let mut parent = parent.clone();
          parent.in_focus = false;
          state.upsert_task(parent);
        }
        state.bump(task_id);
      }
    }
    | Action::RemoveTask { id } => {
      if let Some(removed) = state.remove_task(id)
      {
        state.undo.last_deleted = Some(removed);
        state.bump(id);
      }
    }
    | Action::RemoveSubTask {
      task_id,
      subtask_id
    } => {
      if owned_subtask(&state, task_id, subtask_id)
        .is_some()
      {
        state.remove_subtask(subtask_id);
        state.bump(task_id);
      }
    }
    | Action::UndoDelete {
      task_id,
      subtask_ids
    } => {
      let restored = state
        .undo
        .last_deleted
        .as_ref()
        .and_then(|cached| {
          cached.rekeyed(task_id, subtask_ids)
        });
      match restored {
        | Some(item) => {
          state.undo.last_deleted = None;
          state.replace_task_with_subtasks(&item);
          state.bump(&item.task.id);
          state
            .pending_creates
            .insert(item.task.id.clone());
          for id in item.subtask_ids() {
            state.pending_creates.insert(id.clone());
          }
        }
        | None => {
          trace!("nothing to undo");
        }
      }
    }
    | Action::BackendPatchTag {
      local_id,
      canonical,
      version
    } => {
      state = reconcile_tag(
        state, local_id, canonical, *version
      );
    }
    | Action::BackendPatchTask {
      local_id,
      canonical,
      version
    } => {
      state = reconcile_task(
        state, local_id, canonical, *version
      );
    }
    | Action::BackendPatchSubTask {
      local_id,
      canonical,
      version
    } => {
      state = reconcile_subtask(
        state, local_id, canonical, *version
      );
    }
    | Action::BackendDeleted { id } => {
      state.forget(id);
    }
    | Action::SyncFailed { failure, rollback } => {
      if failure.op == SyncOp::Create {
        state.pending_creates.remove(&failure.entity);
      }
      state.push_failure(failure.clone());
      if let Some(rollback) = rollback {
        let current = state.version(&rollback.guard);
        if current == rollback.version {
          state = reduce(state, &rollback.action);
        } else {
          trace!(
            entity = %rollback.guard,
            current,
            expected = rollback.version,
            "skipping rollback; entity changed since"
          );
        }
      }
      if failure.op == SyncOp::Create {
        state.forget(&failure.entity);
      }
    }
    | Action::Batch(actions) => {
      for action in actions {
        state = reduce(state, action);
      }
    }
  }
  state
}

fn insert_subtask(
  state: &mut State,
  subtask: SubTask
) -> bool {
  let id = subtask.id.clone();
  let parent = subtask.parent.clone();
  let inserted = state.upsert_subtask(subtask);
  if !inserted {
    warn!(subtask = %id, parent = %parent, "dropping subtask without a parent task");
  }
  inserted
}

fn owned_subtask(
  state: &State,
  task_id: &Id,
  subtask_id: &Id
) -> Option<SubTask> {
  state
    .subtask(subtask_id)
    .filter(|s| &s.parent == task_id)
    .cloned()
}

fn load(
  state: State,
  tags: &[Tag],
  tasks: &[Task],
  subtasks: &[SubTask]
) -> State {
  let mut fresh = State::new(state.timezone);
  fresh.settings = state.settings;
  fresh.banner_message_status =
    state.banner_message_status;
  fresh.undo = state.undo;
  for tag in tags {
    fresh.upsert_tag(tag.clone());
  }
  for task in tasks {
    fresh.upsert_task(task.clone());
  }
  for subtask in subtasks {
    insert_subtask(&mut fresh, subtask.clone());
  }
  fresh
}

fn edit_task(
  mut state: State,
  item: &TaskWithSubTasks
) -> State {
  let id = &item.task.id;
  let Some(previous) = state.task_with_subtasks(id)
  else {
    warn!(task = %id, "ignoring edit of unknown task");
    return state;
  };

  let mut next = item.clone();
  if previous.task.complete != next.task.complete {
    next.set_complete(next.task.complete);
  }
  if !previous.task.in_focus && next.task.in_focus {
    next.set_in_focus(true);
  }

  let known: BTreeSet<&Id> =
    previous.subtask_ids().collect();
  let created: Vec<Id> = next
    .subtask_ids()
    .filter(|sid| !known.contains(sid))
    .cloned()
    .collect();

  state.replace_task_with_subtasks(&next);
  state.pending_creates.extend(created);
  state.bump(id);
  state
}

fn reconcile_tag(
  mut state: State,
  local_id: &Id,
  canonical: &Tag,
  version: u64
) -> State {
  if !state.tags.contains_key(local_id) {
    state.pending_creates.remove(local_id);
    state.forget(local_id);
    return state;
  }
  let fresh = state.version(local_id) == version;
  state.remap_tag_id(local_id, &canonical.id);
  if fresh {
    state.upsert_tag(canonical.clone());
  }
  state
}

fn reconcile_task(
  mut state: State,
  local_id: &Id,
  canonical: &Task,
  version: u64
) -> State {
  if !state.tasks.contains_key(local_id) {
    state.pending_creates.remove(local_id);
    state.forget(local_id);
    return state;
  }
  let fresh = state.version(local_id) == version;
  state.remap_task_id(local_id, &canonical.id);
  if fresh {
    let mut canonical = canonical.clone();
    if let Some(local) = state.task(&canonical.id)
      && state.tag(&canonical.tag).is_none()
    {
      trace!(
        task = %canonical.id,
        tag = %canonical.tag,
        "server echoed a stale tag id; keeping the local one"
      );
      canonical.tag = local.tag.clone();
    }
    state.upsert_task(canonical);
  } else {
    trace!(
      task = %canonical.id,
      "keeping newer local fields over server response"
    );
  }
  state
}

fn reconcile_subtask(
  mut state: State,
  local_id: &Id,
  canonical: &SubTask,
  version: u64
) -> State {
  let Some(parent) = state
    .subtask(local_id)
    .map(|s| s.parent.clone())
  else {
    state.pending_creates.remove(local_id);
    return state;
  };
  let fresh = state.version(&parent) == version;
  state.remap_subtask_id(local_id, &canonical.id);
  if fresh {
    let mut canonical = canonical.clone();
    canonical.parent = parent;
    state.upsert_subtask(canonical);
  }
  state
}

#[cfg(test)]
mod tests {
  use chrono::{
    DateTime,
    Duration,
    TimeZone,
    Utc
  };

  use super::*;
  use crate::action::{
    Rollback,
    patch_subtasks,
    patch_tasks
  };
  use crate::state::SyncFailure;

  fn at(day: u32) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(2026, 10, day, 15, 0, 0)
      .single()
      .expect("valid date")
  }

  fn task(id: &str, day: u32) -> Task {
    Task {
      id:       Id::from(id),
      name:     format!("task {id}"),
      tag:      Id::none_tag(),
      date:     at(day),
      complete: false,
      in_focus: false
    }
  }

  fn subtask(
    id: &str,
    parent: &str,
    complete: bool,
    in_focus: bool
  ) -> SubTask {
    SubTask {
      id: Id::from(id),
      parent: Id::from(parent),
      order: 0,
      name: format!("sub {id}"),
      complete,
      in_focus
    }
  }

  fn with_subtasks() -> State {
    let state = reduce(
      State::default(),
      &patch_tasks(vec![task("1", 16)], vec![], vec![])
    );
    reduce(
      state,
      &patch_subtasks(
        vec![
          subtask("a", "1", true, false),
          subtask("b", "1", false, true),
        ],
        vec![],
        vec![]
      )
    )
  }

  #[test]
  fn patch_task_sequences_keep_date_index_consistent() {
    let mut state = State::default();
    let steps = vec![
      patch_tasks(
        vec![task("1", 16), task("2", 16), task("3", 17)],
        vec![],
        vec![]
      ),
      patch_tasks(vec![], vec![task("1", 18)], vec![]),
      patch_tasks(vec![], vec![task("2", 16)], vec![Id::from("3")]),
      patch_tasks(
        vec![task("4", 18)],
        vec![task("2", 20)],
        vec![Id::from("1")]
      ),
      patch_tasks(vec![], vec![], vec![Id::from("missing")]),
    ];
    for step in &steps {
      state = reduce(state, step);
      state
        .check_invariants()
        .expect("index stays consistent");
    }

    let day = |d: u32| state.date_key(&at(d));
    assert_eq!(state.tasks().len(), 2);
    assert!(state.date_task_map().get(&day(16)).is_none());
    assert_eq!(
      state.date_task_map().get(&day(18)),
      Some(&BTreeSet::from([Id::from("4")]))
    );
    assert_eq!(
      state.date_task_map().get(&day(20)),
      Some(&BTreeSet::from([Id::from("2")]))
    );
  }

  #[test]
  fn date_buckets_follow_the_store_timezone() {
    let tokyo = reduce(
      State::new(chrono_tz::Asia::Tokyo),
      &patch_tasks(vec![task("1", 16)], vec![], vec![])
    );
    let key = *tokyo
      .date_task_map()
      .keys()
      .next()
      .expect("one bucket");
    assert_eq!(key, at(17).date_naive());
  }

  #[test]
  fn deleting_a_task_removes_its_subtasks() {
    let state = reduce(
      with_subtasks(),
      &patch_tasks(vec![], vec![], vec![Id::from("1")])
    );
    assert_eq!(state.subtask_count(), 0);
    state.check_invariants().expect("consistent");
  }

  #[test]
  fn marking_a_task_cascades_to_subtasks() {
    let state = reduce(
      with_subtasks(),
      &Action::MarkTask {
        id:       Id::from("1"),
        complete: true
      }
    );
    let item = state
      .task_with_subtasks(&Id::from("1"))
      .expect("task");
    assert!(item.task.complete);
    assert!(item.subtasks.iter().all(|s| s.complete));

    let state = reduce(
      state,
      &Action::MarkTask {
        id:       Id::from("1"),
        complete: false
      }
    );
    let item = state
      .task_with_subtasks(&Id::from("1"))
      .expect("task");
    assert!(item.subtasks.iter().all(|s| !s.complete));
  }

  #[test]
  fn pinning_a_task_unfocuses_its_subtasks() {
    let state = reduce(
      with_subtasks(),
      &Action::TogglePin {
        id:       Id::from("1"),
        in_focus: true
      }
    );
    let item = state
      .task_with_subtasks(&Id::from("1"))
      .expect("task");
    assert!(item.task.in_focus);
    assert!(item.subtasks.iter().all(|s| !s.in_focus));
  }

  #[test]
  fn pinning_a_subtask_unpins_its_parent() {
    let state = reduce(
      with_subtasks(),
      &Action::TogglePin {
        id:       Id::from("1"),
        in_focus: true
      }
    );
    let state = reduce(
      state,
      &Action::ToggleSubTaskPin {
        task_id:    Id::from("1"),
        subtask_id: Id::from("a"),
        in_focus:   true
      }
    );
    assert!(!state.task(&Id::from("1")).expect("task").in_focus);
    assert!(state.subtask(&Id::from("a")).expect("sub").in_focus);
  }

  #[test]
  fn edit_task_moves_bucket_and_diffs_subtasks() {
    let state = with_subtasks();
    let mut item = state
      .task_with_subtasks(&Id::from("1"))
      .expect("task");
    item.task.date = at(16) + Duration::days(3);
    item.subtasks.retain(|s| s.id.as_str() != "a");
    item.subtasks.push(subtask("c", "1", false, false));

    let state = reduce(state, &Action::EditTask { item });
    state.check_invariants().expect("consistent");
    assert!(state.subtask(&Id::from("a")).is_none());
    assert!(state.subtask(&Id::from("c")).is_some());
    assert!(state.is_pending_create(&Id::from("c")));
    assert_eq!(state.tasks_on(at(19).date_naive()).len(), 1);
  }

  #[test]
  fn remove_then_undo_restores_and_second_undo_is_noop() {
    let state = reduce(
      with_subtasks(),
      &Action::RemoveTask { id: Id::from("1") }
    );
    assert!(state.task(&Id::from("1")).is_none());
    assert!(state.undo().last_deleted.is_some());

    let undo = Action::UndoDelete {
      task_id:     Id::from("tmp-restored"),
      subtask_ids: vec![
        Id::from("tmp-r1"),
        Id::from("tmp-r2"),
      ]
    };
    let restored = reduce(state, &undo);
    assert!(restored.task(&Id::from("1")).is_none());
    let back = restored
      .task(&Id::from("tmp-restored"))
      .expect("restored under the new id");
    assert_eq!(back.name, "task 1");
    assert_eq!(restored.subtask_count(), 2);
    assert!(
      restored
        .subtasks_of(&Id::from("tmp-restored"))
        .iter()
        .all(|s| s.id.is_temp())
    );
    assert!(restored.undo().last_deleted.is_none());
    assert!(restored.is_pending_create(&Id::from("tmp-restored")));
    assert!(restored.is_pending_create(&Id::from("tmp-r1")));
    restored.check_invariants().expect("consistent");

    let again = reduce(restored.clone(), &undo);
    assert_eq!(again, restored);
  }

  #[test]
  fn undo_never_overwrites_a_task_that_reused_the_old_id() {
    let mut state = reduce(
      with_subtasks(),
      &Action::RemoveTask { id: Id::from("1") }
    );
    state = reduce(state, &patch_tasks(
      vec![Task {
        name: "second".to_string(),
        ..task("1", 17)
      }],
      vec![],
      vec![]
    ));

    let state = reduce(state, &Action::UndoDelete {
      task_id:     Id::from("tmp-back"),
      subtask_ids: vec![
        Id::from("tmp-b1"),
        Id::from("tmp-b2"),
      ]
    });
    assert_eq!(
      state.task(&Id::from("1")).expect("live task").name,
      "second"
    );
    assert!(state.task(&Id::from("tmp-back")).is_some());
    state.check_invariants().expect("consistent");
  }

  #[test]
  fn undo_with_mismatched_ids_keeps_the_cache() {
    let state = reduce(
      with_subtasks(),
      &Action::RemoveTask { id: Id::from("1") }
    );
    let after = reduce(state.clone(), &Action::UndoDelete {
      task_id:     Id::from("tmp-x"),
      subtask_ids: vec![]
    });
    assert_eq!(after, state);
  }

  #[test]
  fn confirmed_delete_forgets_the_version() {
    let state = reduce(
      with_subtasks(),
      &Action::RemoveTask { id: Id::from("1") }
    );
    assert!(state.version(&Id::from("1")) > 0);

    let state = reduce(state, &Action::BackendDeleted {
      id: Id::from("1")
    });
    assert_eq!(state.version(&Id::from("1")), 0);
  }

  #[test]
  fn reconcile_replaces_temporary_ids_everywhere() {
    let local = Id::temp();
    let mut draft = task("ignored", 16);
    draft.id = local.clone();
    let item = TaskWithSubTasks {
      subtasks: vec![SubTask {
        parent: local.clone(),
        ..subtask("tmp-sub", "ignored", false, false)
      }],
      task:     draft.clone()
    };
    let state = reduce(State::default(), &Action::AddNewTask { item });
    let version = state.version(&local);

    let mut canonical = draft;
    canonical.id = Id::from("77");
    let state = reduce(
      state,
      &Action::BackendPatchTask {
        local_id: local.clone(),
        canonical,
        version
      }
    );
    state.check_invariants().expect("consistent");
    assert!(state.task(&local).is_none());
    assert!(state.task(&Id::from("77")).is_some());
    assert!(!state.is_pending_create(&local));
    assert_eq!(
      state
        .subtask(&Id::from("tmp-sub"))
        .expect("sub")
        .parent,
      Id::from("77")
    );
  }

  #[test]
  fn stale_reconcile_keeps_newer_local_fields() {
    let state = reduce(
      State::default(),
      &patch_tasks(vec![task("1", 16)], vec![], vec![])
    );
    let mut first = task("1", 16);
    first.name = "first".to_string();
    let state = reduce(
      state,
      &Action::EditTask {
        item: TaskWithSubTasks {
          task:     first.clone(),
          subtasks: vec![]
        }
      }
    );
    let first_version = state.version(&Id::from("1"));
    let mut second = first.clone();
    second.name = "second".to_string();
    let state = reduce(
      state,
      &Action::EditTask {
        item: TaskWithSubTasks {
          task:     second,
          subtasks: vec![]
        }
      }
    );

    let state = reduce(
      state,
      &Action::BackendPatchTask {
        local_id:  Id::from("1"),
        canonical: first,
        version:   first_version
      }
    );
    assert_eq!(
      state.task(&Id::from("1")).expect("task").name,
      "second"
    );
  }

  #[test]
  fn failed_create_rolls_back_when_version_matches() {
    let local = Id::temp();
    let mut draft = task("x", 16);
    draft.id = local.clone();
    let state = reduce(
      State::default(),
      &Action::AddNewTask {
        item: TaskWithSubTasks {
          task:     draft,
          subtasks: vec![]
        }
      }
    );
    let version = state.version(&local);
    let state = reduce(
      state,
      &Action::SyncFailed {
        failure:  SyncFailure {
          entity:  local.clone(),
          op:      SyncOp::Create,
          message: "offline".to_string(),
          at:      at(16)
        },
        rollback: Some(Rollback::new(
          local.clone(),
          version,
          patch_tasks(vec![], vec![], vec![local.clone()])
        ))
      }
    );
    assert!(state.tasks().is_empty());
    assert_eq!(state.sync_failures().len(), 1);
    assert!(!state.is_pending_create(&local));
    assert_eq!(state.version(&local), 0);
  }

  #[test]
  fn reconcile_keeps_the_local_tag_when_the_echo_is_stale() {
    let tag = Tag {
      id:       Id::from("tmp-tag"),
      name:     "CS 2112".to_string(),
      color:    "#ff0000".to_string(),
      class_id: None
    };
    let local = Id::from("tmp-task");
    let mut draft = task("ignored", 16);
    draft.id = local.clone();
    draft.tag = tag.id.clone();

    let state = reduce(State::default(), &Action::AddTag {
      tag: tag.clone()
    });
    let state = reduce(state, &Action::AddNewTask {
      item: TaskWithSubTasks {
        task:     draft.clone(),
        subtasks: vec![]
      }
    });
    let task_version = state.version(&local);
    let tag_version = state.version(&tag.id);
    let state = reduce(state, &Action::BackendPatchTag {
      local_id:  tag.id.clone(),
      canonical: Tag {
        id: Id::from("5"),
        ..tag.clone()
      },
      version:   tag_version
    });
    let state = reduce(state, &Action::BackendPatchTask {
      local_id:  local.clone(),
      canonical: Task {
        id: Id::from("6"),
        ..draft
      },
      version:   task_version
    });

    assert_eq!(
      state.task(&Id::from("6")).expect("task").tag,
      Id::from("5")
    );
    state.check_invariants().expect("consistent");
  }

  #[test]
  fn removing_a_tag_retags_tasks_to_none() {
    let tag = Tag {
      id:       Id::from("t1"),
      name:     "CS 2112".to_string(),
      color:    "#ff0000".to_string(),
      class_id: Some("cs2112".to_string())
    };
    let mut tagged = task("1", 16);
    tagged.tag = tag.id.clone();
    let state = reduce(
      State::default(),
      &Action::Batch(vec![
        Action::AddTag { tag: tag.clone() },
        patch_tasks(vec![tagged], vec![], vec![]),
        Action::RemoveTag { id: tag.id.clone() },
        Action::RemoveTag { id: Id::none_tag() },
      ])
    );
    assert_eq!(
      state.task(&Id::from("1")).expect("task").tag,
      Id::none_tag()
    );
    assert!(state.tag(&Id::none_tag()).is_some());
    state.check_invariants().expect("consistent");
  }

  #[test]
  fn orphan_subtasks_are_dropped() {
    let state = reduce(
      State::default(),
      &patch_subtasks(
        vec![subtask("a", "nope", false, false)],
        vec![],
        vec![]
      )
    );
    assert_eq!(state.subtask_count(), 0);
  }
}
