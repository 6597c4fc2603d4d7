use crate::model::{
  BannerMessageStatus,
  Id,
  Settings,
  SubTask,
  Tag,
  Task,
  TaskWithSubTasks
};
use crate::state::{
  SyncFailure,
  UndoCache
};

/// Every state transition the reducer
/// knows about. Patch families carry
/// disjoint created/edited/deleted
/// batches.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
  PatchTags {
    created: Vec<Tag>,
    edited:  Vec<Tag>,
    deleted: Vec<Id>
  },
  PatchTasks {
    created: Vec<Task>,
    edited:  Vec<Task>,
    deleted: Vec<Id>
  },
  PatchSubTasks {
    created: Vec<SubTask>,
    edited:  Vec<SubTask>,
    deleted: Vec<Id>
  },
  PatchSettings {
    settings: Settings
  },
  PatchBannerMessages {
    change: BannerMessageStatus
  },
  /// Replaces the undo cache, e.g. with
  /// the one saved by a previous run.
  PatchUndo {
    cache: UndoCache
  },
  BackendPatchLoadedData {
    tags:     Vec<Tag>,
    tasks:    Vec<Task>,
    subtasks: Vec<SubTask>
  },

  AddTag {
    tag: Tag
  },
  EditTag {
    tag: Tag
  },
  RemoveTag {
    id: Id
  },
  AddNewTask {
    item: TaskWithSubTasks
  },
  AddSubTask {
    task_id: Id,
    subtask: SubTask
  },
  EditTask {
    item: TaskWithSubTasks
  },
  MarkTask {
    id:       Id,
    complete: bool
  },
  MarkSubTask {
    task_id:    Id,
    subtask_id: Id,
    complete:   bool
  },
  TogglePin {
    id:       Id,
    in_focus: bool
  },
  ToggleSubTaskPin {
    task_id:    Id,
    subtask_id: Id,
    in_focus:   bool
  },
  RemoveTask {
    id: Id
  },
  RemoveSubTask {
    task_id:    Id,
    subtask_id: Id
  },
  /// Restores the cached task under fresh
  /// temporary ids; the old server ids
  /// are gone. `subtask_ids` pairs up with
  /// the cached subtasks in order.
  UndoDelete {
    task_id:     Id,
    subtask_ids: Vec<Id>
  },

  /// Server answer for a tag. `local_id`
  /// is the id the tag had when the call
  /// went out.
  BackendPatchTag {
    local_id:  Id,
    canonical: Tag,
    version:   u64
  },
  BackendPatchTask {
    local_id:  Id,
    canonical: Task,
    version:   u64
  },
  /// `version` is the parent task's
  /// version at call time.
  BackendPatchSubTask {
    local_id:  Id,
    canonical: SubTask,
    version:   u64
  },
  /// The backend confirmed a delete; no
  /// call refers to `id` any more.
  BackendDeleted {
    id: Id
  },
  SyncFailed {
    failure:  SyncFailure,
    rollback: Option<Rollback>
  },

  Batch(Vec<Action>)
}

/// Undo of an optimistic change, applied
/// only while the guarded entity is still
/// at the version the call was made for.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollback {
  pub guard:   Id,
  pub version: u64,
  pub action:  Box<Action>
}

impl Rollback {
  pub fn new(
    guard: Id,
    version: u64,
    action: Action
  ) -> Self {
    Self {
      guard,
      version,
      action: Box::new(action)
    }
  }
}

pub fn patch_tags(
  created: Vec<Tag>,
  edited: Vec<Tag>,
  deleted: Vec<Id>
) -> Action {
  Action::PatchTags {
    created,
    edited,
    deleted
  }
}

pub fn patch_tasks(
  created: Vec<Task>,
  edited: Vec<Task>,
  deleted: Vec<Id>
) -> Action {
  Action::PatchTasks {
    created,
    edited,
    deleted
  }
}

pub fn patch_subtasks(
  created: Vec<SubTask>,
  edited: Vec<SubTask>,
  deleted: Vec<Id>
) -> Action {
  Action::PatchSubTasks {
    created,
    edited,
    deleted
  }
}

impl Action {
  /// Short name used in logs.
  pub fn kind(&self) -> &'static str {
    match self {
      | Action::PatchTags { .. } => "PATCH_TAGS",
      | Action::PatchTasks { .. } => "PATCH_TASKS",
      | Action::PatchSubTasks { .. } => "PATCH_SUBTASKS",
      | Action::PatchSettings { .. } => "PATCH_SETTINGS",
      | Action::PatchBannerMessages { .. } => {
        "PATCH_BANNER_MESSAGES"
      }
      | Action::PatchUndo { .. } => "PATCH_UNDO",
      | Action::BackendPatchLoadedData { .. } => {
        "BACKEND_PATCH_LOADED_DATA"
      }
      | Action::AddTag { .. } => "ADD_TAG",
      | Action::EditTag { .. } => "EDIT_TAG",
      | Action::RemoveTag { .. } => "REMOVE_TAG",
      | Action::AddNewTask { .. } => "ADD_NEW_TASK",
      | Action::AddSubTask { .. } => "ADD_SUBTASK",
      | Action::EditTask { .. } => "EDIT_TASK",
      | Action::MarkTask { .. } => "MARK_TASK",
      | Action::MarkSubTask { .. } => "MARK_SUBTASK",
      | Action::TogglePin { .. } => "TOGGLE_TASK_PIN",
      | Action::ToggleSubTaskPin { .. } => {
        "TOGGLE_SUBTASK_PIN"
      }
      | Action::RemoveTask { .. } => "REMOVE_TASK",
      | Action::RemoveSubTask { .. } => "REMOVE_SUBTASK",
      | Action::UndoDelete { .. } => "UNDO_DELETE",
      | Action::BackendPatchTag { .. } => "BACKEND_PATCH_TAG",
      | Action::BackendPatchTask { .. } => "BACKEND_PATCH_TASK",
      | Action::BackendPatchSubTask { .. } => {
        "BACKEND_PATCH_SUBTASK"
      }
      | Action::BackendDeleted { .. } => "BACKEND_DELETED",
      | Action::SyncFailed { .. } => "SYNC_FAILED",
      | Action::Batch(_) => "BATCH"
    }
  }
}
