use thiserror::Error;

use crate::model::Id;

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("the user has not logged in yet")]
  NotLoggedIn,

  #[error(
    "corrupted backend: subtask {subtask} references missing task {parent}"
  )]
  CorruptedBackend { subtask: Id, parent: Id },

  #[error("unknown task: {0}")]
  UnknownTask(Id),

  #[error("unknown subtask {subtask} in task {task}")]
  UnknownSubTask { task: Id, subtask: Id },

  #[error("unknown tag: {0}")]
  UnknownTag(Id),

  #[error("the None tag cannot be edited or removed")]
  ProtectedTag,

  #[error(
    "inconsistent id of old task ({old}) and new task ({new})"
  )]
  InconsistentEdit { old: Id, new: Id },

  #[error("{0} has no server id yet")]
  NotPersisted(Id),

  #[error("request to {endpoint} failed: {message}")]
  Http { endpoint: String, message: String }
}
