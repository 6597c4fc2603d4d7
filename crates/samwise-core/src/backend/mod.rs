//! Remote persistence. The coordinator is
//! written against [`Backend`] and treats
//! every implementation the same way:
//! create returns the record with its
//! server id, edit and delete return
//! nothing.

pub mod local;
pub mod rest;

use std::collections::BTreeSet;
use std::future::Future;

use crate::error::SyncError;
use crate::model::{
  Id,
  SubTask,
  Tag,
  Task
};

pub use local::LocalBackend;
pub use rest::RestBackend;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedData {
  pub tags:     Vec<Tag>,
  pub tasks:    Vec<Task>,
  pub subtasks: Vec<SubTask>
}

impl LoadedData {
  /// Refuses data where a subtask points
  /// at a task that does not exist.
  pub fn validate(&self) -> Result<(), SyncError> {
    let task_ids: BTreeSet<&Id> =
      self.tasks.iter().map(|t| &t.id).collect();
    for subtask in &self.subtasks {
      if !task_ids.contains(&subtask.parent) {
        return Err(SyncError::CorruptedBackend {
          subtask: subtask.id.clone(),
          parent:  subtask.parent.clone()
        });
      }
    }
    Ok(())
  }
}

pub trait Backend: Send + Sync + 'static {
  fn load_all(
    &self
  ) -> impl Future<Output = anyhow::Result<LoadedData>> + Send;

  fn create_tag(
    &self,
    tag: Tag
  ) -> impl Future<Output = anyhow::Result<Tag>> + Send;

  fn edit_tag(
    &self,
    tag: Tag
  ) -> impl Future<Output = anyhow::Result<()>> + Send;

  fn delete_tag(
    &self,
    id: Id
  ) -> impl Future<Output = anyhow::Result<()>> + Send;

  /// Creates the task record only; its
  /// subtasks are created separately.
  fn create_task(
    &self,
    task: Task
  ) -> impl Future<Output = anyhow::Result<Task>> + Send;

  fn edit_task(
    &self,
    task: Task
  ) -> impl Future<Output = anyhow::Result<()>> + Send;

  /// Deletes a task and the listed
  /// subtasks.
  fn delete_task(
    &self,
    id: Id,
    subtasks: Vec<Id>
  ) -> impl Future<Output = anyhow::Result<()>> + Send;

  fn create_subtask(
    &self,
    parent: Task,
    subtask: SubTask
  ) -> impl Future<Output = anyhow::Result<SubTask>> + Send;

  fn edit_subtask(
    &self,
    parent: Task,
    subtask: SubTask
  ) -> impl Future<Output = anyhow::Result<()>> + Send;

  fn delete_subtask(
    &self,
    id: Id
  ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;

  #[test]
  fn validate_rejects_orphan_subtasks() {
    let data = LoadedData {
      tags:     vec![],
      tasks:    vec![Task {
        id:       Id::from("1"),
        name:     "a".to_string(),
        tag:      Id::none_tag(),
        date:     Utc::now(),
        complete: false,
        in_focus: false
      }],
      subtasks: vec![SubTask {
        id:       Id::from("2"),
        parent:   Id::from("9"),
        order:    0,
        name:     "b".to_string(),
        complete: false,
        in_focus: false
      }]
    };
    let err = data.validate().expect_err("corrupted");
    assert!(matches!(
      err,
      SyncError::CorruptedBackend { .. }
    ));
  }
}
