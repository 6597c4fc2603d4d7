use std::collections::BTreeMap;
use std::fmt;

use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};
use uuid::Uuid;

pub const NONE_TAG_ID: &str = "NONE";
pub const NONE_TAG_NAME: &str = "None";
pub const NONE_TAG_COLOR: &str = "#ffffff";

const TEMP_ID_PREFIX: &str = "tmp-";

/// Entity identifier. Server ids are
/// opaque strings; ids minted on the
/// client start with `tmp-`.
#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
  pub fn new(raw: impl Into<String>) -> Self {
    Self(raw.into())
  }

  #[must_use]
  pub fn temp() -> Self {
    Self(format!(
      "{TEMP_ID_PREFIX}{}",
      Uuid::new_v4()
    ))
  }

  #[must_use]
  pub fn none_tag() -> Self {
    Self(NONE_TAG_ID.to_string())
  }

  pub fn is_temp(&self) -> bool {
    self.0.starts_with(TEMP_ID_PREFIX)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Id {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for Id {
  fn from(raw: &str) -> Self {
    Self(raw.to_string())
  }
}

impl From<u64> for Id {
  fn from(raw: u64) -> Self {
    Self(raw.to_string())
  }
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct Tag {
  pub id:       Id,
  pub name:     String,
  pub color:    String,
  #[serde(default)]
  pub class_id: Option<String>
}

impl Tag {
  #[must_use]
  pub fn none() -> Self {
    Self {
      id:       Id::none_tag(),
      name:     NONE_TAG_NAME.to_string(),
      color:    NONE_TAG_COLOR.to_string(),
      class_id: None
    }
  }

  pub fn is_none_tag(&self) -> bool {
    self.id.as_str() == NONE_TAG_ID
  }
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct Task {
  pub id:       Id,
  pub name:     String,
  pub tag:      Id,
  pub date:     DateTime<Utc>,
  #[serde(default)]
  pub complete: bool,
  #[serde(default)]
  pub in_focus: bool
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct SubTask {
  pub id:       Id,
  pub parent:   Id,
  #[serde(default)]
  pub order:    u32,
  pub name:     String,
  #[serde(default)]
  pub complete: bool,
  #[serde(default)]
  pub in_focus: bool
}

/// A task together with its subtasks,
/// ordered by `order` then id.
#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct TaskWithSubTasks {
  pub task:     Task,
  pub subtasks: Vec<SubTask>
}

impl TaskWithSubTasks {
  /// Applies the completion cascade:
  /// every subtask follows the task.
  pub fn set_complete(
    &mut self,
    complete: bool
  ) {
    self.task.complete = complete;
    for subtask in &mut self.subtasks {
      subtask.complete = complete;
    }
  }

  /// Focusing the whole task unfocuses
  /// its subtasks.
  pub fn set_in_focus(
    &mut self,
    in_focus: bool
  ) {
    self.task.in_focus = in_focus;
    if in_focus {
      for subtask in &mut self.subtasks
      {
        subtask.in_focus = false;
      }
    }
  }

  pub fn subtask_ids(
    &self
  ) -> impl Iterator<Item = &Id> {
    self.subtasks.iter().map(|s| &s.id)
  }

  /// The same task under new ids, one per
  /// subtask in order. `None` when the
  /// counts differ.
  pub fn rekeyed(
    &self,
    task_id: &Id,
    subtask_ids: &[Id]
  ) -> Option<Self> {
    if subtask_ids.len() != self.subtasks.len() {
      return None;
    }
    let mut task = self.task.clone();
    task.id = task_id.clone();
    let subtasks = self
      .subtasks
      .iter()
      .zip(subtask_ids)
      .map(|(subtask, id)| SubTask {
        id: id.clone(),
        parent: task_id.clone(),
        ..subtask.clone()
      })
      .collect();
    Some(Self { task, subtasks })
  }
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct Settings {
  pub completed_onboarding: bool,
  pub theme:                String
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      completed_onboarding: true,
      theme: "light".to_string()
    }
  }
}

/// Banner message id to read flag.
pub type BannerMessageStatus =
  BTreeMap<String, bool>;

/// Tag id to display color.
pub type ColorConfig =
  BTreeMap<Id, String>;

/// What the user typed when creating a
/// task. Turned into a [`Task`] with a
/// temporary id by the coordinator.
#[derive(Debug, Clone)]
pub struct TaskDraft {
  pub name:     String,
  pub tag:      Id,
  pub date:     DateTime<Utc>,
  pub in_focus: bool,
  pub subtasks: Vec<String>
}

impl TaskDraft {
  pub fn new(
    name: impl Into<String>,
    date: DateTime<Utc>
  ) -> Self {
    Self {
      name: name.into(),
      tag: Id::none_tag(),
      date,
      in_focus: false,
      subtasks: vec![]
    }
  }

  #[must_use]
  pub fn with_tag(mut self, tag: Id) -> Self {
    self.tag = tag;
    self
  }

  #[must_use]
  pub fn with_subtask(
    mut self,
    name: impl Into<String>
  ) -> Self {
    self.subtasks.push(name.into());
    self
  }

  #[must_use]
  pub fn pinned(mut self) -> Self {
    self.in_focus = true;
    self
  }
}
