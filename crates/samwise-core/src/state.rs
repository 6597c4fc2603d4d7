use std::collections::{
  BTreeMap,
  BTreeSet
};

use anyhow::{
  anyhow,
  bail
};
use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};

use crate::model::{
  BannerMessageStatus,
  ColorConfig,
  Id,
  Settings,
  SubTask,
  Tag,
  Task,
  TaskWithSubTasks
};

pub const MAX_SYNC_FAILURES: usize = 20;

/// Single-level undo of task deletion.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct UndoCache {
  pub last_deleted: Option<TaskWithSubTasks>
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub enum SyncOp {
  Create,
  Edit,
  Delete
}

/// A persistence call that failed. Kept
/// so the front-end can tell the user
/// their change did not stick.
#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct SyncFailure {
  pub entity:  Id,
  pub op:      SyncOp,
  pub message: String,
  pub at:      DateTime<Utc>
}

#[derive(Debug, Clone, PartialEq)]
pub struct State {
  pub(crate) tags: BTreeMap<Id, Tag>,
  pub(crate) tasks: BTreeMap<Id, Task>,
  pub(crate) date_task_map:
    BTreeMap<NaiveDate, BTreeSet<Id>>,
  pub(crate) subtasks:
    BTreeMap<Id, SubTask>,
  pub(crate) task_children:
    BTreeMap<Id, BTreeSet<Id>>,
  pub(crate) settings: Settings,
  pub(crate) banner_message_status:
    BannerMessageStatus,
  pub(crate) undo: UndoCache,
  pub(crate) versions: BTreeMap<Id, u64>,
  pub(crate) pending_creates:
    BTreeSet<Id>,
  pub(crate) sync_failures:
    Vec<SyncFailure>,
  pub(crate) timezone: Tz
}

impl Default for State {
  fn default() -> Self {
    Self::new(chrono_tz::UTC)
  }
}

impl State {
  /// Empty state holding only the `None`
  /// tag. Date buckets are computed in
  /// `timezone`.
  pub fn new(timezone: Tz) -> Self {
    let none = Tag::none();
    let mut tags = BTreeMap::new();
    tags.insert(none.id.clone(), none);
    Self {
      tags,
      tasks: BTreeMap::new(),
      date_task_map: BTreeMap::new(),
      subtasks: BTreeMap::new(),
      task_children: BTreeMap::new(),
      settings: Settings::default(),
      banner_message_status:
        BannerMessageStatus::new(),
      undo: UndoCache::default(),
      versions: BTreeMap::new(),
      pending_creates: BTreeSet::new(),
      sync_failures: vec![],
      timezone
    }
  }

  pub fn timezone(&self) -> Tz {
    self.timezone
  }

  /// Calendar day of `date` as seen from
  /// the store's timezone.
  pub fn date_key(
    &self,
    date: &DateTime<Utc>
  ) -> NaiveDate {
    date
      .with_timezone(&self.timezone)
      .date_naive()
  }

  pub fn tags(
    &self
  ) -> &BTreeMap<Id, Tag> {
    &self.tags
  }

  pub fn tag(
    &self,
    id: &Id
  ) -> Option<&Tag> {
    self.tags.get(id)
  }

  pub fn tasks(
    &self
  ) -> &BTreeMap<Id, Task> {
    &self.tasks
  }

  pub fn task(
    &self,
    id: &Id
  ) -> Option<&Task> {
    self.tasks.get(id)
  }

  pub fn subtask(
    &self,
    id: &Id
  ) -> Option<&SubTask> {
    self.subtasks.get(id)
  }

  pub fn subtask_count(&self) -> usize {
    self.subtasks.len()
  }

  pub fn subtasks_of(
    &self,
    task_id: &Id
  ) -> Vec<&SubTask> {
    let mut out: Vec<&SubTask> = self
      .task_children
      .get(task_id)
      .into_iter()
      .flatten()
      .filter_map(|id| {
        self.subtasks.get(id)
      })
      .collect();
    out.sort_by(|a, b| {
      a.order
        .cmp(&b.order)
        .then_with(|| a.id.cmp(&b.id))
    });
    out
  }

  pub fn task_with_subtasks(
    &self,
    id: &Id
  ) -> Option<TaskWithSubTasks> {
    let task = self.tasks.get(id)?;
    Some(TaskWithSubTasks {
      task:     task.clone(),
      subtasks: self
        .subtasks_of(id)
        .into_iter()
        .cloned()
        .collect()
    })
  }

  pub fn date_task_map(
    &self
  ) -> &BTreeMap<NaiveDate, BTreeSet<Id>>
  {
    &self.date_task_map
  }

  pub fn tasks_on(
    &self,
    day: NaiveDate
  ) -> Vec<&Task> {
    self
      .date_task_map
      .get(&day)
      .into_iter()
      .flatten()
      .filter_map(|id| self.tasks.get(id))
      .collect()
  }

  pub fn color_config(
    &self
  ) -> ColorConfig {
    self
      .tags
      .values()
      .map(|tag| {
        (tag.id.clone(), tag.color.clone())
      })
      .collect()
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn banner_message_status(
    &self
  ) -> &BannerMessageStatus {
    &self.banner_message_status
  }

  pub fn undo(&self) -> &UndoCache {
    &self.undo
  }

  /// Current edit counter of an entity;
  /// zero when never touched locally.
  pub fn version(&self, id: &Id) -> u64 {
    self
      .versions
      .get(id)
      .copied()
      .unwrap_or(0)
  }

  pub fn is_pending_create(
    &self,
    id: &Id
  ) -> bool {
    self.pending_creates.contains(id)
  }

  pub fn sync_failures(
    &self
  ) -> &[SyncFailure] {
    &self.sync_failures
  }

  /// Verifies the derived indexes and
  /// references. Used by tests and by
  /// the store in debug builds.
  pub fn check_invariants(
    &self
  ) -> anyhow::Result<()> {
    if !self
      .tags
      .contains_key(&Id::none_tag())
    {
      bail!("the None tag is missing");
    }

    let mut indexed = BTreeSet::new();
    for (day, ids) in &self.date_task_map {
      if ids.is_empty() {
        bail!("empty bucket left for {day}");
      }
      for id in ids {
        let task =
          self.tasks.get(id).ok_or_else(|| {
            anyhow!(
              "bucket {day} references missing task {id}"
            )
          })?;
        let expected =
          self.date_key(&task.date);
        if expected != *day {
          bail!(
            "task {id} sits in {day} but is dated {expected}"
          );
        }
        if !indexed.insert(id.clone()) {
          bail!(
            "task {id} appears in more than one bucket"
          );
        }
      }
    }

    for task in self.tasks.values() {
      if !indexed.contains(&task.id) {
        bail!(
          "task {} is missing from the date index",
          task.id
        );
      }
      if !self.tags.contains_key(&task.tag)
      {
        bail!(
          "task {} references missing tag {}",
          task.id,
          task.tag
        );
      }
    }

    for subtask in self.subtasks.values() {
      if !self
        .tasks
        .contains_key(&subtask.parent)
      {
        bail!(
          "subtask {} references missing task {}",
          subtask.id,
          subtask.parent
        );
      }
      let listed = self
        .task_children
        .get(&subtask.parent)
        .is_some_and(|c| {
          c.contains(&subtask.id)
        });
      if !listed {
        bail!(
          "subtask {} is missing from the children index",
          subtask.id
        );
      }
    }

    for (parent, children) in
      &self.task_children
    {
      for child in children {
        match self.subtasks.get(child) {
          | Some(s) if &s.parent == parent => {}
          | _ => bail!(
            "children index of {parent} lists stale subtask {child}"
          )
        }
      }
    }

    Ok(())
  }

  pub(crate) fn bump(
    &mut self,
    id: &Id
  ) -> u64 {
    let entry = self
      .versions
      .entry(id.clone())
      .or_insert(0);
    *entry += 1;
    *entry
  }

  /// Drops the version of an entity that
  /// is gone and has no call left that
  /// could refer to it.
  pub(crate) fn forget(&mut self, id: &Id) {
    let live = self.tags.contains_key(id)
      || self.tasks.contains_key(id)
      || self.subtasks.contains_key(id)
      || self.pending_creates.contains(id);
    if !live && self.versions.remove(id).is_some() {
      tracing::trace!(entity = %id, "forgot version");
    }
  }

  pub(crate) fn upsert_tag(
    &mut self,
    tag: Tag
  ) {
    self.tags.insert(tag.id.clone(), tag);
  }

  /// Removes a tag and moves its tasks
  /// to `None`. The `None` tag stays.
  pub(crate) fn remove_tag(
    &mut self,
    id: &Id
  ) -> Option<Tag> {
    if id == &Id::none_tag() {
      return None;
    }
    let removed = self.tags.remove(id)?;
    for task in self.tasks.values_mut() {
      if &task.tag == id {
        task.tag = Id::none_tag();
      }
    }
    Some(removed)
  }

  /// Inserts or replaces a task and
  /// moves it between date buckets when
  /// its date changed.
  pub(crate) fn upsert_task(
    &mut self,
    mut task: Task
  ) {
    if !self.tags.contains_key(&task.tag) {
      tracing::warn!(
        task = %task.id,
        tag = %task.tag,
        "task references unknown tag; using None"
      );
      task.tag = Id::none_tag();
    }
    let new_key = self.date_key(&task.date);
    if let Some(old) = self.tasks.get(&task.id)
    {
      let old_key = self.date_key(&old.date);
      if old_key != new_key {
        self.unbucket(old_key, &task.id);
      }
    }
    self
      .date_task_map
      .entry(new_key)
      .or_default()
      .insert(task.id.clone());
    self.tasks.insert(task.id.clone(), task);
  }

  /// Removes a task, its bucket entry and
  /// its subtasks.
  pub(crate) fn remove_task(
    &mut self,
    id: &Id
  ) -> Option<TaskWithSubTasks> {
    let removed =
      self.task_with_subtasks(id)?;
    let key =
      self.date_key(&removed.task.date);
    self.unbucket(key, id);
    self.tasks.remove(id);
    if let Some(children) =
      self.task_children.remove(id)
    {
      for child in children {
        self.subtasks.remove(&child);
      }
    }
    Some(removed)
  }

  /// Inserts or replaces a subtask.
  /// Returns `false` and leaves the state
  /// untouched when the parent is absent.
  pub(crate) fn upsert_subtask(
    &mut self,
    subtask: SubTask
  ) -> bool {
    if !self
      .tasks
      .contains_key(&subtask.parent)
    {
      return false;
    }
    if let Some(old) =
      self.subtasks.get(&subtask.id)
      && old.parent != subtask.parent
    {
      let old_parent = old.parent.clone();
      self.unlink_child(
        &old_parent,
        &subtask.id
      );
    }
    self
      .task_children
      .entry(subtask.parent.clone())
      .or_default()
      .insert(subtask.id.clone());
    self
      .subtasks
      .insert(subtask.id.clone(), subtask);
    true
  }

  pub(crate) fn remove_subtask(
    &mut self,
    id: &Id
  ) -> Option<SubTask> {
    let removed = self.subtasks.remove(id)?;
    self.unlink_child(&removed.parent, id);
    Some(removed)
  }

  /// Writes a whole task back: the task
  /// record plus exactly the given
  /// subtasks, dropping any others.
  pub(crate) fn replace_task_with_subtasks(
    &mut self,
    item: &TaskWithSubTasks
  ) {
    self.upsert_task(item.task.clone());
    let keep: BTreeSet<&Id> =
      item.subtask_ids().collect();
    let stale: Vec<Id> = self
      .task_children
      .get(&item.task.id)
      .into_iter()
      .flatten()
      .filter(|id| !keep.contains(id))
      .cloned()
      .collect();
    for id in stale {
      self.remove_subtask(&id);
    }
    for subtask in &item.subtasks {
      let mut subtask = subtask.clone();
      subtask.parent = item.task.id.clone();
      self.upsert_subtask(subtask);
    }
  }

  pub(crate) fn remap_tag_id(
    &mut self,
    old: &Id,
    new: &Id
  ) {
    if old == new {
      return;
    }
    if let Some(mut tag) = self.tags.remove(old)
    {
      tag.id = new.clone();
      self.tags.insert(new.clone(), tag);
    }
    for task in self.tasks.values_mut() {
      if &task.tag == old {
        task.tag = new.clone();
      }
    }
    if let Some(cached) =
      self.undo.last_deleted.as_mut()
      && &cached.task.tag == old
    {
      cached.task.tag = new.clone();
    }
    self.remap_bookkeeping(old, new);
  }

  pub(crate) fn remap_task_id(
    &mut self,
    old: &Id,
    new: &Id
  ) {
    if old == new {
      return;
    }
    if let Some(mut task) = self.tasks.remove(old)
    {
      let key = self.date_key(&task.date);
      self.unbucket(key, old);
      task.id = new.clone();
      self
        .date_task_map
        .entry(key)
        .or_default()
        .insert(new.clone());
      self.tasks.insert(new.clone(), task);
    }
    if let Some(children) =
      self.task_children.remove(old)
    {
      for child in &children {
        if let Some(subtask) =
          self.subtasks.get_mut(child)
        {
          subtask.parent = new.clone();
        }
      }
      self
        .task_children
        .insert(new.clone(), children);
    }
    if let Some(cached) =
      self.undo.last_deleted.as_mut()
      && &cached.task.id == old
    {
      cached.task.id = new.clone();
      for subtask in &mut cached.subtasks {
        subtask.parent = new.clone();
      }
    }
    self.remap_bookkeeping(old, new);
  }

  pub(crate) fn remap_subtask_id(
    &mut self,
    old: &Id,
    new: &Id
  ) {
    if old == new {
      return;
    }
    if let Some(mut subtask) =
      self.subtasks.remove(old)
    {
      self.unlink_child(&subtask.parent, old);
      subtask.id = new.clone();
      self
        .task_children
        .entry(subtask.parent.clone())
        .or_default()
        .insert(new.clone());
      self
        .subtasks
        .insert(new.clone(), subtask);
    }
    if let Some(cached) =
      self.undo.last_deleted.as_mut()
    {
      for subtask in &mut cached.subtasks {
        if &subtask.id == old {
          subtask.id = new.clone();
        }
      }
    }
    self.remap_bookkeeping(old, new);
  }

  pub(crate) fn push_failure(
    &mut self,
    failure: SyncFailure
  ) {
    self.sync_failures.push(failure);
    if self.sync_failures.len()
      > MAX_SYNC_FAILURES
    {
      let excess = self.sync_failures.len()
        - MAX_SYNC_FAILURES;
      self.sync_failures.drain(..excess);
    }
  }

  fn remap_bookkeeping(
    &mut self,
    old: &Id,
    new: &Id
  ) {
    if let Some(version) =
      self.versions.remove(old)
    {
      self.versions.insert(new.clone(), version);
    }
    self.pending_creates.remove(old);
  }

  fn unbucket(
    &mut self,
    key: NaiveDate,
    id: &Id
  ) {
    if let Some(bucket) =
      self.date_task_map.get_mut(&key)
    {
      bucket.remove(id);
      if bucket.is_empty() {
        self.date_task_map.remove(&key);
      }
    }
  }

  fn unlink_child(
    &mut self,
    parent: &Id,
    child: &Id
  ) {
    if let Some(children) =
      self.task_children.get_mut(parent)
    {
      children.remove(child);
      if children.is_empty() {
        self.task_children.remove(parent);
      }
    }
  }
}
