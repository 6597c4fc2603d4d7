//! Optimistic persistence. Every user
//! operation is applied to the store
//! first; the backend call runs on the
//! tokio runtime and its answer is folded
//! back in through a reconciliation or a
//! [`Action::SyncFailed`].
//!
//! Entities whose create call has not
//! been answered yet are never edited or
//! deleted remotely. Once the create
//! lands the coordinator pushes whatever
//! changed locally in the meantime, or
//! deletes the fresh record when the
//! entity is already gone.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{
  debug,
  info,
  instrument,
  trace,
  warn
};

use crate::action::{
  Action,
  Rollback,
  patch_subtasks,
  patch_tags,
  patch_tasks
};
use crate::backend::Backend;
use crate::error::SyncError;
use crate::model::{
  Id,
  SubTask,
  Tag,
  Task,
  TaskDraft,
  TaskWithSubTasks
};
use crate::state::{
  State,
  SyncFailure,
  SyncOp
};
use crate::store::{
  Session,
  SharedStore
};

pub struct SyncCoordinator<B: Backend> {
  remote:   Remote<B>,
  inflight: Mutex<JoinSet<()>>
}

/// Server id a temporary tag ended up
/// with; `None` until its create answers.
type TagResolution = watch::Receiver<Option<Id>>;

/// What a background call needs: the
/// store to reconcile into, the backend
/// to talk to, and the outcome of tag
/// creates issued this session.
struct Remote<B> {
  store:   SharedStore,
  backend: Arc<B>,
  tags:    Arc<Mutex<BTreeMap<Id, TagResolution>>>
}

impl<B> Clone for Remote<B> {
  fn clone(&self) -> Self {
    Self {
      store:   Arc::clone(&self.store),
      backend: Arc::clone(&self.backend),
      tags:    Arc::clone(&self.tags)
    }
  }
}

impl<B: Backend> SyncCoordinator<B> {
  pub fn new(
    store: SharedStore,
    backend: B
  ) -> Self {
    Self {
      remote:   Remote {
        store,
        backend: Arc::new(backend),
        tags: Arc::new(Mutex::new(BTreeMap::new()))
      },
      inflight: Mutex::new(JoinSet::new())
    }
  }

  pub fn store(&self) -> &SharedStore {
    &self.remote.store
  }

  pub fn backend(&self) -> &B {
    &self.remote.backend
  }

  pub fn snapshot(&self) -> State {
    self.remote.store.lock().snapshot()
  }

  /// Starts a session and replaces the
  /// store content with everything the
  /// backend holds.
  #[instrument(skip(self, session), fields(user = %session.user))]
  pub async fn initialize(
    &self,
    session: Session
  ) -> anyhow::Result<()> {
    self.remote.store.lock().login(session);
    let data = self.remote.backend.load_all().await?;
    data.validate()?;
    info!(
      tags = data.tags.len(),
      tasks = data.tasks.len(),
      subtasks = data.subtasks.len(),
      "loaded backend data"
    );
    self.remote.dispatch(
      Action::BackendPatchLoadedData {
        tags:     data.tags,
        tasks:    data.tasks,
        subtasks: data.subtasks
      }
    );
    Ok(())
  }

  /// Waits for in-flight calls, then ends
  /// the session and clears the store.
  #[instrument(skip(self))]
  pub async fn teardown(&self) {
    self.settle().await;
    self.remote.tags.lock().clear();
    self.remote.store.lock().logout();
  }

  /// Resolves once every call issued so
  /// far, including follow-ups spawned
  /// while waiting, has finished.
  pub async fn settle(&self) {
    loop {
      let mut pending =
        std::mem::take(&mut *self.inflight.lock());
      if pending.is_empty() {
        break;
      }
      while let Some(joined) = pending.join_next().await
      {
        if let Err(err) = joined {
          warn!(error = %err, "sync call aborted");
        }
      }
    }
  }

  fn spawn<F>(&self, call: F)
  where
    F: Future<Output = ()> + Send + 'static
  {
    self.inflight.lock().spawn(call);
  }

  #[instrument(skip(self))]
  pub fn add_tag(
    &self,
    name: &str,
    color: &str,
    class_id: Option<String>
  ) -> Option<Id> {
    let name = name.trim();
    if name.is_empty() {
      debug!("ignoring tag with empty name");
      return None;
    }
    let tag = Tag {
      id: Id::temp(),
      name: name.to_string(),
      color: color.to_string(),
      class_id
    };
    let id = tag.id.clone();
    let version = self
      .remote
      .dispatch_versioned(
        Action::AddTag { tag: tag.clone() },
        &id
      );
    let (resolved, resolution) =
      watch::channel(None);
    self
      .remote
      .tags
      .lock()
      .insert(id.clone(), resolution);
    let remote = self.remote.clone();
    self.spawn(async move {
      remote.create_tag(tag, version, resolved).await;
    });
    Some(id)
  }

  #[instrument(skip(self, tag), fields(tag = %tag.id))]
  pub fn edit_tag(
    &self,
    tag: Tag
  ) -> Result<(), SyncError> {
    if tag.is_none_tag() {
      return Err(SyncError::ProtectedTag);
    }
    let previous = self
      .remote
      .read(|s| s.tag(&tag.id).cloned())
      .ok_or_else(|| SyncError::UnknownTag(tag.id.clone()))?;
    if tag.name.trim().is_empty() {
      debug!("ignoring tag edit with empty name");
      return Ok(());
    }
    let id = tag.id.clone();
    let version = self.remote.dispatch_versioned(
      Action::EditTag { tag: tag.clone() },
      &id
    );
    if self.remote.deferred(&id) {
      trace!("tag create pending; edit deferred");
      return Ok(());
    }
    let remote = self.remote.clone();
    self.spawn(async move {
      if let Err(err) =
        remote.backend.edit_tag(tag).await
      {
        let rollback = Rollback::new(
          id.clone(),
          version,
          patch_tags(vec![], vec![previous], vec![])
        );
        remote.fail(id, SyncOp::Edit, &err, Some(rollback));
      }
    });
    Ok(())
  }

  /// Removes a tag. Its tasks move to the
  /// `None` tag and stay there even if
  /// the remote delete fails.
  #[instrument(skip(self))]
  pub fn remove_tag(
    &self,
    id: &Id
  ) -> Result<(), SyncError> {
    if id == &Id::none_tag() {
      return Err(SyncError::ProtectedTag);
    }
    let previous = self
      .remote
      .read(|s| s.tag(id).cloned())
      .ok_or_else(|| SyncError::UnknownTag(id.clone()))?;
    let version = self.remote.dispatch_versioned(
      Action::RemoveTag { id: id.clone() },
      id
    );
    if self.remote.deferred(id) {
      trace!("tag create pending; delete deferred");
      return Ok(());
    }
    let remote = self.remote.clone();
    let id = id.clone();
    self.spawn(async move {
      match remote.backend.delete_tag(id.clone()).await {
        | Ok(()) => {
          remote.dispatch(Action::BackendDeleted { id });
        }
        | Err(err) => {
          let rollback = Rollback::new(
            id.clone(),
            version,
            patch_tags(vec![previous], vec![], vec![])
          );
          remote.fail(id, SyncOp::Delete, &err, Some(rollback));
        }
      }
    });
    Ok(())
  }

  /// Creates a task and its subtasks. An
  /// empty name is ignored. A task dated
  /// today starts in focus.
  #[instrument(skip(self, draft), fields(name = %draft.name))]
  pub fn add_task(
    &self,
    draft: TaskDraft
  ) -> Result<Option<Id>, SyncError> {
    let name = draft.name.trim();
    if name.is_empty() {
      debug!("ignoring task with empty name");
      return Ok(None);
    }
    let dated_today = self.remote.read(|s| {
      if s.tag(&draft.tag).is_none() {
        return Err(SyncError::UnknownTag(
          draft.tag.clone()
        ));
      }
      let today = s.date_key(&Utc::now());
      Ok(s.date_key(&draft.date) == today)
    })?;

    let task = Task {
      id:       Id::temp(),
      name:     name.to_string(),
      tag:      draft.tag,
      date:     draft.date,
      complete: false,
      in_focus: draft.in_focus || dated_today
    };
    let subtasks = draft
      .subtasks
      .iter()
      .map(|n| n.trim())
      .filter(|n| !n.is_empty())
      .zip(0u32..)
      .map(|(name, order)| SubTask {
        id: Id::temp(),
        parent: task.id.clone(),
        order,
        name: name.to_string(),
        complete: false,
        in_focus: false
      })
      .collect();
    let id = task.id.clone();
    let version = self.remote.dispatch_versioned(
      Action::AddNewTask {
        item: TaskWithSubTasks {
          task: task.clone(),
          subtasks
        }
      },
      &id
    );
    let remote = self.remote.clone();
    self.spawn(async move {
      remote.create_task(task, version).await;
    });
    Ok(Some(id))
  }

  #[instrument(skip(self))]
  pub fn add_subtask(
    &self,
    task_id: &Id,
    name: &str
  ) -> Result<Option<Id>, SyncError> {
    let name = name.trim();
    let order = self
      .remote
      .read(|s| {
        s.task(task_id).map(|_| {
          s.subtasks_of(task_id)
            .iter()
            .map(|sub| sub.order + 1)
            .max()
            .unwrap_or(0)
        })
      })
      .ok_or_else(|| SyncError::UnknownTask(task_id.clone()))?;
    if name.is_empty() {
      debug!("ignoring subtask with empty name");
      return Ok(None);
    }
    let subtask = SubTask {
      id: Id::temp(),
      parent: task_id.clone(),
      order,
      name: name.to_string(),
      complete: false,
      in_focus: false
    };
    let id = subtask.id.clone();
    self.change_task(
      task_id,
      Action::AddSubTask {
        task_id: task_id.clone(),
        subtask
      }
    )?;
    Ok(Some(id))
  }

  /// Replaces a task and its subtask list.
  /// Subtasks are diffed by id against the
  /// stored list; creates, edits and
  /// deletes run concurrently and this
  /// resolves when all of them have.
  #[instrument(skip(self, item), fields(task = %item.task.id))]
  pub async fn edit_task(
    &self,
    mut item: TaskWithSubTasks
  ) -> Result<(), SyncError> {
    let id = item.task.id.clone();
    let before = self
      .remote
      .read(|s| s.task_with_subtasks(&id))
      .ok_or_else(|| SyncError::UnknownTask(id.clone()))?;
    if let Some(stray) =
      item.subtasks.iter().find(|s| s.parent != id)
    {
      return Err(SyncError::InconsistentEdit {
        old: stray.parent.clone(),
        new: id
      });
    }
    if item.task.name.trim().is_empty() {
      debug!("ignoring task edit with empty name");
      return Ok(());
    }
    let known_tag = self
      .remote
      .read(|s| s.tag(&item.task.tag).is_some());
    if !known_tag {
      return Err(SyncError::UnknownTag(item.task.tag));
    }
    item
      .subtasks
      .retain(|s| !s.name.trim().is_empty());

    let version = self.remote.dispatch_versioned(
      Action::EditTask { item },
      &id
    );
    let after = self
      .remote
      .read(|s| s.task_with_subtasks(&id))
      .ok_or_else(|| SyncError::UnknownTask(id.clone()))?;
    let calls =
      self.remote.push_item(before, after, version);
    join_calls(&id, calls).await;
    Ok(())
  }

  pub fn mark_task(
    &self,
    id: &Id,
    complete: bool
  ) -> Result<(), SyncError> {
    self.change_task(id, Action::MarkTask {
      id: id.clone(),
      complete
    })
  }

  pub fn mark_subtask(
    &self,
    task_id: &Id,
    subtask_id: &Id,
    complete: bool
  ) -> Result<(), SyncError> {
    self.require_subtask(task_id, subtask_id)?;
    self.change_task(task_id, Action::MarkSubTask {
      task_id: task_id.clone(),
      subtask_id: subtask_id.clone(),
      complete
    })
  }

  pub fn toggle_task_pin(
    &self,
    id: &Id,
    in_focus: bool
  ) -> Result<(), SyncError> {
    self.change_task(id, Action::TogglePin {
      id: id.clone(),
      in_focus
    })
  }

  pub fn toggle_subtask_pin(
    &self,
    task_id: &Id,
    subtask_id: &Id,
    in_focus: bool
  ) -> Result<(), SyncError> {
    self.require_subtask(task_id, subtask_id)?;
    self.change_task(
      task_id,
      Action::ToggleSubTaskPin {
        task_id: task_id.clone(),
        subtask_id: subtask_id.clone(),
        in_focus
      }
    )
  }

  pub fn remove_subtask(
    &self,
    task_id: &Id,
    subtask_id: &Id
  ) -> Result<(), SyncError> {
    self.require_subtask(task_id, subtask_id)?;
    self.change_task(
      task_id,
      Action::RemoveSubTask {
        task_id:    task_id.clone(),
        subtask_id: subtask_id.clone()
      }
    )
  }

  /// Deletes a task with its subtasks and
  /// keeps it in the undo cache.
  #[instrument(skip(self))]
  pub fn remove_task(
    &self,
    id: &Id
  ) -> Result<(), SyncError> {
    let removed = self
      .remote
      .read(|s| s.task_with_subtasks(id))
      .ok_or_else(|| SyncError::UnknownTask(id.clone()))?;
    let version = self.remote.dispatch_versioned(
      Action::RemoveTask { id: id.clone() },
      id
    );
    if self.remote.deferred(id) {
      trace!("task create pending; delete deferred");
      return Ok(());
    }
    let persisted: Vec<Id> = self.remote.read(|s| {
      removed
        .subtask_ids()
        .filter(|sid| !s.is_pending_create(sid))
        .cloned()
        .collect()
    });
    let remote = self.remote.clone();
    let id = id.clone();
    self.spawn(async move {
      let deleted = remote
        .backend
        .delete_task(id.clone(), persisted.clone())
        .await;
      if let Err(err) = deleted {
        let rollback = Rollback::new(
          id.clone(),
          version,
          Action::Batch(vec![
            patch_tasks(
              vec![removed.task],
              vec![],
              vec![]
            ),
            patch_subtasks(
              removed.subtasks,
              vec![],
              vec![]
            ),
          ])
        );
        remote.fail(id, SyncOp::Delete, &err, Some(rollback));
      } else {
        remote.dispatch(Action::Batch(
          std::iter::once(id)
            .chain(persisted)
            .map(|id| Action::BackendDeleted { id })
            .collect()
        ));
      }
    });
    Ok(())
  }

  /// Restores the last deleted task under
  /// fresh ids and creates it again
  /// remotely. Returns the new id, or
  /// `None` when there is nothing to undo.
  #[instrument(skip(self))]
  pub fn undo_delete(&self) -> Option<Id> {
    let subtask_count = self.remote.read(|s| {
      s.undo()
        .last_deleted
        .as_ref()
        .map(|cached| cached.subtasks.len())
    })?;
    let id = Id::temp();
    let version = self.remote.dispatch_versioned(
      Action::UndoDelete {
        task_id:     id.clone(),
        subtask_ids: (0..subtask_count)
          .map(|_| Id::temp())
          .collect()
      },
      &id
    );
    let task = self.remote.read(|s| s.task(&id).cloned())?;
    let remote = self.remote.clone();
    self.spawn(async move {
      remote.create_task(task, version).await;
    });
    Some(id)
  }

  fn require_subtask(
    &self,
    task_id: &Id,
    subtask_id: &Id
  ) -> Result<(), SyncError> {
    let owned = self.remote.read(|s| {
      s.subtask(subtask_id)
        .is_some_and(|sub| &sub.parent == task_id)
    });
    if owned {
      Ok(())
    } else {
      Err(SyncError::UnknownSubTask {
        task:    task_id.clone(),
        subtask: subtask_id.clone()
      })
    }
  }

  /// Applies a change scoped to one task
  /// and pushes the resulting difference.
  fn change_task(
    &self,
    task_id: &Id,
    action: Action
  ) -> Result<(), SyncError> {
    let before = self
      .remote
      .read(|s| s.task_with_subtasks(task_id))
      .ok_or_else(|| SyncError::UnknownTask(task_id.clone()))?;
    let version = self
      .remote
      .dispatch_versioned(action, task_id);
    let Some(after) = self
      .remote
      .read(|s| s.task_with_subtasks(task_id))
    else {
      return Ok(());
    };
    let calls =
      self.remote.push_item(before, after, version);
    if !calls.is_empty() {
      let task_id = task_id.clone();
      self.spawn(async move {
        join_calls(&task_id, calls).await;
      });
    }
    Ok(())
  }
}

impl<B: Backend> Remote<B> {
  fn dispatch(&self, action: Action) {
    self.store.lock().dispatch(action);
  }

  /// Dispatches and returns the version
  /// `id` ended up at.
  fn dispatch_versioned(
    &self,
    action: Action,
    id: &Id
  ) -> u64 {
    self.store.lock().dispatch(action).version(id)
  }

  fn read<T>(
    &self,
    f: impl FnOnce(&State) -> T
  ) -> T {
    let store = self.store.lock();
    f(store.state())
  }

  fn deferred(&self, id: &Id) -> bool {
    self.read(|s| s.is_pending_create(id))
  }

  fn fail(
    &self,
    entity: Id,
    op: SyncOp,
    err: &anyhow::Error,
    rollback: Option<Rollback>
  ) {
    let message = format!("{err:#}");
    warn!(
      entity = %entity,
      ?op,
      error = %message,
      rolled_back = rollback.is_some(),
      "persistence call failed"
    );
    self.dispatch(Action::SyncFailed {
      failure: SyncFailure {
        entity,
        op,
        message,
        at: Utc::now()
      },
      rollback
    });
  }

  /// Creates a tag and publishes the id
  /// tasks referring to it should use.
  async fn create_tag(
    &self,
    tag: Tag,
    version: u64,
    resolved: watch::Sender<Option<Id>>
  ) {
    let local_id = tag.id.clone();
    let created =
      match self.backend.create_tag(tag).await {
        | Ok(created) => created,
        | Err(err) => {
          resolved.send_replace(Some(Id::none_tag()));
          let rollback = Rollback::new(
            local_id.clone(),
            version,
            patch_tags(vec![], vec![], vec![
              local_id.clone(),
            ])
          );
          self.fail(
            local_id,
            SyncOp::Create,
            &err,
            Some(rollback)
          );
          return;
        }
      };
    let server_id = created.id.clone();
    self.dispatch(Action::BackendPatchTag {
      local_id,
      canonical: created,
      version
    });

    let current = self.read(|s| {
      s.tag(&server_id)
        .cloned()
        .map(|t| (t, s.version(&server_id)))
    });
    resolved.send_replace(Some(if current.is_some() {
      server_id.clone()
    } else {
      Id::none_tag()
    }));
    match current {
      | None => {
        debug!(tag = %server_id, "tag removed before its create landed");
        if let Err(err) = self
          .backend
          .delete_tag(server_id.clone())
          .await
        {
          self.fail(server_id, SyncOp::Delete, &err, None);
        }
      }
      | Some((tag, now)) if now != version => {
        if let Err(err) =
          self.backend.edit_tag(tag).await
        {
          self.fail(server_id, SyncOp::Edit, &err, None);
        }
      }
      | Some(_) => {}
    }
  }

  /// Creates a task, then catches the
  /// server record up with local changes
  /// and creates its pending subtasks one
  /// by one.
  async fn create_task(
    &self,
    task: Task,
    version: u64
  ) {
    let local_id = task.id.clone();
    let task = self.outbound(task).await;
    let created =
      match self.backend.create_task(task).await {
        | Ok(created) => created,
        | Err(err) => {
          let rollback = Rollback::new(
            local_id.clone(),
            version,
            patch_tasks(vec![], vec![], vec![
              local_id.clone(),
            ])
          );
          self.fail(
            local_id,
            SyncOp::Create,
            &err,
            Some(rollback)
          );
          return;
        }
      };
    let server_id = created.id.clone();
    debug!(local = %local_id, server = %server_id, "task created");
    self.dispatch(Action::BackendPatchTask {
      local_id,
      canonical: created,
      version
    });

    let current = self.read(|s| {
      let task = s.task(&server_id)?.clone();
      let pending: Vec<Id> = s
        .subtasks_of(&server_id)
        .into_iter()
        .filter(|sub| s.is_pending_create(&sub.id))
        .map(|sub| sub.id.clone())
        .collect();
      Some((task, s.version(&server_id), pending))
    });
    let Some((task, now, pending)) = current else {
      debug!(task = %server_id, "task removed before its create landed");
      if let Err(err) = self
        .backend
        .delete_task(server_id.clone(), vec![])
        .await
      {
        self.fail(server_id, SyncOp::Delete, &err, None);
      }
      return;
    };
    if now != version
      && let Err(err) = self
        .backend
        .edit_task(self.outbound(task).await)
        .await
    {
      self.fail(
        server_id.clone(),
        SyncOp::Edit,
        &err,
        None
      );
    }
    for subtask_id in pending {
      self.create_subtask(&server_id, subtask_id).await;
    }
  }

  async fn create_subtask(
    &self,
    parent_id: &Id,
    subtask_id: Id
  ) {
    let snapshot = self.read(|s| {
      let parent = s.task(parent_id)?.clone();
      let subtask = s
        .subtask(&subtask_id)
        .filter(|sub| &sub.parent == parent_id)?
        .clone();
      Some((parent, subtask, s.version(parent_id)))
    });
    let Some((parent, subtask, version)) = snapshot
    else {
      trace!(subtask = %subtask_id, "subtask gone before its create");
      return;
    };

    let parent = self.outbound(parent).await;
    let created = match self
      .backend
      .create_subtask(parent, subtask)
      .await
    {
      | Ok(created) => created,
      | Err(err) => {
        let rollback = Rollback::new(
          parent_id.clone(),
          version,
          patch_subtasks(vec![], vec![], vec![
            subtask_id.clone(),
          ])
        );
        self.fail(
          subtask_id,
          SyncOp::Create,
          &err,
          Some(rollback)
        );
        return;
      }
    };
    let server_id = created.id.clone();
    self.dispatch(Action::BackendPatchSubTask {
      local_id: subtask_id,
      canonical: created,
      version
    });

    let current = self.read(|s| {
      let subtask = s.subtask(&server_id)?.clone();
      let parent = s.task(&subtask.parent)?.clone();
      let now = s.version(&parent.id);
      Some((parent, subtask, now))
    });
    match current {
      | None => {
        debug!(subtask = %server_id, "subtask removed before its create landed");
        if let Err(err) = self
          .backend
          .delete_subtask(server_id.clone())
          .await
        {
          self.fail(server_id, SyncOp::Delete, &err, None);
        }
      }
      | Some((parent, subtask, now))
        if now != version =>
      {
        let parent = self.outbound(parent).await;
        if let Err(err) = self
          .backend
          .edit_subtask(parent, subtask)
          .await
        {
          self.fail(server_id, SyncOp::Edit, &err, None);
        }
      }
      | Some(_) => {}
    }
  }

  /// Starts pushing the difference
  /// between two renditions of one task.
  /// Deferral is decided here, against the
  /// state at dispatch; the returned calls
  /// run concurrently and each failure
  /// rolls back only its own part.
  fn push_item(
    &self,
    before: TaskWithSubTasks,
    after: TaskWithSubTasks,
    version: u64
  ) -> JoinSet<()> {
    let mut calls = JoinSet::new();
    let task_id = after.task.id.clone();
    if self.deferred(&task_id) {
      trace!(task = %task_id, "task create pending; push deferred");
      return calls;
    }

    let old: BTreeMap<Id, SubTask> = before
      .subtasks
      .into_iter()
      .map(|s| (s.id.clone(), s))
      .collect();
    let new: BTreeMap<Id, SubTask> = after
      .subtasks
      .into_iter()
      .map(|s| (s.id.clone(), s))
      .collect();

    if before.task != after.task {
      let remote = self.clone();
      let previous = before.task;
      let task = after.task.clone();
      calls.spawn(async move {
        let task = remote.outbound(task).await;
        if let Err(err) =
          remote.backend.edit_task(task).await
        {
          let id = previous.id.clone();
          let rollback = Rollback::new(
            id.clone(),
            version,
            patch_tasks(vec![], vec![previous], vec![])
          );
          remote.fail(id, SyncOp::Edit, &err, Some(rollback));
        }
      });
    }

    for (id, subtask) in &new {
      let remote = self.clone();
      match old.get(id) {
        | None => {
          let parent = task_id.clone();
          let id = id.clone();
          calls.spawn(async move {
            remote.create_subtask(&parent, id).await;
          });
        }
        | Some(previous)
          if previous != subtask
            && !self.deferred(id) =>
        {
          let parent = after.task.clone();
          let subtask = subtask.clone();
          let previous = previous.clone();
          calls.spawn(async move {
            let parent = remote.outbound(parent).await;
            if let Err(err) = remote
              .backend
              .edit_subtask(parent.clone(), subtask)
              .await
            {
              let rollback = Rollback::new(
                parent.id,
                version,
                patch_subtasks(
                  vec![],
                  vec![previous.clone()],
                  vec![]
                )
              );
              remote.fail(
                previous.id,
                SyncOp::Edit,
                &err,
                Some(rollback)
              );
            }
          });
        }
        | Some(_) => {}
      }
    }

    for (id, previous) in old {
      if new.contains_key(&id) || self.deferred(&id)
      {
        continue;
      }
      let remote = self.clone();
      let parent = task_id.clone();
      calls.spawn(async move {
        match remote.backend.delete_subtask(id.clone()).await {
          | Ok(()) => {
            remote.dispatch(Action::BackendDeleted { id });
          }
          | Err(err) => {
            let rollback = Rollback::new(
              parent,
              version,
              patch_subtasks(vec![previous], vec![], vec![])
            );
            remote.fail(id, SyncOp::Delete, &err, Some(rollback));
          }
        }
      });
    }

    calls
  }

  /// The task as the backend should see
  /// it: a tag still being created is
  /// replaced by the id its create
  /// produced.
  async fn outbound(&self, mut task: Task) -> Task {
    task.tag = self.resolve_tag(task.tag).await;
    task
  }

  async fn resolve_tag(&self, tag: Id) -> Id {
    if !tag.is_temp() {
      return tag;
    }
    let waiter = self.tags.lock().get(&tag).cloned();
    let Some(mut waiter) = waiter else {
      return tag;
    };
    trace!(tag = %tag, "waiting for tag create");
    let resolved =
      match waiter.wait_for(Option::is_some).await {
        | Ok(resolved) => resolved.clone(),
        | Err(_) => None
      };
    resolved.unwrap_or(tag)
  }
}

/// Drains the calls started for one task.
async fn join_calls(
  task_id: &Id,
  mut calls: JoinSet<()>
) {
  while let Some(joined) = calls.join_next().await {
    if let Err(err) = joined {
      warn!(task = %task_id, error = %err, "sync call aborted");
    }
  }
}
