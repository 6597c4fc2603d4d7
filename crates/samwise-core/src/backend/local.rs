use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{Backend, LoadedData};
use crate::error::SyncError;
use crate::model::{Id, SubTask, Tag, Task};
use crate::state::UndoCache;

/// Document store kept as one JSONL file
/// per collection. Ids are sequential
/// numbers shared by all collections and
/// never handed out twice.
#[derive(Debug)]
pub struct LocalBackend {
    pub data_dir: PathBuf,
    pub tags_path: PathBuf,
    pub tasks_path: PathBuf,
    pub subtasks_path: PathBuf,
    pub counter_path: PathBuf,
    lock: Mutex<()>,
}

impl LocalBackend {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tags_path = data_dir.join("tags.data");
        let tasks_path = data_dir.join("tasks.data");
        let subtasks_path = data_dir.join("subtasks.data");
        let counter_path = data_dir.join("next_id.data");

        for path in [&tags_path, &tasks_path, &subtasks_path] {
            if !path.exists() {
                fs::write(path, "")?;
            }
        }

        info!(
            data_dir = %data_dir.display(),
            tags = %tags_path.display(),
            tasks = %tasks_path.display(),
            subtasks = %subtasks_path.display(),
            "opened local backend"
        );

        Ok(Self {
            data_dir,
            tags_path,
            tasks_path,
            subtasks_path,
            counter_path,
            lock: Mutex::new(()),
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tags(&self) -> anyhow::Result<Vec<Tag>> {
        load_jsonl(&self.tags_path).context("failed to load tags.data")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.tasks_path).context("failed to load tasks.data")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_subtasks(&self) -> anyhow::Result<Vec<SubTask>> {
        load_jsonl(&self.subtasks_path).context("failed to load subtasks.data")
    }

    /// Takes the next id off the counter
    /// file. Data written before the counter
    /// existed is honored by never going
    /// below the largest stored id.
    fn next_id(&self) -> anyhow::Result<Id> {
        let counter = self.read_counter()?;
        let tags = self.load_tags()?;
        let tasks = self.load_tasks()?;
        let subtasks = self.load_subtasks()?;
        let stored_max = tags
            .iter()
            .map(|t| &t.id)
            .chain(tasks.iter().map(|t| &t.id))
            .chain(subtasks.iter().map(|s| &s.id))
            .filter_map(|id| id.as_str().parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        let next = counter.max(stored_max + 1);
        write_atomic(&self.counter_path, format!("{}\n", next + 1).as_bytes())
            .context("failed to save next_id.data")?;
        debug!(id = next, "issued id");
        Ok(Id::from(next))
    }

    fn read_counter(&self) -> anyhow::Result<u64> {
        if !self.counter_path.exists() {
            return Ok(0);
        }
        let raw = fs::read_to_string(&self.counter_path)
            .with_context(|| format!("failed reading {}", self.counter_path.display()))?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse::<u64>()
            .with_context(|| format!("invalid id counter {raw:?} in {}", self.counter_path.display()))
    }

    fn load_all_sync(&self) -> anyhow::Result<LoadedData> {
        let _guard = self.lock.lock();
        let data = LoadedData {
            tags: self.load_tags()?,
            tasks: self.load_tasks()?,
            subtasks: self.load_subtasks()?,
        };
        debug!(
            tags = data.tags.len(),
            tasks = data.tasks.len(),
            subtasks = data.subtasks.len(),
            "loaded local documents"
        );
        Ok(data)
    }

    fn create_tag_sync(&self, mut tag: Tag) -> anyhow::Result<Tag> {
        let _guard = self.lock.lock();
        tag.id = self.next_id()?;
        let mut tags = self.load_tags()?;
        tags.push(tag.clone());
        save_jsonl_atomic(&self.tags_path, &tags).context("failed to save tags.data")?;
        Ok(tag)
    }

    fn edit_tag_sync(&self, tag: Tag) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut tags = self.load_tags()?;
        let slot = tags
            .iter_mut()
            .find(|t| t.id == tag.id)
            .ok_or_else(|| SyncError::UnknownTag(tag.id.clone()))?;
        *slot = tag;
        save_jsonl_atomic(&self.tags_path, &tags).context("failed to save tags.data")
    }

    fn delete_tag_sync(&self, id: &Id) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut tags = self.load_tags()?;
        let before = tags.len();
        tags.retain(|t| &t.id != id);
        if tags.len() == before {
            return Err(SyncError::UnknownTag(id.clone()).into());
        }
        save_jsonl_atomic(&self.tags_path, &tags).context("failed to save tags.data")?;

        let mut tasks = self.load_tasks()?;
        let mut retagged = 0usize;
        for task in tasks.iter_mut().filter(|t| &t.tag == id) {
            task.tag = Id::none_tag();
            retagged += 1;
        }
        if retagged > 0 {
            save_jsonl_atomic(&self.tasks_path, &tasks).context("failed to save tasks.data")?;
        }
        Ok(())
    }

    fn create_task_sync(&self, mut task: Task) -> anyhow::Result<Task> {
        let _guard = self.lock.lock();
        task.id = self.next_id()?;
        let mut tasks = self.load_tasks()?;
        tasks.push(task.clone());
        save_jsonl_atomic(&self.tasks_path, &tasks).context("failed to save tasks.data")?;
        Ok(task)
    }

    fn edit_task_sync(&self, task: Task) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut tasks = self.load_tasks()?;
        let slot = tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| SyncError::UnknownTask(task.id.clone()))?;
        *slot = task;
        save_jsonl_atomic(&self.tasks_path, &tasks).context("failed to save tasks.data")
    }

    fn delete_task_sync(&self, id: &Id, subtasks: &[Id]) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut tasks = self.load_tasks()?;
        let before = tasks.len();
        tasks.retain(|t| &t.id != id);
        if tasks.len() == before {
            return Err(SyncError::UnknownTask(id.clone()).into());
        }
        save_jsonl_atomic(&self.tasks_path, &tasks).context("failed to save tasks.data")?;

        let mut stored = self.load_subtasks()?;
        stored.retain(|s| &s.parent != id && !subtasks.contains(&s.id));
        save_jsonl_atomic(&self.subtasks_path, &stored).context("failed to save subtasks.data")
    }

    fn create_subtask_sync(&self, parent: &Task, mut subtask: SubTask) -> anyhow::Result<SubTask> {
        let _guard = self.lock.lock();
        if !self.load_tasks()?.iter().any(|t| t.id == parent.id) {
            return Err(SyncError::UnknownTask(parent.id.clone()).into());
        }
        subtask.id = self.next_id()?;
        subtask.parent = parent.id.clone();
        let mut stored = self.load_subtasks()?;
        stored.push(subtask.clone());
        save_jsonl_atomic(&self.subtasks_path, &stored).context("failed to save subtasks.data")?;
        Ok(subtask)
    }

    fn edit_subtask_sync(&self, parent: &Task, mut subtask: SubTask) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        subtask.parent = parent.id.clone();
        let mut stored = self.load_subtasks()?;
        let slot = stored
            .iter_mut()
            .find(|s| s.id == subtask.id)
            .ok_or_else(|| SyncError::UnknownSubTask {
                task: parent.id.clone(),
                subtask: subtask.id.clone(),
            })?;
        *slot = subtask;
        save_jsonl_atomic(&self.subtasks_path, &stored).context("failed to save subtasks.data")
    }

    fn delete_subtask_sync(&self, id: &Id) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut stored = self.load_subtasks()?;
        stored.retain(|s| &s.id != id);
        save_jsonl_atomic(&self.subtasks_path, &stored).context("failed to save subtasks.data")
    }
}

impl Backend for LocalBackend {
    async fn load_all(&self) -> anyhow::Result<LoadedData> {
        self.load_all_sync()
    }

    async fn create_tag(&self, tag: Tag) -> anyhow::Result<Tag> {
        self.create_tag_sync(tag)
    }

    async fn edit_tag(&self, tag: Tag) -> anyhow::Result<()> {
        self.edit_tag_sync(tag)
    }

    async fn delete_tag(&self, id: Id) -> anyhow::Result<()> {
        self.delete_tag_sync(&id)
    }

    async fn create_task(&self, task: Task) -> anyhow::Result<Task> {
        self.create_task_sync(task)
    }

    async fn edit_task(&self, task: Task) -> anyhow::Result<()> {
        self.edit_task_sync(task)
    }

    async fn delete_task(&self, id: Id, subtasks: Vec<Id>) -> anyhow::Result<()> {
        self.delete_task_sync(&id, &subtasks)
    }

    async fn create_subtask(&self, parent: Task, subtask: SubTask) -> anyhow::Result<SubTask> {
        self.create_subtask_sync(&parent, subtask)
    }

    async fn edit_subtask(&self, parent: Task, subtask: SubTask) -> anyhow::Result<()> {
        self.edit_subtask_sync(&parent, subtask)
    }

    async fn delete_subtask(&self, id: Id) -> anyhow::Result<()> {
        self.delete_subtask_sync(&id)
    }
}

/// Reads the undo cache the CLI keeps
/// between invocations. A missing file is
/// an empty cache.
#[tracing::instrument(skip(path))]
pub fn load_undo_cache(path: &Path) -> anyhow::Result<UndoCache> {
    if !path.exists() {
        return Ok(UndoCache::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(UndoCache::default());
    }
    serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))
}

#[tracing::instrument(skip(path, cache))]
pub fn save_undo_cache(path: &Path, cache: &UndoCache) -> anyhow::Result<()> {
    write_atomic(path, &serde_json::to_vec(cache)?)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
    Ok(())
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let doc: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(doc);
    }

    debug!(count = out.len(), "loaded documents from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, docs))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, docs: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = docs.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for doc in docs {
        let serialized = serde_json::to_string(doc)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
