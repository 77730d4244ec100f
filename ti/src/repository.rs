//! Repository - the in-memory task index
//!
//! Maps path -> task ids and id -> task, tracks file-level tasks and calendar
//! events, and announces every effective change as an `IndexBatchUpdated`
//! event. Persistence is a debounced full snapshot into the consolidated
//! namespace.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::Task;
use crate::events::{EventBus, IndexEvent};
use crate::storage::{Storage, StorageResult};

/// Snapshot persistence settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Quiet period before a scheduled snapshot is written
    #[serde(default = "default_persist_delay_ms")]
    pub persist_delay_ms: u64,

    /// Changes after which a snapshot is written immediately
    #[serde(default = "default_persist_max_queued")]
    pub persist_max_queued: usize,

    /// Longest time between snapshots while changes keep arriving
    #[serde(default = "default_persist_max_interval_ms")]
    pub persist_max_interval_ms: u64,
}

fn default_persist_delay_ms() -> u64 {
    1000
}

fn default_persist_max_queued() -> usize {
    10
}

fn default_persist_max_interval_ms() -> u64 {
    5000
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            persist_delay_ms: default_persist_delay_ms(),
            persist_max_queued: default_persist_max_queued(),
            persist_max_interval_ms: default_persist_max_interval_ms(),
        }
    }
}

impl RepositoryConfig {
    pub fn persist_delay(&self) -> Duration {
        Duration::from_millis(self.persist_delay_ms)
    }

    pub fn persist_max_interval(&self) -> Duration {
        Duration::from_millis(self.persist_max_interval_ms)
    }
}

/// Persisted form of the whole index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub files: BTreeMap<String, Vec<Task>>,
    #[serde(default)]
    pub file_tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub calendar_events: Vec<serde_json::Value>,
    #[serde(default)]
    pub seq: u64,
}

/// How an update is propagated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Schedule a snapshot write when the index changed
    pub persist: bool,
    /// Emit the change event even if the tasks are identical
    pub force_emit: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            persist: true,
            force_emit: false,
        }
    }
}

/// Counts describing the index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub files: usize,
    pub tasks: usize,
    pub completed: usize,
    pub file_tasks: usize,
    pub calendar_events: usize,
    pub seq: u64,
}

#[derive(Debug, Default)]
struct IndexState {
    files: HashMap<String, Vec<String>>,
    tasks: HashMap<String, Task>,
    file_tasks: BTreeMap<String, Task>,
    calendar_events: Vec<serde_json::Value>,
    seq: u64,
}

impl IndexState {
    fn tasks_for(&self, path: &str) -> Vec<Task> {
        self.files
            .get(path)
            .map(|ids| ids.iter().filter_map(|id| self.tasks.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Replace a file's tasks; returns every path whose task list changed
    fn replace_file(&mut self, path: &str, tasks: Vec<Task>) -> Vec<String> {
        if self.files.contains_key(path) && self.tasks_for(path) == tasks {
            return Vec::new();
        }

        let mut changed = vec![path.to_string()];
        for id in self.files.remove(path).unwrap_or_default() {
            self.tasks.remove(&id);
        }

        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            if let Some(previous) = self.tasks.get(&task.id)
                && previous.file_path != path
            {
                // The id moves here; a task belongs to exactly one file
                let owner = previous.file_path.clone();
                if let Some(owner_ids) = self.files.get_mut(&owner) {
                    owner_ids.retain(|id| id != &task.id);
                }
                if !changed.contains(&owner) {
                    changed.push(owner);
                }
            }
            if !ids.contains(&task.id) {
                ids.push(task.id.clone());
            }
            self.tasks.insert(task.id.clone(), task);
        }
        self.files.insert(path.to_string(), ids);
        changed
    }

    fn remove_file(&mut self, path: &str) -> bool {
        let inline = match self.files.remove(path) {
            Some(ids) => {
                for id in ids {
                    self.tasks.remove(&id);
                }
                true
            }
            None => false,
        };
        let file_task = self.file_tasks.remove(path).is_some();
        inline || file_task
    }

    fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            files: self.files.keys().map(|path| (path.clone(), self.tasks_for(path))).collect(),
            file_tasks: self.file_tasks.clone(),
            calendar_events: self.calendar_events.clone(),
            seq: self.seq,
        }
    }

    fn restore(&mut self, snapshot: IndexSnapshot) {
        *self = Self::default();
        for (path, tasks) in snapshot.files {
            self.replace_file(&path, tasks);
        }
        self.file_tasks = snapshot.file_tasks;
        self.calendar_events = snapshot.calendar_events;
        self.seq = snapshot.seq;
    }
}

struct PersistState {
    pending: usize,
    last_write: Instant,
    timer: Option<JoinHandle<()>>,
}

struct RepoInner {
    state: RwLock<IndexState>,
    storage: Storage,
    bus: EventBus,
    config: RepositoryConfig,
    persist: Mutex<PersistState>,
}

/// Shared handle to the task index
#[derive(Clone)]
pub struct Repository {
    inner: Arc<RepoInner>,
}

impl Repository {
    pub fn new(storage: Storage, bus: EventBus, config: RepositoryConfig) -> Self {
        debug!(?config, "Repository::new: called");
        let inner = RepoInner {
            state: RwLock::new(IndexState::default()),
            storage,
            bus,
            config,
            persist: Mutex::new(PersistState {
                pending: 0,
                last_write: Instant::now(),
                timer: None,
            }),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Restore the last persisted snapshot; returns the number of files loaded
    pub async fn initialize(&self) -> usize {
        debug!("Repository::initialize: called");
        match self.inner.storage.load_consolidated().await {
            Ok(Some(snapshot)) => {
                let files = snapshot.files.len();
                self.inner.state.write().await.restore(snapshot);
                info!(files, "Restored index snapshot");
                files
            }
            Ok(None) => 0,
            Err(e) => {
                warn!(error = %e, "Index snapshot unreadable, starting empty");
                0
            }
        }
    }

    /// Replace the tasks of one file
    ///
    /// Returns whether the index changed. The change event carries
    /// `source_seq` so its producer can recognise it.
    pub async fn update_file(&self, path: &str, tasks: Vec<Task>, source_seq: Option<u64>, options: UpdateOptions) -> bool {
        debug!(%path, tasks = tasks.len(), ?source_seq, "Repository::update_file: called");
        let changed = self.inner.state.write().await.replace_file(path, tasks);
        let effective = !changed.is_empty();
        let files = if effective { changed } else { vec![path.to_string()] };
        if effective || options.force_emit {
            self.announce(files, source_seq).await;
        }
        if effective && options.persist {
            self.schedule_persist().await;
        }
        effective
    }

    /// Replace many files with a single change event
    pub async fn update_batch(
        &self,
        updates: Vec<(String, Vec<Task>)>,
        source_seq: Option<u64>,
        options: UpdateOptions,
    ) -> Vec<String> {
        debug!(files = updates.len(), ?source_seq, "Repository::update_batch: called");
        let mut changed: Vec<String> = Vec::new();
        {
            let mut state = self.inner.state.write().await;
            for (path, tasks) in updates {
                for file in state.replace_file(&path, tasks) {
                    if !changed.contains(&file) {
                        changed.push(file);
                    }
                }
            }
        }
        if !changed.is_empty() || options.force_emit {
            self.announce(changed.clone(), source_seq).await;
        }
        if !changed.is_empty() && options.persist {
            self.schedule_persist().await;
        }
        changed
    }

    /// Drop a file's inline and file-level tasks plus its cached records
    pub async fn remove_file(&self, path: &str, source_seq: Option<u64>) -> bool {
        debug!(%path, "Repository::remove_file: called");
        let removed = self.inner.state.write().await.remove_file(path);
        if let Err(e) = self.inner.storage.clear_file(path).await {
            warn!(%path, error = %e, "Failed to clear cached records for removed file");
        }
        if removed {
            self.announce(vec![path.to_string()], source_seq).await;
            self.schedule_persist().await;
        }
        removed
    }

    pub async fn remove_task_by_id(&self, id: &str) -> Option<Task> {
        debug!(%id, "Repository::remove_task_by_id: called");
        let removed = {
            let mut state = self.inner.state.write().await;
            let task = state.tasks.remove(id)?;
            if let Some(ids) = state.files.get_mut(&task.file_path) {
                ids.retain(|existing| existing != id);
            }
            task
        };
        self.announce(vec![removed.file_path.clone()], None).await;
        self.schedule_persist().await;
        Some(removed)
    }

    /// Replace or append one task in its file
    pub async fn update_single_task(&self, task: Task) -> bool {
        debug!(id = %task.id, path = %task.file_path, "Repository::update_single_task: called");
        let path = task.file_path.clone();
        let mut tasks = self.tasks_for_file(&path).await;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) if *existing == task => return false,
            Some(existing) => *existing = task,
            None => tasks.push(task),
        }
        self.update_file(&path, tasks, None, UpdateOptions::default()).await
    }

    pub async fn update_file_task(&self, task: Task) -> bool {
        debug!(path = %task.file_path, "Repository::update_file_task: called");
        let path = task.file_path.clone();
        let changed = {
            let mut state = self.inner.state.write().await;
            if state.file_tasks.get(&path) == Some(&task) {
                false
            } else {
                state.file_tasks.insert(path.clone(), task);
                true
            }
        };
        if changed {
            self.announce(vec![path], None).await;
            self.schedule_persist().await;
        }
        changed
    }

    pub async fn remove_file_task(&self, path: &str) -> bool {
        debug!(%path, "Repository::remove_file_task: called");
        let removed = self.inner.state.write().await.file_tasks.remove(path).is_some();
        if removed {
            self.announce(vec![path.to_string()], None).await;
            self.schedule_persist().await;
        }
        removed
    }

    pub async fn update_calendar_events(&self, events: Vec<serde_json::Value>, seq: u64) {
        debug!(events = events.len(), seq, "Repository::update_calendar_events: called");
        self.inner.state.write().await.calendar_events = events;
        self.schedule_persist().await;
    }

    pub async fn file_task_paths(&self) -> Vec<String> {
        self.inner.state.read().await.file_tasks.keys().cloned().collect()
    }

    pub async fn file_task(&self, path: &str) -> Option<Task> {
        self.inner.state.read().await.file_tasks.get(path).cloned()
    }

    /// Paths with an inline-task entry, sorted
    pub async fn indexed_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.state.read().await.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub async fn contains_file(&self, path: &str) -> bool {
        self.inner.state.read().await.files.contains_key(path)
    }

    pub async fn task_by_id(&self, id: &str) -> Option<Task> {
        self.inner.state.read().await.tasks.get(id).cloned()
    }

    pub async fn tasks_for_file(&self, path: &str) -> Vec<Task> {
        self.inner.state.read().await.tasks_for(path)
    }

    /// Inline tasks ordered by path and line, followed by file-level tasks
    pub async fn all_tasks(&self) -> Vec<Task> {
        let state = self.inner.state.read().await;
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.file_path.cmp(&b.file_path).then(a.line.cmp(&b.line)));
        tasks.extend(state.file_tasks.values().cloned());
        tasks
    }

    pub async fn summary(&self) -> IndexSummary {
        let state = self.inner.state.read().await;
        IndexSummary {
            files: state.files.len(),
            tasks: state.tasks.len(),
            completed: state.tasks.values().filter(|t| t.completed).count(),
            file_tasks: state.file_tasks.len(),
            calendar_events: state.calendar_events.len(),
            seq: state.seq,
        }
    }

    pub async fn is_empty(&self) -> bool {
        let state = self.inner.state.read().await;
        state.files.is_empty() && state.file_tasks.is_empty()
    }

    /// Forget everything in memory; persisted data is untouched
    pub async fn clear(&self) {
        info!("Clearing in-memory index");
        let mut state = self.inner.state.write().await;
        let seq = state.seq;
        *state = IndexState { seq, ..IndexState::default() };
    }

    pub async fn snapshot(&self) -> IndexSnapshot {
        self.inner.state.read().await.snapshot()
    }

    /// Write the snapshot now
    pub async fn persist(&self) -> StorageResult<()> {
        let snapshot = self.snapshot().await;
        debug!(files = snapshot.files.len(), "Repository::persist: called");
        {
            let mut persist = self.inner.persist.lock().await;
            persist.pending = 0;
            persist.last_write = Instant::now();
            // Dropping the handle detaches the timer; it may be the caller
            persist.timer = None;
        }
        self.inner.storage.store_consolidated(&snapshot).await
    }

    /// Debounced snapshot write
    ///
    /// Writes immediately once too many changes are queued or the last write
    /// is older than the maximum interval.
    pub async fn schedule_persist(&self) {
        let config = &self.inner.config;
        let mut persist = self.inner.persist.lock().await;
        persist.pending += 1;
        if let Some(timer) = persist.timer.take() {
            timer.abort();
        }

        let overdue = persist.last_write.elapsed() >= config.persist_max_interval();
        if persist.pending >= config.persist_max_queued || overdue {
            debug!(pending = persist.pending, overdue, "Repository::schedule_persist: flushing now");
            drop(persist);
            self.persist_logged().await;
            return;
        }

        let repo = self.clone();
        let delay = config.persist_delay();
        persist.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            repo.persist_logged().await;
        }));
    }

    /// Cancel a pending snapshot write
    pub async fn shutdown(&self) {
        if let Some(timer) = self.inner.persist.lock().await.timer.take() {
            timer.abort();
        }
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Failed to persist index snapshot");
        }
    }

    async fn announce(&self, changed_files: Vec<String>, source_seq: Option<u64>) {
        let (seq, total_tasks) = {
            let mut state = self.inner.state.write().await;
            state.seq += 1;
            (state.seq, state.tasks.len())
        };
        self.inner.bus.emit(IndexEvent::IndexBatchUpdated {
            changed_files,
            source_seq,
            seq,
            total_tasks,
        });
    }
}
