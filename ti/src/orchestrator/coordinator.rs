//! Orchestrator - drives parse, augment and index for every document

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use eyre::{Result, WrapErr};
use serde::Serialize;
use taskstore::KeyValueStore;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::OrchestratorConfig;
use super::sequence::SequenceContext;
use super::suppressed::SuppressedPaths;
use crate::augment::{AugmentConfig, AugmentContext, Augmentor};
use crate::config::Config;
use crate::domain::{Document, DocumentMetadata, Priority, ProjectData, Task};
use crate::events::{EventBus, FileChangeReason, IndexEvent, SettingsScope};
use crate::pool::{PoolStats, ProjectDataPool, WorkerDeps, WorkerPool};
use crate::repository::{IndexSummary, Repository, UpdateOptions};
use crate::source::{
    DocumentSource, FilterScope, InclusionFilter, MetadataTaskSource, ProjectResolver, SourceError, TaskParser,
};
use crate::storage::{AugmentedFingerprint, Namespace, RawCacheOracle, Storage, content_hash, is_augmented_valid, is_raw_valid};
use crate::workers::{MainThreadFallback, WorkerMetrics, WorkerOrchestrator};

/// External collaborators the orchestrator is built from
pub struct Collaborators {
    pub source: Arc<dyn DocumentSource>,
    pub parser: Arc<dyn TaskParser>,
    pub resolver: Arc<dyn ProjectResolver>,
    pub filter: Arc<dyn InclusionFilter>,
    pub metadata_tasks: Option<Arc<dyn MetadataTaskSource>>,
    pub store: Arc<dyn KeyValueStore>,
}

/// Tasks a file resolved to, before they reach the repository
struct Resolved {
    outcome: ProcessOutcome,
    /// `None` when there is nothing to index
    tasks: Option<Vec<Task>>,
}

impl Resolved {
    fn indexed(outcome: ProcessOutcome, tasks: Vec<Task>) -> Self {
        Self {
            outcome,
            tasks: Some(tasks),
        }
    }
}

/// How `process_file_immediate` handled a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessOutcome {
    /// Cached augmented tasks were still valid
    Reused,
    /// Cached raw tasks were merged again
    Reaugmented,
    /// The file went through the parser
    Parsed,
    /// The inclusion filter rejected the path; indexed as empty
    Excluded,
    /// The document no longer exists
    Missing,
    /// Processing failed; the previous index entry is kept
    Failed,
}

/// Snapshot returned by `Orchestrator::stats`
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub index: IndexSummary,
    pub pool: Option<PoolStats>,
    pub workers: WorkerMetrics,
    pub processed_files: u64,
    pub failed_files: u64,
    pub pending_debounce: usize,
    pub suppressed_inline: usize,
    pub suppressed_file_tasks: usize,
    pub last_processed_seq: u64,
}

pub(super) struct Inner {
    pub(super) config: OrchestratorConfig,
    pub(super) source: Arc<dyn DocumentSource>,
    pub(super) resolver: Arc<dyn ProjectResolver>,
    pub(super) filter: RwLock<Arc<dyn InclusionFilter>>,
    pub(super) storage: Storage,
    pub(super) repository: Repository,
    pub(super) workers: WorkerOrchestrator,
    pub(super) pool: WorkerPool,
    pub(super) augmentor: RwLock<Augmentor>,
    pub(super) bus: EventBus,
    pub(super) seq: SequenceContext,
    pub(super) debounce: Mutex<HashMap<String, (u64, JoinHandle<()>)>>,
    pub(super) debounce_tokens: AtomicU64,
    pub(super) suppressed: Mutex<SuppressedPaths>,
    pub(super) restore_timer: Mutex<Option<JoinHandle<()>>>,
    pub(super) listener: Mutex<Option<JoinHandle<()>>>,
    pub(super) processed_files: AtomicU64,
    pub(super) failed_files: AtomicU64,
}

/// Top-level coordinator of the indexing pipeline
#[derive(Clone)]
pub struct Orchestrator {
    pub(super) inner: Arc<Inner>,
}

impl Orchestrator {
    /// Wire storage, pools and repository around the collaborators
    ///
    /// Spawns the worker pool actor, so it must run inside a tokio runtime.
    pub fn new(config: &Config, collaborators: Collaborators, bus: EventBus) -> Self {
        debug!("Orchestrator::new: called");
        let Collaborators {
            source,
            parser,
            resolver,
            filter,
            metadata_tasks,
            store,
        } = collaborators;

        let storage = Storage::new(store);
        let deps = WorkerDeps {
            source: Arc::clone(&source),
            parser,
            metadata_tasks,
        };
        let oracle = Arc::new(RawCacheOracle::new(storage.clone(), Arc::clone(&source)));
        let pool = WorkerPool::spawn(config.pool.clone(), deps.clone()).with_cache_oracle(oracle);
        let project_pool = ProjectDataPool::new(Arc::clone(&resolver), config.workers.project_concurrency);
        let workers = WorkerOrchestrator::new(
            config.workers.clone(),
            Arc::new(pool.clone()),
            Arc::new(project_pool),
            MainThreadFallback::new(&deps),
        );
        let repository = Repository::new(storage.clone(), bus.clone(), config.repository.clone());

        let inner = Inner {
            config: config.orchestrator.clone(),
            source,
            resolver,
            filter: RwLock::new(filter),
            storage,
            repository,
            workers,
            pool,
            augmentor: RwLock::new(Augmentor::new(config.augment.clone())),
            bus,
            seq: SequenceContext::new(),
            debounce: Mutex::new(HashMap::new()),
            debounce_tokens: AtomicU64::new(0),
            suppressed: Mutex::new(SuppressedPaths::default()),
            restore_timer: Mutex::new(None),
            listener: Mutex::new(None),
            processed_files: AtomicU64::new(0),
            failed_files: AtomicU64::new(0),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn repository(&self) -> &Repository {
        &self.inner.repository
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn workers(&self) -> &WorkerOrchestrator {
        &self.inner.workers
    }

    pub fn last_processed_seq(&self) -> u64 {
        self.inner.seq.last_processed()
    }

    /// Restore or build the index, then start listening for events
    ///
    /// An empty persisted index triggers a full scan. A restored index is
    /// reconciled against the current documents, which costs one read per
    /// file when nothing changed.
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing task index");
        *self.inner.suppressed.lock().await = SuppressedPaths::load(&self.inner.storage).await;

        let restored = self.inner.repository.initialize().await;
        let paths = self.inner.source.list().await.wrap_err("Failed to list documents")?;

        if restored > 0 {
            for path in self.inner.repository.indexed_paths().await {
                if !paths.contains(&path) {
                    debug!(%path, "Orchestrator::initialize: dropping vanished document");
                    self.remove_path(&path).await;
                }
            }
        }

        self.scan(&paths).await;
        if let Err(e) = self.inner.repository.persist().await {
            warn!(error = %e, "Failed to persist index after scan");
        }

        self.start_listener().await;

        let summary = self.inner.repository.summary().await;
        info!(
            files = summary.files,
            tasks = summary.tasks,
            restored = restored > 0,
            "Task index ready"
        );
        self.inner.bus.emit(IndexEvent::CacheReady {
            initial: restored == 0,
            timestamp: Utc::now(),
            seq: summary.seq,
        });
        Ok(())
    }

    /// Parse, augment and index one file now
    ///
    /// Never fails: errors are logged and announced as a `FileChanged` event
    /// with reason `error`, leaving the file's previous index entry intact.
    pub async fn process_file_immediate(&self, path: &str, force: bool) -> ProcessOutcome {
        debug!(%path, force, "Orchestrator::process_file_immediate: called");
        match self.try_process(path, force).await {
            Ok(outcome) => {
                self.inner.processed_files.fetch_add(1, Ordering::Relaxed);
                debug!(%path, ?outcome, "Processed file");
                outcome
            }
            Err(e) => {
                self.report_failure(path, &e);
                ProcessOutcome::Failed
            }
        }
    }

    /// Process a set of files, through the worker batch API when large enough
    ///
    /// Everything the batch resolves is written with one repository update
    /// under a single sequence number. A file the workers could not parse
    /// keeps its previous index entry and is reported as failed.
    pub async fn process_batch(&self, paths: &[String]) {
        debug!(files = paths.len(), "Orchestrator::process_batch: called");
        if paths.len() <= self.inner.config.small_batch_threshold {
            for path in paths {
                self.process_file_immediate(path, false).await;
            }
            return;
        }

        let mut updates: Vec<(String, Vec<Task>)> = Vec::new();
        let mut prepared: HashMap<String, (Document, DocumentMetadata)> = HashMap::new();
        let mut to_parse = Vec::new();
        for path in paths {
            match self.read_document(path).await {
                Ok(Some((doc, metadata))) => {
                    if !self.includes(path, FilterScope::Inline).await {
                        self.exclude(path).await;
                        updates.push((path.clone(), Vec::new()));
                        continue;
                    }
                    if self.valid_raw(path, &doc).await.is_some() {
                        match self.resolve(path, false).await {
                            Ok(resolved) => {
                                self.inner.processed_files.fetch_add(1, Ordering::Relaxed);
                                if let Some(tasks) = resolved.tasks {
                                    updates.push((path.clone(), tasks));
                                }
                            }
                            Err(e) => self.report_failure(path, &e),
                        }
                        continue;
                    }
                    self.unsuppress(path).await;
                    to_parse.push(path.clone());
                    prepared.insert(path.clone(), (doc, metadata));
                }
                Ok(None) => self.remove_path(path).await,
                Err(e) => self.report_failure(path, &e),
            }
        }

        if !to_parse.is_empty() {
            self.parse_prepared(&to_parse, prepared, &mut updates).await;
        }
        self.commit_batch(updates).await;
    }

    /// Drop the in-memory index and rebuild it from every document
    pub async fn rebuild(&self) -> Result<()> {
        info!("Rebuilding task index");
        self.cancel_debounce().await;
        self.inner.repository.clear().await;
        let paths = self.inner.source.list().await.wrap_err("Failed to list documents")?;
        self.scan(&paths).await;
        self.inner
            .repository
            .persist()
            .await
            .wrap_err("Failed to persist rebuilt index")?;
        let seq = self.inner.repository.summary().await.seq;
        self.inner.bus.emit(IndexEvent::CacheReady {
            initial: false,
            timestamp: Utc::now(),
            seq,
        });
        Ok(())
    }

    /// Move a file's index entry from `old` to `new`
    pub async fn rename_file(&self, old: &str, new: &str) -> ProcessOutcome {
        debug!(%old, %new, "Orchestrator::rename_file: called");
        self.cancel_pending(old).await;
        let seq = self.inner.seq.next();
        self.inner.repository.remove_file(old, Some(seq)).await;
        {
            let mut suppressed = self.inner.suppressed.lock().await;
            suppressed.rename(old, new);
            suppressed.save(&self.inner.storage).await;
        }
        self.process_file_immediate(new, false).await
    }

    /// Invalidate cached state for the changed scopes and rebuild if needed
    pub async fn on_settings_change(&self, scopes: &[SettingsScope]) -> Result<()> {
        info!(?scopes, "Orchestrator::on_settings_change: called");
        let storage = &self.inner.storage;
        for scope in scopes {
            let namespaces: &[Namespace] = match scope {
                SettingsScope::Parser => &[Namespace::Raw, Namespace::Augmented],
                SettingsScope::Augment | SettingsScope::Project => &[Namespace::Augmented, Namespace::Project],
                SettingsScope::Index => &[Namespace::Consolidated],
            };
            for namespace in namespaces {
                storage
                    .clear_namespace(*namespace)
                    .await
                    .wrap_err_with(|| format!("Failed to clear {} cache", namespace))?;
            }
            if matches!(scope, SettingsScope::Augment | SettingsScope::Project) {
                self.inner.resolver.clear_cache(None).await;
            }
        }

        self.inner.bus.emit(IndexEvent::SettingsChanged {
            scopes: scopes.to_vec(),
            timestamp: Utc::now(),
        });

        let needs_rebuild = scopes
            .iter()
            .any(|s| matches!(s, SettingsScope::Parser | SettingsScope::Augment | SettingsScope::Project));
        if needs_rebuild {
            self.rebuild().await?;
        }
        Ok(())
    }

    /// Swap augmentor settings; a real change re-augments everything
    pub async fn update_augment_config(&self, config: AugmentConfig) -> Result<()> {
        {
            let mut augmentor = self.inner.augmentor.write().await;
            if augmentor.config() == &config {
                return Ok(());
            }
            *augmentor = Augmentor::new(config);
        }
        self.on_settings_change(&[SettingsScope::Augment]).await
    }

    pub async fn stats(&self) -> OrchestratorStats {
        let suppressed = self.inner.suppressed.lock().await.clone();
        OrchestratorStats {
            index: self.inner.repository.summary().await,
            pool: self.inner.pool.stats().await.ok(),
            workers: self.inner.workers.metrics().await,
            processed_files: self.inner.processed_files.load(Ordering::Relaxed),
            failed_files: self.inner.failed_files.load(Ordering::Relaxed),
            pending_debounce: self.inner.debounce.lock().await.len(),
            suppressed_inline: suppressed.inline.len(),
            suppressed_file_tasks: suppressed.file.len(),
            last_processed_seq: self.inner.seq.last_processed(),
        }
    }

    /// Cancel timers, stop listening and workers, write the index
    pub async fn cleanup(&self) {
        info!("Shutting down task index");
        self.cancel_debounce().await;
        if let Some(timer) = self.inner.restore_timer.lock().await.take() {
            timer.abort();
        }
        if let Some(listener) = self.inner.listener.lock().await.take() {
            listener.abort();
        }
        self.inner.workers.shutdown().await;
        self.inner.repository.shutdown().await;
        if let Err(e) = self.inner.repository.persist().await {
            warn!(error = %e, "Failed to persist index on shutdown");
        }
    }

    // === Pipeline steps ===

    async fn scan(&self, paths: &[String]) {
        let chunk = self.inner.config.scan_batch_size.max(1);
        let total = paths.len();
        for (i, batch) in paths.chunks(chunk).enumerate() {
            debug!(batch = i + 1, files = batch.len(), total, "Orchestrator::scan: batch");
            self.process_batch(batch).await;
        }
    }

    async fn try_process(&self, path: &str, force: bool) -> Result<ProcessOutcome> {
        let resolved = self.resolve(path, force).await?;
        if let Some(tasks) = resolved.tasks {
            let persist = resolved.outcome != ProcessOutcome::Excluded;
            self.commit(path, tasks, persist).await;
        }
        Ok(resolved.outcome)
    }

    /// Work out a file's tasks, filling the caches on the way
    async fn resolve(&self, path: &str, force: bool) -> Result<Resolved> {
        let Some((doc, metadata)) = self.read_document(path).await? else {
            debug!(%path, "Document vanished before processing");
            self.remove_path(path).await;
            return Ok(Resolved {
                outcome: ProcessOutcome::Missing,
                tasks: None,
            });
        };

        if !self.includes(path, FilterScope::Inline).await {
            self.exclude(path).await;
            return Ok(Resolved::indexed(ProcessOutcome::Excluded, Vec::new()));
        }
        self.unsuppress(path).await;

        let raw = if force { None } else { self.valid_raw(path, &doc).await };
        let project = self.project_data(path, raw.is_some()).await;
        let inputs_hash = self.inner.augmentor.read().await.inputs_hash(&metadata.frontmatter, &project);

        if let Some(raw) = raw {
            let fingerprint = AugmentedFingerprint {
                raw_hash: content_hash(&doc.content),
                inputs_hash,
            };
            if let Some(tasks) = self.valid_augmented(path, &fingerprint).await {
                return Ok(Resolved::indexed(ProcessOutcome::Reused, tasks));
            }
            let tasks = self.augment_and_store(path, &raw, &metadata, &project, fingerprint).await?;
            return Ok(Resolved::indexed(ProcessOutcome::Reaugmented, tasks));
        }

        let raw_tasks = self
            .inner
            .workers
            .parse_file(path, Priority::High)
            .await
            .wrap_err_with(|| format!("Failed to parse {}", path))?;
        let tasks = self
            .store_and_augment(path, &doc, &metadata, &project, inputs_hash, raw_tasks)
            .await?;
        Ok(Resolved::indexed(ProcessOutcome::Parsed, tasks))
    }

    /// Batch-parse files whose raw cache missed, appending their tasks to `updates`
    async fn parse_prepared(
        &self,
        to_parse: &[String],
        mut prepared: HashMap<String, (Document, DocumentMetadata)>,
        updates: &mut Vec<(String, Vec<Task>)>,
    ) {
        self.inner.resolver.clear_cache(Some(to_parse)).await;
        let projects = self.inner.workers.compute_project_data_batch(to_parse).await;
        for (path, data) in &projects {
            if let Err(e) = self.inner.storage.store_project(path, data).await {
                warn!(%path, error = %e, "Failed to cache project data");
            }
        }

        let mut parsed = match self.inner.workers.parse_batch(to_parse, Priority::Low).await {
            Ok(parsed) => parsed,
            Err(e) => {
                let report = eyre::Report::new(e).wrap_err("Batch parse failed");
                for path in to_parse {
                    self.report_failure(path, &report);
                }
                return;
            }
        };

        for path in to_parse {
            let Some((doc, metadata)) = prepared.remove(path) else {
                continue;
            };
            let Some(raw_tasks) = parsed.remove(path) else {
                self.report_failure(path, &eyre::eyre!("Failed to parse {} in worker batch", path));
                continue;
            };
            let project = projects.get(path).cloned().unwrap_or_default();
            let inputs_hash = self.inner.augmentor.read().await.inputs_hash(&metadata.frontmatter, &project);
            match self
                .store_and_augment(path, &doc, &metadata, &project, inputs_hash, raw_tasks)
                .await
            {
                Ok(tasks) => {
                    self.inner.processed_files.fetch_add(1, Ordering::Relaxed);
                    updates.push((path.clone(), tasks));
                }
                Err(e) => self.report_failure(path, &e),
            }
        }
    }

    async fn store_and_augment(
        &self,
        path: &str,
        doc: &Document,
        metadata: &DocumentMetadata,
        project: &ProjectData,
        inputs_hash: String,
        raw_tasks: Vec<Task>,
    ) -> Result<Vec<Task>> {
        let record = self
            .inner
            .storage
            .store_raw(path, &raw_tasks, &doc.content, doc.stat.mtime)
            .await
            .wrap_err_with(|| format!("Failed to cache raw tasks for {}", path))?;
        let fingerprint = AugmentedFingerprint {
            raw_hash: record.hash.unwrap_or_else(|| content_hash(&doc.content)),
            inputs_hash,
        };
        self.augment_and_store(path, &raw_tasks, metadata, project, fingerprint)
            .await
    }

    async fn augment_and_store(
        &self,
        path: &str,
        raw: &[Task],
        metadata: &DocumentMetadata,
        project: &ProjectData,
        fingerprint: AugmentedFingerprint,
    ) -> Result<Vec<Task>> {
        let ctx = AugmentContext {
            file_path: path,
            frontmatter: &metadata.frontmatter,
            project,
        };
        let tasks = self.inner.augmentor.read().await.merge(ctx, raw);
        self.inner
            .storage
            .store_augmented(path, &tasks, fingerprint)
            .await
            .wrap_err_with(|| format!("Failed to cache augmented tasks for {}", path))?;
        Ok(tasks)
    }

    /// Write a file's tasks to the repository under a fresh sequence number
    async fn commit(&self, path: &str, tasks: Vec<Task>, persist: bool) -> bool {
        let seq = self.inner.seq.next();
        let options = UpdateOptions {
            persist,
            force_emit: false,
        };
        self.inner.repository.update_file(path, tasks, Some(seq), options).await
    }

    /// Write a batch's files with one repository update under one sequence number
    async fn commit_batch(&self, updates: Vec<(String, Vec<Task>)>) {
        if updates.is_empty() {
            return;
        }
        let seq = self.inner.seq.next();
        let options = UpdateOptions {
            persist: false,
            force_emit: false,
        };
        self.inner.repository.update_batch(updates, Some(seq), options).await;
    }

    pub(super) async fn read_document(&self, path: &str) -> Result<Option<(Document, DocumentMetadata)>> {
        let doc = match self.inner.source.read(path).await {
            Ok(doc) => doc,
            Err(SourceError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e).wrap_err_with(|| format!("Failed to read {}", path)),
        };
        let metadata = match self.inner.source.metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(%path, error = %e, "Frontmatter unreadable, continuing without it");
                DocumentMetadata::default()
            }
        };
        Ok(Some((doc, metadata)))
    }

    /// Raw tasks whose fingerprint matches the document; read errors are misses
    pub(super) async fn valid_raw(&self, path: &str, doc: &Document) -> Option<Vec<Task>> {
        match self.inner.storage.load_raw(path).await {
            Ok(Some(record)) if is_raw_valid(&record, &doc.content, doc.stat.mtime) => Some(record.data),
            Ok(_) => None,
            Err(e) => {
                warn!(%path, error = %e, "Raw cache unreadable, treating as miss");
                None
            }
        }
    }

    async fn valid_augmented(&self, path: &str, fingerprint: &AugmentedFingerprint) -> Option<Vec<Task>> {
        match self.inner.storage.load_augmented(path).await {
            Ok(Some(record)) if is_augmented_valid(&record, fingerprint) => Some(record.data),
            Ok(_) => None,
            Err(e) => {
                warn!(%path, error = %e, "Augmented cache unreadable, treating as miss");
                None
            }
        }
    }

    /// Cached project data when the file is unchanged, else a fresh lookup
    async fn project_data(&self, path: &str, reuse: bool) -> ProjectData {
        if reuse {
            match self.inner.storage.load_project(path).await {
                Ok(Some(record)) => return record.data,
                Ok(None) => {}
                Err(e) => warn!(%path, error = %e, "Project cache unreadable, recomputing"),
            }
        }
        let paths = [path.to_string()];
        self.inner.resolver.clear_cache(Some(&paths[..])).await;
        match self.inner.workers.compute_project_data(path).await {
            Some(data) => {
                if let Err(e) = self.inner.storage.store_project(path, &data).await {
                    warn!(%path, error = %e, "Failed to cache project data");
                }
                data
            }
            None => ProjectData::default(),
        }
    }

    pub(super) async fn includes(&self, path: &str, scope: FilterScope) -> bool {
        self.inner.filter.read().await.should_include(path, scope)
    }

    /// Record an excluded path as suppressed; its caches stay untouched
    async fn exclude(&self, path: &str) {
        debug!(%path, "Orchestrator: path excluded by filter");
        let mut suppressed = self.inner.suppressed.lock().await;
        if suppressed.inline.insert(path.to_string()) {
            suppressed.save(&self.inner.storage).await;
        }
    }

    async fn unsuppress(&self, path: &str) {
        let mut suppressed = self.inner.suppressed.lock().await;
        if suppressed.inline.remove(path) {
            suppressed.save(&self.inner.storage).await;
        }
    }

    pub(super) async fn remove_path(&self, path: &str) {
        debug!(%path, "Orchestrator::remove_path: called");
        self.cancel_pending(path).await;
        let seq = self.inner.seq.next();
        self.inner.repository.remove_file(path, Some(seq)).await;
        let mut suppressed = self.inner.suppressed.lock().await;
        if suppressed.forget(path) {
            suppressed.save(&self.inner.storage).await;
        }
    }

    fn report_failure(&self, path: &str, error: &eyre::Report) {
        let message = format!("{:#}", error);
        error!(%path, error = %message, "Failed to process file");
        self.inner.failed_files.fetch_add(1, Ordering::Relaxed);
        self.inner.bus.emit(IndexEvent::FileChanged {
            path: path.to_string(),
            reason: FileChangeReason::Error,
            error: Some(message),
        });
    }
}
