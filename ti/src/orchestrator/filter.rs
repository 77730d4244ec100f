//! Filter prune/restore
//!
//! A filter change first prunes: indexed paths the new filter excludes are
//! emptied in memory and recorded as suppressed. A trailing-debounced restore
//! then brings back every suppressed path the filter includes again, reusing
//! cached results where they are still valid.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::coordinator::Orchestrator;
use crate::events::{FileChangeReason, IndexEvent};
use crate::repository::UpdateOptions;
use crate::source::{FilterScope, InclusionFilter};

impl Orchestrator {
    /// Install a new inclusion filter, prune, and schedule a restore pass
    pub async fn update_filter(&self, filter: Arc<dyn InclusionFilter>) {
        info!("Orchestrator::update_filter: called");
        *self.inner.filter.write().await = filter;
        self.prune().await;
        self.schedule_restore().await;
    }

    /// Empty and record every indexed path the current filter excludes
    pub async fn prune(&self) -> (usize, usize) {
        debug!("Orchestrator::prune: called");
        let mut inline = 0;
        let mut file = 0;
        let mut suppressed = self.inner.suppressed.lock().await;

        for path in self.inner.repository.indexed_paths().await {
            if self.includes(&path, FilterScope::Inline).await {
                continue;
            }
            let seq = self.inner.seq.next();
            let options = UpdateOptions {
                persist: false,
                force_emit: true,
            };
            self.inner.repository.update_file(&path, Vec::new(), Some(seq), options).await;
            suppressed.inline.insert(path);
            inline += 1;
        }

        for path in self.inner.repository.file_task_paths().await {
            if self.includes(&path, FilterScope::File).await {
                continue;
            }
            self.inner.repository.remove_file_task(&path).await;
            suppressed.file.insert(path);
            file += 1;
        }

        suppressed.save(&self.inner.storage).await;
        info!(inline, file, "Pruned paths excluded by filter");
        (inline, file)
    }

    /// Trailing-edge debounce; a newer call supersedes a pending or running pass
    pub async fn schedule_restore(&self) {
        let delay = self.inner.config.restore_debounce();
        let orchestrator = self.clone();
        let mut timer = self.inner.restore_timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            orchestrator.restore().await;
        }));
    }

    /// Re-index suppressed paths the current filter includes again
    ///
    /// Each path goes through normal processing, so a still-valid augmented
    /// cache is reused before raw re-augmentation or a full parse.
    pub async fn restore(&self) -> usize {
        debug!("Orchestrator::restore: called");
        let suppressed = self.inner.suppressed.lock().await.clone();

        let mut candidates = Vec::new();
        for path in &suppressed.inline {
            if self.includes(path, FilterScope::Inline).await {
                candidates.push(path.clone());
            }
        }
        if suppressed.is_empty() {
            candidates = self.fallback_candidates().await;
        }

        let batch_size = self.inner.config.restore_batch_size.max(1);
        let batches = candidates.len().div_ceil(batch_size);
        for (i, batch) in candidates.chunks(batch_size).enumerate() {
            for path in batch {
                self.process_file_immediate(path, false).await;
            }
            if i + 1 < batches {
                tokio::time::sleep(self.inner.config.restore_interval()).await;
            }
        }

        let mut file_paths = Vec::new();
        for path in &suppressed.file {
            if self.includes(path, FilterScope::File).await {
                file_paths.push(path.clone());
            }
        }
        for path in &file_paths {
            self.inner
                .bus
                .emit(IndexEvent::file_changed(path.clone(), FileChangeReason::Restore));
        }

        {
            let mut current = self.inner.suppressed.lock().await;
            for path in candidates.iter().chain(file_paths.iter()) {
                current.forget(path);
            }
            current.save(&self.inner.storage).await;
        }

        info!(
            inline = candidates.len(),
            file = file_paths.len(),
            "Restored paths re-included by filter"
        );
        candidates.len() + file_paths.len()
    }

    /// Cached paths missing from the index, when nothing was recorded
    async fn fallback_candidates(&self) -> Vec<String> {
        let mut cached = BTreeSet::new();
        if let Ok(paths) = self.inner.storage.list_augmented_paths().await {
            cached.extend(paths);
        }
        if let Ok(paths) = self.inner.storage.list_raw_paths().await {
            cached.extend(paths);
        }

        let mut candidates = Vec::new();
        for path in cached {
            if self.inner.repository.contains_file(&path).await || !self.includes(&path, FilterScope::Inline).await {
                continue;
            }
            if matches!(self.inner.source.stat(&path).await, Ok(Some(_))) {
                candidates.push(path);
            }
        }
        debug!(candidates = candidates.len(), "Orchestrator: derived restore candidates from caches");
        candidates
    }
}
