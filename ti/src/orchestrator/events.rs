//! Inbound event handling and per-path debouncing

use std::sync::atomic::Ordering;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::coordinator::Orchestrator;
use crate::events::{FileChangeReason, IndexEvent};
use crate::source::FilterScope;

impl Orchestrator {
    /// Subscribe to the bus and handle events until cleanup
    pub(super) async fn start_listener(&self) {
        let mut listener = self.inner.listener.lock().await;
        if listener.is_some() {
            return;
        }
        let mut rx = self.inner.bus.subscribe();
        let orchestrator = self.clone();
        *listener = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => orchestrator.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event listener lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Orchestrator: event listener stopped");
        }));
        info!("Listening for index events");
    }

    /// React to one inbound event
    pub async fn handle_event(&self, event: IndexEvent) {
        debug!(event_type = event.event_type(), "Orchestrator::handle_event: called");
        match event {
            IndexEvent::FileChanged { path, reason, .. } => match reason {
                FileChangeReason::Error => {}
                FileChangeReason::Delete => self.remove_path(&path).await,
                _ => self.schedule_process(path, false).await,
            },
            IndexEvent::TaskUpdated { task } => {
                self.inner.repository.update_single_task(task).await;
            }
            IndexEvent::TaskDeleted {
                task_id,
                file_path,
                deleted_task_ids,
                ..
            } => {
                for id in std::iter::once(&task_id).chain(deleted_task_ids.iter()) {
                    self.inner.repository.remove_task_by_id(id).await;
                }
                self.process_file_immediate(&file_path, true).await;
            }
            IndexEvent::FileTaskUpdated { task } => {
                let path = task.file_path.clone();
                if self.includes(&path, FilterScope::File).await {
                    self.inner.repository.update_file_task(task).await;
                } else {
                    debug!(%path, "File task excluded by filter");
                    let mut suppressed = self.inner.suppressed.lock().await;
                    if suppressed.file.insert(path) {
                        suppressed.save(&self.inner.storage).await;
                    }
                }
            }
            IndexEvent::FileTaskRemoved { file_path } => {
                self.inner.repository.remove_file_task(&file_path).await;
            }
            IndexEvent::CalendarEventsUpdated { events, seq } => {
                self.inner.repository.update_calendar_events(events, seq).await;
            }
            IndexEvent::WriteOperationComplete { path, task_id } => {
                if task_id.is_none() {
                    self.process_file_immediate(&path, true).await;
                }
            }
            IndexEvent::IndexBatchUpdated {
                changed_files,
                source_seq,
                ..
            } => {
                if self.inner.seq.is_own(source_seq) {
                    debug!(?source_seq, "Ignoring echo of own index update");
                    return;
                }
                for path in changed_files {
                    match self.inner.source.stat(&path).await {
                        Ok(Some(_)) => self.schedule_process(path, false).await,
                        Ok(None) => {}
                        Err(e) => debug!(%path, error = %e, "Skipping unreadable path"),
                    }
                }
            }
            IndexEvent::CacheReady { .. } | IndexEvent::SettingsChanged { .. } => {}
        }
    }

    /// Process `path` once it has been quiet for the debounce delay
    ///
    /// A newer call for the same path replaces the pending one.
    pub async fn schedule_process(&self, path: String, force: bool) {
        debug!(%path, force, "Orchestrator::schedule_process: called");
        let token = self.inner.debounce_tokens.fetch_add(1, Ordering::Relaxed) + 1;
        let delay = self.inner.config.debounce();
        let orchestrator = self.clone();

        let mut timers = self.inner.debounce.lock().await;
        let key = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            orchestrator.fire_debounced(&path, token, force).await;
        });
        if let Some((_, previous)) = timers.insert(key, (token, handle)) {
            previous.abort();
        }
    }

    async fn fire_debounced(&self, path: &str, token: u64, force: bool) {
        {
            let mut timers = self.inner.debounce.lock().await;
            match timers.get(path) {
                Some((current, _)) if *current == token => {
                    timers.remove(path);
                }
                _ => return,
            }
        }
        self.process_file_immediate(path, force).await;
    }

    pub(super) async fn cancel_pending(&self, path: &str) {
        if let Some((_, handle)) = self.inner.debounce.lock().await.remove(path) {
            handle.abort();
        }
    }

    pub(super) async fn cancel_debounce(&self) {
        let mut timers = self.inner.debounce.lock().await;
        if !timers.is_empty() {
            debug!(pending = timers.len(), "Cancelling debounce timers");
        }
        for (_, (_, handle)) in timers.drain() {
            handle.abort();
        }
    }
}
