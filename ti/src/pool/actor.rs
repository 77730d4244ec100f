//! Worker pool actor
//!
//! Owns the priority queues and the worker-slot arena. Every mutation happens
//! inside the actor's message handlers, so no locking is needed around them;
//! parsing itself runs on the blocking thread pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::PoolConfig;
use super::messages::{Outcome, ParseReply, PoolCommand, PoolError, PoolResult, PoolStats};
use super::queue::PriorityQueue;
use crate::domain::{DocumentMetadata, Priority, Task};
use crate::source::{DocumentSource, MetadataTaskSource, ParseError, TaskParser};

/// Collaborators a worker needs to run one assignment
#[derive(Clone)]
pub struct WorkerDeps {
    pub source: Arc<dyn DocumentSource>,
    pub parser: Arc<dyn TaskParser>,
    pub metadata_tasks: Option<Arc<dyn MetadataTaskSource>>,
}

/// Counters shared between the actor and its handles
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub files_processed: AtomicU64,
    pub files_skipped: AtomicU64,
    pub retries: AtomicU64,
    pub batches_processed: AtomicU64,
    pub batch_done: AtomicUsize,
    pub batch_total: AtomicUsize,
    pub max_workers: AtomicUsize,
}

impl PoolCounters {
    pub fn new(max_workers: usize) -> Self {
        let counters = Self::default();
        counters.max_workers.store(max_workers, Ordering::Relaxed);
        counters
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers.load(Ordering::Relaxed)
    }

    pub fn begin_batch(&self, total: usize) {
        self.batch_done.store(0, Ordering::Relaxed);
        self.batch_total.store(total, Ordering::Relaxed);
    }

    /// Count one finished file, logging at every 10% step
    pub fn advance_batch(&self) {
        let done = self.batch_done.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.batch_total.load(Ordering::Relaxed).max(1);
        let step = done * 10 / total;
        if step > (done - 1) * 10 / total {
            info!(done, total, percent = step * 10, "Batch parse progress");
        }
    }

    pub fn end_batch(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Idle time to insert after an assignment to approximate the target utilization
///
/// `processing * (max(0.1, target) - 1.0)`; a non-positive result means the
/// worker is available immediately.
pub(crate) fn throttle_delay(processing: Duration, target_utilization: f64) -> Duration {
    let secs = processing.as_secs_f64() * (target_utilization.max(0.1) - 1.0);
    if secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

#[derive(Debug)]
struct QueueItem {
    path: String,
    priority: Priority,
    retries: u32,
}

#[derive(Debug)]
struct Assignment {
    item: QueueItem,
    started_at: Instant,
}

#[derive(Debug)]
struct WorkerSlot {
    /// Distinguishes this slot's occupant from earlier ones at the same index
    generation: u64,
    available_at: Instant,
    assignment: Option<Assignment>,
}

pub(crate) struct PoolActor {
    config: PoolConfig,
    max_workers: usize,
    slots: Vec<Option<WorkerSlot>>,
    queue: PriorityQueue<QueueItem>,
    waiters: HashMap<String, Vec<ParseReply>>,
    next_generation: u64,
    active: bool,
    initialized: bool,
    wake_at: Option<Instant>,
    deps: WorkerDeps,
    counters: Arc<PoolCounters>,
    tx: mpsc::WeakSender<PoolCommand>,
}

impl PoolActor {
    pub fn new(
        config: PoolConfig,
        deps: WorkerDeps,
        counters: Arc<PoolCounters>,
        tx: mpsc::WeakSender<PoolCommand>,
    ) -> Self {
        let max_workers = config.max_workers.max(1);
        Self {
            config,
            max_workers,
            slots: Vec::with_capacity(max_workers),
            queue: PriorityQueue::new(),
            waiters: HashMap::new(),
            next_generation: 0,
            active: true,
            initialized: true,
            wake_at: None,
            deps,
            counters,
            tx,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<PoolCommand>) {
        info!(max_workers = self.max_workers, "Worker pool started");
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd);
        }
        debug!("PoolActor::run: channel closed, exiting");
    }

    fn handle(&mut self, cmd: PoolCommand) {
        match cmd {
            PoolCommand::Parse { path, priority, reply } => self.on_parse(path, priority, reply),
            PoolCommand::Finished {
                slot,
                generation,
                outcome,
            } => self.on_finished(slot, generation, outcome),
            PoolCommand::Wake => {
                self.wake_at = None;
                self.schedule();
            }
            PoolCommand::SetMaxWorkers { max, reply } => {
                self.set_max_workers(max);
                let _ = reply.send(());
            }
            PoolCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            PoolCommand::Initialize { reply } => {
                self.initialize();
                let _ = reply.send(());
            }
            PoolCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn on_parse(&mut self, path: String, priority: Priority, reply: ParseReply) {
        if !self.active {
            let _ = reply.send(Err(PoolError::ShutDown));
            return;
        }
        if let Some(waiters) = self.waiters.get_mut(&path) {
            debug!(%path, "PoolActor::on_parse: sharing in-flight request");
            waiters.push(reply);
            return;
        }
        debug!(%path, %priority, "PoolActor::on_parse: queued");
        self.waiters.insert(path.clone(), vec![reply]);
        self.queue.push(
            QueueItem {
                path,
                priority,
                retries: 0,
            },
            priority,
        );
        self.schedule();
    }

    /// Hand queued items to available slots, highest priority first
    fn schedule(&mut self) {
        if !self.active {
            return;
        }
        let now = Instant::now();
        while !self.queue.is_empty() {
            let Some(idx) = self.acquire_slot(now) else {
                break;
            };
            let Some(item) = self.queue.pop() else {
                break;
            };
            self.dispatch(idx, item, now);
        }
        if !self.queue.is_empty() {
            self.arm_wake(now);
        }
    }

    /// An idle, unthrottled slot, or a lazily created one below the limit
    fn acquire_slot(&mut self, now: Instant) -> Option<usize> {
        let limit = self.max_workers;
        let idle = self.slots.iter().take(limit).position(|slot| {
            slot.as_ref()
                .is_some_and(|s| s.assignment.is_none() && s.available_at <= now)
        });
        if idle.is_some() {
            return idle;
        }

        if self.slots.len() < limit {
            self.slots.resize_with(limit, || None);
        }
        let idx = self.slots.iter().take(limit).position(Option::is_none)?;
        self.next_generation += 1;
        self.slots[idx] = Some(WorkerSlot {
            generation: self.next_generation,
            available_at: now,
            assignment: None,
        });
        debug!(slot = idx, generation = self.next_generation, "Created worker");
        Some(idx)
    }

    fn dispatch(&mut self, idx: usize, item: QueueItem, now: Instant) {
        let Some(tx) = self.tx.upgrade() else {
            self.resolve(&item.path, Err(PoolError::ChannelClosed));
            return;
        };
        let Some(slot) = self.slots.get_mut(idx).and_then(Option::as_mut) else {
            self.resolve(&item.path, Err(PoolError::Reinitializing));
            return;
        };

        let generation = slot.generation;
        let path = item.path.clone();
        debug!(%path, slot = idx, retries = item.retries, "Dispatching assignment");
        slot.assignment = Some(Assignment { item, started_at: now });

        let deps = self.deps.clone();
        tokio::spawn(async move {
            let outcome = run_assignment(&deps, &path).await;
            let _ = tx
                .send(PoolCommand::Finished {
                    slot: idx,
                    generation,
                    outcome,
                })
                .await;
        });
    }

    fn on_finished(&mut self, idx: usize, generation: u64, outcome: Outcome) {
        let now = Instant::now();
        let retire = idx >= self.max_workers;
        let target = self.config.target_utilization;

        let Some(slot) = self
            .slots
            .get_mut(idx)
            .and_then(Option::as_mut)
            .filter(|s| s.generation == generation)
        else {
            debug!(slot = idx, generation, "Ignoring result from a retired worker");
            return;
        };
        let Some(assignment) = slot.assignment.take() else {
            return;
        };

        if retire {
            self.slots[idx] = None;
            self.trim_slots();
            debug!(slot = idx, "Retired worker over capacity");
        } else {
            let processing = now.saturating_duration_since(assignment.started_at);
            slot.available_at = now + throttle_delay(processing, target);
        }

        let item = assignment.item;
        match outcome {
            Outcome::Parsed(tasks) => {
                self.counters.files_processed.fetch_add(1, Ordering::Relaxed);
                debug!(path = %item.path, tasks = tasks.len(), "Parse complete");
                self.resolve(&item.path, Ok(tasks));
            }
            Outcome::ReadFailed(message) => {
                warn!(path = %item.path, %message, "Document read failed");
                let err = PoolError::Read {
                    path: item.path.clone(),
                    message,
                };
                self.resolve(&item.path, Err(err));
            }
            Outcome::ParseFailed(message) | Outcome::Crashed(message) => {
                if item.retries < self.config.max_retries {
                    warn!(path = %item.path, retries = item.retries + 1, %message, "Worker failed, requeueing");
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    let priority = item.priority;
                    self.queue.push(
                        QueueItem {
                            retries: item.retries + 1,
                            ..item
                        },
                        priority,
                    );
                } else {
                    warn!(path = %item.path, %message, "Worker failed, retries exhausted");
                    let err = PoolError::Exhausted {
                        path: item.path.clone(),
                        attempts: item.retries + 1,
                        message,
                    };
                    self.resolve(&item.path, Err(err));
                }
            }
        }

        self.schedule();
    }

    fn resolve(&mut self, path: &str, result: PoolResult<Vec<Task>>) {
        if let Some(waiters) = self.waiters.remove(path) {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }

    /// Schedule a wake-up for the earliest throttled idle slot
    fn arm_wake(&mut self, now: Instant) {
        let earliest = self
            .slots
            .iter()
            .take(self.max_workers)
            .flatten()
            .filter(|s| s.assignment.is_none() && s.available_at > now)
            .map(|s| s.available_at)
            .min();
        let Some(at) = earliest else {
            return;
        };
        if self.wake_at.is_some_and(|pending| pending <= at) {
            return;
        }
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        self.wake_at = Some(at);
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            let _ = tx.send(PoolCommand::Wake).await;
        });
    }

    fn set_max_workers(&mut self, max: usize) {
        let max = max.max(1);
        info!(from = self.max_workers, to = max, "Resizing worker pool");
        self.max_workers = max;
        self.counters.max_workers.store(max, Ordering::Relaxed);
        for slot in self.slots.iter_mut().skip(max) {
            if slot.as_ref().is_some_and(|s| s.assignment.is_none()) {
                *slot = None;
            }
        }
        self.trim_slots();
        self.schedule();
    }

    fn trim_slots(&mut self) {
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
    }

    /// Reject every pending caller and drop all workers
    fn shutdown(&mut self) {
        info!(
            queued = self.queue.len(),
            in_flight = self.waiters.len(),
            "Shutting down worker pool"
        );
        self.active = false;
        self.initialized = false;
        self.queue.drain().for_each(drop);
        for (_, waiters) in self.waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(PoolError::ShutDown));
            }
        }
        self.slots.clear();
        self.wake_at = None;
    }

    /// Idempotent: a running pool is left untouched
    fn initialize(&mut self) {
        if self.initialized {
            debug!("PoolActor::initialize: already initialized");
            return;
        }
        let in_flight: Vec<String> = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.take())
            .filter_map(|s| s.assignment.map(|a| a.item.path))
            .collect();
        for path in in_flight {
            self.resolve(&path, Err(PoolError::Reinitializing));
        }
        self.slots.clear();
        self.initialized = true;
        self.active = true;
        info!(max_workers = self.max_workers, "Worker pool initialized");
        self.schedule();
    }

    fn stats(&self) -> PoolStats {
        let live = self.slots.iter().flatten().count();
        let busy = self.slots.iter().flatten().filter(|s| s.assignment.is_some()).count();
        let processed = self.counters.files_processed.load(Ordering::Relaxed);
        let skipped = self.counters.files_skipped.load(Ordering::Relaxed);
        let lookups = processed + skipped;
        PoolStats {
            max_workers: self.max_workers,
            live_workers: live,
            busy_workers: busy,
            queued_high: self.queue.len_at(Priority::High),
            queued_normal: self.queue.len_at(Priority::Normal),
            queued_low: self.queue.len_at(Priority::Low),
            in_flight_paths: self.waiters.len(),
            files_processed: processed,
            files_skipped: skipped,
            cache_hit_ratio: if lookups == 0 {
                0.0
            } else {
                skipped as f64 / lookups as f64
            },
            retries: self.counters.retries.load(Ordering::Relaxed),
            batches_processed: self.counters.batches_processed.load(Ordering::Relaxed),
            active: self.active,
        }
    }
}

/// Read, parse and merge metadata-derived tasks for one file
async fn run_assignment(deps: &WorkerDeps, path: &str) -> Outcome {
    let doc = match deps.source.read(path).await {
        Ok(doc) => doc,
        Err(e) => return Outcome::ReadFailed(e.to_string()),
    };
    let metadata = match deps.source.metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(%path, error = %e, "Metadata unavailable, parsing without it");
            DocumentMetadata::default()
        }
    };

    let parser = Arc::clone(&deps.parser);
    let synthetic = deps.metadata_tasks.clone();
    let path = path.to_string();
    let joined = tokio::task::spawn_blocking(move || {
        let mut tasks = parser.parse(&path, &doc.content, &metadata)?;
        if let Some(synthetic) = synthetic {
            for task in synthetic.tasks_for(&path, &doc.content, &metadata) {
                if !tasks.iter().any(|t| t.id == task.id) {
                    tasks.push(task);
                }
            }
        }
        Ok::<_, ParseError>(tasks)
    })
    .await;

    match joined {
        Ok(Ok(tasks)) => Outcome::Parsed(tasks),
        Ok(Err(e)) => Outcome::ParseFailed(e.0),
        Err(e) => Outcome::Crashed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_delay_is_zero_below_full_utilization() {
        let processing = Duration::from_millis(200);
        assert_eq!(throttle_delay(processing, 0.75), Duration::ZERO);
        assert_eq!(throttle_delay(processing, 1.0), Duration::ZERO);
        assert_eq!(throttle_delay(processing, 0.0), Duration::ZERO);
    }

    #[test]
    fn test_throttle_delay_positive_above_one() {
        let delay = throttle_delay(Duration::from_millis(200), 1.5);
        assert_eq!(delay, Duration::from_millis(100));
    }

    #[test]
    fn test_batch_progress_counts() {
        let counters = PoolCounters::new(2);
        counters.begin_batch(20);
        for _ in 0..20 {
            counters.advance_batch();
        }
        counters.end_batch();
        assert_eq!(counters.batch_done.load(Ordering::Relaxed), 20);
        assert_eq!(counters.batches_processed.load(Ordering::Relaxed), 1);
    }
}
