//! WorkerPool - cloneable handle to the pool actor

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::CacheOracle;
use super::config::PoolConfig;
use super::actor::{PoolActor, PoolCounters, WorkerDeps};
use super::messages::{PoolCommand, PoolError, PoolResult, PoolStats};
use crate::domain::{Priority, Task};

/// Handle to send commands to the pool actor
#[derive(Clone)]
pub struct WorkerPool {
    tx: mpsc::Sender<PoolCommand>,
    config: PoolConfig,
    counters: Arc<PoolCounters>,
    oracle: Option<Arc<dyn CacheOracle>>,
}

impl WorkerPool {
    /// Spawn the pool actor and return a handle to it
    pub fn spawn(config: PoolConfig, deps: WorkerDeps) -> Self {
        debug!(max_workers = config.max_workers, "WorkerPool::spawn: called");
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let counters = Arc::new(PoolCounters::new(config.max_workers.max(1)));
        let actor = PoolActor::new(config.clone(), deps, Arc::clone(&counters), tx.downgrade());
        tokio::spawn(actor.run(rx));
        Self {
            tx,
            config,
            counters,
            oracle: None,
        }
    }

    /// Consult `oracle` before dispatching any file
    pub fn with_cache_oracle(mut self, oracle: Arc<dyn CacheOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Parse one file, or return its still-valid cached tasks
    pub async fn parse_file(&self, path: &str, priority: Priority) -> PoolResult<Vec<Task>> {
        debug!(%path, %priority, "WorkerPool::parse_file: called");
        if let Some(tasks) = self.cached(path).await {
            return Ok(tasks);
        }
        self.dispatch(path, priority).await
    }

    /// Parse many files in concurrent sub-batches
    ///
    /// A single file's failure is logged and the file is left out of the
    /// result so the rest of the batch completes. Only a shut-down pool fails
    /// the whole call.
    pub async fn parse_batch(&self, paths: &[String], priority: Priority) -> PoolResult<HashMap<String, Vec<Task>>> {
        info!(files = paths.len(), %priority, "WorkerPool::parse_batch: called");
        let mut results = HashMap::with_capacity(paths.len());
        let mut pending = Vec::new();
        for path in paths {
            match self.cached(path).await {
                Some(tasks) => {
                    results.insert(path.clone(), tasks);
                }
                None => pending.push(path.clone()),
            }
        }
        if pending.is_empty() {
            debug!("WorkerPool::parse_batch: every file served from cache");
            return Ok(results);
        }

        self.counters.begin_batch(pending.len());
        let concurrency = self.config.batch_concurrency(self.counters.max_workers());
        let chunks: Vec<Vec<String>> = pending
            .chunks(self.config.batch_size.max(1))
            .map(<[String]>::to_vec)
            .collect();
        debug!(chunks = chunks.len(), concurrency, "WorkerPool::parse_batch: dispatching");

        let mut stream = futures::stream::iter(chunks.into_iter().map(|chunk| self.run_chunk(chunk, priority)))
            .buffer_unordered(concurrency);

        let mut terminal = None;
        while let Some(chunk_results) = stream.next().await {
            for (path, result) in chunk_results {
                match result {
                    Ok(tasks) => {
                        results.insert(path, tasks);
                    }
                    Err(e) if e.is_terminal() => terminal = Some(e),
                    Err(e) => warn!(%path, error = %e, "Batch file failed, leaving it out"),
                }
            }
        }
        self.counters.end_batch();

        match terminal {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// Files finished and total in the current batch
    pub fn batch_progress(&self) -> (usize, usize) {
        (
            self.counters.batch_done.load(Ordering::Relaxed),
            self.counters.batch_total.load(Ordering::Relaxed),
        )
    }

    pub fn max_workers(&self) -> usize {
        self.counters.max_workers()
    }

    /// Change the worker limit; busy workers above it retire when they finish
    pub async fn set_max_workers(&self, max: usize) -> PoolResult<()> {
        debug!(max, "WorkerPool::set_max_workers: called");
        self.request(|reply| PoolCommand::SetMaxWorkers { max, reply }).await
    }

    pub async fn stats(&self) -> PoolResult<PoolStats> {
        self.request(|reply| PoolCommand::Stats { reply }).await
    }

    /// Re-activate after shutdown; a no-op on a running pool
    pub async fn initialize(&self) -> PoolResult<()> {
        debug!("WorkerPool::initialize: called");
        self.request(|reply| PoolCommand::Initialize { reply }).await
    }

    /// Reject all queued and in-flight work
    pub async fn shutdown(&self) -> PoolResult<()> {
        debug!("WorkerPool::shutdown: called");
        self.request(|reply| PoolCommand::Shutdown { reply }).await
    }

    async fn cached(&self, path: &str) -> Option<Vec<Task>> {
        let oracle = self.oracle.as_ref()?;
        let tasks = oracle.cached_tasks(path).await?;
        self.counters.files_skipped.fetch_add(1, Ordering::Relaxed);
        debug!(%path, "WorkerPool: raw cache hit, skipping parse");
        Some(tasks)
    }

    async fn dispatch(&self, path: &str, priority: Priority) -> PoolResult<Vec<Task>> {
        self.request(|reply| PoolCommand::Parse {
            path: path.to_string(),
            priority,
            reply,
        })
        .await?
    }

    async fn run_chunk(&self, chunk: Vec<String>, priority: Priority) -> Vec<(String, PoolResult<Vec<Task>>)> {
        let parses = chunk.into_iter().map(|path| async move {
            let result = self.dispatch(&path, priority).await;
            self.counters.advance_batch();
            (path, result)
        });
        futures::future::join_all(parses).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> PoolCommand) -> PoolResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| PoolError::ChannelClosed)?;
        reply_rx.await.map_err(|_| PoolError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DocumentMetadata;
    use crate::source::{MemoryDocumentSource, ParseError, TaskParser};
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::time::Duration;

    /// One task per non-empty line; fails on "boom", counts every call
    struct LineParser {
        calls: AtomicUsize,
        failures_left: AtomicU32,
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl LineParser {
        fn new(failures: u32) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures_left: AtomicU32::new(failures),
                seen: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl TaskParser for LineParser {
        fn parse(&self, path: &str, content: &str, _metadata: &DocumentMetadata) -> Result<Vec<Task>, ParseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(path.to_string());
            if content.contains("boom") {
                let left = self.failures_left.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures_left.store(left - 1, Ordering::SeqCst);
                    return Err(ParseError("boom".into()));
                }
            }
            if content.contains("slow") {
                std::thread::sleep(Duration::from_millis(50));
            }
            Ok(content
                .lines()
                .enumerate()
                .filter(|(_, l)| !l.trim().is_empty())
                .map(|(i, l)| Task::new(format!("{path}-L{i}"), path, i, l.trim()))
                .collect())
        }
    }

    async fn pool_with(config: PoolConfig, parser: Arc<LineParser>) -> (WorkerPool, Arc<MemoryDocumentSource>) {
        let source = Arc::new(MemoryDocumentSource::new());
        let deps = WorkerDeps {
            source: source.clone(),
            parser,
            metadata_tasks: None,
        };
        (WorkerPool::spawn(config, deps), source)
    }

    fn small_config() -> PoolConfig {
        PoolConfig {
            max_workers: 2,
            batch_size: 3,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_parse_file() {
        let parser = Arc::new(LineParser::new(0));
        let (pool, source) = pool_with(small_config(), parser).await;
        source.insert("a.md", "one\ntwo\n", 1).await;

        let tasks = pool.parse_file("a.md", Priority::Normal).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "a.md-L0");
    }

    #[tokio::test]
    async fn test_missing_file_rejects_without_retry() {
        let parser = Arc::new(LineParser::new(0));
        let (pool, _source) = pool_with(small_config(), parser.clone()).await;

        let err = pool.parse_file("missing.md", Priority::High).await.unwrap_err();
        assert!(matches!(err, PoolError::Read { .. }));
        assert_eq!(parser.calls.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().await.unwrap().retries, 0);
    }

    #[tokio::test]
    async fn test_parse_failure_is_retried() {
        let parser = Arc::new(LineParser::new(1));
        let (pool, source) = pool_with(small_config(), parser.clone()).await;
        source.insert("a.md", "boom\n", 1).await;

        let tasks = pool.parse_file("a.md", Priority::Normal).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().await.unwrap().retries, 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let parser = Arc::new(LineParser::new(10));
        let (pool, source) = pool_with(small_config(), parser.clone()).await;
        source.insert("a.md", "boom\n", 1).await;

        let err = pool.parse_file("a.md", Priority::Normal).await.unwrap_err();
        assert_eq!(
            err,
            PoolError::Exhausted {
                path: "a.md".into(),
                attempts: 3,
                message: "boom".into(),
            }
        );
        assert_eq!(parser.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_duplicate_requests_share_one_parse() {
        let parser = Arc::new(LineParser::new(0));
        let (pool, source) = pool_with(small_config(), parser.clone()).await;
        source.insert("a.md", "slow\n", 1).await;

        let (a, b) = tokio::join!(
            pool.parse_file("a.md", Priority::Normal),
            pool.parse_file("a.md", Priority::Normal)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parse_batch_isolates_failures() {
        let parser = Arc::new(LineParser::new(10));
        let (pool, source) = pool_with(small_config(), parser).await;
        let mut paths = Vec::new();
        for i in 0..7 {
            let path = format!("f{i}.md");
            source.insert(&path, "task\n", 1).await;
            paths.push(path);
        }
        source.insert("bad.md", "boom\n", 1).await;
        paths.push("bad.md".to_string());

        let results = pool.parse_batch(&paths, Priority::Normal).await.unwrap();
        assert_eq!(results.len(), 7);
        assert_eq!(results["f0.md"].len(), 1);
        assert!(!results.contains_key("bad.md"));
        assert_eq!(pool.batch_progress(), (8, 8));
        assert_eq!(pool.stats().await.unwrap().batches_processed, 1);
    }

    #[tokio::test]
    async fn test_high_priority_overtakes_queued_low() {
        let parser = Arc::new(LineParser::new(0));
        let config = PoolConfig {
            max_workers: 1,
            ..PoolConfig::default()
        };
        let (pool, source) = pool_with(config, parser.clone()).await;
        source.insert("busy.md", "slow\n", 1).await;
        source.insert("high.md", "x\n", 1).await;
        for i in 0..5 {
            source.insert(&format!("low{i}.md"), "x\n", 1).await;
        }

        let busy = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.parse_file("busy.md", Priority::Normal).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let mut lows = Vec::new();
        for i in 0..5 {
            let pool = pool.clone();
            lows.push(tokio::spawn(async move {
                pool.parse_file(&format!("low{i}.md"), Priority::Low).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(pool.stats().await.unwrap().queued_low, 5);

        pool.parse_file("high.md", Priority::High).await.unwrap();
        busy.await.unwrap().unwrap();
        for low in lows {
            low.await.unwrap().unwrap();
        }

        let seen = parser.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 7);
        assert_eq!(seen[0], "busy.md");
        assert_eq!(seen[1], "high.md");
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let parser = Arc::new(LineParser::new(0));
        let (pool, source) = pool_with(small_config(), parser).await;
        source.insert("a.md", "x\n", 1).await;

        pool.shutdown().await.unwrap();
        assert_eq!(pool.parse_file("a.md", Priority::High).await, Err(PoolError::ShutDown));
        let err = pool.parse_batch(&["a.md".to_string()], Priority::Low).await.unwrap_err();
        assert!(err.is_terminal());

        pool.initialize().await.unwrap();
        assert_eq!(pool.parse_file("a.md", Priority::High).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shrinking_never_exceeds_limit() {
        let parser = Arc::new(LineParser::new(0));
        let config = PoolConfig {
            max_workers: 4,
            ..PoolConfig::default()
        };
        let (pool, source) = pool_with(config, parser).await;
        let mut paths = Vec::new();
        for i in 0..12 {
            let path = format!("s{i}.md");
            source.insert(&path, "slow\n", 1).await;
            paths.push(path);
        }

        let batch = {
            let pool = pool.clone();
            let paths = paths.clone();
            tokio::spawn(async move { pool.parse_batch(&paths, Priority::Normal).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.set_max_workers(1).await.unwrap();

        let results = batch.await.unwrap().unwrap();
        assert_eq!(results.len(), 12);
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.max_workers, 1);
        assert!(stats.live_workers <= 1);
    }

    struct AlwaysCached;

    #[async_trait::async_trait]
    impl CacheOracle for AlwaysCached {
        async fn cached_tasks(&self, path: &str) -> Option<Vec<Task>> {
            Some(vec![Task::new(format!("{path}-cached"), path, 0, "cached")])
        }
    }

    #[tokio::test]
    async fn test_cache_oracle_skips_parsing() {
        let parser = Arc::new(LineParser::new(0));
        let (pool, _source) = pool_with(small_config(), parser.clone()).await;
        let pool = pool.with_cache_oracle(Arc::new(AlwaysCached));

        let tasks = pool.parse_file("a.md", Priority::Normal).await.unwrap();
        assert_eq!(tasks[0].content, "cached");
        assert_eq!(parser.calls.load(Ordering::SeqCst), 0);
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.files_skipped, 1);
        assert!((stats.cache_hit_ratio - 1.0).abs() < f64::EPSILON);
    }
}
