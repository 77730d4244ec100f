//! Parsing worker pool
//!
//! ```text
//! WorkerPool (handle) ──Parse──▶ PoolActor ──spawn──▶ read → metadata → parse (blocking)
//!        ▲                         │  ▲                          │
//!        └──────── oneshot ────────┘  └──────── Finished ────────┘
//! ```
//!
//! Requests land in a strict three-level priority queue. Concurrent requests
//! for the same path share one parse. Workers are throttled after each
//! assignment and may be retired when the limit shrinks.

mod actor;
mod config;
mod handle;
mod messages;
mod project;
mod queue;

use async_trait::async_trait;

use crate::domain::Task;

pub use actor::WorkerDeps;
pub use config::PoolConfig;
pub use handle::WorkerPool;
pub use messages::{PoolError, PoolResult, PoolStats};
pub use project::ProjectDataPool;
pub use queue::PriorityQueue;

/// Lets the pool skip files whose cached parse is still valid
#[async_trait]
pub trait CacheOracle: Send + Sync {
    async fn cached_tasks(&self, path: &str) -> Option<Vec<Task>>;
}
