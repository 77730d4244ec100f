//! Worker pool messages
//!
//! Commands and errors for the pool actor.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Priority, Task};

/// Errors from worker pool operations
///
/// `Clone` so one in-flight result can be handed to every caller that asked
/// for the same path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    ShutDown,

    #[error("Workers being reinitialized")]
    Reinitializing,

    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("Parsing {path} failed after {attempts} attempts: {message}")]
    Exhausted {
        path: String,
        attempts: u32,
        message: String,
    },

    #[error("Project data for {path} failed: {message}")]
    Project { path: String, message: String },

    #[error("Worker pool channel closed")]
    ChannelClosed,
}

impl PoolError {
    /// The pool cannot serve further requests
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShutDown | Self::ChannelClosed)
    }
}

/// Response from pool operations
pub type PoolResult<T> = Result<T, PoolError>;

pub(crate) type ParseReply = oneshot::Sender<PoolResult<Vec<Task>>>;

/// How a worker assignment ended
#[derive(Debug)]
pub(crate) enum Outcome {
    Parsed(Vec<Task>),
    /// Parser rejected the input
    ParseFailed(String),
    /// Worker died (panic, join failure)
    Crashed(String),
    /// Document could not be read; not retried
    ReadFailed(String),
}

/// Commands sent to the pool actor
#[derive(Debug)]
pub(crate) enum PoolCommand {
    Parse {
        path: String,
        priority: Priority,
        reply: ParseReply,
    },
    Finished {
        slot: usize,
        generation: u64,
        outcome: Outcome,
    },
    /// A throttled slot may have become available
    Wake,
    SetMaxWorkers {
        max: usize,
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    Initialize {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Snapshot of pool state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub max_workers: usize,
    pub live_workers: usize,
    pub busy_workers: usize,
    pub queued_high: usize,
    pub queued_normal: usize,
    pub queued_low: usize,
    pub in_flight_paths: usize,
    pub files_processed: u64,
    pub files_skipped: u64,
    pub cache_hit_ratio: f64,
    pub retries: u64,
    pub batches_processed: u64,
    pub active: bool,
}
