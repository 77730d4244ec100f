//! TaskIndex - incremental task index for markdown documents
//!
//! TaskIndex extracts tasks from a corpus of documents, enriches them with
//! file and project metadata, and keeps one consolidated in-memory index
//! current as documents change. Parse results are cached per file and keyed
//! by content hash, so restarts and repeated scans only touch what changed.
//!
//! # Core Concepts
//!
//! - **Two-level cache**: raw parser output and augmented tasks are cached
//!   separately, so a settings change re-merges without re-parsing
//! - **Bounded parallelism**: parsing runs on a priority-queued worker pool
//!   behind retry, a circuit breaker and an in-process fallback
//! - **Event driven**: file, task and settings changes arrive on the
//!   [`events::EventBus`]; index updates are announced on the same bus
//!
//! # Modules
//!
//! - [`source`] - collaborator traits plus filesystem and in-memory sources
//! - [`storage`] - namespaced, versioned records over [`taskstore`]
//! - [`pool`] - parse worker pool and project-data pool
//! - [`workers`] - retry, circuit breaker and fallback around the pools
//! - [`augment`] - merges file and project metadata into parsed tasks
//! - [`repository`] - the consolidated index and its snapshot persistence
//! - [`orchestrator`] - drives everything from events and scans
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod augment;
pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod filter;
pub mod orchestrator;
pub mod pool;
pub mod project;
pub mod repository;
pub mod source;
pub mod storage;
pub mod workers;

// Re-export commonly used types
pub use augment::{AugmentConfig, Augmentor};
pub use config::Config;
pub use domain::{Document, DocumentMetadata, DocumentStat, Priority, ProjectData, ProjectRef, ProjectSource, Task, TaskMetadata};
pub use events::{EventBus, FileChangeReason, IndexEvent, SettingsScope};
pub use filter::{FilterConfig, FilterMode, FilterRule, PathFilter};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorConfig, OrchestratorStats, ProcessOutcome};
pub use pool::{PoolConfig, PoolError, ProjectDataPool, WorkerPool};
pub use project::{ConfigProjectResolver, ProjectConfig};
pub use repository::{IndexSnapshot, IndexSummary, Repository, RepositoryConfig, UpdateOptions};
pub use source::{
    CheckboxParser, DocumentSource, FilterScope, FrontmatterTaskSource, FsDocumentSource, InclusionFilter,
    MemoryDocumentSource, MetadataTaskSource, ProjectResolver, TaskParser,
};
pub use storage::{Namespace, Storage, StorageError};
pub use workers::{WorkerError, WorkerMetrics, WorkerOrchestrator, WorkersConfig};
