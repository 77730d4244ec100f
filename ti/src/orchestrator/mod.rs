//! Orchestrator - top-level coordination
//!
//! ```text
//! FileChanged ──debounce──▶ process_file_immediate
//!                               │
//!                raw valid? ────┼── no ──▶ WorkerOrchestrator::parse_file ─▶ store raw
//!                   │ yes       │                                              │
//!       augmented valid? ─ no ──┴──────────▶ Augmentor::merge ◀────────────────┘
//!                   │ yes                         │
//!                   ▼                             ▼ store augmented
//!              Repository::update_file(seq) ◀─────┘
//!                   │
//!                   ▼
//!            IndexBatchUpdated{source_seq} ──▶ bus (own echo ignored)
//! ```
//!
//! Filter changes run a prune followed by a debounced restore; see
//! [`Orchestrator::update_filter`].

mod config;
mod coordinator;
mod events;
mod filter;
mod sequence;
mod suppressed;

pub use config::OrchestratorConfig;
pub use coordinator::{Collaborators, Orchestrator, OrchestratorStats, ProcessOutcome};
pub use sequence::SequenceContext;
pub use suppressed::{SUPPRESSED_FILE_TASKS_KEY, SUPPRESSED_INLINE_KEY, SuppressedPaths};
