//! Event bus for index activity
//!
//! ```text
//!  host watcher ──FileChanged──┐            ┌──> host views
//!  editors ──TaskUpdated───────┤            │
//!  calendar ──CalendarEvents───┼──> BUS ────┼──> Orchestrator (inbound)
//!  Repository ──IndexBatch─────┤            │
//!  Orchestrator ──CacheReady───┘            └──> loggers
//! ```
//!
//! The orchestrator both consumes and produces events; sequence numbers on
//! `IndexBatchUpdated` let it ignore the echo of its own writes.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use types::{FileChangeReason, IndexEvent, SettingsScope};
