//! Domain types for the task index
//!
//! Tasks, project descriptors and the host-independent document view that
//! every pipeline stage passes around.

mod document;
mod priority;
mod project;
mod task;

pub use document::{Document, DocumentMetadata, DocumentStat, Frontmatter, Heading};
pub use priority::Priority;
pub use project::{ProjectData, ProjectRef, ProjectSource};
pub use task::{Task, TaskMetadata, TimeComponents};
