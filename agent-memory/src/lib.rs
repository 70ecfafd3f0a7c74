//! Persistence collaborators of the planning agent.
//!
//! The orchestrator depends only on the traits in this crate: a
//! [`ToolDefinitionStore`] for tool metadata and source, an
//! [`ExecutionSink`] for tool execution traces, and a [`ChatHistory`] for
//! answered questions. In-memory and JSONL-file implementations are provided.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod history;
pub mod journal;
pub mod record;
pub mod store;
pub mod volatile;

pub use error::{MemoryError, MemoryResult};
pub use history::{ChatHistory, ExecutionSink};
pub use journal::{FileJournal, JournalEntry};
pub use record::{ChatRecord, ExecutionRecord, ExecutionRecordBuilder, ExecutionStats, ExecutionStatus};
pub use store::{InMemoryToolStore, ToolDefinitionStore, ToolUpdate};
pub use volatile::{VolatileConfig, VolatileHistory};
