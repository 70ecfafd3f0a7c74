//! Core shared types for the planning agent workspace.

#![warn(missing_docs, clippy::pedantic)]

mod definition;
mod error;
mod ids;
mod parameter;

/// Persisted tool definitions and their builders.
pub use definition::{DEFAULT_LABEL, ToolDefinition, ToolDefinitionBuilder, ToolSource, Visibility};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Identifiers for owners, tools, and records.
pub use ids::{OwnerId, RecordId, ToolId};
/// Parameter descriptors advertised to the oracle.
pub use parameter::{ANY_TYPE, ParameterSpec};
