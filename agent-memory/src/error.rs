//! Error types for the memory subsystem.

use agent_primitives::{OwnerId, ToolId};
use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by memory components.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// No tool definition with the given id belongs to the owner.
    #[error("tool {id} not found for owner {owner}")]
    NotFound {
        /// Owner performing the lookup.
        owner: OwnerId,
        /// Requested definition id.
        id: ToolId,
    },
    /// The owner already has a tool with the same name.
    #[error("owner {owner} already has a tool named `{name}`")]
    Conflict {
        /// Owner of both definitions.
        owner: OwnerId,
        /// Conflicting name.
        name: String,
    },
    /// Record or update failed validation.
    #[error("invalid memory record: {reason}")]
    InvalidRecord {
        /// Human-readable reason.
        reason: String,
    },
    /// Underlying I/O failure while reading or writing journal files.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
}

impl MemoryError {
    /// Helper to construct [`MemoryError::InvalidRecord`].
    #[must_use]
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }
}

/// Result type alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
