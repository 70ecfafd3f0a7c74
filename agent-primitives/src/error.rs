//! Shared error definitions for agent primitives.

use std::num::ParseIntError;

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the agent runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating agent primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// A UUID-backed identifier could not be parsed.
    #[error("invalid identifier: {source}")]
    InvalidId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// An owner identifier could not be parsed.
    #[error("invalid owner id: {source}")]
    InvalidOwnerId {
        /// Source integer parsing error.
        #[from]
        source: ParseIntError,
    },

    /// Tool definition failed validation.
    #[error("invalid tool definition: {reason}")]
    InvalidDefinition {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Parameter specification failed validation.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// The offending parameter name.
        name: String,
        /// Human-readable reason for rejection.
        reason: String,
    },
}

impl Error {
    /// Convenience constructor for definition validation failures.
    #[must_use]
    pub fn invalid_definition(reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            reason: reason.into(),
        }
    }
}
