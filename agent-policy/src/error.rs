//! Error type surfaced to callers attempting to admit tool source.

use thiserror::Error;

/// Errors raised by the security gate and the structural validator.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Source failed structural validation (syntax, naming, missing function,
    /// undeclared parameter, unresolved import).
    #[error("invalid tool source: {reason}")]
    InvalidSource {
        /// Human-readable explanation.
        reason: String,
    },
    /// The security gate found at least one high-risk construct.
    #[error("unsafe code rejected: {summary} [{}]", .issues.join("; "))]
    UnsafeCode {
        /// One line per finding, in discovery order.
        issues: Vec<String>,
        /// Fixed summary sentence from the verdict.
        summary: String,
    },
    /// The Python grammar could not be loaded or parsing aborted.
    #[error("python parser failure: {reason}")]
    Parser {
        /// Human-readable explanation.
        reason: String,
    },
}

impl PolicyError {
    /// Convenience constructor for [`PolicyError::InvalidSource`].
    #[must_use]
    pub fn invalid_source(reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`PolicyError::Parser`].
    #[must_use]
    pub fn parser(reason: impl Into<String>) -> Self {
        Self::Parser {
            reason: reason.into(),
        }
    }
}

/// Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
