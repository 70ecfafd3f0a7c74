//! Errors surfaced by the kernel to callers outside a conversational turn.

use agent_memory::MemoryError;
use agent_policy::PolicyError;
use agent_prompts::TemplateError;
use agent_tools::ToolError;
use thiserror::Error;

/// Result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors raised by tool admission and the agent facade.
///
/// Conversational turns never fail with these; they resolve every oracle and
/// tool failure to a fallback answer.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The security gate or structural validator rejected tool source.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// Registry construction failed.
    #[error(transparent)]
    Tool(#[from] ToolError),
    /// A persistence collaborator failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// A prompt template is malformed.
    #[error(transparent)]
    Prompt(#[from] TemplateError),
    /// The owner already has a tool with this name.
    #[error("a tool named `{name}` already exists")]
    Conflict {
        /// Conflicting name.
        name: String,
    },
    /// The tool does not exist or is not owned by the caller.
    #[error("tool not found: {reason}")]
    NotFound {
        /// What was looked up.
        reason: String,
    },
    /// The submitted definition is unusable.
    #[error("invalid tool definition: {reason}")]
    InvalidDefinition {
        /// Human-readable explanation.
        reason: String,
    },
}

impl KernelError {
    /// Convenience constructor for [`KernelError::InvalidDefinition`].
    #[must_use]
    pub fn invalid_definition(reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            reason: reason.into(),
        }
    }
}
