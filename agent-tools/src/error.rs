use agent_memory::MemoryError;
use thiserror::Error;

/// Result alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors produced by tool registration and invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool metadata failed validation.
    #[error("invalid tool metadata: {reason}")]
    InvalidMetadata {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Script source could not be compiled.
    #[error("tool source failed to compile: {reason}")]
    Compile {
        /// Parser, lowering, or module evaluation message.
        reason: String,
    },

    /// Compiled source exposes no usable function.
    #[error("no function named `{name}` or other public function found in tool source")]
    Extraction {
        /// Name the tool was registered under.
        name: String,
    },

    /// Requested tool does not exist.
    #[error("tool `{name}` is not registered")]
    UnknownTool {
        /// Name of the missing tool.
        name: String,
    },

    /// Tool execution failed.
    #[error("tool execution failed: {reason}")]
    Execution {
        /// Human-readable error returned by the tool implementation.
        reason: String,
    },

    /// The definition store failed while building a registry.
    #[error("tool store error: {source}")]
    Store {
        /// Underlying store error.
        #[from]
        source: MemoryError,
    },
}

impl ToolError {
    /// Creates an execution error from the supplied reason.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }

    /// Creates a compile error from the supplied reason.
    #[must_use]
    pub fn compile(reason: impl Into<String>) -> Self {
        Self::Compile {
            reason: reason.into(),
        }
    }

    /// Creates a metadata error from the supplied reason.
    #[must_use]
    pub fn invalid_metadata(reason: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            reason: reason.into(),
        }
    }
}
