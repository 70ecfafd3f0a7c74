//! Planning agent facade.
//!
//! Bundles the workspace crates behind feature flags. A typical embedding
//! builds an [`kernel::Agent`] from an [`config::AgentConfig`] and an
//! [`adapters::Oracle`], then calls `respond` once per user question.

#![warn(missing_docs, clippy::pedantic)]

/// Identifiers and tool definitions.
pub use agent_primitives as primitives;

/// Planning, selection, orchestration, and tool admission (`kernel` feature).
#[cfg(feature = "kernel")]
pub use agent_kernel as kernel;

/// Model adapters and the oracle interface (`adapters` feature).
#[cfg(feature = "adapters")]
pub use agent_adapters as adapters;

/// Tool registry, script interpreter, and built-in tools (`tools` feature).
#[cfg(feature = "tools")]
pub use agent_tools as tools;

/// Tool store, execution records, and chat history (`memory` feature).
#[cfg(feature = "memory")]
pub use agent_memory as memory;

/// Security gate and structural validation (`policy` feature).
#[cfg(feature = "policy")]
pub use agent_policy as policy;

/// Logging setup (`telemetry` feature).
#[cfg(feature = "telemetry")]
pub use agent_telemetry as telemetry;

/// Prompt templates (`prompts` feature).
#[cfg(feature = "prompts")]
pub use agent_prompts as prompts;

/// Configuration loading (`config` feature).
#[cfg(feature = "config")]
pub use agent_config as config;
