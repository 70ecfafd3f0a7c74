//! Configuration management for the planning agent.
//!
//! Settings are read from a TOML document whose sections all have defaults,
//! then adjusted through `PLAN_AGENT_*` environment variables.

#![warn(missing_docs, clippy::pedantic)]

pub mod loader;
pub mod schema;

pub use loader::{ConfigError, ConfigResult};
pub use schema::{
    AgentConfig, JournalSettings, LoggingSettings, MIN_CACHE_TTL_SECS, OracleSettings,
    OrchestratorSettings, RegistrySettings, ScriptSettings,
};
