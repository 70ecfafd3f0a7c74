//! Strongly typed configuration schemas.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest registry cache TTL accepted, in seconds.
pub const MIN_CACHE_TTL_SECS: u64 = 30;

/// Root configuration document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Completion service settings.
    pub oracle: OracleSettings,
    /// Tool registry cache settings.
    pub registry: RegistrySettings,
    /// Orchestrator behaviour.
    pub orchestrator: OrchestratorSettings,
    /// Tool-script interpreter limits.
    pub scripts: ScriptSettings,
    /// Logging subscriber settings.
    pub logging: LoggingSettings,
    /// Durable chat/execution journal.
    pub journal: JournalSettings,
}

/// Settings for the OpenAI-compatible completion endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    /// Base URL of the endpoint, e.g. `http://localhost:11434/`.
    pub base_url: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Inline API key; takes precedence over `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset.
    pub api_key_env: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum completion tokens.
    pub max_tokens: u32,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_owned(),
            timeout_secs: 30,
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

impl OracleSettings {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolves the API key from the inline value or the configured variable.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
    }
}

/// Registry cache settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Lifetime of a cached per-owner registry, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
        }
    }
}

impl RegistrySettings {
    /// Cache TTL clamped to [`MIN_CACHE_TTL_SECS`].
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.max(MIN_CACHE_TTL_SECS))
    }
}

/// Orchestrator settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Number of prior exchanges embedded in prompts.
    pub history_window: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self { history_window: 3 }
    }
}

/// Execution limits applied to tool scripts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Statement and expression evaluation budget per invocation.
    pub max_steps: u64,
    /// Maximum nested function call depth.
    pub max_call_depth: usize,
    /// Upper bound applied to each `time.sleep` call, in milliseconds.
    pub max_sleep_ms: u64,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            max_call_depth: 64,
            max_sleep_ms: 5_000,
        }
    }
}

/// Logging subscriber settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit ANSI colours.
    pub ansi: bool,
    /// Include the event target in each line.
    pub with_target: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            ansi: true,
            with_target: false,
        }
    }
}

/// Durable journal settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    /// JSONL file receiving chat and execution records; volatile memory when unset.
    pub path: Option<PathBuf>,
}
