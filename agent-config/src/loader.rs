//! Configuration loading, environment overrides, and validation.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::schema::AgentConfig;

/// Overrides the oracle base URL.
pub const ENV_BASE_URL: &str = "PLAN_AGENT_BASE_URL";
/// Overrides the oracle model.
pub const ENV_MODEL: &str = "PLAN_AGENT_MODEL";
/// Supplies the oracle API key.
pub const ENV_API_KEY: &str = "PLAN_AGENT_API_KEY";
/// Overrides the registry cache TTL in seconds.
pub const ENV_CACHE_TTL: &str = "PLAN_AGENT_CACHE_TTL_SECS";
/// Overrides the default log filter.
pub const ENV_LOG: &str = "PLAN_AGENT_LOG";

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// The document is not valid TOML for the schema.
    #[error("failed to parse configuration: {source}")]
    Parse {
        /// Source [`toml::de::Error`].
        #[from]
        source: toml::de::Error,
    },
    /// A value is present but unusable.
    #[error("invalid configuration `{field}`: {reason}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl AgentConfig {
    /// Parses a TOML document; absent sections take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed documents and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml_str(document: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise the
    /// errors of [`AgentConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded configuration file");
        Self::from_toml_str(&document)
    }

    /// Applies `PLAN_AGENT_*` environment overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when an override cannot be parsed.
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides resolved through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when an override cannot be parsed or the
    /// resulting configuration fails validation.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.oracle.base_url = url;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.oracle.model = model;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.oracle.api_key = Some(key);
        }
        if let Some(ttl) = lookup(ENV_CACHE_TTL) {
            self.registry.cache_ttl_secs = ttl.trim().parse().map_err(|err| {
                ConfigError::invalid("registry.cache_ttl_secs", format!("{ttl:?}: {err}"))
            })?;
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.logging.filter = filter;
        }
        self.validate()
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.oracle.model.trim().is_empty() {
            return Err(ConfigError::invalid("oracle.model", "model cannot be empty"));
        }
        let base = self.oracle.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "oracle.base_url",
                "base URL must start with http:// or https://",
            ));
        }
        if self.orchestrator.history_window == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.history_window",
                "history window must be at least 1",
            ));
        }
        if self.scripts.max_steps == 0 {
            return Err(ConfigError::invalid(
                "scripts.max_steps",
                "step budget must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AgentConfig::from_toml_str("").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.orchestrator.history_window, 3);
        assert_eq!(config.registry.cache_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn parses_partial_sections() {
        let config = AgentConfig::from_toml_str(
            r#"
            [oracle]
            base_url = "http://localhost:11434/v1/"
            model = "qwen2.5"

            [registry]
            cache_ttl_secs = 5

            [journal]
            path = "/tmp/agent.jsonl"
            "#,
        )
        .unwrap();

        assert_eq!(config.oracle.model, "qwen2.5");
        assert_eq!(config.oracle.timeout_secs, 30);
        assert_eq!(config.registry.cache_ttl(), Duration::from_secs(30));
        assert!(config.journal.path.is_some());
    }

    #[test]
    fn rejects_bad_base_url() {
        let err = AgentConfig::from_toml_str("[oracle]\nbase_url = \"localhost\"")
            .expect_err("scheme required");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "oracle.base_url",
                ..
            }
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_MODEL, "llama3"),
            (ENV_CACHE_TTL, "600"),
            (ENV_LOG, "debug"),
        ]);
        let mut config = AgentConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| (*v).to_owned()))
            .unwrap();

        assert_eq!(config.oracle.model, "llama3");
        assert_eq!(config.registry.cache_ttl_secs, 600);
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn malformed_ttl_override_errors() {
        let mut config = AgentConfig::default();
        let err = config
            .apply_overrides(|key| (key == ENV_CACHE_TTL).then(|| "soon".to_owned()))
            .expect_err("ttl must be numeric");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
