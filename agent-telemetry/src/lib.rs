//! Observability utilities for the planning agent.

#![warn(missing_docs, clippy::pedantic)]

use agent_config::LoggingSettings;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured filter directive could not be parsed.
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter {
        /// Directive as configured.
        directive: String,
        /// Parser message.
        reason: String,
    },
    /// Another global subscriber is already installed.
    #[error("tracing subscriber already installed: {reason}")]
    AlreadyInstalled {
        /// Underlying error message.
        reason: String,
    },
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG` or the configured directive.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] for malformed directives and
/// [`TelemetryError::AlreadyInstalled`] when called twice in one process.
pub fn init_tracing(settings: &LoggingSettings) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.filter).map_err(|err| {
            TelemetryError::InvalidFilter {
                directive: settings.filter.clone(),
                reason: err.to_string(),
            }
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(settings.ansi)
        .with_target(settings.with_target)
        .try_init()
        .map_err(|err| TelemetryError::AlreadyInstalled {
            reason: err.to_string(),
        })
}

/// Shortens `text` to at most `max_chars` characters, appending `...` when cut.
#[must_use]
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("abcdef", 3), "abc...");
        assert_eq!(truncate_for_log("乘法运算结果", 2), "乘法...");
    }

    #[test]
    fn invalid_filter_is_reported() {
        let settings = LoggingSettings {
            filter: "agent=loud".to_owned(),
            ..LoggingSettings::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            let err = init_tracing(&settings).expect_err("filter must fail");
            assert!(matches!(err, TelemetryError::InvalidFilter { .. }));
        }
    }
}
