//! The text-in/text-out oracle the orchestrator talks to.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::traits::{AdapterError, InferenceRequest, ModelAdapter, collect_stream};

/// Result alias for oracle calls.
pub type OracleResult<T> = Result<T, OracleError>;

/// Failure of a single oracle round trip.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The completion service could not be reached.
    #[error("oracle unavailable: {reason}")]
    Unavailable {
        /// Underlying connectivity failure.
        reason: String,
    },
    /// The service answered but the call failed.
    #[error("oracle call failed: {reason}")]
    Failed {
        /// Underlying failure.
        reason: String,
    },
}

impl OracleError {
    /// Convenience constructor for connectivity failures.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for other failures.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Whether this is a connectivity failure.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<AdapterError> for OracleError {
    fn from(err: AdapterError) -> Self {
        if err.is_connectivity() {
            Self::unavailable(err.to_string())
        } else {
            Self::failed(err.to_string())
        }
    }
}

/// Completion service answering one prompt with one text.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Sends `prompt` and returns the full response text.
    async fn chat(&self, prompt: &str) -> OracleResult<String>;

    /// Label recorded alongside answers produced by this oracle.
    fn label(&self) -> String;
}

/// [`Oracle`] backed by any [`ModelAdapter`].
#[derive(Clone)]
pub struct AdapterOracle {
    adapter: Arc<dyn ModelAdapter>,
    system_prompt: Option<String>,
}

impl std::fmt::Debug for AdapterOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterOracle")
            .field("model", &self.adapter.metadata().model())
            .finish_non_exhaustive()
    }
}

impl AdapterOracle {
    /// Wraps an adapter.
    #[must_use]
    pub fn new(adapter: Arc<dyn ModelAdapter>) -> Self {
        Self {
            adapter,
            system_prompt: None,
        }
    }

    /// Sends `prompt` as a system message ahead of every request.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

#[async_trait]
impl Oracle for AdapterOracle {
    async fn chat(&self, prompt: &str) -> OracleResult<String> {
        let mut request = InferenceRequest::from_prompt(prompt);
        if let Some(system) = &self.system_prompt {
            request = request.with_system_prompt(system.clone());
        }

        let started = Instant::now();
        let result = match self.adapter.infer(request).await {
            Ok(stream) => collect_stream(stream).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(text) => {
                debug!(
                    model = self.adapter.metadata().model(),
                    elapsed_ms = started.elapsed().as_millis(),
                    chars = text.len(),
                    "oracle call completed"
                );
                Ok(text)
            }
            Err(err) => {
                warn!(model = self.adapter.metadata().model(), error = %err, "oracle call failed");
                Err(err.into())
            }
        }
    }

    fn label(&self) -> String {
        self.adapter.metadata().label()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream;

    use super::*;
    use crate::traits::{AdapterMetadata, AdapterResult, AdapterStream, InferenceChunk};

    struct FakeAdapter {
        metadata: AdapterMetadata,
        outcome: Mutex<Option<AdapterError>>,
        seen: Mutex<Vec<InferenceRequest>>,
    }

    impl FakeAdapter {
        fn new(error: Option<AdapterError>) -> Arc<Self> {
            Arc::new(Self {
                metadata: AdapterMetadata::new("fake", "echo"),
                outcome: Mutex::new(error),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelAdapter for FakeAdapter {
        fn metadata(&self) -> &AdapterMetadata {
            &self.metadata
        }

        async fn infer(&self, request: InferenceRequest) -> AdapterResult<AdapterStream> {
            if let Some(err) = self.outcome.lock().unwrap().take() {
                return Err(err);
            }
            let reply = format!("echo: {}", request.messages()[0].content());
            self.seen.lock().unwrap().push(request);
            Ok(Box::pin(stream::once(async move {
                Ok(InferenceChunk::new(reply, true))
            })))
        }
    }

    #[tokio::test]
    async fn forwards_prompt_and_system_message() {
        let adapter = FakeAdapter::new(None);
        let oracle = AdapterOracle::new(adapter.clone()).with_system_prompt("be terse");

        assert_eq!(oracle.chat("ping").await.unwrap(), "echo: ping");
        assert_eq!(oracle.label(), "fake/echo");
        let seen = adapter.seen.lock().unwrap();
        assert_eq!(seen[0].system_prompt(), Some("be terse"));
    }

    #[tokio::test]
    async fn classifies_failures() {
        let offline = AdapterOracle::new(FakeAdapter::new(Some(AdapterError::transport("refused"))));
        assert!(offline.chat("x").await.unwrap_err().is_unavailable());

        let broken = AdapterOracle::new(FakeAdapter::new(Some(AdapterError::response("500"))));
        assert!(matches!(
            broken.chat("x").await,
            Err(OracleError::Failed { .. })
        ));
    }
}
