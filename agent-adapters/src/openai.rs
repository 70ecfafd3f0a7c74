//! Adapter for OpenAI-compatible chat completion endpoints.
//!
//! Works against the official API and against local servers exposing the
//! same `/v1/chat/completions` route (Ollama, vLLM, llama.cpp).

use std::{fmt, time::Duration};

use agent_config::OracleSettings;
use agent_telemetry::truncate_for_log;
use async_trait::async_trait;
use futures::stream;
use hyper::body::to_bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use hyper::{Body, Request, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use crate::http_client::{HyperClient, build_client};
use crate::traits::{
    AdapterError, AdapterMetadata, AdapterResult, AdapterStream, InferenceChunk, InferenceRequest,
    MessageRole, ModelAdapter, PromptMessage,
};

const RESPONSE_PREVIEW_CHARS: usize = 300;

/// Configuration for the [`OpenAiAdapter`].
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
    default_temperature: Option<f32>,
    default_max_tokens: Option<u32>,
}

impl OpenAiConfig {
    /// Creates a configuration using the supplied model identifier.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            base_url: "https://api.openai.com/".to_owned(),
            timeout: Duration::from_secs(30),
            default_temperature: None,
            default_max_tokens: None,
        }
    }

    /// Builds a configuration from the `oracle` settings section.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the base URL is invalid.
    pub fn from_settings(settings: &OracleSettings) -> AdapterResult<Self> {
        let mut config = Self::new(settings.model.clone())
            .with_base_url(&settings.base_url)?
            .with_timeout(settings.timeout())
            .with_default_temperature(settings.temperature)
            .with_default_max_tokens(settings.max_tokens);
        config.api_key = settings.resolve_api_key();
        Ok(config)
    }

    /// Overrides the base URL used for API calls.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the supplied URL is invalid.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> AdapterResult<Self> {
        self.base_url = sanitize_base_url(base_url.as_ref())?;
        Ok(self)
    }

    /// Sets the default sampling temperature used when requests omit it.
    #[must_use]
    pub fn with_default_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = Some(temperature);
        self
    }

    /// Sets the default completion token budget used when requests omit it.
    #[must_use]
    pub fn with_default_max_tokens(mut self, tokens: u32) -> Self {
        self.default_max_tokens = Some(tokens);
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Supplies an explicit API key. Local endpoints usually need none.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Full chat-completions URL derived from the base URL.
    #[must_use]
    pub fn endpoint(&self) -> String {
        if self.base_url.ends_with("/v1/") {
            format!("{}chat/completions", self.base_url)
        } else {
            format!("{}v1/chat/completions", self.base_url)
        }
    }
}

/// Adapter calling an OpenAI-compatible endpoint over HTTP(S).
pub struct OpenAiAdapter {
    client: HyperClient,
    endpoint: Uri,
    metadata: AdapterMetadata,
    api_key: Option<String>,
    timeout: Duration,
    default_temperature: Option<f32>,
    default_max_tokens: Option<u32>,
}

impl fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("model", &self.metadata.model())
            .field("endpoint", &self.endpoint)
            .field("authenticated", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl OpenAiAdapter {
    /// Constructs a new adapter with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the endpoint is not a valid URI.
    pub fn new(config: OpenAiConfig) -> AdapterResult<Self> {
        let endpoint = config.endpoint().parse::<Uri>().map_err(|err| {
            AdapterError::configuration(format!("invalid chat completions endpoint: {err}"))
        })?;

        Ok(Self {
            client: build_client(),
            endpoint,
            metadata: AdapterMetadata::new("openai", config.model),
            api_key: config.api_key.filter(|key| !key.trim().is_empty()),
            timeout: config.timeout,
            default_temperature: config.default_temperature,
            default_max_tokens: config.default_max_tokens,
        })
    }

    fn build_request(&self, request: &InferenceRequest) -> ChatCompletionRequest {
        let system = request
            .system_prompt()
            .map(|prompt| PromptMessage::new(MessageRole::System, prompt));
        let messages = system
            .iter()
            .chain(request.messages())
            .map(map_prompt_message)
            .collect();

        ChatCompletionRequest {
            model: self.metadata.model().to_owned(),
            messages,
            temperature: request.temperature().or(self.default_temperature),
            max_tokens: request.max_output_tokens().or(self.default_max_tokens),
            stream: false,
        }
    }

    async fn send(&self, payload: &ChatCompletionRequest) -> AdapterResult<String> {
        let body = serde_json::to_vec(payload).map_err(|err| {
            AdapterError::invalid_request(format!("failed to encode chat request: {err}"))
        })?;

        let mut builder = Request::post(self.endpoint.clone()).header(CONTENT_TYPE, "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
        }
        let request = builder.body(Body::from(body)).map_err(|err| {
            AdapterError::invalid_request(format!("failed to build chat request: {err}"))
        })?;

        let response = timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| AdapterError::Timeout {
                elapsed: self.timeout,
            })?
            .map_err(|err| AdapterError::transport(format!("chat request failed: {err}")))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let bytes = to_bytes(response.into_body()).await.map_err(|err| {
            AdapterError::transport(format!("failed to read chat response: {err}"))
        })?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AdapterError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let reason = String::from_utf8_lossy(&bytes);
            return Err(AdapterError::response(format!(
                "endpoint returned {status}: {}",
                truncate_for_log(&reason, RESPONSE_PREVIEW_CHARS)
            )));
        }

        let content = decode_content(&bytes)?;
        debug!(
            model = self.metadata.model(),
            response = %truncate_for_log(&content, RESPONSE_PREVIEW_CHARS),
            "chat completion received"
        );
        Ok(content)
    }
}

#[async_trait]
impl ModelAdapter for OpenAiAdapter {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn infer(&self, request: InferenceRequest) -> AdapterResult<AdapterStream> {
        let payload = self.build_request(&request);
        let content = self.send(&payload).await?;
        let stream = stream::once(async move { Ok(InferenceChunk::new(content, true)) });
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn decode_content(bytes: &[u8]) -> AdapterResult<String> {
    let response: ChatCompletionResponse = serde_json::from_slice(bytes)
        .map_err(|err| AdapterError::response(format!("failed to decode chat response: {err}")))?;
    response
        .choices
        .into_iter()
        .find_map(|choice| choice.message.and_then(|message| message.content))
        .ok_or_else(|| AdapterError::response("chat response carried no message content"))
}

fn map_prompt_message(message: &PromptMessage) -> OpenAiMessage {
    OpenAiMessage {
        role: message.role().to_string(),
        content: message.content().to_owned(),
    }
}

fn sanitize_base_url(input: &str) -> AdapterResult<String> {
    let mut base = input.trim().to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(AdapterError::configuration(
            "base URL must start with http:// or https://",
        ));
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base.parse::<Uri>()
        .map_err(|err| AdapterError::configuration(format!("invalid base URL: {err}")))?;
    Ok(base)
}
