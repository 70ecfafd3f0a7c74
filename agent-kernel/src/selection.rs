//! Tool selection for one plan step.

use std::fmt;
use std::sync::Arc;

use agent_adapters::Oracle;
use agent_prompts::{ConversationSummary, PromptCatalog};
use agent_telemetry::truncate_for_log;
use agent_tools::ToolRegistry;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::extract::object_value;
use crate::plan::Step;

const LOG_PREVIEW_CHARS: usize = 200;

/// A tool chosen by the oracle, with extracted arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    tool: Option<String>,
    parameters: Map<String, Value>,
    reasoning: String,
    confidence: f64,
}

impl ToolCall {
    /// Creates a call of `tool`; confidence is clamped to `[0, 1]`.
    #[must_use]
    pub fn new(
        tool: impl Into<String>,
        parameters: Map<String, Value>,
        reasoning: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            tool: Some(tool.into()),
            parameters,
            reasoning: reasoning.into(),
            confidence: clamp_confidence(confidence),
        }
    }

    /// A call with no tool and zero confidence.
    #[must_use]
    pub fn declined(reasoning: impl Into<String>) -> Self {
        Self {
            tool: None,
            parameters: Map::new(),
            reasoning: reasoning.into(),
            confidence: 0.0,
        }
    }

    /// Validates an oracle reply against `registry`.
    ///
    /// # Errors
    ///
    /// Returns a [`SelectionError`] when the reply has no JSON object, names
    /// no tool or an unknown one, or omits a required parameter.
    pub fn parse(reply: &str, registry: &ToolRegistry) -> Result<Self, SelectionError> {
        let Some(Value::Object(mut fields)) = object_value(reply) else {
            return Err(SelectionError::malformed("no JSON object found"));
        };

        let tool = match fields.remove("tool") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_owned(),
            _ => return Err(SelectionError::malformed("`tool` is missing or empty")),
        };
        let handle = registry
            .get(&tool)
            .ok_or_else(|| SelectionError::UnknownTool { name: tool.clone() })?;

        let parameters = match fields.remove("parameters") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(parameters)) => parameters,
            Some(_) => return Err(SelectionError::malformed("`parameters` is not an object")),
        };
        if let Some(missing) = handle
            .spec()
            .required_parameters()
            .find(|spec| !parameters.contains_key(spec.name()))
        {
            return Err(SelectionError::MissingParameter {
                tool,
                name: missing.name().to_owned(),
            });
        }

        let reasoning = fields
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let confidence = match fields.get("confidence") {
            Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
            Some(Value::String(text)) => text.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        };

        Ok(Self::new(tool, parameters, reasoning, confidence))
    }

    /// Replaces the tool name, keeping arguments and confidence.
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Chosen tool, if any.
    #[must_use]
    pub fn tool(&self) -> Option<&str> {
        self.tool.as_deref()
    }

    /// Arguments for the tool.
    #[must_use]
    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    /// Oracle's explanation of the choice.
    #[must_use]
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Confidence in `[0, 1]`.
    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Why a selection reply was rejected.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// The reply could not be read as a tool call.
    #[error("malformed selection response: {reason}")]
    Malformed {
        /// What was wrong.
        reason: String,
    },
    /// The reply named a tool the owner cannot use.
    #[error("unknown tool `{name}`")]
    UnknownTool {
        /// Name from the reply.
        name: String,
    },
    /// A required argument was not extracted.
    #[error("tool `{tool}` is missing required parameter `{name}`")]
    MissingParameter {
        /// Selected tool.
        tool: String,
        /// Missing parameter.
        name: String,
    },
    /// The selection is valid but below the dispatch threshold.
    #[error("confidence {confidence:.2} is below the dispatch threshold")]
    LowConfidence {
        /// Reported confidence.
        confidence: f64,
    },
}

impl SelectionError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Input text for the selector at `step`, carrying the previous step's result.
#[must_use]
pub fn frame_step(question: &str, step: &Step, previous: Option<&str>) -> String {
    match previous {
        Some(result) if step.index() > 1 => format!(
            "{question} (result of step {}: {result}; executing step {} of the plan: {})",
            step.index() - 1,
            step.index(),
            step.reason()
        ),
        _ => format!(
            "{question} (executing step {} of the plan: {})",
            step.index(),
            step.reason()
        ),
    }
}

/// Asks the oracle which tool to call and never fails.
#[derive(Clone)]
pub struct ToolSelector {
    oracle: Arc<dyn Oracle>,
    prompts: Arc<PromptCatalog>,
}

impl fmt::Debug for ToolSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSelector")
            .field("oracle", &self.oracle.label())
            .finish_non_exhaustive()
    }
}

impl ToolSelector {
    /// Creates a selector.
    #[must_use]
    pub fn new(oracle: Arc<dyn Oracle>, prompts: Arc<PromptCatalog>) -> Self {
        Self { oracle, prompts }
    }

    /// Selects a tool for `request`.
    ///
    /// Oracle failures and invalid replies resolve to [`ToolCall::declined`].
    pub async fn select(
        &self,
        request: &str,
        history: &ConversationSummary,
        registry: &ToolRegistry,
    ) -> ToolCall {
        if registry.is_empty() {
            return ToolCall::declined("no tools are available");
        }

        let tools = registry.schema().to_string();
        let prompt = match self.prompts.selection(request, &history.to_string(), &tools) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(error = %err, "selection prompt failed to render");
                return ToolCall::declined(err.to_string());
            }
        };

        let reply = match self.oracle.chat(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "selection call failed");
                return ToolCall::declined(err.to_string());
            }
        };

        match ToolCall::parse(&reply, registry) {
            Ok(call) => {
                info!(
                    tool = call.tool().unwrap_or_default(),
                    confidence = call.confidence(),
                    "tool selected"
                );
                call
            }
            Err(err) => {
                debug!(
                    error = %err,
                    reply = %truncate_for_log(&reply, LOG_PREVIEW_CHARS),
                    "selection reply rejected"
                );
                ToolCall::declined(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_primitives::ParameterSpec;
    use agent_tools::{NativeTool, ToolError};
    use serde_json::json;

    use super::*;
    use crate::plan::StepAction;

    fn registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry
            .register_native(
                "echo",
                "Echo text",
                NativeTool::new(|input: Value| async move { Ok::<_, ToolError>(input) }),
                Some(vec![
                    ParameterSpec::new("text").unwrap(),
                    ParameterSpec::new("times").unwrap().with_required(false),
                ]),
            )
            .unwrap();
        registry
    }

    #[test]
    fn accepts_valid_call_and_clamps_confidence() {
        let call = ToolCall::parse(
            r#"```json
{"tool": "echo", "parameters": {"text": "hi"}, "reasoning": "asked to echo", "confidence": 1.7}
```"#,
            &registry(),
        )
        .unwrap();
        assert_eq!(call.tool(), Some("echo"));
        assert_eq!(call.parameters()["text"], json!("hi"));
        assert!((call.confidence() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_confidence_is_zero_and_parameters_default_empty() {
        let registry = ToolRegistry::new();
        registry
            .register_native(
                "ping",
                "Ping",
                NativeTool::new(|_: Value| async move { Ok::<_, ToolError>(json!("pong")) }),
                Some(Vec::new()),
            )
            .unwrap();
        let call = ToolCall::parse(r#"{"tool": "ping"}"#, &registry).unwrap();
        assert!(call.parameters().is_empty());
        assert!(call.confidence().abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_invalid_calls() {
        let registry = registry();
        assert!(matches!(
            ToolCall::parse(r#"{"tool": "nope", "parameters": {}}"#, &registry),
            Err(SelectionError::UnknownTool { .. })
        ));
        assert!(matches!(
            ToolCall::parse(r#"{"tool": "echo", "parameters": {"times": 2}}"#, &registry),
            Err(SelectionError::MissingParameter { name, .. }) if name == "text"
        ));
        assert!(matches!(
            ToolCall::parse(r#"{"tool": "", "parameters": {}}"#, &registry),
            Err(SelectionError::Malformed { .. })
        ));
        assert!(matches!(
            ToolCall::parse(r#"{"tool": "echo", "parameters": [1]}"#, &registry),
            Err(SelectionError::Malformed { .. })
        ));
        assert!(ToolCall::parse("no idea", &registry).is_err());
    }

    #[test]
    fn frames_steps_with_previous_result() {
        let first = Step::new(1, StepAction::UseTool, "multiply 3 by 4");
        let second = Step::new(2, StepAction::UseTool, "add 2");
        assert_eq!(
            frame_step("what is 3*4+2", &first, None),
            "what is 3*4+2 (executing step 1 of the plan: multiply 3 by 4)"
        );
        assert_eq!(
            frame_step("what is 3*4+2", &second, Some("12")),
            "what is 3*4+2 (result of step 1: 12; executing step 2 of the plan: add 2)"
        );
    }
}
