//! Plans and the plan parser.

use std::fmt;
use std::sync::Arc;

use agent_adapters::{Oracle, OracleError};
use agent_prompts::{ConversationSummary, PromptCatalog};
use agent_telemetry::truncate_for_log;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::extract::array_value;

const LOG_PREVIEW_CHARS: usize = 200;

/// Reason of the fallback step when the reply could not be parsed.
pub const REASON_UNPARSEABLE: &str = "could not generate a plan";
/// Reason of the fallback step when the oracle could not be reached.
pub const REASON_UNREACHABLE: &str = "could not generate a plan: network connection failed";
/// Reason of the fallback step when the oracle call failed otherwise.
pub const REASON_ORACLE_FAILED: &str = "could not generate a plan: model call failed";

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum StepAction {
    /// Select and invoke a tool.
    UseTool,
    /// Answer the user; terminal.
    DirectAnswer,
    /// Ask the user a clarifying question; terminal.
    FollowUp,
    /// Unrecognised label, handled as a direct answer to the raw input.
    Other(String),
}

impl StepAction {
    /// Parses an action label, accepting common spellings case-insensitively.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "usetool" | "tool" | "使用工具" => Self::UseTool,
            "directanswer" | "answer" | "直接回答" => Self::DirectAnswer,
            "followup" | "askuser" | "追问用户" => Self::FollowUp,
            _ => Self::Other(label.trim().to_owned()),
        }
    }

    /// Canonical label.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::UseTool => "UseTool",
            Self::DirectAnswer => "DirectAnswer",
            Self::FollowUp => "FollowUp",
            Self::Other(label) => label,
        }
    }

    /// Whether the turn ends after this step.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::UseTool)
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<StepAction> for String {
    fn from(action: StepAction) -> Self {
        action.label().to_owned()
    }
}

/// One planned action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    index: usize,
    action: StepAction,
    reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_hint: Option<String>,
}

impl Step {
    /// Creates a step.
    #[must_use]
    pub fn new(index: usize, action: StepAction, reason: impl Into<String>) -> Self {
        Self {
            index,
            action,
            reason: reason.into(),
            tool_hint: None,
        }
    }

    /// Suggests the tool this step should use.
    #[must_use]
    pub fn with_tool_hint(mut self, tool: impl Into<String>) -> Self {
        self.tool_hint = Some(tool.into());
        self
    }

    /// 1-based ordinal.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Planned action.
    #[must_use]
    pub fn action(&self) -> &StepAction {
        &self.action
    }

    /// Rationale given by the oracle.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Tool suggested by the planner.
    #[must_use]
    pub fn tool_hint(&self) -> Option<&str> {
        self.tool_hint.as_deref()
    }
}

/// A plan reply that could not be used.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The reply did not contain a usable JSON array of steps.
    #[error("malformed plan response: {reason}")]
    Malformed {
        /// What was wrong.
        reason: String,
    },
}

impl PlanError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Ordered, immutable list of steps for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    /// Creates a plan from steps.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Malformed`] when `steps` is empty or the ordinals
    /// are not strictly increasing from 1.
    pub fn new(steps: Vec<Step>) -> Result<Self, PlanError> {
        if steps.is_empty() {
            return Err(PlanError::malformed("plan has no steps"));
        }
        let mut previous = 0;
        for step in &steps {
            if step.index <= previous {
                return Err(PlanError::malformed(format!(
                    "step ordinal {} does not follow {previous}",
                    step.index
                )));
            }
            previous = step.index;
        }
        Ok(Self { steps })
    }

    /// Single `DirectAnswer` step carrying `reason`.
    #[must_use]
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            steps: vec![Step::new(1, StepAction::DirectAnswer, reason)],
        }
    }

    /// Parses an oracle reply.
    ///
    /// Accepts the whole reply as JSON or the outermost `[...]` span in it.
    /// Steps without a valid ordinal are numbered after their predecessor;
    /// steps without an action become `DirectAnswer`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Malformed`] when no non-empty array of step
    /// objects can be recovered.
    pub fn parse(reply: &str) -> Result<Self, PlanError> {
        let value = array_value(reply).ok_or_else(|| PlanError::malformed("no JSON array found"))?;
        let Value::Array(items) = value else {
            return Err(PlanError::malformed("plan is not a JSON array"));
        };

        let mut steps = Vec::with_capacity(items.len());
        let mut previous = 0_usize;
        for item in items {
            let Value::Object(fields) = item else {
                return Err(PlanError::malformed("plan step is not a JSON object"));
            };
            let next = previous
                .checked_add(1)
                .ok_or_else(|| PlanError::malformed("step ordinals run past the largest ordinal"))?;
            let index = fields
                .get("step")
                .and_then(ordinal)
                .filter(|index| *index > previous)
                .unwrap_or(next);
            previous = index;

            let action = fields
                .get("action")
                .and_then(Value::as_str)
                .map_or(StepAction::DirectAnswer, StepAction::parse);
            let reason = fields.get("reason").and_then(Value::as_str).unwrap_or_default();
            let mut step = Step::new(index, action, reason);
            if let Some(tool) = fields
                .get("tool_name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|tool| !tool.is_empty())
            {
                step = step.with_tool_hint(tool);
            }
            steps.push(step);
        }
        Self::new(steps)
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false; plans have at least one step.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// One line per step: ordinal, action, and reason.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = String::from("Plan:\n");
        for step in &self.steps {
            text.push_str(&format!("Step {}: {}", step.index, step.action));
            if !step.reason.is_empty() {
                text.push_str(" - ");
                text.push_str(&step.reason);
            }
            text.push('\n');
        }
        text
    }
}

fn ordinal(value: &Value) -> Option<usize> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
    .filter(|index| *index >= 1)
}

/// Asks the oracle for a plan and never fails.
#[derive(Clone)]
pub struct PlanParser {
    oracle: Arc<dyn Oracle>,
    prompts: Arc<PromptCatalog>,
}

impl fmt::Debug for PlanParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanParser")
            .field("oracle", &self.oracle.label())
            .finish_non_exhaustive()
    }
}

impl PlanParser {
    /// Creates a parser.
    #[must_use]
    pub fn new(oracle: Arc<dyn Oracle>, prompts: Arc<PromptCatalog>) -> Self {
        Self { oracle, prompts }
    }

    /// Plans `question` given the conversation and the tool schema JSON.
    ///
    /// Every failure resolves to [`Plan::fallback`].
    pub async fn plan(&self, question: &str, history: &ConversationSummary, tools: &str) -> Plan {
        let prompt = match self.prompts.planning(question, &history.to_string(), tools) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(error = %err, "planning prompt failed to render");
                return Plan::fallback(REASON_UNPARSEABLE);
            }
        };

        let reply = match self.oracle.chat(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "planning call failed");
                return Plan::fallback(match err {
                    OracleError::Unavailable { .. } => REASON_UNREACHABLE,
                    OracleError::Failed { .. } => REASON_ORACLE_FAILED,
                });
            }
        };

        match Plan::parse(&reply) {
            Ok(plan) => {
                info!(steps = plan.len(), "plan created");
                plan
            }
            Err(err) => {
                debug!(
                    error = %err,
                    reply = %truncate_for_log(&reply, LOG_PREVIEW_CHARS),
                    "plan reply unusable"
                );
                Plan::fallback(REASON_UNPARSEABLE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_aliases() {
        assert_eq!(StepAction::parse("UseTool"), StepAction::UseTool);
        assert_eq!(StepAction::parse("use_tool"), StepAction::UseTool);
        assert_eq!(StepAction::parse("Use Tool"), StepAction::UseTool);
        assert_eq!(StepAction::parse("answer"), StepAction::DirectAnswer);
        assert_eq!(StepAction::parse("direct_answer"), StepAction::DirectAnswer);
        assert_eq!(StepAction::parse("ask_user"), StepAction::FollowUp);
        assert_eq!(StepAction::parse("FOLLOW-UP"), StepAction::FollowUp);
        assert_eq!(
            StepAction::parse(" Celebrate "),
            StepAction::Other("Celebrate".to_owned())
        );
        assert!(!StepAction::UseTool.is_terminal());
        assert!(StepAction::Other("x".to_owned()).is_terminal());
    }

    #[test]
    fn parses_plan_with_hints_and_prose() {
        let reply = r#"Plan follows.
[
  {"step": 1, "action": "UseTool", "reason": "multiply 3 by 4", "tool_name": "multiply"},
  {"step": 2, "action": "UseTool", "reason": "add 2", "tool_name": "add"},
  {"step": 3, "action": "DirectAnswer", "reason": "report the result"}
]"#;
        let plan = Plan::parse(reply).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.steps()[0].tool_hint(), Some("multiply"));
        assert_eq!(plan.steps()[2].action(), &StepAction::DirectAnswer);
        assert_eq!(plan.steps()[2].tool_hint(), None);
    }

    #[test]
    fn numbers_missing_and_repeated_ordinals() {
        let plan = Plan::parse(
            r#"[{"action": "use_tool"}, {"step": "1", "action": "answer"}, {"step": 7}]"#,
        )
        .unwrap();
        let indices: Vec<usize> = plan.steps().iter().map(Step::index).collect();
        assert_eq!(indices, vec![1, 2, 7]);
        assert_eq!(plan.steps()[2].action(), &StepAction::DirectAnswer);
    }

    #[test]
    fn rejects_unusable_replies() {
        assert!(Plan::parse("[]").is_err());
        assert!(Plan::parse("[1, 2]").is_err());
        assert!(Plan::parse("I cannot plan that").is_err());
        assert!(Plan::parse(r#"{"step": 1}"#).is_err());
        assert!(
            Plan::parse(r#"[{"step": 18446744073709551615, "action": "UseTool"}, {"action": "DirectAnswer"}]"#)
                .is_err()
        );
    }

    #[test]
    fn renders_one_line_per_step() {
        let plan = Plan::new(vec![
            Step::new(1, StepAction::UseTool, "compute"),
            Step::new(2, StepAction::DirectAnswer, ""),
        ])
        .unwrap();
        assert_eq!(plan.render(), "Plan:\nStep 1: UseTool - compute\nStep 2: DirectAnswer\n");
    }

    #[test]
    fn fallback_is_single_direct_answer() {
        let plan = Plan::fallback(REASON_UNREACHABLE);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps()[0].index(), 1);
        assert_eq!(plan.steps()[0].action(), &StepAction::DirectAnswer);
    }
}
