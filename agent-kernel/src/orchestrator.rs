//! Turn execution: plan, run steps in order, answer, persist.

use std::fmt;
use std::sync::Arc;

use agent_adapters::{Oracle, OracleError};
use agent_memory::{ChatHistory, ExecutionRecord, ExecutionSink, ExecutionStatus};
use agent_primitives::OwnerId;
use agent_prompts::{ConversationSummary, PromptCatalog};
use agent_tools::{ToolHandle, ToolRegistry};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::extract::strip_reasoning;
use crate::phase::{Turn, TurnEvent};
use crate::plan::{Plan, PlanParser, Step, StepAction};
use crate::render::{execution_error, fallback_summary, join_contributions, tool_block, value_text};
use crate::selection::{SelectionError, ToolCall, ToolSelector, frame_step};

/// Minimum selection confidence for a tool to be dispatched, inclusive.
pub const CONFIDENCE_THRESHOLD: f64 = 0.3;

/// Default number of prior exchanges embedded in prompts.
pub const DEFAULT_HISTORY_WINDOW: usize = 3;

/// Answer used when the oracle cannot be reached for a direct answer.
pub const UNAVAILABLE_ANSWER: &str =
    "Sorry, I cannot reach the language model service right now. Please try again later.";

/// Clarifying question used when the oracle fails to produce one.
pub const FOLLOW_UP_FALLBACK: &str =
    "To help you better I need a little more information. Could you share more details?";

/// Result of one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    plan: Plan,
    plan_text: String,
    answer: String,
}

impl TurnOutcome {
    /// The plan that was executed.
    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Rendered plan, one line per step.
    #[must_use]
    pub fn plan_text(&self) -> &str {
        &self.plan_text
    }

    /// Final answer as produced, including any reasoning trace.
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Rendered plan followed by the answer.
    #[must_use]
    pub fn text(&self) -> String {
        format!("{}{}", self.plan_text, self.answer)
    }
}

impl fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.plan_text, self.answer)
    }
}

/// Checks that `call` may be dispatched against `registry`.
///
/// # Errors
///
/// Returns [`SelectionError::UnknownTool`] when the tool is absent and
/// [`SelectionError::LowConfidence`] below [`CONFIDENCE_THRESHOLD`].
pub fn dispatch_gate(call: &ToolCall, registry: &ToolRegistry) -> Result<ToolHandle, SelectionError> {
    let Some(name) = call.tool() else {
        return Err(SelectionError::Malformed {
            reason: format!("no tool selected: {}", call.reasoning()),
        });
    };
    let handle = registry.get(name).ok_or_else(|| SelectionError::UnknownTool {
        name: name.to_owned(),
    })?;
    if call.confidence() < CONFIDENCE_THRESHOLD {
        return Err(SelectionError::LowConfidence {
            confidence: call.confidence(),
        });
    }
    Ok(handle)
}

/// Runs turns for any owner.
///
/// Holds no per-turn state; one instance serves concurrent turns.
pub struct Orchestrator {
    oracle: Arc<dyn Oracle>,
    prompts: Arc<PromptCatalog>,
    planner: PlanParser,
    selector: ToolSelector,
    executions: Arc<dyn ExecutionSink>,
    chats: Arc<dyn ChatHistory>,
    history_window: usize,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("oracle", &self.oracle.label())
            .field("history_window", &self.history_window)
            .finish_non_exhaustive()
    }
}

struct StepContext<'a> {
    owner: OwnerId,
    question: &'a str,
    history: &'a ConversationSummary,
    registry: &'a ToolRegistry,
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        oracle: Arc<dyn Oracle>,
        prompts: Arc<PromptCatalog>,
        executions: Arc<dyn ExecutionSink>,
        chats: Arc<dyn ChatHistory>,
    ) -> Self {
        Self {
            planner: PlanParser::new(Arc::clone(&oracle), Arc::clone(&prompts)),
            selector: ToolSelector::new(Arc::clone(&oracle), Arc::clone(&prompts)),
            oracle,
            prompts,
            executions,
            chats,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    /// Number of prior exchanges embedded in prompts.
    #[must_use]
    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Answers `question` for `owner` using the tools in `registry`.
    ///
    /// Never fails: oracle, selection and tool failures resolve to fallback
    /// text, and persistence failures are logged.
    pub async fn run(
        &self,
        owner: OwnerId,
        question: &str,
        registry: &ToolRegistry,
        model_label: &str,
    ) -> TurnOutcome {
        info!(%owner, tools = registry.len(), "turn started");
        let mut turn = Turn::new(owner);
        let history = self.history(owner).await;

        let plan = self
            .planner
            .plan(question, &history, &registry.schema().to_string())
            .await;
        let plan_text = plan.render();
        debug!(%owner, plan = %plan_text, "executing plan");

        let context = StepContext {
            owner,
            question,
            history: &history,
            registry,
        };
        let answer = self.execute(&mut turn, &context, &plan).await;

        if let Err(err) = self
            .chats
            .record(question, &plan_text, strip_reasoning(&answer), owner, model_label)
            .await
        {
            warn!(%owner, error = %err, "failed to persist chat record");
        }
        info!(%owner, steps = plan.len(), "turn completed");

        TurnOutcome {
            plan,
            plan_text,
            answer,
        }
    }

    async fn history(&self, owner: OwnerId) -> ConversationSummary {
        if self.history_window == 0 {
            return ConversationSummary::empty();
        }
        match self.chats.recent(owner, self.history_window).await {
            Ok(records) => ConversationSummary::from_records(&records, self.history_window),
            Err(err) => {
                warn!(%owner, error = %err, "failed to load conversation history");
                ConversationSummary::empty()
            }
        }
    }

    async fn execute(&self, turn: &mut Turn, context: &StepContext<'_>, plan: &Plan) -> String {
        let mut contributions = Vec::new();
        let mut previous: Option<String> = None;

        for (position, step) in plan.steps().iter().enumerate() {
            let event = if position == 0 {
                TurnEvent::PlanReady(step.index())
            } else {
                TurnEvent::Advance(step.index())
            };
            advance(turn, event);

            match step.action() {
                StepAction::UseTool => {
                    let contribution = self.use_tool(context, step, &mut previous).await;
                    contributions.push(contribution);
                }
                StepAction::DirectAnswer => {
                    advance(turn, TurnEvent::Finish);
                    return self.conclude(context.question, &contributions).await;
                }
                StepAction::FollowUp => {
                    advance(turn, TurnEvent::Finish);
                    return self.follow_up(context.question).await;
                }
                StepAction::Other(label) => {
                    debug!(step = step.index(), action = %label, "unknown action; answering directly");
                    advance(turn, TurnEvent::Finish);
                    return self.direct_answer(context.question, context.history).await;
                }
            }
        }

        debug!("plan ended without a terminal step");
        advance(turn, TurnEvent::Finish);
        self.conclude(context.question, &contributions).await
    }

    async fn use_tool(
        &self,
        context: &StepContext<'_>,
        step: &Step,
        previous: &mut Option<String>,
    ) -> String {
        let framed = frame_step(context.question, step, previous.as_deref());
        let mut call = self
            .selector
            .select(&framed, context.history, context.registry)
            .await;
        if call.tool().is_none() {
            if let Some(hint) = step.tool_hint() {
                call = call.with_tool(hint);
            }
        }

        let handle = match dispatch_gate(&call, context.registry) {
            Ok(handle) => handle,
            Err(reason) => {
                info!(step = step.index(), reason = %reason, "no eligible tool; answering directly");
                return self.direct_answer(&framed, context.history).await;
            }
        };

        let tool = handle.spec().name().to_owned();
        let start = Utc::now();
        let outcome = context
            .registry
            .invoke(&tool, Value::Object(call.parameters().clone()))
            .await;
        let end = Utc::now();

        match outcome {
            Ok(value) => {
                let result = value_text(&value);
                info!(step = step.index(), tool = %tool, confidence = call.confidence(), "tool executed");
                self.record_execution(context, &call, &tool, (ExecutionStatus::Success, &result), (start, end))
                    .await;
                let block = tool_block(handle.spec(), &call, &result);
                *previous = Some(result);
                block
            }
            Err(err) => {
                let message = err.to_string();
                error!(step = step.index(), tool = %tool, error = %message, "tool execution failed");
                self.record_execution(context, &call, &tool, (ExecutionStatus::Error, &message), (start, end))
                    .await;
                execution_error(&message)
            }
        }
    }

    async fn record_execution(
        &self,
        context: &StepContext<'_>,
        call: &ToolCall,
        tool: &str,
        (status, result): (ExecutionStatus, &str),
        (start, end): (DateTime<Utc>, DateTime<Utc>),
    ) {
        let record = ExecutionRecord::builder(context.owner, tool)
            .question(context.question)
            .params(call.parameters().clone())
            .outcome(status, result)
            .timing(start, end)
            .build();
        let outcome = match record {
            Ok(record) => self.executions.record(record).await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            warn!(owner = %context.owner, tool, error = %err, "failed to persist execution record");
        }
    }

    async fn conclude(&self, question: &str, contributions: &[String]) -> String {
        if contributions.is_empty() {
            return self.follow_up(question).await;
        }

        let prompt = match self.prompts.summary(question, &join_contributions(contributions)) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(error = %err, "summary prompt failed to render");
                return fallback_summary(contributions);
            }
        };
        match self.oracle.chat(&prompt).await {
            Ok(reply) => reply.trim().to_owned(),
            Err(err) => {
                warn!(error = %err, "summary call failed; concatenating results");
                fallback_summary(contributions)
            }
        }
    }

    async fn direct_answer(&self, input: &str, history: &ConversationSummary) -> String {
        let prompt = match self.prompts.direct(input, &history.to_string()) {
            Ok(prompt) => prompt,
            Err(err) => return format!("Sorry, an error occurred while generating the answer: {err}"),
        };
        match self.oracle.chat(&prompt).await {
            Ok(reply) => reply.trim().to_owned(),
            Err(OracleError::Unavailable { reason }) => {
                warn!(reason = %reason, "direct answer unavailable");
                UNAVAILABLE_ANSWER.to_owned()
            }
            Err(err) => format!("Sorry, an error occurred while generating the answer: {err}"),
        }
    }

    async fn follow_up(&self, question: &str) -> String {
        let Ok(prompt) = self.prompts.follow_up(question) else {
            return FOLLOW_UP_FALLBACK.to_owned();
        };
        match self.oracle.chat(&prompt).await {
            Ok(reply) => reply.trim().to_owned(),
            Err(err) => {
                warn!(error = %err, "follow-up call failed");
                FOLLOW_UP_FALLBACK.to_owned()
            }
        }
    }
}

fn advance(turn: &mut Turn, event: TurnEvent) {
    if let Err(err) = turn.transition(event) {
        debug!(error = %err, "ignored turn transition");
    }
}

#[cfg(test)]
mod tests {
    use agent_tools::{NativeTool, ToolError};
    use serde_json::{Map, json};

    use super::*;

    fn registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry
            .register_native(
                "ping",
                "Ping",
                NativeTool::new(|_: Value| async move { Ok::<_, ToolError>(json!("pong")) }),
                Some(Vec::new()),
            )
            .unwrap();
        registry
    }

    #[test]
    fn gate_is_inclusive_at_threshold() {
        let registry = registry();
        let at = ToolCall::new("ping", Map::new(), "", 0.3);
        assert!(dispatch_gate(&at, &registry).is_ok());

        let below = ToolCall::new("ping", Map::new(), "", 0.299_99);
        assert!(matches!(
            dispatch_gate(&below, &registry),
            Err(SelectionError::LowConfidence { .. })
        ));
    }

    #[test]
    fn gate_rejects_unknown_and_missing_tools() {
        let registry = registry();
        let unknown = ToolCall::new("pong", Map::new(), "", 0.9);
        assert!(matches!(
            dispatch_gate(&unknown, &registry),
            Err(SelectionError::UnknownTool { .. })
        ));
        assert!(dispatch_gate(&ToolCall::declined("nothing fits"), &registry).is_err());
    }

    #[test]
    fn outcome_text_is_plan_then_answer() {
        let outcome = TurnOutcome {
            plan: Plan::fallback("r"),
            plan_text: Plan::fallback("r").render(),
            answer: "hello".to_owned(),
        };
        assert_eq!(outcome.text(), "Plan:\nStep 1: DirectAnswer - r\nhello");
        assert_eq!(outcome.to_string(), outcome.text());
    }
}
