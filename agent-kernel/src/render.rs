//! Text contributed by executed steps.

use agent_tools::ToolSpec;
use serde_json::Value;

use crate::selection::ToolCall;

const RESULT_MARKER: &str = "**Result**: ";
const SEPARATOR: &str = "\n\n";

/// Text form of a tool result: strings verbatim, anything else as JSON.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Block describing one successful tool execution.
#[must_use]
pub fn tool_block(spec: &ToolSpec, call: &ToolCall, result: &str) -> String {
    let mut block = format!(
        "**Tool**: {}\n**Description**: {}\n**Parameters**: {}\n{RESULT_MARKER}{result}\n",
        spec.name(),
        spec.description(),
        Value::Object(call.parameters().clone()),
    );
    if !call.reasoning().is_empty() {
        block.push_str(&format!("**Reasoning**: {}\n", call.reasoning()));
    }
    block.push_str(&format!("**Confidence**: {:.2}", call.confidence()));
    block
}

/// Contribution of a step whose tool failed.
#[must_use]
pub fn execution_error(message: &str) -> String {
    format!("Execution error: {message}")
}

/// All contributions, as handed to the summary prompt.
#[must_use]
pub fn join_contributions(contributions: &[String]) -> String {
    contributions.join(SEPARATOR)
}

/// Answer assembled without the oracle from the first line of every result.
///
/// Falls back to the joined contributions when none carries a result line.
#[must_use]
pub fn fallback_summary(contributions: &[String]) -> String {
    let lines: Vec<String> = contributions
        .iter()
        .filter_map(|block| {
            let (_, rest) = block.rsplit_once(RESULT_MARKER)?;
            Some(format!("- {}", rest.lines().next().unwrap_or_default()))
        })
        .collect();
    if lines.is_empty() {
        return join_contributions(contributions);
    }
    format!("Based on the tool results:\n{}", lines.join("\n"))
}
