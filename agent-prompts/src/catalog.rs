//! Prompts sent to the oracle at each stage of a turn.

use crate::template::{PromptTemplate, TemplateResult};

const PLANNING: &str = r#"Analyse the user's request, the recent conversation and the available tools, then write an execution plan for the assistant.

User request: "{{question}}"

Recent conversation:
{{history}}

Available tools:
{{tools}}

Think in this order:
1. What does the user actually need?
2. Can it be answered directly, does it need tools, or must the user be asked for more detail?
3. If tools are needed, which ones and in what order?
4. What concrete action does each step take?

Return a JSON array. Each element has these fields:
- "step": step number, starting at 1
- "action": one of "UseTool", "DirectAnswer" or "FollowUp"
- "reason": why this step is taken
- "tool_name": the tool to use when action is "UseTool" (optional)

Example:
[
  {"step": 1, "action": "UseTool", "reason": "look up the weather with the weather tool", "tool_name": "weather"},
  {"step": 2, "action": "DirectAnswer", "reason": "summarise the weather for the user"}
]

Return only the JSON array, with no other text."#;

const SELECTION: &str = r#"Analyse the user's request and the recent conversation, choose one tool and extract its arguments. Reply in strict JSON.

User request: "{{request}}"
Recent conversation: {{history}}
Available tools (name, description, parameters):
{{tools}}

Reply with exactly this shape:
{"tool": "tool name", "parameters": {"name": "value"}, "reasoning": "why this tool and these arguments", "confidence": 0.0}

Rules:
1. Parameter names must match the tool definition exactly.
2. Convert values to the declared types (numbers, strings, ...).
3. If an argument cannot be determined, use a sensible default or return confidence 0.

Example 1:
Request: "compute 20+40-20 (result of step 1: 60; executing step 2 of the plan: subtract 20 from 60)"
Reply: {"tool": "subtract", "parameters": {"a": 60, "b": 20}, "reasoning": "the step subtracts 20 from the previous result", "confidence": 0.95}

Example 2:
Request: "find information on machine learning (executing step 1 of the plan: search for machine learning)"
Reply: {"tool": "search", "parameters": {"query": "machine learning"}, "reasoning": "the user asked for a search", "confidence": 0.9}

Return only the JSON object, with no other text."#;

const DIRECT: &str = r#"Answer the user's question directly, without calling any tool.
User question: {{question}}

Recent conversation:
{{history}}

Give a natural, friendly answer."#;

const FOLLOW_UP: &str = r#"The user's question is missing some information needed to answer it. Ask a friendly follow-up question.
User question: {{question}}

Write one short, specific question that gathers what is missing."#;

const SUMMARY: &str = r#"Using the tool results below, answer the user's question.
User question: {{question}}

Tool results:
{{results}}

Give a concise, friendly answer."#;

/// The set of templates used by the orchestrator.
///
/// Every template is overridable; the defaults are tuned for chat models that
/// follow JSON-only instructions.
#[derive(Clone, Debug)]
pub struct PromptCatalog {
    planning: PromptTemplate,
    selection: PromptTemplate,
    direct: PromptTemplate,
    follow_up: PromptTemplate,
    summary: PromptTemplate,
}

fn required(text: &str, variables: &[&str]) -> TemplateResult<PromptTemplate> {
    variables
        .iter()
        .fold(PromptTemplate::builder(text), |builder, name| {
            builder.with_required_variable(*name)
        })
        .build()
}

impl PromptCatalog {
    /// Builds the default catalog.
    ///
    /// # Errors
    ///
    /// Returns a template error if a built-in template is malformed.
    pub fn try_default() -> TemplateResult<Self> {
        Ok(Self {
            planning: required(PLANNING, &["question", "history", "tools"])?,
            selection: required(SELECTION, &["request", "history", "tools"])?,
            direct: required(DIRECT, &["question", "history"])?,
            follow_up: required(FOLLOW_UP, &["question"])?,
            summary: required(SUMMARY, &["question", "results"])?,
        })
    }

    /// Replaces the planning template (`question`, `history`, `tools`).
    #[must_use]
    pub fn with_planning(mut self, template: PromptTemplate) -> Self {
        self.planning = template;
        self
    }

    /// Replaces the tool selection template (`request`, `history`, `tools`).
    #[must_use]
    pub fn with_selection(mut self, template: PromptTemplate) -> Self {
        self.selection = template;
        self
    }

    /// Replaces the direct-answer template (`question`, `history`).
    #[must_use]
    pub fn with_direct(mut self, template: PromptTemplate) -> Self {
        self.direct = template;
        self
    }

    /// Replaces the follow-up template (`question`).
    #[must_use]
    pub fn with_follow_up(mut self, template: PromptTemplate) -> Self {
        self.follow_up = template;
        self
    }

    /// Replaces the summary template (`question`, `results`).
    #[must_use]
    pub fn with_summary(mut self, template: PromptTemplate) -> Self {
        self.summary = template;
        self
    }

    /// Prompt asking for a JSON array of plan steps.
    ///
    /// # Errors
    ///
    /// Returns a template error if an overriding template needs other variables.
    pub fn planning(&self, question: &str, history: &str, tools: &str) -> TemplateResult<String> {
        self.planning
            .render_with(&[("question", question), ("history", history), ("tools", tools)])
    }

    /// Prompt asking for one tool call as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns a template error if an overriding template needs other variables.
    pub fn selection(&self, request: &str, history: &str, tools: &str) -> TemplateResult<String> {
        self.selection
            .render_with(&[("request", request), ("history", history), ("tools", tools)])
    }

    /// Prompt asking for an answer without tools.
    ///
    /// # Errors
    ///
    /// Returns a template error if an overriding template needs other variables.
    pub fn direct(&self, question: &str, history: &str) -> TemplateResult<String> {
        self.direct
            .render_with(&[("question", question), ("history", history)])
    }

    /// Prompt asking for a clarifying question.
    ///
    /// # Errors
    ///
    /// Returns a template error if an overriding template needs other variables.
    pub fn follow_up(&self, question: &str) -> TemplateResult<String> {
        self.follow_up.render_with(&[("question", question)])
    }

    /// Prompt asking to summarise accumulated tool results.
    ///
    /// # Errors
    ///
    /// Returns a template error if an overriding template needs other variables.
    pub fn summary(&self, question: &str, results: &str) -> TemplateResult<String> {
        self.summary
            .render_with(&[("question", question), ("results", results)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_templates_render() {
        let catalog = PromptCatalog::try_default().unwrap();
        let prompt = catalog
            .planning("what is 3 times 4", "No previous conversation.", "[]")
            .unwrap();
        assert!(prompt.contains(r#"User request: "what is 3 times 4""#));
        assert!(prompt.contains(r#""action": "DirectAnswer""#));

        let selection = catalog.selection("add 1 and 2", "none", r#"[{"name":"add"}]"#).unwrap();
        assert!(selection.contains(r#"[{"name":"add"}]"#));
        assert!(selection.contains(r#""parameters": {"a": 60, "b": 20}"#));

        assert!(catalog.follow_up("book a table").unwrap().contains("book a table"));
        assert!(catalog.summary("q", "**Result**: 14").unwrap().contains("**Result**: 14"));
        assert!(catalog.direct("hi", "none").unwrap().starts_with("Answer the user's question"));
    }

    #[test]
    fn overrides_replace_templates() {
        let catalog = PromptCatalog::try_default()
            .unwrap()
            .with_follow_up(PromptTemplate::new("Ask about: {{question}}").unwrap());
        assert_eq!(catalog.follow_up("dates").unwrap(), "Ask about: dates");
    }

    #[test]
    fn overriding_template_with_unknown_required_variable_fails() {
        let catalog = PromptCatalog::try_default().unwrap().with_summary(
            PromptTemplate::builder("{{question}} {{tone}}")
                .with_required_variable("tone")
                .build()
                .unwrap(),
        );
        assert!(catalog.summary("q", "r").is_err());
    }
}
