//! Recovering JSON values from free-form oracle replies.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static ARRAY_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("invalid array span regex"));

static FENCED_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("invalid fenced block regex")
});

const REASONING_END: &str = "</think>";

/// Parses a plan reply: the whole text, else the outermost `[...]` span.
#[must_use]
pub fn array_value(reply: &str) -> Option<Value> {
    let reply = reply.trim();
    serde_json::from_str(reply).ok().or_else(|| {
        ARRAY_SPAN
            .find(reply)
            .and_then(|span| serde_json::from_str(span.as_str()).ok())
    })
}

/// Parses a tool selection reply: the whole text, else a fenced JSON block,
/// else the first balanced `{...}` span.
#[must_use]
pub fn object_value(reply: &str) -> Option<Value> {
    let reply = reply.trim();
    if let Ok(value) = serde_json::from_str(reply) {
        return Some(value);
    }
    if let Some(block) = FENCED_OBJECT.captures(reply).and_then(|caps| caps.get(1)) {
        if let Ok(value) = serde_json::from_str(block.as_str()) {
            return Some(value);
        }
    }
    first_object_span(reply).and_then(|span| serde_json::from_str(span).ok())
}

/// The first `{...}` span whose braces balance, ignoring braces inside JSON
/// strings.
fn first_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Removes everything up to and including the last `</think>` marker.
#[must_use]
pub fn strip_reasoning(answer: &str) -> &str {
    answer
        .rfind(REASONING_END)
        .map_or(answer, |end| &answer[end + REASONING_END.len()..])
        .trim()
}
