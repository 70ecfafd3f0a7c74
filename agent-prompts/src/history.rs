//! Bounded conversation summaries embedded in prompts.

use std::fmt;

use agent_memory::ChatRecord;

/// Text used when the owner has no prior exchanges.
pub const EMPTY_HISTORY: &str = "No previous conversation.";

/// The most recent exchanges, rendered verbatim one per line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationSummary {
    lines: Vec<String>,
}

impl ConversationSummary {
    /// Summary with no exchanges.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Summarises `records`, oldest first, keeping at most the last `window`.
    #[must_use]
    pub fn from_records(records: &[ChatRecord], window: usize) -> Self {
        let skip = records.len().saturating_sub(window);
        let lines = records[skip..]
            .iter()
            .map(|record| {
                format!(
                    "[User: {}; Assistant: {}]",
                    record.question(),
                    record.answer()
                )
            })
            .collect();
        Self { lines }
    }

    /// Number of exchanges included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns true when no exchange is included.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for ConversationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lines.is_empty() {
            f.write_str(EMPTY_HISTORY)
        } else {
            f.write_str(&self.lines.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_primitives::OwnerId;

    use super::*;

    fn exchange(question: &str, answer: &str) -> ChatRecord {
        ChatRecord::new(OwnerId::new(1), question, "plan", answer, "test/model")
    }

    #[test]
    fn empty_history_has_placeholder() {
        assert_eq!(ConversationSummary::empty().to_string(), EMPTY_HISTORY);
        assert!(ConversationSummary::from_records(&[], 3).is_empty());
    }

    #[test]
    fn keeps_most_recent_window_in_order() {
        let records = vec![
            exchange("one", "1"),
            exchange("two", "2"),
            exchange("three", "3"),
            exchange("four", "4"),
        ];
        let summary = ConversationSummary::from_records(&records, 3);
        assert_eq!(summary.len(), 3);
        assert_eq!(
            summary.to_string(),
            "[User: two; Assistant: 2]\n[User: three; Assistant: 3]\n[User: four; Assistant: 4]"
        );
    }
}
