//! Prompt templates and conversation summaries for the planning agent.

#![warn(missing_docs, clippy::pedantic)]

pub mod catalog;
pub mod history;
pub mod template;

pub use catalog::PromptCatalog;
pub use history::{ConversationSummary, EMPTY_HISTORY};
pub use template::{PromptTemplate, TemplateBuilder, TemplateError, TemplateResult};
