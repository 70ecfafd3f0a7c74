//! Static admission checks for tool source.
//!
//! Two independent checks guard every write of tool code: the structural
//! [`SourceValidator`] and the [`StaticSecurityGate`]. Both work on the
//! Python syntax tree produced by `tree-sitter` and never execute the
//! submitted code.

#![warn(missing_docs, clippy::pedantic)]

pub mod error;
pub mod review;
pub mod rules;
pub mod syntax;
pub mod validation;
pub mod verdict;

pub use error::{PolicyError, PolicyResult};
pub use review::{CodeReviewer, StaticSecurityGate, review};
pub use rules::{CallClass, RuleSet};
pub use validation::{ModuleAllowlist, ModuleResolver, SourceValidator, is_valid_tool_name};
pub use verdict::{IssueKind, SecurityIssue, SecurityVerdict, Severity};
