//! Verdict types returned by the security gate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};

/// Summary used when at least one high-risk finding was recorded.
pub const SUMMARY_UNSAFE: &str = "High-risk operations were found; the code was rejected.";
/// Summary used when only medium or low findings were recorded.
pub const SUMMARY_REVIEW: &str =
    "No high-risk operations were found, but some operations need attention.";
/// Summary used when nothing was found.
pub const SUMMARY_CLEAN: &str = "No security issues were found.";

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Rejects the source.
    High,
    /// Recorded for review; does not reject.
    Medium,
    /// Advisory only.
    Low,
}

impl Severity {
    /// Lower-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// The source does not parse.
    SyntaxError,
    /// Process spawning or shell execution.
    ProcessExecution,
    /// `eval`, `exec`, or `__import__`.
    DynamicCode,
    /// Recursive delete or unlink.
    DestructiveFile,
    /// HTTP clients or raw sockets.
    Network,
    /// `open` with a write, append, or create mode.
    FileWrite,
    /// Import of a system-adjacent module.
    SystemImport,
}

/// One finding of the security gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIssue {
    severity: Severity,
    kind: IssueKind,
    message: String,
}

impl SecurityIssue {
    /// Creates a finding.
    #[must_use]
    pub fn new(severity: Severity, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
        }
    }

    /// Finding severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Finding category.
    #[must_use]
    pub const fn kind(&self) -> IssueKind {
        self.kind
    }

    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SecurityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// Outcome of reviewing one source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityVerdict {
    safe: bool,
    issues: Vec<SecurityIssue>,
    summary: String,
}

impl SecurityVerdict {
    /// Derives the verdict from an ordered list of findings.
    ///
    /// The source is safe exactly when no finding is [`Severity::High`].
    #[must_use]
    pub fn from_issues(issues: Vec<SecurityIssue>) -> Self {
        let safe = !issues
            .iter()
            .any(|issue| issue.severity == Severity::High);
        let summary = match (safe, issues.is_empty()) {
            (false, _) => SUMMARY_UNSAFE,
            (true, false) => SUMMARY_REVIEW,
            (true, true) => SUMMARY_CLEAN,
        };
        Self {
            safe,
            issues,
            summary: summary.to_owned(),
        }
    }

    /// Whether the source may be admitted.
    #[must_use]
    pub const fn is_safe(&self) -> bool {
        self.safe
    }

    /// Findings in discovery order.
    #[must_use]
    pub fn issues(&self) -> &[SecurityIssue] {
        &self.issues
    }

    /// Fixed summary sentence.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Returns true when any finding has the given severity.
    #[must_use]
    pub fn has_severity(&self, severity: Severity) -> bool {
        self.issues.iter().any(|issue| issue.severity == severity)
    }

    /// Converts an unsafe verdict into [`PolicyError::UnsafeCode`].
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnsafeCode`] listing every finding when the
    /// verdict is not safe.
    pub fn into_result(self) -> PolicyResult<Self> {
        if self.safe {
            return Ok(self);
        }
        Err(PolicyError::UnsafeCode {
            issues: self.issues.iter().map(ToString::to_string).collect(),
            summary: self.summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_tracks_safety_and_findings() {
        let clean = SecurityVerdict::from_issues(Vec::new());
        assert!(clean.is_safe());
        assert_eq!(clean.summary(), SUMMARY_CLEAN);

        let review = SecurityVerdict::from_issues(vec![SecurityIssue::new(
            Severity::Medium,
            IssueKind::Network,
            "network call `requests.get`",
        )]);
        assert!(review.is_safe());
        assert_eq!(review.summary(), SUMMARY_REVIEW);

        let unsafe_verdict = SecurityVerdict::from_issues(vec![
            SecurityIssue::new(Severity::Low, IssueKind::SystemImport, "imports `os`"),
            SecurityIssue::new(Severity::High, IssueKind::DynamicCode, "calls `eval`"),
        ]);
        assert!(!unsafe_verdict.is_safe());
        assert_eq!(unsafe_verdict.summary(), SUMMARY_UNSAFE);
    }

    #[test]
    fn unsafe_verdict_itemises_rejection() {
        let verdict = SecurityVerdict::from_issues(vec![SecurityIssue::new(
            Severity::High,
            IssueKind::DynamicCode,
            "calls `exec`",
        )]);
        match verdict.into_result() {
            Err(PolicyError::UnsafeCode { issues, summary }) => {
                assert_eq!(issues, ["[high] calls `exec`"]);
                assert_eq!(summary, SUMMARY_UNSAFE);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
