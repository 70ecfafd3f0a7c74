//! Static security gate for submitted tool source.
//!
//! The gate inspects the syntax tree only. It performs no data-flow analysis
//! and provides no runtime containment: a dangerous callable reached through
//! an alias (`run = os.system; run(cmd)`) is not detected.

use tracing::debug;
use tree_sitter::Node;

use crate::rules::{CallClass, RuleSet, is_write_mode};
use crate::syntax::{
    constant_string, dotted_name, first_syntax_error, import_targets, named_children,
    nesting_violation, node_text, parse_source, walk,
};
use crate::verdict::{IssueKind, SecurityIssue, SecurityVerdict, Severity};

/// Anything that can judge tool source before it is admitted.
pub trait CodeReviewer: Send + Sync {
    /// Produces a verdict for `source`. Never executes it.
    fn review(&self, source: &str) -> SecurityVerdict;
}

/// Rule-table driven gate over the Python syntax tree.
#[derive(Debug, Clone, Default)]
pub struct StaticSecurityGate {
    rules: RuleSet,
}

impl StaticSecurityGate {
    /// Creates a gate with the default rule tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gate over custom rule tables.
    #[must_use]
    pub fn with_rules(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// Active rule tables.
    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn inspect_call(&self, call: Node<'_>, source: &str, issues: &mut Vec<SecurityIssue>) {
        let Some(callee) = call.child_by_field_name("function") else {
            return;
        };
        let callee = dotted_name(callee, source);
        if callee.is_empty() {
            return;
        }
        let Some(class) = self.rules.classify(&callee) else {
            return;
        };
        let arguments = CallArguments::of(call, source);

        match class {
            CallClass::Process => {
                let mut flagged = false;
                if arguments.keyword_is_true("shell") {
                    flagged = true;
                    issues.push(SecurityIssue::new(
                        Severity::High,
                        IssueKind::ProcessExecution,
                        format!("`{callee}` executes through a shell (shell=True)"),
                    ));
                }
                let command = arguments.first_command_literal();
                if let Some(fragment) = command
                    .as_deref()
                    .and_then(|command| self.rules.blacklisted_fragment(command))
                {
                    flagged = true;
                    issues.push(SecurityIssue::new(
                        Severity::High,
                        IssueKind::ProcessExecution,
                        format!("`{callee}` runs blacklisted command `{fragment}`"),
                    ));
                }
                if !flagged {
                    issues.push(SecurityIssue::new(
                        Severity::High,
                        IssueKind::ProcessExecution,
                        format!("`{callee}` spawns an external process"),
                    ));
                }
            }
            CallClass::DynamicCode => issues.push(SecurityIssue::new(
                Severity::High,
                IssueKind::DynamicCode,
                format!("`{callee}` evaluates or imports code at runtime"),
            )),
            CallClass::Destructive => issues.push(SecurityIssue::new(
                Severity::Medium,
                IssueKind::DestructiveFile,
                format!("`{callee}` deletes files or directories"),
            )),
            CallClass::Network => issues.push(SecurityIssue::new(
                Severity::Medium,
                IssueKind::Network,
                format!("`{callee}` performs network access"),
            )),
            CallClass::FileOpen => {
                let mode = arguments
                    .positional_literal(1)
                    .or_else(|| arguments.keyword_literal("mode"));
                if let Some(mode) = mode.filter(|mode| is_write_mode(mode)) {
                    issues.push(SecurityIssue::new(
                        Severity::Medium,
                        IssueKind::FileWrite,
                        format!("`open` with mode `{mode}` writes to the filesystem"),
                    ));
                }
            }
        }
    }

    fn inspect_import(&self, statement: Node<'_>, source: &str, issues: &mut Vec<SecurityIssue>) {
        for module in import_targets(statement, source) {
            if self.rules.is_system_module(&module) {
                issues.push(SecurityIssue::new(
                    Severity::Low,
                    IssueKind::SystemImport,
                    format!("imports system module `{module}`"),
                ));
            }
        }
    }
}

impl CodeReviewer for StaticSecurityGate {
    fn review(&self, source: &str) -> SecurityVerdict {
        let tree = match parse_source(source) {
            Ok(tree) => tree,
            Err(err) => {
                return SecurityVerdict::from_issues(vec![SecurityIssue::new(
                    Severity::High,
                    IssueKind::SyntaxError,
                    err.to_string(),
                )]);
            }
        };
        if let Some(issue) = first_syntax_error(&tree, source) {
            return SecurityVerdict::from_issues(vec![SecurityIssue::new(
                Severity::High,
                IssueKind::SyntaxError,
                issue.to_string(),
            )]);
        }
        if let Some(reason) = nesting_violation(&tree) {
            return SecurityVerdict::from_issues(vec![SecurityIssue::new(
                Severity::High,
                IssueKind::SyntaxError,
                reason,
            )]);
        }

        let mut issues = Vec::new();
        walk(tree.root_node(), &mut |node| match node.kind() {
            "call" => self.inspect_call(node, source, &mut issues),
            "import_statement" | "import_from_statement" => {
                self.inspect_import(node, source, &mut issues);
            }
            _ => {}
        });

        let verdict = SecurityVerdict::from_issues(issues);
        debug!(
            safe = verdict.is_safe(),
            issues = verdict.issues().len(),
            "security review finished"
        );
        verdict
    }
}

/// Reviews `source` with the default rule tables.
#[must_use]
pub fn review(source: &str) -> SecurityVerdict {
    StaticSecurityGate::new().review(source)
}

struct CallArguments<'tree, 'src> {
    positional: Vec<Node<'tree>>,
    keywords: Vec<(String, Node<'tree>)>,
    source: &'src str,
}

impl<'tree, 'src> CallArguments<'tree, 'src> {
    fn of(call: Node<'tree>, source: &'src str) -> Self {
        let mut positional = Vec::new();
        let mut keywords = Vec::new();
        if let Some(arguments) = call.child_by_field_name("arguments") {
            for argument in named_children(arguments) {
                if argument.kind() == "keyword_argument" {
                    if let (Some(name), Some(value)) = (
                        argument.child_by_field_name("name"),
                        argument.child_by_field_name("value"),
                    ) {
                        keywords.push((node_text(name, source).to_owned(), value));
                    }
                } else {
                    positional.push(argument);
                }
            }
        }
        Self {
            positional,
            keywords,
            source,
        }
    }

    fn keyword(&self, name: &str) -> Option<Node<'tree>> {
        self.keywords
            .iter()
            .find(|(keyword, _)| keyword == name)
            .map(|(_, value)| *value)
    }

    fn keyword_is_true(&self, name: &str) -> bool {
        self.keyword(name).is_some_and(|value| value.kind() == "true")
    }

    fn keyword_literal(&self, name: &str) -> Option<String> {
        self.keyword(name)
            .and_then(|value| constant_string(value, self.source))
    }

    fn positional_literal(&self, index: usize) -> Option<String> {
        self.positional
            .get(index)
            .and_then(|value| constant_string(*value, self.source))
    }

    /// First positional string, or the first element of a literal argv list.
    fn first_command_literal(&self) -> Option<String> {
        let first = *self.positional.first()?;
        match first.kind() {
            "list" | "tuple" => named_children(first)
                .into_iter()
                .next()
                .and_then(|element| constant_string(element, self.source)),
            _ => constant_string(first, self.source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{SUMMARY_CLEAN, SUMMARY_REVIEW, SUMMARY_UNSAFE};

    fn kinds(verdict: &SecurityVerdict) -> Vec<(Severity, IssueKind)> {
        verdict
            .issues()
            .iter()
            .map(|issue| (issue.severity(), issue.kind()))
            .collect()
    }

    #[test]
    fn shell_flag_rejects_regardless_of_command() {
        let verdict = review("def run(cmd):\n import os\n os.system(cmd, shell=True)\n");
        assert!(!verdict.is_safe());
        assert_eq!(verdict.summary(), SUMMARY_UNSAFE);
        assert_eq!(
            kinds(&verdict),
            [
                (Severity::Low, IssueKind::SystemImport),
                (Severity::High, IssueKind::ProcessExecution),
            ]
        );
        assert!(verdict.issues()[1].message().contains("shell=True"));
    }

    #[test]
    fn blacklisted_literal_command_is_reported() {
        let verdict = review(
            "import subprocess\n\ndef wipe():\n    subprocess.run(['RM', '-rf', '/'])\n",
        );
        assert!(!verdict.is_safe());
        assert!(
            verdict
                .issues()
                .iter()
                .any(|issue| issue.message().contains("blacklisted command `rm`"))
        );
    }

    #[test]
    fn dynamic_evaluation_is_high_risk() {
        let verdict = review("def calc(expr):\n    return eval(expr)\n");
        assert!(!verdict.is_safe());
        assert_eq!(kinds(&verdict), [(Severity::High, IssueKind::DynamicCode)]);
    }

    #[test]
    fn network_only_source_is_safe_with_medium_issue() {
        let verdict = review(
            "import requests\n\ndef fetch(url):\n    return requests.get(url).text\n",
        );
        assert!(verdict.is_safe());
        assert_eq!(verdict.summary(), SUMMARY_REVIEW);
        assert!(verdict.has_severity(Severity::Medium));
    }

    #[test]
    fn destructive_and_write_calls_are_medium() {
        let verdict = review(
            "import shutil\n\ndef clean(path):\n    shutil.rmtree(path)\n    with open(path, 'w') as fh:\n        fh.write('x')\n",
        );
        assert!(verdict.is_safe());
        assert_eq!(
            kinds(&verdict),
            [
                (Severity::Low, IssueKind::SystemImport),
                (Severity::Medium, IssueKind::DestructiveFile),
                (Severity::Medium, IssueKind::FileWrite),
            ]
        );
    }

    #[test]
    fn read_only_open_is_not_reported() {
        let verdict = review("def read(path):\n    return open(path, 'r').read()\n");
        assert!(verdict.is_safe());
        assert_eq!(verdict.summary(), SUMMARY_CLEAN);
    }

    #[test]
    fn syntax_error_fails_fast() {
        let verdict = review("def broken(:\n    os.system('ls')\n");
        assert!(!verdict.is_safe());
        assert_eq!(kinds(&verdict), [(Severity::High, IssueKind::SyntaxError)]);
    }

    #[test]
    fn deeply_nested_source_is_rejected_with_a_verdict() {
        let source = format!("def f():\n    return {}1{}\n", "(".repeat(20_000), ")".repeat(20_000));
        let verdict = review(&source);
        assert!(!verdict.is_safe());
        assert_eq!(kinds(&verdict), [(Severity::High, IssueKind::SyntaxError)]);

        let nested = format!("def f():\n    return {}1{}\n", "(-".repeat(40), ")".repeat(40));
        assert!(!review(&nested).is_safe());
        assert!(review("def f():\n    return ((-1))\n").is_safe());
    }

    #[test]
    fn aliased_callables_are_not_tracked() {
        let verdict = review("import os\n\ndef run(cmd):\n    call = os.system\n    return call(cmd)\n");
        assert!(verdict.is_safe());
    }
}
