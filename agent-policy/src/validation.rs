//! Structural checks applied to tool source before it is admitted.

use std::collections::BTreeSet;

use agent_primitives::ParameterSpec;

use crate::error::{PolicyError, PolicyResult};
use crate::syntax::{
    first_syntax_error, formal_parameters, imported_modules, nesting_violation, parse_source,
    top_level_function,
};

/// Decides whether a statically imported module is available at runtime.
pub trait ModuleResolver: Send + Sync {
    /// Returns true when `module` (a top-level name) can be imported.
    fn resolves(&self, module: &str) -> bool;
}

/// Fixed set of importable top-level modules.
#[derive(Debug, Clone, Default)]
pub struct ModuleAllowlist {
    modules: BTreeSet<String>,
}

impl ModuleAllowlist {
    /// Creates an allowlist from module names.
    #[must_use]
    pub fn new<I, S>(modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            modules: modules.into_iter().map(Into::into).collect(),
        }
    }

    /// Module names in lexical order.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(String::as_str)
    }
}

impl ModuleResolver for ModuleAllowlist {
    fn resolves(&self, module: &str) -> bool {
        self.modules.contains(module)
    }
}

/// Returns true for names made of ASCII letters and underscores that do not
/// start with an underscore and contain at least one letter.
#[must_use]
pub fn is_valid_tool_name(name: &str) -> bool {
    !name.starts_with('_')
        && name.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().any(|c| c.is_ascii_alphabetic())
}

/// Validates tool source without executing it.
pub struct SourceValidator<R> {
    resolver: R,
}

impl<R: ModuleResolver> SourceValidator<R> {
    /// Creates a validator resolving imports through `resolver`.
    #[must_use]
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Checks syntax, naming, the presence of the named function, declared
    /// parameters, and imports, in that order.
    ///
    /// Name and parameter checks only run when the corresponding argument
    /// is supplied.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidSource`] describing the first failed
    /// check, or [`PolicyError::Parser`] when parsing could not start.
    pub fn validate(
        &self,
        source: &str,
        name: Option<&str>,
        parameters: Option<&[ParameterSpec]>,
    ) -> PolicyResult<()> {
        let tree = parse_source(source)?;
        if let Some(issue) = first_syntax_error(&tree, source) {
            return Err(PolicyError::invalid_source(format!("syntax error: {issue}")));
        }
        if let Some(reason) = nesting_violation(&tree) {
            return Err(PolicyError::invalid_source(reason));
        }

        if let Some(name) = name {
            if !is_valid_tool_name(name) {
                return Err(PolicyError::invalid_source(format!(
                    "tool name `{name}` may only contain letters and underscores and must not start with an underscore"
                )));
            }

            let function = top_level_function(&tree, source, name).ok_or_else(|| {
                PolicyError::invalid_source(format!(
                    "no top-level function named `{name}` was found"
                ))
            })?;

            if let Some(parameters) = parameters {
                let formal: BTreeSet<String> = function
                    .child_by_field_name("parameters")
                    .map(|params| formal_parameters(params, source))
                    .unwrap_or_default()
                    .into_iter()
                    .map(|param| param.name)
                    .collect();
                if let Some(missing) = parameters
                    .iter()
                    .find(|spec| !formal.contains(spec.name()))
                {
                    return Err(PolicyError::invalid_source(format!(
                        "declared parameter `{}` is not an argument of `{name}`",
                        missing.name()
                    )));
                }
            }
        }

        for module in imported_modules(&tree, source) {
            let top_level = module.split('.').next().unwrap_or_default();
            if top_level.is_empty() || !self.resolver.resolves(top_level) {
                return Err(PolicyError::invalid_source(format!(
                    "missing dependency: module `{module}` cannot be imported"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SourceValidator<ModuleAllowlist> {
        SourceValidator::new(ModuleAllowlist::new(["math", "json", "time"]))
    }

    fn reason(result: PolicyResult<()>) -> String {
        match result {
            Err(PolicyError::InvalidSource { reason }) => reason,
            other => panic!("expected invalid source, got {other:?}"),
        }
    }

    #[test]
    fn tool_name_pattern() {
        assert!(is_valid_tool_name("search_hana"));
        assert!(!is_valid_tool_name("_private"));
        assert!(!is_valid_tool_name("___"));
        assert!(!is_valid_tool_name("add2"));
        assert!(!is_valid_tool_name(""));
    }

    #[test]
    fn accepts_matching_function() {
        let source = "import math\n\ndef hyp(a: float, b: float = 1.0):\n    return math.sqrt(a * a + b * b)\n";
        let params = vec![ParameterSpec::new("a").unwrap(), ParameterSpec::new("b").unwrap()];
        validator()
            .validate(source, Some("hyp"), Some(&params))
            .unwrap();
    }

    #[test]
    fn reports_first_failure() {
        let v = validator();
        assert!(reason(v.validate("def f(:\n  pass\n", Some("f"), None)).starts_with("syntax error"));
        assert!(reason(v.validate("def f():\n  pass\n", Some("_f"), None)).contains("letters"));
        assert!(reason(v.validate("def g():\n  pass\n", Some("f"), None)).contains("no top-level"));
        let deep = format!("def f():\n  return {}1{}\n", "[".repeat(200), "]".repeat(200));
        assert!(reason(v.validate(&deep, Some("f"), None)).contains("levels deep"));

        let params = vec![ParameterSpec::new("missing").unwrap()];
        assert!(
            reason(v.validate("def f(a):\n  return a\n", Some("f"), Some(&params)))
                .contains("`missing`")
        );
    }

    #[test]
    fn keyword_only_parameters_count() {
        let params = vec![ParameterSpec::new("scale").unwrap()];
        validator()
            .validate("def f(x, *, scale=2):\n  return x * scale\n", Some("f"), Some(&params))
            .unwrap();
    }

    #[test]
    fn unresolved_import_is_missing_dependency() {
        let err = reason(validator().validate("import numpy as np\n\ndef f():\n  return 1\n", Some("f"), None));
        assert!(err.contains("missing dependency"));
        assert!(err.contains("numpy"));
    }

    #[test]
    fn name_checks_are_optional() {
        validator()
            .validate("def anything():\n    return 1\n", None, None)
            .unwrap();
    }
}
