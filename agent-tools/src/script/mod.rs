//! Compiler and interpreter for source-backed tools.
//!
//! Tool source is a Python-syntax module. It is parsed with tree-sitter,
//! lowered once into an owned syntax tree, and its top level is evaluated at
//! compile time into an isolated namespace. Functions found there become
//! [`ScriptFunction`] handles that the registry invokes.
//!
//! Evaluation is bounded by [`ScriptLimits`]: a step budget counted per
//! statement and expression, a maximum call depth, and a cap on every
//! `time.sleep`. Scripts can import only [`SUPPORTED_MODULES`].

mod ast;
mod builtins;
mod interp;
mod lower;
mod value;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agent_config::ScriptSettings;
use agent_policy::syntax::{first_syntax_error, nesting_violation, parse_source};
use agent_primitives::{ANY_TYPE, ParameterSpec};
use serde_json::Value as Json;

use self::interp::Namespace;
use self::value::{Closure, ExceptionValue, Value};
use crate::{ToolError, ToolResult};

/// Modules a tool script may import.
pub const SUPPORTED_MODULES: &[&str] = &["math", "time", "json"];

/// Resource limits applied to one script invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLimits {
    /// Statement plus expression evaluations allowed per call.
    pub max_steps: u64,
    /// Deepest allowed chain of nested script function calls.
    pub max_call_depth: usize,
    /// Upper bound applied to each `time.sleep`.
    pub max_sleep: Duration,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self::from(&ScriptSettings::default())
    }
}

impl From<&ScriptSettings> for ScriptLimits {
    fn from(settings: &ScriptSettings) -> Self {
        Self {
            max_steps: settings.max_steps,
            max_call_depth: settings.max_call_depth,
            max_sleep: Duration::from_millis(settings.max_sleep_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Failure {
    /// A Python-level exception that `try`/`except` can catch.
    Raised(String),
    StepLimit,
    DepthLimit,
}

/// Error raised while evaluating a script.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScriptError {
    failure: Failure,
    message: String,
}

impl ScriptError {
    pub(crate) fn raise(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            failure: Failure::Raised(kind.into()),
            message: message.into(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::raise("TypeError", message)
    }

    pub(crate) fn value_error(message: impl Into<String>) -> Self {
        Self::raise("ValueError", message)
    }

    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        Self::raise("SyntaxError", message)
    }

    pub(crate) fn step_limit(max_steps: u64) -> Self {
        Self {
            failure: Failure::StepLimit,
            message: format!("step budget of {max_steps} exhausted"),
        }
    }

    pub(crate) fn depth_limit(max_depth: usize) -> Self {
        Self {
            failure: Failure::DepthLimit,
            message: format!("maximum call depth of {max_depth} exceeded"),
        }
    }

    pub(crate) fn is_catchable(&self) -> bool {
        matches!(self.failure, Failure::Raised(_))
    }

    /// Exception type name for catchable errors.
    pub(crate) fn kind(&self) -> Option<&str> {
        match &self.failure {
            Failure::Raised(kind) => Some(kind),
            Failure::StepLimit | Failure::DepthLimit => None,
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::Exception(Arc::new(ExceptionValue {
            kind: self.kind().unwrap_or("RuntimeError").to_owned(),
            message: self.message.clone(),
        }))
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            Failure::Raised(kind) if self.message.is_empty() => f.write_str(kind),
            Failure::Raised(kind) => write!(f, "{kind}: {}", self.message),
            Failure::StepLimit | Failure::DepthLimit => {
                write!(f, "ExecutionLimit: {}", self.message)
            }
        }
    }
}

/// A tool script whose top level has been evaluated.
#[derive(Clone)]
pub struct CompiledScript {
    namespace: Arc<Namespace>,
    limits: ScriptLimits,
}

impl fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledScript")
            .field("functions", &self.function_names())
            .finish_non_exhaustive()
    }
}

impl CompiledScript {
    /// Parses, lowers, and evaluates `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Compile`] when the source does not parse, uses
    /// syntax outside the supported subset, or fails while its top level runs.
    pub fn compile(source: &str, limits: ScriptLimits) -> ToolResult<Self> {
        let tree = parse_source(source).map_err(|err| ToolError::compile(err.to_string()))?;
        if let Some(issue) = first_syntax_error(&tree, source) {
            return Err(ToolError::compile(issue.to_string()));
        }
        if let Some(reason) = nesting_violation(&tree) {
            return Err(ToolError::compile(format!("expression too deeply nested: {reason}")));
        }
        let body = lower::Lowerer::new(source).block(tree.root_node())?;
        let namespace = interp::run_module(&body, &limits)
            .map_err(|err| ToolError::compile(format!("module evaluation failed: {err}")))?;
        Ok(Self {
            namespace: Arc::new(namespace),
            limits,
        })
    }

    fn handle(&self, closure: &Arc<Closure>) -> ScriptFunction {
        ScriptFunction {
            closure: Arc::clone(closure),
            namespace: Arc::clone(&self.namespace),
            limits: self.limits.clone(),
        }
    }

    /// Function bound to `name` at module level.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<ScriptFunction> {
        match self.namespace.values.get(name) {
            Some(Value::Function(closure)) => Some(self.handle(closure)),
            _ => None,
        }
    }

    /// First function, in binding order, whose name does not start with `_`.
    #[must_use]
    pub fn first_public_function(&self) -> Option<ScriptFunction> {
        self.namespace
            .order
            .iter()
            .filter(|name| !name.starts_with('_'))
            .find_map(|name| self.function(name))
    }

    /// Names of all module-level functions in binding order.
    #[must_use]
    pub fn function_names(&self) -> Vec<String> {
        self.namespace
            .order
            .iter()
            .filter(|name| matches!(self.namespace.values.get(*name), Some(Value::Function(_))))
            .cloned()
            .collect()
    }
}

/// Callable handle to a function defined by a compiled script.
#[derive(Clone)]
pub struct ScriptFunction {
    closure: Arc<Closure>,
    namespace: Arc<Namespace>,
    limits: ScriptLimits,
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

impl ScriptFunction {
    /// Name used in the `def` statement.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.closure.def.name
    }

    /// Parameters reflected from the signature; required when no default exists.
    #[must_use]
    pub fn parameters(&self) -> Vec<ParameterSpec> {
        self.closure
            .def
            .params
            .iter()
            .filter_map(|param| {
                let spec = ParameterSpec::new(param.name.as_str()).ok()?;
                Some(
                    spec.with_type(param.annotation.as_deref().unwrap_or(ANY_TYPE))
                        .with_required(param.default.is_none()),
                )
            })
            .collect()
    }

    /// Calls the function. Object members bind by name, array items by position.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Execution`] carrying the script's exception text.
    pub fn call(&self, input: &Json) -> ToolResult<Json> {
        let (args, kwargs) = match input {
            Json::Null => (Vec::new(), Vec::new()),
            Json::Object(map) => (
                Vec::new(),
                map.iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value)))
                    .collect(),
            ),
            Json::Array(items) => (items.iter().map(Value::from_json).collect(), Vec::new()),
            other => {
                return Err(ToolError::execution(format!(
                    "arguments must be a JSON object, got {other}"
                )));
            }
        };
        let callee = Value::Function(Arc::clone(&self.closure));
        interp::call_in(&self.namespace, &self.limits, &callee, args, kwargs)
            .map(|value| value.to_json())
            .map_err(|err| ToolError::execution(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn compile(source: &str) -> CompiledScript {
        CompiledScript::compile(source, ScriptLimits::default()).expect("script compiles")
    }

    fn run(source: &str, name: &str, input: &Json) -> ToolResult<Json> {
        compile(source).function(name).expect("function exists").call(input)
    }

    #[test]
    fn calls_function_with_keyword_arguments() {
        let source = "def multiply(a: float, b: float) -> float:\n    return a * b\n";
        assert_eq!(run(source, "multiply", &json!({"a": 3, "b": 4})).unwrap(), json!(12));
        assert_eq!(run(source, "multiply", &json!({"a": 1.5, "b": 2})).unwrap(), json!(3.0));
    }

    #[test]
    fn reflects_parameters() {
        let script = compile("def greet(name: str, punctuation='!'):\n    return name + punctuation\n");
        let params = script.function("greet").unwrap().parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name(), "name");
        assert_eq!(params[0].param_type(), "str");
        assert!(params[0].required());
        assert_eq!(params[1].param_type(), ANY_TYPE);
        assert!(!params[1].required());
    }

    #[test]
    fn divide_returns_message_on_zero() {
        let source = r#"
def divide(a: float, b: float):
    if b == 0:
        return "Error: division by zero"
    return a / b
"#;
        assert_eq!(run(source, "divide", &json!({"a": 1, "b": 0})).unwrap(), json!("Error: division by zero"));
        assert_eq!(run(source, "divide", &json!({"a": 9, "b": 2})).unwrap(), json!(4.5));
    }

    #[test]
    fn exceptions_become_execution_errors() {
        let source = "def boom(x):\n    raise ValueError(f'bad value {x}')\n";
        let err = run(source, "boom", &json!({"x": 3})).unwrap_err();
        assert!(matches!(err, ToolError::Execution { ref reason } if reason == "ValueError: bad value 3"));
    }

    #[test]
    fn try_except_catches_and_binds() {
        let source = r"
def safe_div(a, b):
    try:
        return a // b
    except ZeroDivisionError as err:
        return 'caught: ' + str(err)
    finally:
        pass
";
        assert_eq!(
            run(source, "safe_div", &json!({"a": 1, "b": 0})).unwrap(),
            json!("caught: integer division or modulo by zero")
        );
    }

    #[test]
    fn loops_comprehensions_and_containers() {
        let source = r"
import math

def stats(values):
    total = 0
    squares = [v * v for v in values if v > 0]
    for v in values:
        total += v
    table = {'total': total}
    table['count'] = len(values)
    parts = []
    for key, value in sorted(table.items()):
        parts.append(f'{key}={value}')
    return {'summary': ', '.join(parts), 'squares': squares, 'root': math.sqrt(16)}
";
        let out = run(source, "stats", &json!({"values": [1, -2, 3]})).unwrap();
        assert_eq!(out["summary"], json!("count=3, total=2"));
        assert_eq!(out["squares"], json!([1, 9]));
        assert_eq!(out["root"], json!(4.0));
    }

    #[test]
    fn missing_and_unknown_arguments_are_reported() {
        let source = "def add(a, b):\n    return a + b\n";
        let err = run(source, "add", &json!({"a": 1})).unwrap_err();
        assert!(err.to_string().contains("missing required argument(s): 'b'"));
        let err = run(source, "add", &json!({"a": 1, "b": 2, "c": 3})).unwrap_err();
        assert!(err.to_string().contains("unexpected keyword argument 'c'"));
    }

    #[test]
    fn runaway_loops_hit_the_step_budget() {
        let limits = ScriptLimits {
            max_steps: 1_000,
            ..ScriptLimits::default()
        };
        let script = CompiledScript::compile("def spin():\n    while True:\n        pass\n", limits).unwrap();
        let err = script.function("spin").unwrap().call(&Json::Null).unwrap_err();
        assert!(err.to_string().contains("step budget of 1000 exhausted"));
    }

    #[test]
    fn deep_recursion_hits_the_depth_limit() {
        let source = "def down(n):\n    return down(n + 1)\n";
        let err = run(source, "down", &json!({"n": 0})).unwrap_err();
        assert!(err.to_string().contains("maximum call depth"));
    }

    #[test]
    fn first_public_function_skips_private_helpers() {
        let script = compile("RATE = 2\n\ndef _helper(x):\n    return x * RATE\n\ndef public(x):\n    return _helper(x)\n");
        let function = script.first_public_function().unwrap();
        assert_eq!(function.name(), "public");
        assert_eq!(function.call(&json!({"x": 5})).unwrap(), json!(10));
        assert_eq!(script.function_names(), vec!["_helper", "public"]);
    }

    #[test]
    fn sequences_repeat_owned_items() {
        let source = "def twice(words):\n    return words * 2\n";
        assert_eq!(
            run(source, "twice", &json!({"words": ["a", "b"]})).unwrap(),
            json!(["a", "b", "a", "b"])
        );
        assert_eq!(run("def pad():\n    return '-' * 3\n", "pad", &Json::Null).unwrap(), json!("---"));
    }

    #[test]
    fn unsupported_syntax_fails_compilation() {
        let err = CompiledScript::compile("class Thing:\n    pass\n", ScriptLimits::default()).unwrap_err();
        assert!(matches!(err, ToolError::Compile { .. }));
        let err = CompiledScript::compile("import os\n", ScriptLimits::default()).unwrap_err();
        assert!(err.to_string().contains("No module named 'os'"));
        let err = CompiledScript::compile("def broken(:\n", ScriptLimits::default()).unwrap_err();
        assert!(matches!(err, ToolError::Compile { .. }));
    }

    #[test]
    fn string_methods_and_formatting() {
        let source = r#"
def describe(name, score):
    label = name.strip().title()
    return "{} scored {:.1f}".format(label, score) + f" ({score:>6.2f})"
"#;
        assert_eq!(
            run(source, "describe", &json!({"name": "  ada lovelace ", "score": 9.27})).unwrap(),
            json!("Ada Lovelace scored 9.3 (  9.27)")
        );
    }

    #[test]
    fn json_module_round_trips_text() {
        let source = "import json\n\ndef echo(payload):\n    return json.dumps(json.loads(payload))\n";
        assert_eq!(
            run(source, "echo", &json!({"payload": "[1, 2.5, \"x\"]"})).unwrap(),
            json!("[1, 2.5, \"x\"]")
        );
    }
}
