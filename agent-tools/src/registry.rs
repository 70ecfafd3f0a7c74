//! Runtime registry for tool metadata and execution.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use agent_primitives::ParameterSpec;
use agent_telemetry::truncate_for_log;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::native::NativeTool;
use crate::script::{CompiledScript, ScriptFunction, ScriptLimits};
use crate::{ToolError, ToolResult};

/// Characters of tool input/output kept in log lines.
const LOG_PREVIEW_CHARS: usize = 200;

/// Metadata describing a registered tool.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ToolSpec {
    name: String,
    description: String,
    parameters: Vec<ParameterSpec>,
}

impl ToolSpec {
    /// Creates metadata for the supplied name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidMetadata`] if the name is empty.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> ToolResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ToolError::invalid_metadata("tool name cannot be empty"));
        }
        Ok(Self {
            name,
            description: description.into(),
            parameters: Vec::new(),
        })
    }

    /// Sets the advertised parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<ParameterSpec>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the advertised parameters.
    #[must_use]
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    /// Parameters a call must supply.
    pub fn required_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter().filter(|param| param.required())
    }
}

/// Trait implemented by native tool executors.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Invokes the tool with the given JSON input, returning JSON output.
    async fn invoke(&self, input: Value) -> ToolResult<Value>;
}

#[async_trait]
impl<F, Fut> Tool for F
where
    F: Send + Sync + Fn(Value) -> Fut,
    Fut: Future<Output = ToolResult<Value>> + Send,
{
    async fn invoke(&self, input: Value) -> ToolResult<Value> {
        (self)(input).await
    }
}

/// What a registered name resolves to.
#[derive(Clone)]
pub enum Invocable {
    /// A Rust implementation.
    Native(Arc<dyn Tool>),
    /// A function compiled from script source at registration time.
    Compiled(ScriptFunction),
}

impl std::fmt::Debug for Invocable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native"),
            Self::Compiled(function) => f.debug_tuple("Compiled").field(function).finish(),
        }
    }
}

impl Invocable {
    /// Executes the invocable. Compiled functions run on the blocking pool.
    ///
    /// # Errors
    ///
    /// Propagates the implementation's error; a panicked or cancelled script
    /// task becomes [`ToolError::Execution`].
    pub async fn invoke(&self, input: Value) -> ToolResult<Value> {
        match self {
            Self::Native(tool) => tool.invoke(input).await,
            Self::Compiled(function) => {
                let function = function.clone();
                tokio::task::spawn_blocking(move || function.call(&input))
                    .await
                    .map_err(|err| ToolError::execution(format!("script task failed: {err}")))?
            }
        }
    }
}

/// Body supplied when registering a tool.
pub enum ToolBody {
    /// Script source compiled at registration.
    Source(String),
    /// A native implementation.
    Native(NativeTool),
}

/// Handle returned by the registry for direct invocation.
#[derive(Clone, Debug)]
pub struct ToolHandle {
    spec: ToolSpec,
    invocable: Invocable,
}

impl ToolHandle {
    /// Returns the associated metadata.
    #[must_use]
    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    /// Returns what the name resolved to.
    #[must_use]
    pub fn invocable(&self) -> &Invocable {
        &self.invocable
    }

    /// Executes the underlying tool implementation.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the underlying implementation.
    pub async fn invoke(&self, input: Value) -> ToolResult<Value> {
        self.invocable.invoke(input).await
    }
}

/// Registry that stores tool implementations keyed by name.
///
/// Registering an existing name replaces the previous tool.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<HashMap<String, ToolHandle>>,
    limits: ScriptLimits,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("registered", &self.names())
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Creates an empty registry with default script limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry compiling scripts under `limits`.
    #[must_use]
    pub fn with_limits(limits: ScriptLimits) -> Self {
        Self {
            inner: RwLock::default(),
            limits,
        }
    }

    /// Limits applied to scripts registered here.
    #[must_use]
    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }

    fn insert(&self, handle: ToolHandle) {
        let mut inner = self.inner.write().expect("tool registry poisoned");
        let name = handle.spec.name().to_owned();
        if inner.insert(name.clone(), handle).is_some() {
            debug!(tool = %name, "replaced registered tool");
        }
    }

    /// Registers a tool from source text or a native implementation.
    ///
    /// When `parameters` is `None` they are reflected from the function
    /// signature or the native tool's argument type.
    ///
    /// # Errors
    ///
    /// See [`ToolRegistry::register_script`] and [`ToolRegistry::register_native`].
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn register(
        &self,
        name: &str,
        description: &str,
        body: ToolBody,
        parameters: Option<Vec<ParameterSpec>>,
    ) -> ToolResult<()> {
        match body {
            ToolBody::Source(source) => {
                self.register_script(name, description, &source, parameters)
            }
            ToolBody::Native(tool) => self.register_native(name, description, tool, parameters),
        }
    }

    /// Registers a native tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidMetadata`] if the name is empty.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn register_native(
        &self,
        name: &str,
        description: &str,
        tool: NativeTool,
        parameters: Option<Vec<ParameterSpec>>,
    ) -> ToolResult<()> {
        let parameters = parameters.unwrap_or_else(|| tool.parameters().to_vec());
        let spec = ToolSpec::new(name, description)?.with_parameters(parameters);
        self.insert(ToolHandle {
            spec,
            invocable: Invocable::Native(tool.executor()),
        });
        Ok(())
    }

    /// Compiles `source` and registers the function bound to `name`.
    ///
    /// Falls back to the first public function when no function has that
    /// name. The source is expected to have passed the security gate.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Compile`] when the source does not compile and
    /// [`ToolError::Extraction`] when it defines no public function.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn register_script(
        &self,
        name: &str,
        description: &str,
        source: &str,
        parameters: Option<Vec<ParameterSpec>>,
    ) -> ToolResult<()> {
        let spec = ToolSpec::new(name, description)?;
        let compiled = CompiledScript::compile(source, self.limits.clone())?;
        let function = compiled
            .function(name)
            .or_else(|| compiled.first_public_function())
            .ok_or_else(|| ToolError::Extraction {
                name: name.to_owned(),
            })?;
        if function.name() != name {
            debug!(tool = name, function = function.name(), "bound tool to first public function");
        }

        let parameters = parameters.unwrap_or_else(|| function.parameters());
        self.insert(ToolHandle {
            spec: spec.with_parameters(parameters),
            invocable: Invocable::Compiled(function),
        });
        Ok(())
    }

    /// Returns a handle to the tool matching the supplied name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolHandle> {
        let inner = self.inner.read().ok()?;
        inner.get(name).cloned()
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .is_ok_and(|inner| inner.contains_key(name))
    }

    /// Removes a tool, returning its handle.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn remove(&self, name: &str) -> Option<ToolHandle> {
        self.inner.write().expect("tool registry poisoned").remove(name)
    }

    /// Invokes a registered tool by name.
    ///
    /// Failures are logged with a truncated copy of the input.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] when the tool is not found and
    /// [`ToolError::Execution`] carrying the original message when it fails.
    pub async fn invoke(&self, name: &str, input: Value) -> ToolResult<Value> {
        let handle = self.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_owned(),
        })?;

        let preview = truncate_for_log(&input.to_string(), LOG_PREVIEW_CHARS);
        let started = Instant::now();
        match handle.invoke(input).await {
            Ok(output) => {
                debug!(
                    tool = name,
                    elapsed_ms = started.elapsed().as_millis(),
                    output = %truncate_for_log(&output.to_string(), LOG_PREVIEW_CHARS),
                    "tool invocation succeeded"
                );
                Ok(output)
            }
            Err(err) => {
                error!(tool = name, input = %preview, error = %err, "tool invocation failed");
                Err(match err {
                    ToolError::Execution { .. } => err,
                    other => ToolError::execution(other.to_string()),
                })
            }
        }
    }

    /// Lists the metadata of all registered tools, ordered by name.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn list(&self) -> Vec<ToolSpec> {
        let inner = self.inner.read().expect("tool registry poisoned");
        let mut specs: Vec<ToolSpec> = inner.values().map(|handle| handle.spec.clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Registered names in sorted order.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().expect("tool registry poisoned");
        let mut names: Vec<String> = inner.keys().cloned().collect();
        names.sort();
        names
    }

    /// JSON array describing every tool, as embedded in oracle prompts.
    #[must_use]
    pub fn schema(&self) -> Value {
        serde_json::to_value(self.list()).unwrap_or_else(|_| Value::Array(Vec::new()))
    }

    /// Number of registered tools.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("tool registry poisoned").len()
    }

    /// Returns true when no tool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    const MULTIPLY: &str = "def multiply(a: float, b: float) -> float:\n    return a * b\n";

    #[tokio::test]
    async fn register_and_invoke_native_tool() {
        let registry = ToolRegistry::new();
        registry
            .register_native(
                "echo",
                "Echo incoming payload",
                NativeTool::new(|input: Value| async move { Ok(input) }),
                None,
            )
            .unwrap();

        let payload = json!({ "message": "hello" });
        let output = registry.invoke("echo", payload.clone()).await.unwrap();
        assert_eq!(output, payload);
    }

    #[tokio::test]
    async fn register_and_invoke_script_tool() {
        let registry = ToolRegistry::new();
        registry
            .register("multiply", "Multiply two numbers", ToolBody::Source(MULTIPLY.into()), None)
            .unwrap();

        let spec = registry.get("multiply").unwrap().spec().clone();
        let names: Vec<&str> = spec.required_parameters().map(ParameterSpec::name).collect();
        assert_eq!(names, vec!["a", "b"]);

        let output = registry.invoke("multiply", json!({"a": 3, "b": 4})).await.unwrap();
        assert_eq!(output, json!(12));
    }

    #[tokio::test]
    async fn nesting_limit_applies_to_script_registration() {
        let registry = ToolRegistry::new();
        let nested = |depth: usize| format!("def f():\n    return {}1{}\n", "(-".repeat(depth), ")".repeat(depth));

        registry.register_script("f", "", &nested(10), None).unwrap();
        assert_eq!(registry.invoke("f", json!({})).await.unwrap(), json!(1));

        let err = registry.register_script("g", "", &nested(1_000), None).unwrap_err();
        assert!(matches!(err, ToolError::Compile { ref reason } if reason.contains("too deeply nested")));
        assert!(!registry.contains("g"));
    }

    #[tokio::test]
    async fn falls_back_to_first_public_function() {
        let registry = ToolRegistry::new();
        registry
            .register_script("times", "", "def _hidden():\n    return 0\n\ndef product(a, b):\n    return a * b\n", None)
            .unwrap();
        let output = registry.invoke("times", json!({"a": 2, "b": 5})).await.unwrap();
        assert_eq!(output, json!(10));
    }

    #[test]
    fn source_without_functions_fails_extraction() {
        let registry = ToolRegistry::new();
        let err = registry
            .register_script("constant", "", "VALUE = 3\n", None)
            .expect_err("no function to extract");
        assert!(matches!(err, ToolError::Extraction { name } if name == "constant"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn reregistration_replaces_and_is_idempotent() {
        let registry = ToolRegistry::new();
        registry.register_script("multiply", "", MULTIPLY, None).unwrap();
        let first = registry.invoke("multiply", json!({"a": 6, "b": 7})).await.unwrap();
        registry.register_script("multiply", "", MULTIPLY, None).unwrap();
        let second = registry.invoke("multiply", json!({"a": 6, "b": 7})).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn script_exceptions_surface_as_execution_errors() {
        let registry = ToolRegistry::new();
        registry
            .register_script("fail", "", "def fail(x):\n    return 1 / x\n", None)
            .unwrap();
        let err = registry.invoke("fail", json!({"x": 0})).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { reason } if reason.contains("ZeroDivisionError")));
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("missing", Value::Null)
            .await
            .expect_err("unknown tool should error");

        assert!(matches!(err, ToolError::UnknownTool { name } if name == "missing"));
    }

    #[test]
    fn schema_lists_tools_with_parameters() {
        let registry = ToolRegistry::new();
        registry.register_script("multiply", "Multiply two numbers", MULTIPLY, None).unwrap();
        let schema = registry.schema();
        assert_eq!(schema[0]["name"], json!("multiply"));
        assert_eq!(schema[0]["description"], json!("Multiply two numbers"));
        assert_eq!(schema[0]["parameters"][0]["name"], json!("a"));
        assert_eq!(schema[0]["parameters"][0]["type"], json!("float"));
    }

    #[test]
    fn remove_and_names() {
        let registry = ToolRegistry::new();
        registry.register_script("multiply", "", MULTIPLY, None).unwrap();
        registry
            .register_native("noop", "", NativeTool::new(|_: Value| async { Ok(Value::Null) }), None)
            .unwrap();
        assert_eq!(registry.names(), vec!["multiply", "noop"]);
        assert!(registry.remove("noop").is_some());
        assert!(!registry.contains("noop"));
    }

    #[test]
    fn invalid_metadata_errors() {
        let err = ToolSpec::new(" ", "").expect_err("empty name should error");
        assert!(matches!(err, ToolError::InvalidMetadata { .. }));
    }
}
