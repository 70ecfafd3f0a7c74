//! Native tools and parameter reflection from Rust argument types.

use std::future::ready;
use std::sync::Arc;

use agent_primitives::ParameterSpec;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::registry::Tool;
use crate::{ToolError, ToolResult};

/// A Rust tool implementation plus the parameters it advertises.
#[derive(Clone)]
pub struct NativeTool {
    executor: Arc<dyn Tool>,
    parameters: Vec<ParameterSpec>,
}

impl std::fmt::Debug for NativeTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTool")
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl NativeTool {
    /// Wraps an untyped tool; it advertises no parameters.
    #[must_use]
    pub fn new<T>(tool: T) -> Self
    where
        T: Tool + 'static,
    {
        Self {
            executor: Arc::new(tool),
            parameters: Vec::new(),
        }
    }

    /// Wraps a typed function, reflecting its parameters from `A`.
    ///
    /// The JSON input is deserialized into `A` and the output serialized back.
    #[must_use]
    pub fn typed<A, R, F>(function: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> ToolResult<R> + Send + Sync + 'static,
    {
        let executor = move |input: Value| {
            let input = if input.is_null() {
                Value::Object(serde_json::Map::new())
            } else {
                input
            };
            let result = serde_json::from_value::<A>(input)
                .map_err(|err| ToolError::execution(format!("invalid arguments: {err}")))
                .and_then(&function)
                .and_then(|output| {
                    serde_json::to_value(output)
                        .map_err(|err| ToolError::execution(format!("unserializable output: {err}")))
                });
            ready(result)
        };
        Self {
            executor: Arc::new(executor),
            parameters: reflect_parameters::<A>(),
        }
    }

    /// Replaces the advertised parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<ParameterSpec>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Advertised parameters.
    #[must_use]
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub(crate) fn executor(&self) -> Arc<dyn Tool> {
        Arc::clone(&self.executor)
    }
}

fn type_label(schema: &Value) -> &'static str {
    let json_type = match schema.get("type") {
        Some(Value::String(single)) => Some(single.as_str()),
        Some(Value::Array(options)) => options
            .iter()
            .filter_map(Value::as_str)
            .find(|option| *option != "null"),
        _ => None,
    };
    match json_type {
        Some("integer") => "int",
        Some("number") => "float",
        Some("string") => "str",
        Some("boolean") => "bool",
        Some("array") => "list",
        Some("object") => "dict",
        _ => agent_primitives::ANY_TYPE,
    }
}

/// Parameters described by the JSON schema of `A`'s object properties.
///
/// Field doc comments become descriptions; optional fields are not required.
#[must_use]
pub fn reflect_parameters<A: JsonSchema>() -> Vec<ParameterSpec> {
    let Ok(schema) = serde_json::to_value(schemars::schema_for!(A)) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    properties
        .iter()
        .filter_map(|(name, property)| {
            let mut spec = ParameterSpec::new(name.as_str())
                .ok()?
                .with_type(type_label(property))
                .with_required(required.contains(&name.as_str()));
            if let Some(description) = property.get("description").and_then(Value::as_str) {
                spec = spec.with_description(description);
            }
            Some(spec)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Deserialize, JsonSchema)]
    struct ScaleArgs {
        /// Value to scale.
        value: f64,
        /// Multiplier, defaults to 2.
        factor: Option<i64>,
    }

    fn scale() -> NativeTool {
        NativeTool::typed(|args: ScaleArgs| {
            #[allow(clippy::cast_precision_loss)]
            let factor = args.factor.unwrap_or(2) as f64;
            Ok(args.value * factor)
        })
    }

    #[test]
    fn reflects_typed_arguments() {
        let params = reflect_parameters::<ScaleArgs>();
        let value = params.iter().find(|p| p.name() == "value").unwrap();
        assert_eq!(value.param_type(), "float");
        assert!(value.required());
        assert_eq!(value.description(), "Value to scale.");

        let factor = params.iter().find(|p| p.name() == "factor").unwrap();
        assert_eq!(factor.param_type(), "int");
        assert!(!factor.required());
    }

    #[tokio::test]
    async fn typed_tool_round_trips_json() {
        let tool = scale();
        let output = tool.executor().invoke(json!({"value": 1.5, "factor": 4})).await.unwrap();
        assert_eq!(output, json!(6.0));

        let err = tool.executor().invoke(json!({"factor": 4})).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }
}
