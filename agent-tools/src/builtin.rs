//! Tools every owner can see: arithmetic, simulated search, and the clock.

use std::collections::HashMap;

use agent_memory::{MemoryError, ToolDefinitionStore};
use agent_primitives::{OwnerId, ParameterSpec, ToolDefinition, ToolSource, Visibility};
use chrono::format::{Item, StrftimeItems};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info};

use crate::native::NativeTool;
use crate::{ToolError, ToolResult};

/// Native handle of the clock tool.
pub const CURRENT_TIME_HANDLE: &str = "builtin.current_time";

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

struct ScriptTool {
    name: &'static str,
    description: &'static str,
    parameters: &'static [(&'static str, &'static str, &'static str)],
    source: &'static str,
}

const SCRIPT_TOOLS: &[ScriptTool] = &[
    ScriptTool {
        name: "add",
        description: "Add two numbers: a + b",
        parameters: &[("a", "float", "first addend"), ("b", "float", "second addend")],
        source: "def add(a: float, b: float) -> float:\n    return a + b\n",
    },
    ScriptTool {
        name: "subtract",
        description: "Subtract two numbers: a - b",
        parameters: &[("a", "float", "minuend"), ("b", "float", "subtrahend")],
        source: "def subtract(a: float, b: float) -> float:\n    return a - b\n",
    },
    ScriptTool {
        name: "multiply",
        description: "Multiply two numbers: a * b",
        parameters: &[("a", "float", "first factor"), ("b", "float", "second factor")],
        source: "def multiply(a: float, b: float) -> float:\n    return a * b\n",
    },
    ScriptTool {
        name: "divide",
        description: "Divide two numbers: a / b",
        parameters: &[("a", "float", "dividend"), ("b", "float", "divisor")],
        source: "def divide(a: float, b: float) -> float:\n    if b == 0:\n        return \"Error: the divisor cannot be zero\"\n    return a / b\n",
    },
    ScriptTool {
        name: "search",
        description: "Search the internet for information",
        parameters: &[("query", "str", "search keywords")],
        source: "import time\n\ndef search(query: str) -> str:\n    time.sleep(1)\n    return f\"Searching, please wait...\\nQuery: {query}\\n[simulated result: about 1,000 matching pages]\"\n",
    },
    ScriptTool {
        name: "search_hana",
        description: "Search the HANA database for information",
        parameters: &[("query", "str", "search keywords")],
        source: "def search_hana(query: str) -> str:\n    return f\"Searching HANA for {query}...\\n[100 simulated HANA records]\"\n",
    },
];

/// Arguments of the `current_time` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CurrentTimeArgs {
    /// strftime-style format; defaults to `%Y-%m-%d %H:%M:%S`.
    #[serde(default)]
    pub format: Option<String>,
}

fn current_time(args: CurrentTimeArgs) -> ToolResult<String> {
    let format = args.format.as_deref().unwrap_or(DEFAULT_TIME_FORMAT);
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ToolError::execution(format!("invalid time format `{format}`")));
    }
    Ok(chrono::Utc::now().format(format).to_string())
}

/// Resolves native handles stored in tool definitions to implementations.
#[derive(Debug, Clone, Default)]
pub struct NativeCatalog {
    tools: HashMap<String, NativeTool>,
}

impl NativeCatalog {
    /// Catalog with no entries.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog containing the built-in native tools.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::empty().with(CURRENT_TIME_HANDLE, NativeTool::typed(current_time))
    }

    /// Adds or replaces the tool behind `handle`.
    #[must_use]
    pub fn with(mut self, handle: impl Into<String>, tool: NativeTool) -> Self {
        self.tools.insert(handle.into(), tool);
        self
    }

    /// Looks up a handle.
    #[must_use]
    pub fn get(&self, handle: &str) -> Option<&NativeTool> {
        self.tools.get(handle)
    }
}

/// Definitions of the shared built-in tools, owned by [`OwnerId::SYSTEM`].
///
/// # Errors
///
/// Propagates definition validation errors.
pub fn builtin_definitions() -> agent_primitives::Result<Vec<ToolDefinition>> {
    let mut definitions = Vec::with_capacity(SCRIPT_TOOLS.len() + 1);
    for tool in SCRIPT_TOOLS {
        let parameters = tool
            .parameters
            .iter()
            .map(|(name, ty, description)| {
                ParameterSpec::new(*name).map(|spec| spec.with_type(*ty).with_description(*description))
            })
            .collect::<agent_primitives::Result<Vec<_>>>()?;
        definitions.push(
            ToolDefinition::builder(OwnerId::SYSTEM)
                .name(tool.name)?
                .description(tool.description)
                .parameters(parameters)
                .source(ToolSource::script(tool.source))
                .visibility(Visibility::Shared)
                .label("builtin")
                .build()?,
        );
    }
    definitions.push(
        ToolDefinition::builder(OwnerId::SYSTEM)
            .name("current_time")?
            .description("Current UTC date and time, optionally in a strftime format")
            .source(ToolSource::native(CURRENT_TIME_HANDLE))
            .visibility(Visibility::Shared)
            .label("builtin")
            .build()?,
    );
    Ok(definitions)
}

/// Inserts the built-in definitions the store does not already hold.
///
/// Returns how many were added.
///
/// # Errors
///
/// Returns [`ToolError::Store`] when the store fails.
pub async fn seed_store(store: &dyn ToolDefinitionStore) -> ToolResult<usize> {
    let definitions =
        builtin_definitions().map_err(|err| ToolError::invalid_metadata(err.to_string()))?;
    let mut added = 0;
    for definition in definitions {
        let name = definition.name().to_owned();
        match store.insert(definition).await {
            Ok(_) => added += 1,
            Err(MemoryError::Conflict { .. }) => debug!(tool = %name, "built-in tool already stored"),
            Err(err) => return Err(err.into()),
        }
    }
    info!(added, "seeded built-in tools");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use agent_memory::InMemoryToolStore;
    use serde_json::json;

    use super::*;
    use crate::registry::ToolRegistry;

    #[test]
    fn builtin_sources_compile_and_register() {
        let registry = ToolRegistry::new();
        for tool in SCRIPT_TOOLS {
            registry
                .register_script(tool.name, tool.description, tool.source, None)
                .unwrap();
        }
        assert_eq!(registry.len(), SCRIPT_TOOLS.len());
    }

    #[tokio::test]
    async fn divide_by_zero_returns_message() {
        let registry = ToolRegistry::new();
        let divide = SCRIPT_TOOLS.iter().find(|t| t.name == "divide").unwrap();
        registry.register_script("divide", "", divide.source, None).unwrap();
        let output = registry.invoke("divide", json!({"a": 1, "b": 0})).await.unwrap();
        assert_eq!(output, json!("Error: the divisor cannot be zero"));
    }

    #[tokio::test]
    async fn current_time_uses_format() {
        let catalog = NativeCatalog::with_builtins();
        let tool = catalog.get(CURRENT_TIME_HANDLE).unwrap();
        assert_eq!(tool.parameters()[0].name(), "format");
        assert!(!tool.parameters()[0].required());

        let registry = ToolRegistry::new();
        registry.register_native("current_time", "", tool.clone(), None).unwrap();
        let year = registry.invoke("current_time", json!({"format": "%Y"})).await.unwrap();
        assert_eq!(year.as_str().map(str::len), Some(4));
        assert!(registry.invoke("current_time", json!({"format": "%Q"})).await.is_err());
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = InMemoryToolStore::new();
        assert_eq!(seed_store(&store).await.unwrap(), SCRIPT_TOOLS.len() + 1);
        assert_eq!(seed_store(&store).await.unwrap(), 0);
        let visible = store.list_visible_to(OwnerId::new(7)).await.unwrap();
        assert_eq!(visible.len(), SCRIPT_TOOLS.len() + 1);
    }
}
