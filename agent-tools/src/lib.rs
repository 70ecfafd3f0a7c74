//! Tool registry and execution for the planning agent.
//!
//! A [`ToolRegistry`] maps tool names to [`Invocable`]s: native Rust tools or
//! functions compiled from submitted script source. Registries are scoped to
//! one owner and rebuilt from the tool definition store by the
//! [`RegistryCache`].
//!
//! Script tools run inside a bounded interpreter, not a sandbox. Source must
//! pass the static security gate in `agent-policy` before it reaches the store.

#![warn(missing_docs, clippy::pedantic)]

pub mod builtin;
pub mod cache;
mod error;
pub mod native;
pub mod registry;
pub mod script;

pub use builtin::{NativeCatalog, builtin_definitions, seed_store};
pub use cache::RegistryCache;
pub use error::{ToolError, ToolResult};
pub use native::{NativeTool, reflect_parameters};
pub use registry::{Invocable, Tool, ToolBody, ToolHandle, ToolRegistry, ToolSpec};
pub use script::{CompiledScript, SUPPORTED_MODULES, ScriptFunction, ScriptLimits};
