//! Persisted tool definitions, independent of any registry instance.

use serde::{Deserialize, Serialize};

use crate::{OwnerId, ParameterSpec, ToolId};

/// Label assigned when the author does not categorise a tool.
pub const DEFAULT_LABEL: &str = "general";

/// Who may see a tool definition besides its owner.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Visible to every owner.
    #[default]
    Shared,
    /// Visible to the owner only.
    Private,
}

/// Where the callable behind a definition comes from.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolSource {
    /// Tool-script source text compiled when a registry is built.
    Script {
        /// Source text containing the function definition.
        code: String,
    },
    /// Reference to a natively implemented tool in the built-in catalog.
    Native {
        /// Catalog key of the native implementation.
        handle: String,
    },
}

impl ToolSource {
    /// Creates a script source.
    #[must_use]
    pub fn script(code: impl Into<String>) -> Self {
        Self::Script { code: code.into() }
    }

    /// Creates a native handle source.
    #[must_use]
    pub fn native(handle: impl Into<String>) -> Self {
        Self::Native {
            handle: handle.into(),
        }
    }

    /// Returns the script text when the source is a non-blank script.
    #[must_use]
    pub fn script_text(&self) -> Option<&str> {
        match self {
            Self::Script { code } if !code.trim().is_empty() => Some(code),
            _ => None,
        }
    }
}

/// Metadata and source for a tool as held by the definition store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    id: ToolId,
    owner: OwnerId,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<Vec<ParameterSpec>>,
    source: ToolSource,
    #[serde(default)]
    visibility: Visibility,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default = "default_label")]
    label: String,
}

const fn default_active() -> bool {
    true
}

fn default_label() -> String {
    DEFAULT_LABEL.to_owned()
}

impl ToolDefinition {
    /// Starts building a definition owned by `owner`.
    #[must_use]
    pub fn builder(owner: OwnerId) -> ToolDefinitionBuilder {
        ToolDefinitionBuilder {
            id: ToolId::random(),
            owner,
            name: None,
            description: String::new(),
            parameters: None,
            source: None,
            visibility: Visibility::Shared,
            active: true,
            label: default_label(),
        }
    }

    /// Storage identifier.
    #[must_use]
    pub const fn id(&self) -> ToolId {
        self.id
    }

    /// Owning principal.
    #[must_use]
    pub const fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Unique lookup name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description advertised to the oracle.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Explicit parameter list, if the author supplied one.
    #[must_use]
    pub fn parameters(&self) -> Option<&[ParameterSpec]> {
        self.parameters.as_deref()
    }

    /// Script text or native handle.
    #[must_use]
    pub fn source(&self) -> &ToolSource {
        &self.source
    }

    /// Sharing mode.
    #[must_use]
    pub const fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Whether registries should load the tool.
    #[must_use]
    pub const fn active(&self) -> bool {
        self.active
    }

    /// Free-form category label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns true when `owner` may load this definition.
    #[must_use]
    pub fn visible_to(&self, owner: OwnerId) -> bool {
        self.owner == owner || self.visibility == Visibility::Shared
    }

    /// Renames the tool.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDefinition`] when the name is blank.
    pub fn set_name(&mut self, name: impl Into<String>) -> crate::Result<()> {
        self.name = validated_name(name.into())?;
        Ok(())
    }

    /// Replaces the description.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Replaces the explicit parameter list.
    pub fn set_parameters(&mut self, parameters: Option<Vec<ParameterSpec>>) {
        self.parameters = parameters;
    }

    /// Replaces the source.
    pub fn set_source(&mut self, source: ToolSource) {
        self.source = source;
    }

    /// Changes the sharing mode.
    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
    }

    /// Enables or disables the tool.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Replaces the label; blank labels fall back to the default.
    pub fn set_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        self.label = if label.trim().is_empty() {
            default_label()
        } else {
            label.trim().to_owned()
        };
    }
}

fn validated_name(name: String) -> crate::Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(crate::Error::invalid_definition("tool name cannot be empty"));
    }
    Ok(trimmed.to_owned())
}

/// Builder for [`ToolDefinition`].
#[derive(Debug)]
pub struct ToolDefinitionBuilder {
    id: ToolId,
    owner: OwnerId,
    name: Option<String>,
    description: String,
    parameters: Option<Vec<ParameterSpec>>,
    source: Option<ToolSource>,
    visibility: Visibility,
    active: bool,
    label: String,
}

impl ToolDefinitionBuilder {
    /// Overrides the generated storage identifier.
    #[must_use]
    pub fn id(mut self, id: ToolId) -> Self {
        self.id = id;
        self
    }

    /// Sets the unique tool name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDefinition`] when the name is empty.
    pub fn name(mut self, name: impl Into<String>) -> crate::Result<Self> {
        self.name = Some(validated_name(name.into())?);
        Ok(self)
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Supplies an explicit parameter list.
    #[must_use]
    pub fn parameters(mut self, parameters: Vec<ParameterSpec>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Sets the script or native source.
    #[must_use]
    pub fn source(mut self, source: ToolSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the sharing mode.
    #[must_use]
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Enables or disables the tool.
    #[must_use]
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Sets the category label; blank labels keep the default.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !label.trim().is_empty() {
            self.label = label.trim().to_owned();
        }
        self
    }

    /// Consumes the builder and returns the definition.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDefinition`] if the name or source is
    /// missing.
    pub fn build(self) -> crate::Result<ToolDefinition> {
        let name = self
            .name
            .ok_or_else(|| crate::Error::invalid_definition("tool name must be provided"))?;
        let source = self
            .source
            .ok_or_else(|| crate::Error::invalid_definition("tool source must be provided"))?;

        Ok(ToolDefinition {
            id: self.id,
            owner: self.owner,
            name,
            description: self.description,
            parameters: self.parameters,
            source,
            visibility: self.visibility,
            active: self.active,
            label: self.label,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script_definition(owner: OwnerId, visibility: Visibility) -> ToolDefinition {
        ToolDefinition::builder(owner)
            .name("add")
            .unwrap()
            .description("a + b")
            .source(ToolSource::script("def add(a, b):\n    return a + b"))
            .visibility(visibility)
            .build()
            .unwrap()
    }

    #[test]
    fn builds_definition_with_defaults() {
        let definition = script_definition(OwnerId::new(7), Visibility::Private);
        assert_eq!(definition.name(), "add");
        assert_eq!(definition.label(), DEFAULT_LABEL);
        assert!(definition.active());
        assert!(definition.parameters().is_none());
        assert!(definition.source().script_text().is_some());
    }

    #[test]
    fn name_and_source_are_required() {
        assert!(ToolDefinition::builder(OwnerId::SYSTEM).build().is_err());
        assert!(ToolDefinition::builder(OwnerId::SYSTEM).name("  ").is_err());
        let missing_source = ToolDefinition::builder(OwnerId::SYSTEM)
            .name("x")
            .unwrap()
            .build();
        assert!(missing_source.is_err());
    }

    #[test]
    fn visibility_rules() {
        let private = script_definition(OwnerId::new(1), Visibility::Private);
        assert!(private.visible_to(OwnerId::new(1)));
        assert!(!private.visible_to(OwnerId::new(2)));

        let shared = script_definition(OwnerId::new(1), Visibility::Shared);
        assert!(shared.visible_to(OwnerId::new(2)));
    }

    #[test]
    fn blank_script_has_no_text() {
        assert!(ToolSource::script("   ").script_text().is_none());
        assert!(ToolSource::native("current_time").script_text().is_none());
    }
}
