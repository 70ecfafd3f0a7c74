//! Parameter descriptors advertised to the oracle for every tool.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Type label used when a parameter carries no annotation.
pub const ANY_TYPE: &str = "any";

/// Describes one formal argument of a tool.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    name: String,
    #[serde(rename = "type", default = "any_type")]
    param_type: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_required")]
    required: bool,
}

fn any_type() -> String {
    ANY_TYPE.to_owned()
}

const fn default_required() -> bool {
    true
}

impl ParameterSpec {
    /// Creates a required parameter of unknown type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] when the name is empty or not a valid
    /// identifier.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            description: format!("parameter {name}"),
            name,
            param_type: any_type(),
            required: true,
        })
    }

    /// Sets the type label (e.g. `float`, `str`, `number`).
    #[must_use]
    pub fn with_type(mut self, param_type: impl Into<String>) -> Self {
        let param_type = param_type.into();
        if !param_type.trim().is_empty() {
            self.param_type = param_type;
        }
        self
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the parameter as optional or required.
    #[must_use]
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Parameter name as bound by the invocable.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type label.
    #[must_use]
    pub fn param_type(&self) -> &str {
        &self.param_type
    }

    /// Description shown to the oracle.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether callers must supply the parameter.
    #[must_use]
    pub const fn required(&self) -> bool {
        self.required
    }
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidParameter {
            name: name.to_owned(),
            reason: "parameter names must be identifiers".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_required_any() {
        let spec = ParameterSpec::new("query").unwrap();
        assert_eq!(spec.param_type(), ANY_TYPE);
        assert!(spec.required());
        assert_eq!(spec.description(), "parameter query");
    }

    #[test]
    fn rejects_non_identifiers() {
        assert!(ParameterSpec::new("").is_err());
        assert!(ParameterSpec::new("2fast").is_err());
        assert!(ParameterSpec::new("with space").is_err());
    }

    #[test]
    fn deserializes_stored_shape() {
        let raw = r#"{"name":"a","type":"float","description":"first","required":true}"#;
        let spec: ParameterSpec = serde_json::from_str(raw).unwrap();
        assert_eq!(spec.name(), "a");
        assert_eq!(spec.param_type(), "float");

        let minimal: ParameterSpec = serde_json::from_str(r#"{"name":"b"}"#).unwrap();
        assert_eq!(minimal.param_type(), ANY_TYPE);
        assert!(minimal.required());
    }
}
