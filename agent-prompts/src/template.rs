//! `{{variable}}` prompt templates.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Result alias for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur during template operations.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// A required variable was not provided.
    #[error("missing required variable: {name}")]
    MissingVariable {
        /// Name of the missing variable.
        name: String,
    },

    /// The template text is malformed.
    #[error("invalid template: {reason}")]
    Invalid {
        /// Reason for the failure.
        reason: String,
    },
}

/// A prompt template with `{{variable}}` placeholders.
///
/// Rendering is a single pass over the template text: substituted values are
/// copied verbatim and never scanned for further placeholders, so user input
/// containing braces cannot inject variables.
///
/// # Examples
///
/// ```
/// use agent_prompts::template::PromptTemplate;
///
/// let template = PromptTemplate::builder("You are {{role}}. {{task}}")
///     .with_variable("role", "a planning assistant")
///     .with_required_variable("task")
///     .build()
///     .unwrap();
///
/// let rendered = template.render_with(&[("task", "Plan the steps.")]).unwrap();
/// assert_eq!(rendered, "You are a planning assistant. Plan the steps.");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    template: String,
    variables: HashMap<String, String>,
    required_variables: Vec<String>,
}

impl PromptTemplate {
    /// Creates a template whose placeholders are all optional.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Invalid`] if a placeholder is unterminated.
    pub fn new(template: impl Into<String>) -> TemplateResult<Self> {
        TemplateBuilder::new(template).build()
    }

    /// Returns a builder for constructing templates.
    #[must_use]
    pub fn builder(template: impl Into<String>) -> TemplateBuilder {
        TemplateBuilder::new(template)
    }

    /// Sets a default variable value.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Returns the default value of a variable if set.
    #[must_use]
    pub fn get_variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Renders the template with its default variables only.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::MissingVariable`] if a required variable is not set.
    pub fn render(&self) -> TemplateResult<String> {
        self.render_with(&[])
    }

    /// Renders the template; `runtime` values override defaults.
    ///
    /// Unknown optional placeholders render as empty strings.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::MissingVariable`] if a required variable is not set.
    pub fn render_with(&self, runtime: &[(&str, &str)]) -> TemplateResult<String> {
        let lookup = |name: &str| {
            runtime
                .iter()
                .rev()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| *value)
                .or_else(|| self.get_variable(name))
        };

        let mut output = String::with_capacity(self.template.len());
        for segment in segments(&self.template)? {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Variable(name) => match lookup(name) {
                    Some(value) => output.push_str(value),
                    None if self.required_variables.iter().any(|required| required == name) => {
                        return Err(TemplateError::MissingVariable {
                            name: name.to_owned(),
                        });
                    }
                    None => {}
                },
            }
        }
        Ok(output)
    }

    /// Placeholder names in order of appearance.
    #[must_use]
    pub fn placeholders(&self) -> Vec<&str> {
        segments(&self.template)
            .map(|segments| {
                segments
                    .into_iter()
                    .filter_map(|segment| match segment {
                        Segment::Variable(name) => Some(name),
                        Segment::Text(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the raw template string.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// Builder for constructing prompt templates.
#[derive(Debug)]
pub struct TemplateBuilder {
    template: String,
    variables: HashMap<String, String>,
    required_variables: Vec<String>,
}

impl TemplateBuilder {
    /// Creates a new builder with the supplied template text.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            variables: HashMap::new(),
            required_variables: Vec::new(),
        }
    }

    /// Sets a variable with a default value.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Declares a required variable (must be provided at render time).
    #[must_use]
    pub fn with_required_variable(mut self, name: impl Into<String>) -> Self {
        self.required_variables.push(name.into());
        self
    }

    /// Builds the template.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Invalid`] if a placeholder is unterminated or
    /// empty.
    pub fn build(self) -> TemplateResult<PromptTemplate> {
        segments(&self.template)?;
        Ok(PromptTemplate {
            template: self.template,
            variables: self.variables,
            required_variables: self.required_variables,
        })
    }
}

enum Segment<'a> {
    Text(&'a str),
    Variable(&'a str),
}

fn segments(template: &str) -> TemplateResult<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Text(&rest[..open]));
        }
        let after = &rest[open + 2..];
        let close = after.find("}}").ok_or_else(|| TemplateError::Invalid {
            reason: format!("unterminated placeholder at byte {}", template.len() - rest.len() + open),
        })?;
        let name = after[..close].trim();
        if name.is_empty() {
            return Err(TemplateError::Invalid {
                reason: "empty placeholder".to_owned(),
            });
        }
        segments.push(Segment::Variable(name));
        rest = &after[close + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_defaults_and_runtime_values() {
        let template = PromptTemplate::builder("{{greeting}} {{ name }}!")
            .with_variable("greeting", "Hello")
            .with_variable("name", "World")
            .build()
            .unwrap();

        assert_eq!(template.render().unwrap(), "Hello World!");
        assert_eq!(template.render_with(&[("name", "Ada")]).unwrap(), "Hello Ada!");
    }

    #[test]
    fn required_variables_error_when_missing() {
        let template = PromptTemplate::builder("Hello {{name}}!")
            .with_required_variable("name")
            .build()
            .unwrap();

        let err = template.render().expect_err("should error");
        assert!(matches!(err, TemplateError::MissingVariable { name } if name == "name"));
    }

    #[test]
    fn optional_placeholders_render_empty() {
        let template = PromptTemplate::new("[{{missing}}]").unwrap();
        assert_eq!(template.render().unwrap(), "[]");
    }

    #[test]
    fn values_are_not_rescanned() {
        let template = PromptTemplate::new("Q: {{question}} / {{secret}}").unwrap();
        let rendered = template
            .render_with(&[("question", "{{secret}}"), ("secret", "s3")])
            .unwrap();
        assert_eq!(rendered, "Q: {{secret}} / s3");
    }

    #[test]
    fn single_braces_are_literal() {
        let template = PromptTemplate::new(r#"{"tool": "{{name}}"}"#).unwrap();
        assert_eq!(
            template.render_with(&[("name", "add")]).unwrap(),
            r#"{"tool": "add"}"#
        );
        assert_eq!(template.placeholders(), vec!["name"]);
    }

    #[test]
    fn rejects_unterminated_placeholders() {
        assert!(matches!(
            PromptTemplate::new("Hello {{name"),
            Err(TemplateError::Invalid { .. })
        ));
        assert!(PromptTemplate::new("Hello {{  }}").is_err());
    }
}
