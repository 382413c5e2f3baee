//! `{{name}}` / `{{name.path}}` placeholder rendering against an
//! [`ExecutionContext`].

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::InterpolationError;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_-]*(?:\.[A-Za-z0-9_-]+)*)\s*\}\}")
        .expect("placeholder pattern is valid")
});

/// Output of a render pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// Paths that did not resolve and were replaced with the empty string.
    pub gaps: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Interpolator {
    strict: bool,
}

impl Interpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// In strict mode an unresolved path is an error instead of an empty
    /// substitution.
    pub fn strict(strict: bool) -> Self {
        Self { strict }
    }

    pub fn render(
        &self,
        template: &str,
        context: &ExecutionContext,
    ) -> Result<Rendered, InterpolationError> {
        let mut gaps = Vec::new();
        let text = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            let path = &caps[1];
            match context.get(path) {
                Some(value) => stringify(value),
                None => {
                    gaps.push(path.to_string());
                    String::new()
                }
            }
        });

        if let Some(path) = gaps.first() {
            if self.strict {
                return Err(InterpolationError::Unresolved { path: path.clone() });
            }
            tracing::debug!(gaps = ?gaps, "template placeholders did not resolve");
        }

        Ok(Rendered {
            text: text.into_owned(),
            gaps,
        })
    }
}

/// Lenient render: unresolved placeholders become empty strings.
pub fn render(template: &str, context: &ExecutionContext) -> String {
    Interpolator::new()
        .render(template, context)
        .map(|rendered| rendered.text)
        .unwrap_or_default()
}

pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
