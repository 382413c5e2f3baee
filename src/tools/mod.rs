mod invoker;

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::{SchemaError, ToolError};
use crate::llm::ModelToolDefinition;

pub use invoker::{ToolExecution, ToolInvoker};

type ToolHandler = dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync;

/// A named, schema-described callable the model may request mid-run.
#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: String,
    json_schema: Value,
    handler: Arc<ToolHandler>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("json_schema", &self.json_schema)
            .finish()
    }
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            json_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": true,
            }),
            handler: Arc::new(|_args| {
                Box::pin(async {
                    Err(ToolError::Execution(
                        "tool handler not configured".to_string(),
                    ))
                })
            }),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Result<Self, SchemaError> {
        validate_schema(&schema)?;
        self.json_schema = schema;
        Ok(self)
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.handler = Arc::new(move |args| Box::pin(handler(args)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    pub fn definition(&self) -> ModelToolDefinition {
        ModelToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.json_schema.clone(),
        }
    }

    pub fn validate_arguments(&self, args: &Value) -> Result<(), ToolError> {
        validate_arguments(self.name(), &self.json_schema, args)
    }

    pub async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        self.validate_arguments(&args)?;
        (self.handler)(args).await
    }
}

fn validate_schema(schema: &Value) -> Result<(), SchemaError> {
    let schema_obj = schema.as_object().ok_or(SchemaError::SchemaNotObject)?;

    let root_type = schema_obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SchemaError::RootTypeMustBeObject)?;

    if root_type != "object" {
        return Err(SchemaError::RootTypeMustBeObject);
    }

    if let Some(required) = schema_obj.get("required") {
        let required_arr = required.as_array().ok_or(SchemaError::InvalidRequired)?;
        if !required_arr.iter().all(Value::is_string) {
            return Err(SchemaError::InvalidRequired);
        }
    }

    Ok(())
}

fn validate_arguments(tool_name: &str, schema: &Value, args: &Value) -> Result<(), ToolError> {
    let invalid = |message: String| ToolError::InvalidArguments {
        tool: tool_name.to_string(),
        message,
    };

    let args_obj = args
        .as_object()
        .ok_or_else(|| invalid("arguments must be a JSON object".to_string()))?;
    let schema_obj = schema
        .as_object()
        .ok_or_else(|| invalid("tool schema must be a JSON object".to_string()))?;

    let required = schema_obj
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    for field_name in required {
        if !args_obj.contains_key(field_name) {
            return Err(invalid(format!("missing required field: {field_name}")));
        }
    }

    let properties = schema_obj.get("properties").and_then(Value::as_object);
    let closed = schema_obj
        .get("additionalProperties")
        .and_then(Value::as_bool)
        == Some(false);

    for (key, value) in args_obj {
        let field_schema = properties.and_then(|props| props.get(key));
        if field_schema.is_none() && closed {
            return Err(invalid(format!("unknown field: {key}")));
        }

        let expected = field_schema
            .and_then(|schema| schema.get("type"))
            .and_then(Value::as_str);
        if let Some(type_name) = expected {
            if !value_matches_type(value, type_name) {
                return Err(invalid(format!("field '{key}' must be of type {type_name}")));
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn greet_tool() -> ToolSpec {
        ToolSpec::new("greet", "greet someone")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "times": {"type": "integer"}
                },
                "required": ["name"],
                "additionalProperties": false
            }))
            .expect("schema valid")
            .with_handler(|args| async move {
                let name = args["name"].as_str().unwrap_or_default().to_string();
                Ok(json!(format!("hello {name}")))
            })
    }

    #[test]
    fn schema_validation_rejects_non_object_root() {
        let result = ToolSpec::new("bad", "bad").with_schema(json!({"type": "string"}));
        assert!(matches!(result, Err(SchemaError::RootTypeMustBeObject)));
    }

    #[test]
    fn schema_validation_rejects_non_string_required() {
        let result = ToolSpec::new("bad", "bad")
            .with_schema(json!({"type": "object", "required": ["ok", 3]}));
        assert!(matches!(result, Err(SchemaError::InvalidRequired)));
    }

    #[tokio::test]
    async fn argument_validation_reports_missing_required() {
        let err = greet_tool()
            .execute(json!({}))
            .await
            .expect_err("should fail");

        assert!(err.to_string().contains("missing required field"));
    }

    #[tokio::test]
    async fn argument_validation_rejects_unknown_and_mistyped_fields() {
        let tool = greet_tool();
        let unknown = tool.validate_arguments(&json!({"name": "a", "extra": 1}));
        assert!(unknown.is_err_and(|err| err.to_string().contains("unknown field: extra")));

        let mistyped = tool.validate_arguments(&json!({"name": "a", "times": "2"}));
        assert!(mistyped.is_err_and(|err| err.to_string().contains("must be of type integer")));
    }

    #[tokio::test]
    async fn execute_runs_handler_with_valid_arguments() {
        let value = greet_tool()
            .execute(json!({"name": "Ada"}))
            .await
            .expect("tool executes");
        assert_eq!(value, json!("hello Ada"));
    }

    #[test]
    fn definition_mirrors_tool_schema() {
        let definition = greet_tool().definition();
        assert_eq!(definition.name, "greet");
        assert_eq!(definition.parameters["required"], json!(["name"]));
    }
}
