use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;
use crate::interpolation::stringify;
use crate::llm::{ModelMessage, ModelToolCall, ModelToolDefinition};
use crate::tools::ToolSpec;

/// Record of a single tool call, successful or not.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub name: String,
    /// Parsed arguments; `null` when the raw arguments were not valid JSON.
    pub arguments: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl ToolExecution {
    pub const UNKNOWN_TOOL: &'static str = "unknown_tool";
    pub const INVALID_ARGUMENTS: &'static str = "invalid_arguments";
    pub const REJECTED_BY_APPROVAL: &'static str = "rejected_by_approval";

    /// A call that was never performed because an approval gate rejected it.
    pub fn rejected(call: &ModelToolCall) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: parse_arguments(&call.raw_arguments).unwrap_or(Value::Null),
            result: None,
            error: Some(Self::REJECTED_BY_APPROVAL.to_string()),
            started_at: Utc::now(),
            duration_seconds: 0.0,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Copy with the result replaced, as produced by a modifying review gate.
    pub fn with_result(&self, result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            ..self.clone()
        }
    }

    /// Tool-role reply keyed by the originating tool-call id.
    pub fn to_message(&self) -> ModelMessage {
        let content = match (&self.error, &self.result) {
            (Some(error), _) => error.clone(),
            (None, Some(result)) => stringify(result),
            (None, None) => String::new(),
        };
        ModelMessage::ToolResult {
            tool_call_id: self.tool_call_id.clone(),
            tool_name: self.name.clone(),
            content,
            is_error: self.is_error(),
        }
    }
}

/// Resolves model tool calls against a fixed tool set.
///
/// Every failure mode becomes data on the returned [`ToolExecution`]; nothing
/// here returns an error to the caller.
#[derive(Clone, Debug, Default)]
pub struct ToolInvoker {
    tools: Vec<ToolSpec>,
    by_name: HashMap<String, usize>,
}

impl ToolInvoker {
    /// Fails with the offending name when two tools share one.
    pub fn new(tools: Vec<ToolSpec>) -> Result<Self, String> {
        let mut by_name = HashMap::with_capacity(tools.len());
        for (idx, tool) in tools.iter().enumerate() {
            if by_name.insert(tool.name().to_string(), idx).is_some() {
                return Err(tool.name().to_string());
            }
        }
        Ok(Self { tools, by_name })
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.by_name.get(name).map(|idx| &self.tools[*idx])
    }

    pub fn definitions(&self) -> Vec<ModelToolDefinition> {
        self.tools.iter().map(ToolSpec::definition).collect()
    }

    pub async fn invoke(&self, call: &ModelToolCall) -> ToolExecution {
        let started_at = Utc::now();
        let clock = Instant::now();

        match parse_arguments(&call.raw_arguments) {
            Some(arguments) => self.run(call, arguments, started_at, clock).await,
            None => {
                tracing::debug!(tool = %call.name, raw = %call.raw_arguments, "tool arguments are not a JSON object");
                let mut execution = self.finish(call, Value::Null, started_at, clock);
                execution.error = Some(self.classify_unparsed(call));
                execution
            }
        }
    }

    /// Invokes `call` with arguments supplied by an approval gate instead of
    /// the model's own.
    pub async fn invoke_with_arguments(&self, call: &ModelToolCall, arguments: Value) -> ToolExecution {
        self.run(call, arguments, Utc::now(), Instant::now()).await
    }

    async fn run(
        &self,
        call: &ModelToolCall,
        arguments: Value,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> ToolExecution {
        let Some(tool) = self.get(&call.name) else {
            tracing::debug!(tool = %call.name, "model requested an unregistered tool");
            let mut execution = self.finish(call, arguments, started_at, clock);
            execution.error = Some(ToolExecution::UNKNOWN_TOOL.to_string());
            return execution;
        };

        let outcome = tool.execute(arguments.clone()).await;
        let mut execution = self.finish(call, arguments, started_at, clock);
        match outcome {
            Ok(result) => execution.result = Some(result),
            Err(ToolError::InvalidArguments { message, .. }) => {
                tracing::debug!(tool = %call.name, %message, "tool arguments failed validation");
                execution.error = Some(ToolExecution::INVALID_ARGUMENTS.to_string());
            }
            Err(err) => {
                tracing::debug!(tool = %call.name, error = %err, "tool returned an error");
                execution.error = Some(err.to_string());
            }
        }
        execution
    }

    // An unknown tool takes precedence over bad arguments.
    fn classify_unparsed(&self, call: &ModelToolCall) -> String {
        if self.get(&call.name).is_none() {
            ToolExecution::UNKNOWN_TOOL.to_string()
        } else {
            ToolExecution::INVALID_ARGUMENTS.to_string()
        }
    }

    fn finish(
        &self,
        call: &ModelToolCall,
        arguments: Value,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> ToolExecution {
        ToolExecution {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            arguments,
            result: None,
            error: None,
            started_at,
            duration_seconds: clock.elapsed().as_secs_f64(),
        }
    }
}

/// Parses raw tool arguments into a JSON object. Blank input counts as `{}`.
fn parse_arguments(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return Some(Value::Object(Default::default()));
    }
    serde_json::from_str::<Value>(raw)
        .ok()
        .filter(Value::is_object)
}
