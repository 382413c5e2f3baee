use thiserror::Error;

use crate::approval::GateKind;
use crate::state::ExecutionStatus;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("tool schema must be a JSON object")]
    SchemaNotObject,
    #[error("tool schema must declare type=object")]
    RootTypeMustBeObject,
    #[error("required must be an array of strings")]
    InvalidRequired,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider response invalid: {0}")]
    Response(String),
    #[error("provider does not support {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("stored record corrupted: {0}")]
    Corrupted(String),
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("approval request not found: {0}")]
    ApprovalNotFound(String),
    #[error("approval request {0} was already decided")]
    AlreadyDecided(String),
    #[error("approval request {0} expired before it was decided")]
    Expired(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("unresolved template variable: {path}")]
    Unresolved { path: String },
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("max iterations reached ({max_iterations})")]
    MaxIterationsReached { max_iterations: u32 },
    #[error("agent run {execution_id} paused awaiting {kind} approval")]
    Paused {
        execution_id: String,
        kind: GateKind,
    },
    #[error("agent run {execution_id} was cancelled")]
    Cancelled { execution_id: String },
    #[error("agent run {execution_id} cannot be resumed from status {status}")]
    NotResumable {
        execution_id: String,
        status: ExecutionStatus,
    },
    #[error("approval request {request_id} has not been decided yet")]
    ApprovalPending { request_id: String },
    #[error("execution {0} is not an agent run")]
    WrongExecutionKind(String),
    #[error("agent run failed: {0}")]
    Failed(String),
    #[error("agent configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("workflow run {execution_id} cannot be resumed from status {status}")]
    NotResumable {
        execution_id: String,
        status: ExecutionStatus,
    },
    #[error("approval request {request_id} has not been decided yet")]
    ApprovalPending { request_id: String },
    #[error("execution {0} is not a workflow run")]
    WrongExecutionKind(String),
    #[error("workflow configuration error: {0}")]
    Config(String),
}
