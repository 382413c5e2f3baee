//! Resumable agent and workflow runs for Rust.
//!
//! v0 surface:
//! - `Agent` tool-calling loop bounded by `max_iterations`
//! - `Workflow` of sequential prompt steps with `{{step.field}}` interpolation
//! - Approval gates (inline callbacks or deferred through an `ExecutionStateStore`)
//! - Memory and file-backed execution stores for pause/resume

pub mod agent;
pub mod approval;
pub mod cancel;
pub mod context;
pub mod error;
pub mod interpolation;
pub mod llm;
pub mod state;
pub mod store;
pub mod tools;
pub mod workflow;

pub use agent::{Agent, AgentBuilder, AgentConfig, AgentCursor, AgentExecutionState};
pub use approval::{ApprovalDecision, ApprovalGate, GateKind, GateRequest};
pub use cancel::CancellationHandle;
pub use context::ExecutionContext;
pub use error::{
    AgentError, InterpolationError, ProviderError, SchemaError, StoreError, ToolError,
    WorkflowError,
};
pub use interpolation::Interpolator;
pub use llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice,
    ModelToolDefinition, OutputSchema, StructuredCompletion, Usage,
};
pub use state::{ExecutionStatus, FailureReason, PendingApproval, RunFailure};
pub use store::{
    ApprovalRequest, ApprovalStatus, ExecutionSnapshot, ExecutionStateStore,
    FileExecutionStore, MemoryExecutionStore,
};
pub use tools::{ToolExecution, ToolInvoker, ToolSpec};
pub use workflow::{
    StepResult, Workflow, WorkflowBuilder, WorkflowConfig, WorkflowExecutionState, WorkflowStep,
};
