use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{ModelMessage, ModelToolCall, Usage};
use crate::state::{ExecutionStatus, FailureReason, PendingApproval, RunFailure};
use crate::tools::ToolExecution;

/// Where a paused or in-flight agent run picks up.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum AgentCursor {
    /// Start of an iteration: next action is a model call.
    #[default]
    Model,
    /// Working through the tool calls of the last assistant message.
    /// `executed` holds the current call's result while its review gate is
    /// pending.
    Tools {
        calls: Vec<ModelToolCall>,
        index: usize,
        executed: Option<ToolExecution>,
    },
    /// The model answered without tool calls; the answer awaits review.
    Final { content: String },
}

/// Full state of one agent run. This is also the persisted form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentExecutionState {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub transcript: Vec<ModelMessage>,
    pub tool_executions: Vec<ToolExecution>,
    pub usage: Usage,
    pub pending_approval: Option<PendingApproval>,
    pub final_response: Option<String>,
    pub failure: Option<RunFailure>,
    pub cursor: AgentCursor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentExecutionState {
    pub fn new(max_iterations: u32, transcript: Vec<ModelMessage>) -> Self {
        let now = Utc::now();
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            status: ExecutionStatus::Running,
            current_iteration: 0,
            max_iterations,
            transcript,
            tool_executions: Vec::new(),
            usage: Usage::default(),
            pending_approval: None,
            final_response: None,
            failure: None,
            cursor: AgentCursor::Model,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn complete(&mut self, response: String) {
        self.final_response = Some(response);
        self.transition(ExecutionStatus::Completed);
    }

    pub(crate) fn fail(&mut self, reason: FailureReason, message: impl Into<String>) {
        self.failure = Some(RunFailure {
            reason,
            message: message.into(),
            step: None,
        });
        self.transition(ExecutionStatus::Failed);
    }

    pub(crate) fn pause(&mut self, pending: PendingApproval) {
        self.transition(ExecutionStatus::Paused);
        self.pending_approval = Some(pending);
    }

    pub(crate) fn cancel(&mut self) {
        self.transition(ExecutionStatus::Cancelled);
    }

    pub(crate) fn resume(&mut self) {
        self.transition(ExecutionStatus::Running);
    }

    // Every transition clears any pending approval; `pause` sets it again.
    fn transition(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.pending_approval = None;
        self.updated_at = Utc::now();
    }
}
