use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::interpolation::stringify;
use crate::llm::Usage;
use crate::state::{ExecutionStatus, FailureReason, PendingApproval, RunFailure};

/// Output of one completed step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    /// A JSON string for plain steps; the structured value for schema steps.
    pub output: Value,
    pub usage: Usage,
    pub duration_seconds: f64,
}

impl StepResult {
    pub fn output_text(&self) -> String {
        stringify(&self.output)
    }

    /// Hydrates a structured output into a caller type.
    pub fn output_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.output.clone())
    }

    pub(crate) fn with_output(self, output: Value) -> Self {
        Self { output, ..self }
    }
}

/// Position inside the step list. `produced` holds the current step's result
/// while its review gate is pending.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCursor {
    pub step_index: usize,
    pub produced: Option<StepResult>,
}

/// Full state of one workflow run. This is also the persisted form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionState {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub current_step: Option<String>,
    pub completed_steps: usize,
    pub total_steps: usize,
    /// In execution order.
    pub step_results: Vec<StepResult>,
    pub skipped_steps: Vec<String>,
    pub context: ExecutionContext,
    pub usage: Usage,
    pub pending_approval: Option<PendingApproval>,
    pub failure: Option<RunFailure>,
    pub cursor: WorkflowCursor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecutionState {
    pub fn new(total_steps: usize, context: ExecutionContext) -> Self {
        let now = Utc::now();
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            status: ExecutionStatus::Running,
            current_step: None,
            completed_steps: 0,
            total_steps,
            step_results: Vec::new(),
            skipped_steps: Vec::new(),
            context,
            usage: Usage::default(),
            pending_approval: None,
            failure: None,
            cursor: WorkflowCursor::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn step_result(&self, step_name: &str) -> Option<&StepResult> {
        self.step_results
            .iter()
            .find(|result| result.step_name == step_name)
    }

    pub(crate) fn record(&mut self, result: StepResult) {
        self.context.set(result.step_name.clone(), result.output.clone());
        self.step_results.push(result);
        self.completed_steps = self.step_results.len();
        self.advance();
    }

    pub(crate) fn skip(&mut self, step_name: String) {
        self.skipped_steps.push(step_name);
        self.advance();
    }

    fn advance(&mut self) {
        self.cursor = WorkflowCursor {
            step_index: self.cursor.step_index + 1,
            produced: None,
        };
        self.current_step = None;
        self.updated_at = Utc::now();
    }

    pub(crate) fn complete(&mut self) {
        self.current_step = None;
        self.transition(ExecutionStatus::Completed);
    }

    pub(crate) fn fail(&mut self, step: &str, reason: FailureReason, message: impl Into<String>) {
        self.failure = Some(RunFailure {
            reason,
            message: message.into(),
            step: Some(step.to_string()),
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

    fn transition(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.pending_approval = None;
        self.updated_at = Utc::now();
    }
}
