//! Human-in-the-loop decision points shared by agent and workflow runs.
//!
//! A gate is answered either inline, by a callback registered for its
//! [`GateKind`], or out of process: the gate writes an [`ApprovalRequest`]
//! through the execution store and tells the engine to suspend. Gates with
//! neither approve.
//!
//! [`ApprovalRequest`]: crate::store::ApprovalRequest

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::StoreError;
use crate::store::ExecutionStateStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    /// Before a requested tool call is performed.
    ToolExecution,
    /// After a tool ran, before its result is recorded and sent to the model.
    ToolResult,
    /// Before the agent's final answer is accepted.
    FinalResponse,
    /// Before a workflow step calls the model.
    StepExecution,
    /// After a workflow step produced its output.
    StepResult,
}

impl GateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolExecution => "tool_execution",
            Self::ToolResult => "tool_result",
            Self::FinalResponse => "final_response",
            Self::StepExecution => "step_execution",
            Self::StepResult => "step_result",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
    Modify(Value),
}

impl From<bool> for ApprovalDecision {
    fn from(approved: bool) -> Self {
        if approved { Self::Approve } else { Self::Reject }
    }
}

/// What an inline callback sees.
#[derive(Clone, Copy, Debug)]
pub struct GateRequest<'a> {
    pub execution_id: &'a str,
    pub kind: GateKind,
    pub payload: &'a Value,
    /// Workflow variables at the time of the decision; `None` for agent runs.
    pub context: Option<&'a ExecutionContext>,
}

pub type GateCallback = Arc<dyn Fn(&GateRequest<'_>) -> ApprovalDecision + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub enum GateOutcome {
    Decided(ApprovalDecision),
    /// The decision will arrive out of process; halt the run.
    Suspend { request_id: String },
}

#[derive(Clone, Default)]
pub struct ApprovalGate {
    callbacks: HashMap<GateKind, GateCallback>,
    /// Deferred kinds and the expiry of the requests they create.
    deferred: HashMap<GateKind, Option<u32>>,
    store: Option<Arc<dyn ExecutionStateStore>>,
}

impl fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut inline = self.callbacks.keys().map(|kind| kind.as_str()).collect::<Vec<_>>();
        inline.sort_unstable();
        f.debug_struct("ApprovalGate")
            .field("inline", &inline)
            .field("deferred", &self.deferred)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, kind: GateKind, callback: F) -> Self
    where
        F: Fn(&GateRequest<'_>) -> ApprovalDecision + Send + Sync + 'static,
    {
        self.callbacks.insert(kind, Arc::new(callback));
        self
    }

    /// Marks `kinds` for out-of-process approval. Their requests expire
    /// after `timeout_minutes` when set; kinds deferred by earlier calls keep
    /// their own timeout.
    pub fn defer(mut self, kinds: impl IntoIterator<Item = GateKind>, timeout_minutes: Option<u32>) -> Self {
        self.deferred
            .extend(kinds.into_iter().map(|kind| (kind, timeout_minutes)));
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ExecutionStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn is_deferred(&self, kind: GateKind) -> bool {
        self.deferred.contains_key(&kind)
    }

    pub async fn decide(&self, request: GateRequest<'_>) -> Result<GateOutcome, StoreError> {
        if let Some(callback) = self.callbacks.get(&request.kind) {
            let decision = callback(&request);
            tracing::debug!(
                execution_id = request.execution_id,
                gate = %request.kind,
                ?decision,
                "inline approval decided"
            );
            return Ok(GateOutcome::Decided(decision));
        }

        let Some(&timeout_minutes) = self.deferred.get(&request.kind) else {
            return Ok(GateOutcome::Decided(ApprovalDecision::Approve));
        };

        let store = self.store.as_ref().ok_or_else(|| {
            StoreError::Storage(format!(
                "gate {} is deferred but no execution store is configured",
                request.kind
            ))
        })?;
        let request_id = store
            .create_approval_request(
                request.execution_id,
                request.kind,
                request.payload.clone(),
                timeout_minutes,
            )
            .await?;
        tracing::info!(
            execution_id = request.execution_id,
            gate = %request.kind,
            request_id = %request_id,
            "approval deferred to external decision"
        );
        Ok(GateOutcome::Suspend { request_id })
    }
}
