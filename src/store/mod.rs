//! Persistence contract for pausing and resuming runs.

mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentExecutionState;
use crate::approval::{ApprovalDecision, GateKind};
use crate::error::StoreError;
use crate::state::ExecutionStatus;
use crate::workflow::WorkflowExecutionState;

pub use file::FileExecutionStore;
pub use memory::MemoryExecutionStore;

/// The latest persisted state of one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionSnapshot {
    Agent(AgentExecutionState),
    Workflow(WorkflowExecutionState),
}

impl ExecutionSnapshot {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Agent(state) => state.status,
            Self::Workflow(state) => state.status,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
    Expired,
}

/// An out-of-process approval awaiting, or holding, a decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub execution_id: String,
    pub kind: GateKind,
    pub payload: Value,
    pub decision: Option<ApprovalDecision>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(
        execution_id: impl Into<String>,
        kind: GateKind,
        payload: Value,
        timeout_minutes: Option<u32>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            execution_id: execution_id.into(),
            kind,
            payload,
            decision: None,
            created_at,
            expires_at: timeout_minutes
                .map(|minutes| created_at + Duration::minutes(i64::from(minutes))),
            decided_at: None,
        }
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> ApprovalStatus {
        match &self.decision {
            Some(ApprovalDecision::Approve) => ApprovalStatus::Approved,
            Some(ApprovalDecision::Reject) => ApprovalStatus::Rejected,
            Some(ApprovalDecision::Modify(_)) => ApprovalStatus::Modified,
            None if self.expires_at.is_some_and(|at| at <= now) => ApprovalStatus::Expired,
            None => ApprovalStatus::Pending,
        }
    }

    /// The decision a resuming caller should apply: the recorded one, an
    /// implicit reject once expired, or `None` while still pending.
    pub fn effective_decision(&self, now: DateTime<Utc>) -> Option<ApprovalDecision> {
        match self.status_at(now) {
            ApprovalStatus::Pending => None,
            ApprovalStatus::Expired => Some(ApprovalDecision::Reject),
            ApprovalStatus::Approved | ApprovalStatus::Rejected | ApprovalStatus::Modified => {
                self.decision.clone()
            }
        }
    }

    /// Once expired, only the implicit rejection can be recorded.
    pub fn record(&mut self, decision: ApprovalDecision) -> Result<(), StoreError> {
        if self.decision.is_some() {
            return Err(StoreError::AlreadyDecided(self.id.clone()));
        }
        if decision != ApprovalDecision::Reject
            && self.status_at(Utc::now()) == ApprovalStatus::Expired
        {
            return Err(StoreError::Expired(self.id.clone()));
        }
        self.decision = Some(decision);
        self.decided_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    async fn save(&self, execution_id: &str, snapshot: &ExecutionSnapshot)
        -> Result<(), StoreError>;

    async fn load(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>, StoreError>;

    async fn create_approval_request(
        &self,
        execution_id: &str,
        kind: GateKind,
        payload: Value,
        timeout_minutes: Option<u32>,
    ) -> Result<String, StoreError>;

    async fn record_approval_decision(
        &self,
        request_id: &str,
        decision: &ApprovalDecision,
    ) -> Result<(), StoreError>;

    async fn approval_request(&self, request_id: &str)
        -> Result<Option<ApprovalRequest>, StoreError>;

    /// Records a resuming caller's decision and returns the one that stands:
    /// `decision` itself, or `Reject` when the request expired undecided.
    async fn settle_approval(
        &self,
        request_id: &str,
        decision: ApprovalDecision,
    ) -> Result<ApprovalDecision, StoreError> {
        let request = self
            .approval_request(request_id)
            .await?
            .ok_or_else(|| StoreError::ApprovalNotFound(request_id.to_string()))?;
        let decision = if request.status_at(Utc::now()) == ApprovalStatus::Expired {
            tracing::info!(%request_id, "approval request expired; treating as rejected");
            ApprovalDecision::Reject
        } else {
            decision
        };
        self.record_approval_decision(request_id, &decision).await?;
        Ok(decision)
    }
}
