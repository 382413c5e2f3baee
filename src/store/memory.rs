use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{ApprovalRequest, ExecutionSnapshot, ExecutionStateStore};
use crate::approval::{ApprovalDecision, GateKind};
use crate::error::StoreError;

/// Process-local store, useful for tests and same-process pause/resume.
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    executions: RwLock<HashMap<String, ExecutionSnapshot>>,
    approvals: RwLock<HashMap<String, ApprovalRequest>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStateStore for MemoryExecutionStore {
    async fn save(
        &self,
        execution_id: &str,
        snapshot: &ExecutionSnapshot,
    ) -> Result<(), StoreError> {
        self.executions
            .write()
            .await
            .insert(execution_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>, StoreError> {
        Ok(self.executions.read().await.get(execution_id).cloned())
    }

    async fn create_approval_request(
        &self,
        execution_id: &str,
        kind: GateKind,
        payload: Value,
        timeout_minutes: Option<u32>,
    ) -> Result<String, StoreError> {
        let request = ApprovalRequest::new(execution_id, kind, payload, timeout_minutes);
        let id = request.id.clone();
        self.approvals.write().await.insert(id.clone(), request);
        Ok(id)
    }

    async fn record_approval_decision(
        &self,
        request_id: &str,
        decision: &ApprovalDecision,
    ) -> Result<(), StoreError> {
        let mut approvals = self.approvals.write().await;
        let request = approvals
            .get_mut(request_id)
            .ok_or_else(|| StoreError::ApprovalNotFound(request_id.to_string()))?;
        request.record(decision.clone())
    }

    async fn approval_request(
        &self,
        request_id: &str,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        Ok(self.approvals.read().await.get(request_id).cloned())
    }
}
