use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ApprovalRequest, ExecutionSnapshot, ExecutionStateStore};
use crate::approval::{ApprovalDecision, GateKind};
use crate::error::StoreError;

/// Stores each execution and approval request as a JSON file:
/// `<root>/executions/<id>.json` and `<root>/approvals/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileExecutionStore {
    root: PathBuf,
}

impl FileExecutionStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        for dir in ["executions", "approvals"] {
            std::fs::create_dir_all(root.join(dir))
                .map_err(|err| StoreError::Storage(err.to_string()))?;
        }
        Ok(Self { root })
    }

    fn execution_path(&self, execution_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join("executions")
            .join(format!("{}.json", checked_id(execution_id)?)))
    }

    fn approval_path(&self, request_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join("approvals")
            .join(format!("{}.json", checked_id(request_id)?)))
    }
}

/// Ids become file names, so anything that could walk out of the directory
/// is refused.
fn checked_id(id: &str) -> Result<&str, StoreError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(StoreError::Storage(format!("invalid record id: {id:?}")))
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|err| StoreError::Serialization(err.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|err| StoreError::Storage(err.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|err| StoreError::Storage(err.to_string()))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::Storage(err.to_string())),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| StoreError::Corrupted(format!("{}: {err}", path.display())))
}

#[async_trait]
impl ExecutionStateStore for FileExecutionStore {
    async fn save(
        &self,
        execution_id: &str,
        snapshot: &ExecutionSnapshot,
    ) -> Result<(), StoreError> {
        write_json(&self.execution_path(execution_id)?, snapshot).await
    }

    async fn load(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>, StoreError> {
        read_json(&self.execution_path(execution_id)?).await
    }

    async fn create_approval_request(
        &self,
        execution_id: &str,
        kind: GateKind,
        payload: Value,
        timeout_minutes: Option<u32>,
    ) -> Result<String, StoreError> {
        let request = ApprovalRequest::new(execution_id, kind, payload, timeout_minutes);
        write_json(&self.approval_path(&request.id)?, &request).await?;
        Ok(request.id)
    }

    async fn record_approval_decision(
        &self,
        request_id: &str,
        decision: &ApprovalDecision,
    ) -> Result<(), StoreError> {
        let path = self.approval_path(request_id)?;
        let mut request = read_json::<ApprovalRequest>(&path)
            .await?
            .ok_or_else(|| StoreError::ApprovalNotFound(request_id.to_string()))?;
        request.record(decision.clone())?;
        write_json(&path, &request).await
    }

    async fn approval_request(
        &self,
        request_id: &str,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        read_json(&self.approval_path(request_id)?).await
    }
}
