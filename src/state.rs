//! Lifecycle vocabulary shared by agent and workflow runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::approval::GateKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The gate a paused run is waiting on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub kind: GateKind,
    pub request_id: String,
    /// Workflow step the gate belongs to; `None` for agent runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    pub data: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    MaxIterationsExceeded,
    ProviderError,
    InterpolationError,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxIterationsExceeded => "max_iterations_exceeded",
            Self::ProviderError => "provider_error",
            Self::InterpolationError => "interpolation_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub reason: FailureReason,
    pub message: String,
    /// Workflow step that failed; always `None` for agent runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}
