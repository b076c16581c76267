//! Engine API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use platform_models::{CanaryState, DeploymentRequest, DeploymentStatus, LogEntry};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Deployment trigger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueDeploymentRequest {
    /// Commit SHA, `HEAD` when absent
    #[serde(default)]
    pub commit: Option<String>,

    #[serde(default)]
    pub pull_request_id: u32,

    #[serde(default)]
    pub force_rebuild: bool,

    #[serde(default)]
    pub restart_only: bool,
}

/// Deployment trigger response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDeploymentResponse {
    pub deployment_uuid: String,
    pub status: DeploymentStatus,
    pub message: String,
}

/// Deployment summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub deployment_uuid: String,
    pub application_id: String,
    pub status: DeploymentStatus,
    pub commit: String,
    pub commit_message: Option<String>,
    pub pull_request_id: u32,
    pub canary_state: Option<CanaryState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DeploymentRequest> for DeploymentResponse {
    fn from(d: DeploymentRequest) -> Self {
        Self {
            deployment_uuid: d.deployment_uuid,
            application_id: d.application_id,
            status: d.status,
            commit: d.commit,
            commit_message: d.commit_message,
            pull_request_id: d.pull_request_id,
            canary_state: d.canary_state,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

/// Cancellation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub deployment_uuid: String,
    /// False when the deployment had already reached a terminal status
    pub cancelled: bool,
    pub status: DeploymentStatus,
}

/// Log tail query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsQuery {
    /// Return entries with `order` greater than this
    #[serde(default)]
    pub after: u64,
}

/// Log tail page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub entries: Vec<LogEntry>,
    /// Cursor for the next request
    pub next_after: u64,
    pub status: DeploymentStatus,
    /// No more entries will be appended
    pub complete: bool,
}

/// Canary promote / rollback response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryActionResponse {
    pub deployment_uuid: String,
    pub action: String,
    pub message: String,
}
