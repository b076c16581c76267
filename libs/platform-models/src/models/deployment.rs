//! Deployment records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::application::Destination;

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "finished")]
    Finished,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled-by-user")]
    CancelledByUser,
}

impl DeploymentStatus {
    /// Terminal statuses can never be left
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Finished | DeploymentStatus::Failed | DeploymentStatus::CancelledByUser
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Finished => "finished",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::CancelledByUser => "cancelled-by-user",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canary rollout progress persisted on the deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanaryState {
    pub canary_container: String,
    pub stable_container: String,
    /// Index into the application's canary steps
    pub current_step: u32,
    /// Canary traffic share, 0-100
    pub current_weight: u8,
    pub started_at: DateTime<Utc>,
}

/// A deployment record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub deployment_uuid: String,

    pub application_id: String,

    pub destination: Destination,

    /// Commit SHA or `HEAD`
    pub commit: String,

    #[serde(default)]
    pub commit_message: Option<String>,

    /// 0 when not a pull request deployment
    #[serde(default)]
    pub pull_request_id: u32,

    #[serde(default)]
    pub force_rebuild: bool,

    /// Reuse an existing image instead of building
    #[serde(default)]
    pub restart_only: bool,

    /// Fan-out deployment to a secondary destination
    #[serde(default)]
    pub is_additional: bool,

    pub status: DeploymentStatus,

    #[serde(default)]
    pub canary_state: Option<CanaryState>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl DeploymentRequest {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request_id != 0
    }
}

/// Parameters for a new deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDeployment {
    pub application_id: String,

    /// Defaults to the application's primary destination
    #[serde(default)]
    pub destination: Option<Destination>,

    #[serde(default)]
    pub commit: Option<String>,

    #[serde(default)]
    pub pull_request_id: u32,

    #[serde(default)]
    pub force_rebuild: bool,

    #[serde(default)]
    pub restart_only: bool,

    #[serde(default)]
    pub is_additional: bool,
}

impl NewDeployment {
    /// Build a queued record for this request
    pub fn into_request(self, destination: Destination) -> DeploymentRequest {
        let now = Utc::now();
        DeploymentRequest {
            deployment_uuid: uuid::Uuid::new_v4().simple().to_string(),
            application_id: self.application_id,
            destination: self.destination.unwrap_or(destination),
            commit: self.commit.unwrap_or_else(|| "HEAD".to_string()),
            commit_message: None,
            pull_request_id: self.pull_request_id,
            force_rebuild: self.force_rebuild,
            restart_only: self.restart_only,
            is_additional: self.is_additional,
            status: DeploymentStatus::Queued,
            canary_state: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Mutable fields updated during a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
}

/// Output stream of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// A single deployment log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number within the deployment, starting at 1
    pub order: u64,

    pub timestamp: DateTime<Utc>,

    pub output: String,

    #[serde(rename = "type")]
    pub stream: LogStream,

    /// Debug-only lines, excluded from the public log
    pub hidden: bool,

    /// Flush batch the line was persisted in
    pub batch: u32,
}

/// Audit record written when a canary is rolled back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEvent {
    pub deployment_uuid: String,
    pub application_id: String,
    pub canary_container: String,
    pub stable_container: String,
    pub weight_at_rollback: u8,
    pub step: u32,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}
