//! Persistence of application and deployment records
//!
//! The engine never owns the records; it reads application configuration
//! and updates deployments through [`DeploymentStore`]. Two implementations
//! ship with the engine: [`memory::MemoryStore`] for standalone operation
//! and tests, and [`http::HttpStore`] backed by the control plane API.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use platform_models::{
    Application, CanaryState, DeploymentRequest, DeploymentStatus, DeploymentUpdate, LogEntry,
    RollbackEvent,
};

use crate::errors::EngineError;

/// Persistence collaborator
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Load an application's configuration
    async fn application(&self, application_id: &str) -> Result<Application, EngineError>;

    /// Load a deployment record
    async fn deployment(&self, deployment_uuid: &str) -> Result<DeploymentRequest, EngineError>;

    /// Persist a new (queued) deployment
    async fn insert_deployment(&self, deployment: DeploymentRequest) -> Result<(), EngineError>;

    /// Set `to` only when the current status is `from`; returns whether it was applied
    async fn compare_and_set_status(
        &self,
        deployment_uuid: &str,
        from: DeploymentStatus,
        to: DeploymentStatus,
    ) -> Result<bool, EngineError>;

    /// Update commit information
    async fn update_deployment(
        &self,
        deployment_uuid: &str,
        update: DeploymentUpdate,
    ) -> Result<(), EngineError>;

    /// Atomically move the oldest queued deployment of an application to
    /// `in_progress`, unless one is already active
    async fn claim_next_queued(
        &self,
        application_id: &str,
    ) -> Result<Option<DeploymentRequest>, EngineError>;

    /// Append log entries; entries arrive in `order`
    async fn append_logs(&self, deployment_uuid: &str, entries: &[LogEntry])
        -> Result<(), EngineError>;

    /// Entries with `order` greater than `after`
    async fn logs_after(&self, deployment_uuid: &str, after: u64)
        -> Result<Vec<LogEntry>, EngineError>;

    /// Highest persisted log order, 0 when empty
    async fn last_log_order(&self, deployment_uuid: &str) -> Result<u64, EngineError>;

    /// Replace the canary state when the stored step matches `expected_step`
    /// (`None` expects no canary state); returns whether it was applied
    async fn compare_and_set_canary(
        &self,
        deployment_uuid: &str,
        expected_step: Option<u32>,
        state: Option<CanaryState>,
    ) -> Result<bool, EngineError>;

    /// Deployments with a canary in progress
    async fn active_canaries(&self) -> Result<Vec<DeploymentRequest>, EngineError>;

    async fn record_rollback_event(&self, event: RollbackEvent) -> Result<(), EngineError>;

    /// Reset the consecutive restart counter of an application
    async fn reset_restart_count(&self, application_id: &str) -> Result<(), EngineError>;

    async fn set_application_status(
        &self,
        application_id: &str,
        status: &str,
    ) -> Result<(), EngineError>;
}
