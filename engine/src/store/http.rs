//! Deployment store backed by the control plane REST API

use async_trait::async_trait;
use platform_models::{
    Application, CanaryState, DeploymentRequest, DeploymentStatus, DeploymentUpdate, LogEntry,
    RollbackEvent,
};
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::http::client::HttpClient;
use crate::store::DeploymentStore;

#[derive(Debug, Serialize)]
struct StatusTransition {
    from: DeploymentStatus,
    to: DeploymentStatus,
}

#[derive(Debug, Serialize)]
struct CanaryTransition<'a> {
    expected_step: Option<u32>,
    state: Option<&'a CanaryState>,
}

#[derive(Debug, Deserialize)]
struct Applied {
    applied: bool,
}

#[derive(Debug, Serialize)]
struct LogBatch<'a> {
    entries: &'a [LogEntry],
}

#[derive(Debug, Deserialize)]
struct LogPage {
    entries: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
struct LastOrder {
    order: u64,
}

#[derive(Debug, Serialize)]
struct ApplicationStatus<'a> {
    status: &'a str,
}

/// Store delegating to the control plane
pub struct HttpStore {
    client: HttpClient,
}

impl HttpStore {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeploymentStore for HttpStore {
    async fn application(&self, application_id: &str) -> Result<Application, EngineError> {
        self.client
            .get(&format!("/applications/{}", application_id))
            .await
    }

    async fn deployment(&self, deployment_uuid: &str) -> Result<DeploymentRequest, EngineError> {
        self.client
            .get(&format!("/deployments/{}", deployment_uuid))
            .await
    }

    async fn insert_deployment(&self, deployment: DeploymentRequest) -> Result<(), EngineError> {
        let _: serde_json::Value = self.client.post("/deployments", &deployment).await?;
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        deployment_uuid: &str,
        from: DeploymentStatus,
        to: DeploymentStatus,
    ) -> Result<bool, EngineError> {
        let applied: Applied = self
            .client
            .post(
                &format!("/deployments/{}/status", deployment_uuid),
                &StatusTransition { from, to },
            )
            .await?;
        Ok(applied.applied)
    }

    async fn update_deployment(
        &self,
        deployment_uuid: &str,
        update: DeploymentUpdate,
    ) -> Result<(), EngineError> {
        let _: serde_json::Value = self
            .client
            .patch(&format!("/deployments/{}", deployment_uuid), &update)
            .await?;
        Ok(())
    }

    async fn claim_next_queued(
        &self,
        application_id: &str,
    ) -> Result<Option<DeploymentRequest>, EngineError> {
        self.client
            .post(
                &format!("/applications/{}/deployments/claim", application_id),
                &serde_json::json!({}),
            )
            .await
    }

    async fn append_logs(
        &self,
        deployment_uuid: &str,
        entries: &[LogEntry],
    ) -> Result<(), EngineError> {
        let _: serde_json::Value = self
            .client
            .post(
                &format!("/deployments/{}/logs", deployment_uuid),
                &LogBatch { entries },
            )
            .await?;
        Ok(())
    }

    async fn logs_after(
        &self,
        deployment_uuid: &str,
        after: u64,
    ) -> Result<Vec<LogEntry>, EngineError> {
        let page: LogPage = self
            .client
            .get(&format!("/deployments/{}/logs?after={}", deployment_uuid, after))
            .await?;
        Ok(page.entries)
    }

    async fn last_log_order(&self, deployment_uuid: &str) -> Result<u64, EngineError> {
        let last: Option<LastOrder> = self
            .client
            .get_optional(&format!("/deployments/{}/logs/last", deployment_uuid))
            .await?;
        Ok(last.map(|l| l.order).unwrap_or(0))
    }

    async fn compare_and_set_canary(
        &self,
        deployment_uuid: &str,
        expected_step: Option<u32>,
        state: Option<CanaryState>,
    ) -> Result<bool, EngineError> {
        let applied: Applied = self
            .client
            .put(
                &format!("/deployments/{}/canary", deployment_uuid),
                &CanaryTransition {
                    expected_step,
                    state: state.as_ref(),
                },
            )
            .await?;
        Ok(applied.applied)
    }

    async fn active_canaries(&self) -> Result<Vec<DeploymentRequest>, EngineError> {
        self.client.get("/deployments?canary=active").await
    }

    async fn record_rollback_event(&self, event: RollbackEvent) -> Result<(), EngineError> {
        let _: serde_json::Value = self.client.post("/rollback-events", &event).await?;
        Ok(())
    }

    async fn reset_restart_count(&self, application_id: &str) -> Result<(), EngineError> {
        let _: serde_json::Value = self
            .client
            .post(
                &format!("/applications/{}/restart-count/reset", application_id),
                &serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    async fn set_application_status(
        &self,
        application_id: &str,
        status: &str,
    ) -> Result<(), EngineError> {
        let _: serde_json::Value = self
            .client
            .patch(
                &format!("/applications/{}/status", application_id),
                &ApplicationStatus { status },
            )
            .await?;
        Ok(())
    }
}
