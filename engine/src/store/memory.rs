//! In-process deployment store

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use platform_models::{
    Application, CanaryState, DeploymentRequest, DeploymentStatus, DeploymentUpdate, LogEntry,
    RollbackEvent,
};

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::store::DeploymentStore;

#[derive(Default)]
struct Tables {
    applications: HashMap<String, Application>,
    deployments: HashMap<String, DeploymentRequest>,
    logs: HashMap<String, Vec<LogEntry>>,
    rollback_events: Vec<RollbackEvent>,
}

/// Store keeping every record in memory, seeded with application configs
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given applications
    pub fn with_applications(applications: Vec<Application>) -> Self {
        let store = Self::new();
        for app in applications {
            store.upsert_application(app);
        }
        store
    }

    /// Load application configs from a JSON array file
    pub async fn load(file: &File) -> Result<Self, EngineError> {
        let applications: Vec<Application> = if file.exists().await {
            file.read_json().await?
        } else {
            Vec::new()
        };
        Ok(Self::with_applications(applications))
    }

    pub fn upsert_application(&self, application: Application) {
        let mut tables = self.lock();
        tables
            .applications
            .insert(application.id.clone(), application);
    }

    /// Deployments of an application, oldest first
    pub fn deployments_for(&self, application_id: &str) -> Vec<DeploymentRequest> {
        let tables = self.lock();
        let mut deployments: Vec<_> = tables
            .deployments
            .values()
            .filter(|d| d.application_id == application_id)
            .cloned()
            .collect();
        deployments.sort_by_key(|d| d.created_at);
        deployments
    }

    pub fn rollback_events(&self) -> Vec<RollbackEvent> {
        self.lock().rollback_events.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn deployment_not_found(uuid: &str) -> EngineError {
    EngineError::NotFound(format!("deployment {uuid}"))
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn application(&self, application_id: &str) -> Result<Application, EngineError> {
        self.lock()
            .applications
            .get(application_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("application {application_id}")))
    }

    async fn deployment(&self, deployment_uuid: &str) -> Result<DeploymentRequest, EngineError> {
        self.lock()
            .deployments
            .get(deployment_uuid)
            .cloned()
            .ok_or_else(|| deployment_not_found(deployment_uuid))
    }

    async fn insert_deployment(&self, deployment: DeploymentRequest) -> Result<(), EngineError> {
        let mut tables = self.lock();
        if tables.deployments.contains_key(&deployment.deployment_uuid) {
            return Err(EngineError::ValidationError(format!(
                "deployment {} already exists",
                deployment.deployment_uuid
            )));
        }
        tables
            .deployments
            .insert(deployment.deployment_uuid.clone(), deployment);
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        deployment_uuid: &str,
        from: DeploymentStatus,
        to: DeploymentStatus,
    ) -> Result<bool, EngineError> {
        let mut tables = self.lock();
        let deployment = tables
            .deployments
            .get_mut(deployment_uuid)
            .ok_or_else(|| deployment_not_found(deployment_uuid))?;
        if deployment.status != from {
            return Ok(false);
        }
        deployment.status = to;
        deployment.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_deployment(
        &self,
        deployment_uuid: &str,
        update: DeploymentUpdate,
    ) -> Result<(), EngineError> {
        let mut tables = self.lock();
        let deployment = tables
            .deployments
            .get_mut(deployment_uuid)
            .ok_or_else(|| deployment_not_found(deployment_uuid))?;
        if let Some(commit) = update.commit {
            deployment.commit = commit;
        }
        if let Some(message) = update.commit_message {
            deployment.commit_message = Some(message);
        }
        deployment.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_next_queued(
        &self,
        application_id: &str,
    ) -> Result<Option<DeploymentRequest>, EngineError> {
        let mut tables = self.lock();
        let busy = tables.deployments.values().any(|d| {
            d.application_id == application_id && d.status == DeploymentStatus::InProgress
        });
        if busy {
            return Ok(None);
        }

        let next = tables
            .deployments
            .values()
            .filter(|d| d.application_id == application_id && d.status == DeploymentStatus::Queued)
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.deployment_uuid.cmp(&b.deployment_uuid))
            })
            .map(|d| d.deployment_uuid.clone());

        Ok(next.and_then(|uuid| {
            tables.deployments.get_mut(&uuid).map(|d| {
                d.status = DeploymentStatus::InProgress;
                d.updated_at = Utc::now();
                d.clone()
            })
        }))
    }

    async fn append_logs(
        &self,
        deployment_uuid: &str,
        entries: &[LogEntry],
    ) -> Result<(), EngineError> {
        let mut tables = self.lock();
        tables
            .logs
            .entry(deployment_uuid.to_string())
            .or_default()
            .extend_from_slice(entries);
        Ok(())
    }

    async fn logs_after(
        &self,
        deployment_uuid: &str,
        after: u64,
    ) -> Result<Vec<LogEntry>, EngineError> {
        let tables = self.lock();
        Ok(tables
            .logs
            .get(deployment_uuid)
            .map(|logs| logs.iter().filter(|l| l.order > after).cloned().collect())
            .unwrap_or_default())
    }

    async fn last_log_order(&self, deployment_uuid: &str) -> Result<u64, EngineError> {
        let tables = self.lock();
        Ok(tables
            .logs
            .get(deployment_uuid)
            .and_then(|logs| logs.last())
            .map(|l| l.order)
            .unwrap_or(0))
    }

    async fn compare_and_set_canary(
        &self,
        deployment_uuid: &str,
        expected_step: Option<u32>,
        state: Option<CanaryState>,
    ) -> Result<bool, EngineError> {
        let mut tables = self.lock();
        let deployment = tables
            .deployments
            .get_mut(deployment_uuid)
            .ok_or_else(|| deployment_not_found(deployment_uuid))?;
        let current_step = deployment.canary_state.as_ref().map(|c| c.current_step);
        if current_step != expected_step {
            return Ok(false);
        }
        deployment.canary_state = state;
        deployment.updated_at = Utc::now();
        Ok(true)
    }

    async fn active_canaries(&self) -> Result<Vec<DeploymentRequest>, EngineError> {
        let tables = self.lock();
        Ok(tables
            .deployments
            .values()
            .filter(|d| d.canary_state.is_some())
            .cloned()
            .collect())
    }

    async fn record_rollback_event(&self, event: RollbackEvent) -> Result<(), EngineError> {
        self.lock().rollback_events.push(event);
        Ok(())
    }

    async fn reset_restart_count(&self, application_id: &str) -> Result<(), EngineError> {
        if let Some(app) = self.lock().applications.get_mut(application_id) {
            app.restart_count = 0;
        }
        Ok(())
    }

    async fn set_application_status(
        &self,
        application_id: &str,
        status: &str,
    ) -> Result<(), EngineError> {
        if let Some(app) = self.lock().applications.get_mut(application_id) {
            app.status = status.to_string();
        }
        Ok(())
    }
}
