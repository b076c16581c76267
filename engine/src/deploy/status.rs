//! Deployment status transitions and their side effects

use std::sync::Arc;

use platform_models::{DeploymentRequest, DeploymentStatus, NewDeployment};
use tracing::{debug, info, warn};

use crate::deploy::queue::DeploymentQueue;
use crate::errors::EngineError;
use crate::notify::{EngineEvent, EventSink};
use crate::store::DeploymentStore;

/// Owner of the deployment record's status.
///
/// Transitions are compare-and-set against the stored status; once a
/// deployment is terminal no caller can move it again.
pub struct DeploymentStatusManager {
    store: Arc<dyn DeploymentStore>,
    events: Arc<dyn EventSink>,
    queue: Arc<DeploymentQueue>,
}

impl DeploymentStatusManager {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        events: Arc<dyn EventSink>,
        queue: Arc<DeploymentQueue>,
    ) -> Self {
        Self {
            store,
            events,
            queue,
        }
    }

    /// Move a deployment to `to`; returns whether the transition was applied
    pub async fn transition_to(
        &self,
        deployment_uuid: &str,
        to: DeploymentStatus,
    ) -> Result<bool, EngineError> {
        loop {
            let current = self.store.deployment(deployment_uuid).await?;
            if current.status.is_terminal() || current.status == to {
                debug!(
                    "Deployment {} stays {} (requested {})",
                    deployment_uuid, current.status, to
                );
                return Ok(false);
            }
            if self
                .store
                .compare_and_set_status(deployment_uuid, current.status, to)
                .await?
            {
                info!("Deployment {}: {} -> {}", deployment_uuid, current.status, to);
                self.after_transition(&current, to).await;
                return Ok(true);
            }
        }
    }

    /// Fail with `Cancelled` once the deployment was cancelled by a user
    pub async fn check_cancelled(&self, deployment_uuid: &str) -> Result<(), EngineError> {
        let deployment = self.store.deployment(deployment_uuid).await?;
        if deployment.status == DeploymentStatus::CancelledByUser {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    async fn after_transition(&self, deployment: &DeploymentRequest, to: DeploymentStatus) {
        let application_id = deployment.application_id.clone();
        match to {
            DeploymentStatus::Finished => {
                if let Err(e) = self.store.reset_restart_count(&application_id).await {
                    warn!("Failed to reset restart count of {}: {}", application_id, e);
                }
                self.events
                    .emit(EngineEvent::ConfigurationChanged {
                        application_id: application_id.clone(),
                    })
                    .await;
                if !deployment.is_additional {
                    if let Err(e) = self.fan_out(deployment).await {
                        warn!(
                            "Failed to queue additional destinations of {}: {}",
                            application_id, e
                        );
                    }
                }
                self.events
                    .emit(EngineEvent::DeploymentSucceeded {
                        deployment_uuid: deployment.deployment_uuid.clone(),
                        application_id: application_id.clone(),
                    })
                    .await;
            }
            DeploymentStatus::Failed => {
                self.events
                    .emit(EngineEvent::DeploymentFailed {
                        deployment_uuid: deployment.deployment_uuid.clone(),
                        application_id: application_id.clone(),
                    })
                    .await;
            }
            _ => {}
        }
        self.queue.signal(&application_id);
    }

    /// Queue restart-only deployments of the same commit on every
    /// additional destination
    async fn fan_out(&self, deployment: &DeploymentRequest) -> Result<(), EngineError> {
        let application = self.store.application(&deployment.application_id).await?;
        for destination in &application.additional_destinations {
            let request = NewDeployment {
                application_id: application.id.clone(),
                destination: Some(destination.clone()),
                commit: Some(deployment.commit.clone()),
                pull_request_id: deployment.pull_request_id,
                force_rebuild: false,
                restart_only: true,
                is_additional: true,
            }
            .into_request(application.destination.clone());
            info!(
                "Queueing {} on additional destination {}",
                application.name, destination.id
            );
            self.queue.enqueue(request).await?;
        }
        Ok(())
    }
}
