//! Per-application deployment queue
//!
//! Deployments of one application run one at a time: a worker asks for the
//! next deployment whenever it is signalled, and the store only hands one
//! out when no other deployment of the application is active.

use std::collections::HashMap;
use std::sync::Arc;

use platform_models::DeploymentRequest;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::remote::CancelSignal;
use crate::store::DeploymentStore;

/// Application whose queue should be looked at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSignal {
    pub application_id: String,
}

struct RunningJob {
    application_id: String,
    cancel: CancelSignal,
}

pub struct DeploymentQueue {
    store: Arc<dyn DeploymentStore>,
    signals: mpsc::UnboundedSender<QueueSignal>,
    /// Jobs still executing, keyed by deployment uuid. A cancelled job
    /// stays here until its pipeline returns.
    running: Mutex<HashMap<String, RunningJob>>,
}

impl DeploymentQueue {
    pub fn new(store: Arc<dyn DeploymentStore>, signals: mpsc::UnboundedSender<QueueSignal>) -> Self {
        Self {
            store,
            signals,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a queued deployment and wake the worker
    pub async fn enqueue(&self, deployment: DeploymentRequest) -> Result<DeploymentRequest, EngineError> {
        debug!(
            "Queueing deployment {} of application {}",
            deployment.deployment_uuid, deployment.application_id
        );
        self.store.insert_deployment(deployment.clone()).await?;
        self.signal(&deployment.application_id);
        Ok(deployment)
    }

    /// Ask the worker to start the next deployment of an application
    pub fn signal(&self, application_id: &str) {
        let signal = QueueSignal {
            application_id: application_id.to_string(),
        };
        if self.signals.send(signal).is_err() {
            warn!("Deployer worker is not running, queue of {} not started", application_id);
        }
    }

    /// Claim the oldest queued deployment when none is active, registering
    /// its cancellation flag.
    ///
    /// A job of the application still executing here blocks the claim even
    /// when its record already left `in_progress` (cancelled mid-run); its
    /// `finish` signals the queue again.
    pub async fn claim_next(
        &self,
        application_id: &str,
    ) -> Result<Option<(DeploymentRequest, CancelSignal)>, EngineError> {
        let mut running = self.running.lock().await;
        if running.values().any(|job| job.application_id == application_id) {
            debug!("Application {} still has a deployment running", application_id);
            return Ok(None);
        }
        let Some(deployment) = self.store.claim_next_queued(application_id).await? else {
            return Ok(None);
        };
        let cancel = CancelSignal::new();
        running.insert(
            deployment.deployment_uuid.clone(),
            RunningJob {
                application_id: deployment.application_id.clone(),
                cancel: cancel.clone(),
            },
        );
        Ok(Some((deployment, cancel)))
    }

    /// Forget a deployment whose pipeline returned and wake its queue
    pub async fn finish(&self, deployment_uuid: &str) {
        let job = self.running.lock().await.remove(deployment_uuid);
        if let Some(job) = job {
            self.signal(&job.application_id);
        }
    }

    /// Flag a running deployment as cancelled; false when it is not running here
    pub async fn cancel(&self, deployment_uuid: &str) -> bool {
        match self.running.lock().await.get(deployment_uuid) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, deployment_uuid: &str) -> bool {
        self.running.lock().await.contains_key(deployment_uuid)
    }
}
