//! Server state

use std::sync::Arc;

use crate::deploy::{DeploymentQueue, DeploymentStatusManager};
use crate::rollout::CanaryManager;
use crate::store::DeploymentStore;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<dyn DeploymentStore>,
    pub queue: Arc<DeploymentQueue>,
    pub status: Arc<DeploymentStatusManager>,
    pub canary: Arc<CanaryManager>,
}

impl ServerState {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        queue: Arc<DeploymentQueue>,
        status: Arc<DeploymentStatusManager>,
        canary: Arc<CanaryManager>,
    ) -> Self {
        Self {
            store,
            queue,
            status,
            canary,
        }
    }
}
