//! Deployment worker: starts queued deployments when their queue is signalled

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::deploy::{DeploymentPipeline, DeploymentQueue, QueueSignal};

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Deployments building at the same time, across applications
    pub concurrent_builds: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            concurrent_builds: 4,
        }
    }
}

/// Run the deployer worker
pub async fn run(
    options: &Options,
    queue: Arc<DeploymentQueue>,
    pipeline: Arc<DeploymentPipeline>,
    mut signals: mpsc::UnboundedReceiver<QueueSignal>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Deployer worker starting...");

    let permits = Arc::new(Semaphore::new(options.concurrent_builds.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployer worker shutting down, aborting {} deployment(s)...", tasks.len());
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                return;
            }
            signal = signals.recv() => {
                let Some(signal) = signal else {
                    warn!("Deployment queue closed, deployer worker stopping");
                    return;
                };
                tasks.spawn(start_next(
                    signal,
                    queue.clone(),
                    pipeline.clone(),
                    permits.clone(),
                ));
            }
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = result {
                    error!("Deployment task failed: {}", e);
                }
            }
        }
    }
}

async fn start_next(
    signal: QueueSignal,
    queue: Arc<DeploymentQueue>,
    pipeline: Arc<DeploymentPipeline>,
    permits: Arc<Semaphore>,
) {
    let Ok(_permit) = permits.acquire_owned().await else {
        return;
    };

    let (deployment, cancel) = match queue.claim_next(&signal.application_id).await {
        Ok(Some(claimed)) => claimed,
        Ok(None) => {
            debug!("Nothing to start for application {}", signal.application_id);
            return;
        }
        Err(e) => {
            error!(
                "Failed to claim the next deployment of {}: {}",
                signal.application_id, e
            );
            return;
        }
    };

    let uuid = deployment.deployment_uuid.clone();
    info!(
        "Starting deployment {} of application {}",
        uuid, signal.application_id
    );
    let status = pipeline.run(deployment, cancel).await;
    queue.finish(&uuid).await;
    info!("Deployment {} ended {}", uuid, status);
}
