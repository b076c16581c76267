//! Canary worker: delivers delayed step advances

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::rollout::{CanaryManager, CanaryTick};

/// Canary worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Reschedule canaries found in the store at startup
    pub recover_on_start: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            recover_on_start: true,
        }
    }
}

/// Run the canary worker
pub async fn run<S, F>(
    options: &Options,
    manager: Arc<CanaryManager>,
    mut ticks: mpsc::UnboundedReceiver<CanaryTick>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F + Clone + Send + Sync + 'static,
    F: Future<Output = ()> + Send,
{
    info!("Canary worker starting...");

    if options.recover_on_start {
        match manager.recover().await {
            Ok(0) => {}
            Ok(n) => info!("Recovered {} canary rollout(s)", n),
            Err(e) => error!("Failed to recover canary rollouts: {}", e),
        }
    }

    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Canary worker shutting down...");
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                return;
            }
            tick = ticks.recv() => {
                let Some(tick) = tick else {
                    warn!("Canary tick channel closed, canary worker stopping");
                    return;
                };
                let manager = manager.clone();
                let sleep_fn = sleep_fn.clone();
                tasks.spawn(async move {
                    sleep_fn(tick.delay).await;
                    match manager.advance(&tick.deployment_uuid, tick.step).await {
                        Ok(progress) => debug!(
                            "Canary of {} at step {}: {:?}",
                            tick.deployment_uuid, tick.step, progress
                        ),
                        Err(e) => error!(
                            "Canary step {} of {} failed: {}",
                            tick.step, tick.deployment_uuid, e
                        ),
                    }
                });
            }
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = result {
                    error!("Canary task failed: {}", e);
                }
            }
        }
    }
}
