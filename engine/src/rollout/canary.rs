//! Canary rollouts: weighted traffic shifting between two containers
//!
//! The step sequence is persisted in the deployment's [`CanaryState`]. Every
//! mutation first moves the state with a compare-and-set on `current_step`,
//! so a tick delivered twice, or a tick racing an explicit promote, applies
//! at most once. Ticks are delivered by the canary worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use platform_models::{Application, CanaryState, DeploymentRequest, RollbackEvent};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::context::{service_port, BuildContext, CanaryPair};
use crate::deploy::log::DeploymentLog;
use crate::env::composer::fqdn_host;
use crate::errors::EngineError;
use crate::notify::{EngineEvent, EventSink};
use crate::remote::{shell, CancelSignal, RemoteCommand, RemoteExecutor, Transport};
use crate::rollout::traefik::{self, ProxyOptions, WeightedRoute};
use crate::store::DeploymentStore;

/// Request to advance a canary once `delay` has elapsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanaryTick {
    pub deployment_uuid: String,
    /// Step the canary is expected to be at
    pub step: u32,
    pub delay: Duration,
}

/// Result of a canary operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanaryProgress {
    Advanced { step: u32, weight: u8 },
    Promoted,
    RolledBack,
    /// The persisted state moved on, nothing was done
    Stale,
}

pub struct CanaryManager {
    store: Arc<dyn DeploymentStore>,
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
    proxy: ProxyOptions,
    ticks: mpsc::UnboundedSender<CanaryTick>,
    log_flush_batch: usize,
}

/// Route for an application's primary URL
fn route(
    application: &Application,
    deployment_uuid: &str,
    stable: &str,
    canary: &str,
) -> Result<WeightedRoute, EngineError> {
    let fqdn = application.fqdns().into_iter().next().ok_or_else(|| {
        EngineError::ValidationError("canary rollouts need a configured domain".to_string())
    })?;
    let host = fqdn_host(&fqdn)
        .ok_or_else(|| EngineError::ValidationError(format!("invalid domain {fqdn}")))?;
    Ok(WeightedRoute {
        deployment_uuid: deployment_uuid.to_string(),
        host,
        stable_container: stable.to_string(),
        canary_container: canary.to_string(),
        port: service_port(application),
    })
}

fn interval(application: &Application) -> Duration {
    Duration::from_secs(application.canary.step_interval_secs)
}

impl CanaryManager {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSink>,
        proxy: ProxyOptions,
        ticks: mpsc::UnboundedSender<CanaryTick>,
        log_flush_batch: usize,
    ) -> Self {
        Self {
            store,
            transport,
            events,
            proxy,
            ticks,
            log_flush_batch,
        }
    }

    pub fn proxy(&self) -> &ProxyOptions {
        &self.proxy
    }

    /// Queue a step advance
    pub fn schedule(&self, deployment_uuid: &str, step: u32, delay: Duration) {
        let tick = CanaryTick {
            deployment_uuid: deployment_uuid.to_string(),
            step,
            delay,
        };
        if self.ticks.send(tick).is_err() {
            warn!(
                "Canary worker is not running, deployment {} stays at step {}",
                deployment_uuid, step
            );
        }
    }

    fn proxy_executor(&self, executor: &RemoteExecutor) -> RemoteExecutor {
        match &self.proxy.server {
            Some(server) => executor.for_host(server.clone()),
            None => executor.clone(),
        }
    }

    async fn write_weights(
        &self,
        executor: &RemoteExecutor,
        route: &WeightedRoute,
        canary_weight: u8,
    ) -> Result<(), EngineError> {
        let config = route.config(canary_weight, &self.proxy);
        let command = traefik::write_command(&self.proxy, &route.deployment_uuid, &config)?;
        self.proxy_executor(executor).run_one(command).await?;
        executor
            .log()
            .info(format!(
                "Traffic split: {}% stable, {}% canary",
                traefik::calc_stable_weight(canary_weight),
                canary_weight.min(100)
            ))
            .await;
        Ok(())
    }

    async fn delete_config(&self, executor: &RemoteExecutor, deployment_uuid: &str) {
        let command = traefik::delete_command(&self.proxy, deployment_uuid);
        if let Err(e) = self.proxy_executor(executor).run_one(command).await {
            warn!("Failed to delete canary config of {}: {}", deployment_uuid, e);
        }
    }

    /// Start routing the first step's share of traffic to the new container
    pub async fn initiate(
        &self,
        ctx: &BuildContext,
        executor: &RemoteExecutor,
        pair: &CanaryPair,
    ) -> Result<CanaryState, EngineError> {
        let application = &ctx.application;
        let weight = application
            .canary
            .steps
            .first()
            .copied()
            .ok_or_else(|| EngineError::ValidationError("canary has no steps".to_string()))?
            .min(100);
        let route = route(application, ctx.deployment_uuid(), &pair.stable, &pair.canary)?;

        executor
            .log()
            .info(format!(
                "Starting canary rollout of {} next to {}",
                pair.canary, pair.stable
            ))
            .await;
        self.write_weights(executor, &route, weight).await?;

        let state = CanaryState {
            canary_container: pair.canary.clone(),
            stable_container: pair.stable.clone(),
            current_step: 0,
            current_weight: weight,
            started_at: Utc::now(),
        };
        let applied = self
            .store
            .compare_and_set_canary(ctx.deployment_uuid(), None, Some(state.clone()))
            .await?;
        if !applied {
            return Err(EngineError::ValidationError(format!(
                "deployment {} already has a canary in progress",
                ctx.deployment_uuid()
            )));
        }

        self.schedule(ctx.deployment_uuid(), 0, interval(application));
        Ok(state)
    }

    async fn open_executor(
        &self,
        deployment: &DeploymentRequest,
    ) -> Result<RemoteExecutor, EngineError> {
        let log = DeploymentLog::open(
            &deployment.deployment_uuid,
            self.store.clone(),
            self.log_flush_batch,
        )
        .await?;
        Ok(RemoteExecutor::new(
            self.transport.clone(),
            deployment.destination.server.clone(),
            Arc::new(log),
            CancelSignal::new(),
        ))
    }

    async fn load(
        &self,
        deployment_uuid: &str,
    ) -> Result<(DeploymentRequest, Application), EngineError> {
        let deployment = self.store.deployment(deployment_uuid).await?;
        let application = self.store.application(&deployment.application_id).await?;
        Ok((deployment, application))
    }

    async fn is_running(
        &self,
        executor: &RemoteExecutor,
        container: &str,
    ) -> Result<bool, EngineError> {
        let output = executor
            .run_one(
                RemoteCommand::host(format!(
                    "docker inspect --format '{{{{.State.Running}}}}' {}",
                    shell::quote_arg(container)
                ))
                .hidden()
                .ignore_errors(),
            )
            .await?;
        Ok(output.success() && output.stdout_trimmed() == "true")
    }

    /// Move to the next step, promoting after the last one
    pub async fn advance(
        &self,
        deployment_uuid: &str,
        expected_step: u32,
    ) -> Result<CanaryProgress, EngineError> {
        let (deployment, application) = self.load(deployment_uuid).await?;
        let Some(state) = deployment.canary_state.clone() else {
            return Ok(CanaryProgress::Stale);
        };
        if state.current_step != expected_step {
            return Ok(CanaryProgress::Stale);
        }

        let executor = self.open_executor(&deployment).await?;
        let result = self
            .advance_with(&executor, &deployment, &application, state)
            .await;
        executor.log().flush().await;
        result
    }

    async fn advance_with(
        &self,
        executor: &RemoteExecutor,
        deployment: &DeploymentRequest,
        application: &Application,
        state: CanaryState,
    ) -> Result<CanaryProgress, EngineError> {
        if !self.is_running(executor, &state.canary_container).await? {
            executor
                .log()
                .error(format!("Canary container {} is not running", state.canary_container))
                .await;
            return self
                .rollback_with(
                    executor,
                    deployment,
                    application,
                    state,
                    "canary container is not running",
                )
                .await;
        }

        let next = state.current_step + 1;
        let weight = match application.canary.steps.get(next as usize) {
            Some(&weight) if weight < 100 => weight,
            _ => {
                return self
                    .promote_with(executor, deployment, application, state)
                    .await
            }
        };

        let uuid = &deployment.deployment_uuid;
        let route = route(
            application,
            uuid,
            &state.stable_container,
            &state.canary_container,
        )?;
        let advanced = CanaryState {
            current_step: next,
            current_weight: weight,
            ..state.clone()
        };
        let applied = self
            .store
            .compare_and_set_canary(uuid, Some(state.current_step), Some(advanced))
            .await?;
        if !applied {
            return Ok(CanaryProgress::Stale);
        }

        if let Err(e) = self.write_weights(executor, &route, weight).await {
            // The proxy still serves the previous weight: put the step back
            // and retry it after another interval
            executor
                .log()
                .error(format!("Failed to move the canary to {weight}%: {e}"))
                .await;
            let reverted = self
                .store
                .compare_and_set_canary(uuid, Some(next), Some(state.clone()))
                .await?;
            if reverted {
                self.schedule(uuid, state.current_step, interval(application));
            }
            return Err(e);
        }
        self.schedule(uuid, next, interval(application));
        Ok(CanaryProgress::Advanced { step: next, weight })
    }

    async fn promote_with(
        &self,
        executor: &RemoteExecutor,
        deployment: &DeploymentRequest,
        application: &Application,
        state: CanaryState,
    ) -> Result<CanaryProgress, EngineError> {
        let uuid = &deployment.deployment_uuid;
        let applied = self
            .store
            .compare_and_set_canary(uuid, Some(state.current_step), None)
            .await?;
        if !applied {
            return Ok(CanaryProgress::Stale);
        }

        executor.log().info("Promoting canary").await;
        let result = async {
            let route = route(
                application,
                uuid,
                &state.stable_container,
                &state.canary_container,
            )?;
            self.write_weights(executor, &route, 100).await?;
            executor.sleep(self.proxy.reload_wait).await?;

            let stable = shell::quote_arg(&state.stable_container);
            let retire = executor
                .run_one(
                    RemoteCommand::host(format!(
                        "docker stop -t 30 {stable} >/dev/null 2>&1 || true; docker rm -f {stable}"
                    ))
                    .ignore_errors(),
                )
                .await?;
            if !retire.success() {
                executor
                    .log()
                    .error(format!("Failed to remove {}", state.stable_container))
                    .await;
            }
            executor
                .run_one(RemoteCommand::host(format!(
                    "docker rename {} {}",
                    shell::quote_arg(&state.canary_container),
                    stable
                )))
                .await?;
            Ok::<_, EngineError>(())
        }
        .await;
        // The state is already cleared, nothing else would remove the route
        self.delete_config(executor, uuid).await;
        if let Err(e) = result {
            executor
                .log()
                .error(format!("Canary promotion failed: {e}"))
                .await;
            return Err(e);
        }

        info!("Canary of deployment {} promoted", uuid);
        self.events
            .emit(EngineEvent::CanaryPromoted {
                deployment_uuid: uuid.clone(),
                application_id: application.id.clone(),
            })
            .await;
        Ok(CanaryProgress::Promoted)
    }

    async fn rollback_with(
        &self,
        executor: &RemoteExecutor,
        deployment: &DeploymentRequest,
        application: &Application,
        state: CanaryState,
        reason: &str,
    ) -> Result<CanaryProgress, EngineError> {
        let uuid = &deployment.deployment_uuid;
        let applied = self
            .store
            .compare_and_set_canary(uuid, Some(state.current_step), None)
            .await?;
        if !applied {
            return Ok(CanaryProgress::Stale);
        }

        executor
            .log()
            .error(format!("Rolling back canary: {reason}"))
            .await;
        let result = async {
            let route = route(
                application,
                uuid,
                &state.stable_container,
                &state.canary_container,
            )?;
            self.write_weights(executor, &route, 0).await?;
            executor.sleep(self.proxy.reload_wait).await?;
            executor
                .run_one(
                    RemoteCommand::host(format!(
                        "docker rm -f {}",
                        shell::quote_arg(&state.canary_container)
                    ))
                    .ignore_errors(),
                )
                .await?;
            Ok::<_, EngineError>(())
        }
        .await;
        self.delete_config(executor, uuid).await;

        self.store
            .record_rollback_event(RollbackEvent {
                deployment_uuid: uuid.clone(),
                application_id: application.id.clone(),
                canary_container: state.canary_container.clone(),
                stable_container: state.stable_container.clone(),
                weight_at_rollback: state.current_weight,
                step: state.current_step,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            })
            .await?;
        if let Err(e) = result {
            executor
                .log()
                .error(format!("Canary rollback failed: {e}"))
                .await;
            return Err(e);
        }
        self.events
            .emit(EngineEvent::CanaryRolledBack {
                deployment_uuid: uuid.clone(),
                application_id: application.id.clone(),
                reason: reason.to_string(),
            })
            .await;
        Ok(CanaryProgress::RolledBack)
    }

    async fn active_state(
        &self,
        deployment_uuid: &str,
    ) -> Result<(DeploymentRequest, Application, CanaryState), EngineError> {
        let (deployment, application) = self.load(deployment_uuid).await?;
        let state = deployment.canary_state.clone().ok_or_else(|| {
            EngineError::ValidationError(format!(
                "deployment {deployment_uuid} has no canary in progress"
            ))
        })?;
        Ok((deployment, application, state))
    }

    /// Send all traffic to the canary now
    pub async fn promote(&self, deployment_uuid: &str) -> Result<CanaryProgress, EngineError> {
        let (deployment, application, state) = self.active_state(deployment_uuid).await?;
        let executor = self.open_executor(&deployment).await?;
        let result = self
            .promote_with(&executor, &deployment, &application, state)
            .await;
        executor.log().flush().await;
        result
    }

    /// Send all traffic back to the stable container and remove the canary
    pub async fn rollback(
        &self,
        deployment_uuid: &str,
        reason: &str,
    ) -> Result<CanaryProgress, EngineError> {
        let (deployment, application, state) = self.active_state(deployment_uuid).await?;
        let executor = self.open_executor(&deployment).await?;
        let result = self
            .rollback_with(&executor, &deployment, &application, state, reason)
            .await;
        executor.log().flush().await;
        result
    }

    /// Reschedule canaries persisted before a restart
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let active = self.store.active_canaries().await?;
        for deployment in &active {
            let Some(state) = &deployment.canary_state else {
                continue;
            };
            let delay = match self.store.application(&deployment.application_id).await {
                Ok(application) => interval(&application),
                Err(e) => {
                    warn!(
                        "Application of canary {} unavailable: {}",
                        deployment.deployment_uuid, e
                    );
                    continue;
                }
            };
            info!(
                "Recovered canary of deployment {} at step {}",
                deployment.deployment_uuid, state.current_step
            );
            self.schedule(&deployment.deployment_uuid, state.current_step, delay);
        }
        Ok(active.len())
    }
}
