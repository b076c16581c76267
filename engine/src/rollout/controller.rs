//! Container rollout: blue/green start, health gate, retirement of the
//! previous containers

use std::sync::Arc;

use platform_models::BuildPack;
use tracing::{info, warn};

use crate::context::{BuildContext, CanaryPair};
use crate::errors::EngineError;
use crate::remote::{shell, RemoteCommand, RemoteExecutor};
use crate::rollout::canary::CanaryManager;
use crate::rollout::fsm::{RolloutEvent, RolloutFsm, RolloutOutcome};
use crate::rollout::health::{self, HealthOutcome};
use crate::store::DeploymentStore;

/// Seconds `docker stop` waits before killing
const STOP_TIMEOUT_SECS: u32 = 30;

pub struct RolloutController {
    store: Arc<dyn DeploymentStore>,
    canary: Arc<CanaryManager>,
}

/// `docker compose up` of the generated file on the host
pub fn compose_up(ctx: &BuildContext) -> RemoteCommand {
    RemoteCommand::host(format!(
        "docker compose --project-name {} --project-directory {} -f {} up -d",
        shell::quote_arg(&ctx.compose_project()),
        shell::quote_arg(&ctx.config_dir),
        shell::quote_arg(&ctx.compose_path())
    ))
}

pub fn stop_container(container: &str) -> RemoteCommand {
    let container = shell::quote_arg(container);
    RemoteCommand::host(format!(
        "docker stop -t {STOP_TIMEOUT_SECS} {container} >/dev/null 2>&1 || true; docker rm -f {container}"
    ))
    .ignore_errors()
}

pub fn remove_container(container: &str) -> RemoteCommand {
    RemoteCommand::host(format!("docker rm -f {}", shell::quote_arg(container))).ignore_errors()
}

impl RolloutController {
    pub fn new(store: Arc<dyn DeploymentStore>, canary: Arc<CanaryManager>) -> Self {
        Self { store, canary }
    }

    /// Roll out the container described by the compose file already written
    /// to the host. Failures are reported as rollout errors.
    pub async fn rollout(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
    ) -> Result<RolloutOutcome, EngineError> {
        let mut fsm = RolloutFsm::new();
        self.run(ctx, executor, &mut fsm)
            .await
            .map_err(EngineError::into_rollout)
    }

    async fn step(
        &self,
        fsm: &mut RolloutFsm,
        event: RolloutEvent,
        executor: &RemoteExecutor,
    ) -> Result<(), EngineError> {
        let stage = fsm.process(event).map_err(EngineError::Internal)?;
        executor.log().debug(format!("Rollout stage: {stage}")).await;
        Ok(())
    }

    async fn run(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
        fsm: &mut RolloutFsm,
    ) -> Result<RolloutOutcome, EngineError> {
        self.step(fsm, RolloutEvent::ImageReady, executor).await?;

        if ctx.flags.is_swarm {
            return self.deploy_stack(ctx, executor, fsm).await;
        }
        if ctx.application.build_pack == BuildPack::DockerCompose {
            return self.deploy_compose_pack(ctx, executor, fsm).await;
        }

        let blockers = ctx.rolling_update_blockers();
        let stop_first = !blockers.is_empty();
        if stop_first && !ctx.previous_containers.is_empty() {
            executor
                .log()
                .info(format!(
                    "Rolling update is not supported ({}), stopping the running container first",
                    blockers.join(", ")
                ))
                .await;
            for container in ctx.previous_containers.clone() {
                executor.run_one(stop_container(&container)).await?;
            }
        }

        executor
            .log()
            .info(format!("Starting new container {}", ctx.container_name))
            .await;
        if let Err(e) = executor.run_one(compose_up(ctx)).await {
            if e.is_cancelled() {
                return Err(e);
            }
            self.step(fsm, RolloutEvent::StartFailed(e.to_string()), executor)
                .await?;
            executor
                .log()
                .error("New container failed to start, removing it")
                .await;
            executor.run_one(remove_container(&ctx.container_name)).await?;
            self.step(fsm, RolloutEvent::Completed, executor).await?;
            return Err(e);
        }
        self.step(fsm, RolloutEvent::Started, executor).await?;

        match health::wait_healthy(ctx, executor, &ctx.container_name).await? {
            HealthOutcome::Healthy => {
                executor.log().info("New container is healthy").await;
                self.step(fsm, RolloutEvent::Healthy, executor).await?;
            }
            HealthOutcome::Unhealthy(reason) => {
                self.step(fsm, RolloutEvent::Unhealthy(reason.clone()), executor)
                    .await?;
                executor
                    .log()
                    .error("New container is not healthy, removing it and keeping the running one")
                    .await;
                executor.run_one(remove_container(&ctx.container_name)).await?;
                self.step(fsm, RolloutEvent::Completed, executor).await?;
                return Err(EngineError::HealthCheckError(reason));
            }
        }

        self.mark_running(ctx).await;

        let retired: Vec<String> = ctx
            .previous_containers
            .iter()
            .filter(|c| **c != ctx.container_name)
            .cloned()
            .collect();

        if ctx.flags.canary && !stop_first {
            if let Some(stable) = retired.first() {
                let pair = CanaryPair {
                    stable: stable.clone(),
                    canary: ctx.container_name.clone(),
                };
                match self.canary.initiate(ctx, executor, &pair).await {
                    Ok(_) => {
                        ctx.canary = Some(pair);
                        self.step(fsm, RolloutEvent::Completed, executor).await?;
                        return Ok(RolloutOutcome::Promoted);
                    }
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        executor
                            .log()
                            .error(format!("Canary could not start, switching over directly: {e}"))
                            .await;
                    }
                }
            }
        }

        if !stop_first {
            for container in retired {
                self.retire(executor, &container).await?;
            }
        }
        self.step(fsm, RolloutEvent::Completed, executor).await?;
        Ok(RolloutOutcome::Promoted)
    }

    /// Stop a previous container; failures are only logged
    async fn retire(&self, executor: &RemoteExecutor, container: &str) -> Result<(), EngineError> {
        executor
            .log()
            .info(format!("Removing old container {container}"))
            .await;
        match executor.run_one(stop_container(container)).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => {
                executor
                    .log()
                    .error(format!(
                        "Failed to remove old container {container}: {}",
                        output.stderr_tail(5)
                    ))
                    .await;
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!("Failed to remove old container {}: {}", container, e);
                Ok(())
            }
        }
    }

    /// Compose replaces the containers of a user compose file itself
    async fn deploy_compose_pack(
        &self,
        ctx: &BuildContext,
        executor: &RemoteExecutor,
        fsm: &mut RolloutFsm,
    ) -> Result<RolloutOutcome, EngineError> {
        executor
            .log()
            .info(format!("Starting services: {}", ctx.compose_services.join(", ")))
            .await;
        executor
            .run_one(RemoteCommand::host(format!(
                "docker compose --project-name {} --project-directory {} -f {} up -d --remove-orphans",
                shell::quote_arg(&ctx.compose_project()),
                shell::quote_arg(&ctx.config_dir),
                shell::quote_arg(&ctx.compose_path())
            )))
            .await?;
        self.step(fsm, RolloutEvent::Started, executor).await?;
        self.step(fsm, RolloutEvent::HealthSkipped, executor).await?;
        self.mark_running(ctx).await;
        self.step(fsm, RolloutEvent::Completed, executor).await?;
        Ok(RolloutOutcome::Promoted)
    }

    async fn mark_running(&self, ctx: &BuildContext) {
        if let Err(e) = self
            .store
            .set_application_status(&ctx.application.id, "running")
            .await
        {
            warn!("Failed to update status of {}: {}", ctx.application.id, e);
        }
    }

    async fn deploy_stack(
        &self,
        ctx: &BuildContext,
        executor: &RemoteExecutor,
        fsm: &mut RolloutFsm,
    ) -> Result<RolloutOutcome, EngineError> {
        executor.log().info("Deploying to Docker Swarm").await;
        executor
            .run_one(RemoteCommand::host(format!(
                "docker stack deploy --detach=true --with-registry-auth -c {} {}",
                shell::quote_arg(&ctx.compose_path()),
                shell::quote_arg(&ctx.compose_project())
            )))
            .await?;
        self.step(fsm, RolloutEvent::Started, executor).await?;

        // Swarm replaces tasks with its own start-first update policy
        info!("Stack {} deployed", ctx.compose_project());
        self.step(fsm, RolloutEvent::HealthSkipped, executor).await?;
        self.mark_running(ctx).await;
        self.step(fsm, RolloutEvent::Completed, executor).await?;
        Ok(RolloutOutcome::Promoted)
    }
}
