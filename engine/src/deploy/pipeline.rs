//! Deployment pipeline: checkout, build, configuration and rollout of one
//! deployment on its destination host

use std::sync::Arc;

use platform_models::{BuildPack, DeploymentRequest, DeploymentStatus, DeploymentUpdate};
use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info, warn};

use crate::build::{self, buildkit};
use crate::compose;
use crate::context::{BuildContext, HostPaths, PipelineFlags};
use crate::deploy::log::DeploymentLog;
use crate::deploy::status::DeploymentStatusManager;
use crate::env::composer;
use crate::errors::EngineError;
use crate::git::{self, GitSource};
use crate::registry;
use crate::remote::{shell, CancelSignal, RemoteCommand, RemoteExecutor, Transport};
use crate::rollout::{ProxyOptions, RolloutController};
use crate::store::DeploymentStore;

/// Pipeline options
#[derive(Debug, Clone)]
pub struct Options {
    pub paths: HostPaths,
    /// Image of the helper container running clone and build commands
    pub helper_image: String,
    /// Build secrets for every application, regardless of its settings
    pub use_build_secrets: bool,
    /// Key of the build secrets hash; the application UUID when unset
    pub secrets_hash_key: Option<SecretString>,
    /// Log lines persisted per flush
    pub log_flush_batch: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            paths: HostPaths::default(),
            helper_image: "ghcr.io/launchpad/helper:latest".to_string(),
            use_build_secrets: false,
            secrets_hash_key: None,
            log_flush_batch: 50,
        }
    }
}

pub struct DeploymentPipeline {
    options: Options,
    store: Arc<dyn DeploymentStore>,
    transport: Arc<dyn Transport>,
    git: Arc<dyn GitSource>,
    status: Arc<DeploymentStatusManager>,
    rollout: RolloutController,
    proxy: ProxyOptions,
}

/// Build command failures become build errors
fn build_error(e: EngineError) -> EngineError {
    match e {
        EngineError::RemoteCommand { exit_code, stderr } => {
            EngineError::BuildError(format!("exit code {exit_code}: {stderr}"))
        }
        e => e,
    }
}

/// Containers of the application currently on the host
pub fn parse_container_names(ctx: &BuildContext, output: &str) -> Vec<String> {
    let preview_prefix = format!("{}-pr-", ctx.application.uuid);
    output
        .lines()
        .map(str::trim)
        .filter(|name| name.starts_with(&ctx.application.uuid))
        .filter(|name| {
            if ctx.flags.is_pull_request() {
                *name == ctx.compose_project()
            } else {
                !name.starts_with(&preview_prefix)
            }
        })
        .map(str::to_string)
        .collect()
}

impl DeploymentPipeline {
    pub fn new(
        options: Options,
        store: Arc<dyn DeploymentStore>,
        transport: Arc<dyn Transport>,
        git: Arc<dyn GitSource>,
        status: Arc<DeploymentStatusManager>,
        rollout: RolloutController,
        proxy: ProxyOptions,
    ) -> Self {
        Self {
            options,
            store,
            transport,
            git,
            status,
            rollout,
            proxy,
        }
    }

    pub fn status(&self) -> &Arc<DeploymentStatusManager> {
        &self.status
    }

    /// Run a claimed deployment to a terminal status
    pub async fn run(&self, deployment: DeploymentRequest, cancel: CancelSignal) -> DeploymentStatus {
        let uuid = deployment.deployment_uuid.clone();
        let log = match DeploymentLog::open(&uuid, self.store.clone(), self.options.log_flush_batch).await {
            Ok(log) => Arc::new(log),
            Err(e) => {
                error!("Failed to open the log of deployment {}: {}", uuid, e);
                return self.finish(&uuid, DeploymentStatus::Failed).await;
            }
        };

        let application = match self.store.application(&deployment.application_id).await {
            Ok(application) => application,
            Err(e) => {
                log.error(format!("Failed to load application {}: {e}", deployment.application_id))
                    .await;
                log.flush().await;
                return self.finish(&uuid, DeploymentStatus::Failed).await;
            }
        };

        let flags = PipelineFlags::resolve(&application, &deployment, self.options.use_build_secrets);
        let mut ctx = BuildContext::new(application, deployment, flags, &self.options.paths);
        let executor = RemoteExecutor::new(
            self.transport.clone(),
            ctx.destination().server.clone(),
            log.clone(),
            cancel,
        );

        let result = self.execute(&mut ctx, &executor).await;
        self.remove_helper(&ctx, &executor.detached()).await;

        let status = match result {
            Ok(()) => {
                log.info("Deployment finished").await;
                DeploymentStatus::Finished
            }
            Err(e) if e.is_cancelled() => {
                log.info("Deployment cancelled").await;
                DeploymentStatus::CancelledByUser
            }
            Err(e) => {
                log.error(format!("Deployment failed: {e}")).await;
                DeploymentStatus::Failed
            }
        };
        log.flush().await;
        self.finish(&uuid, status).await
    }

    async fn finish(&self, deployment_uuid: &str, status: DeploymentStatus) -> DeploymentStatus {
        if let Err(e) = self.status.transition_to(deployment_uuid, status).await {
            error!("Failed to mark deployment {} {}: {}", deployment_uuid, status, e);
        }
        status
    }

    async fn execute(&self, ctx: &mut BuildContext, executor: &RemoteExecutor) -> Result<(), EngineError> {
        let uuid = ctx.deployment_uuid().to_string();
        executor
            .log()
            .info(format!(
                "Starting deployment of {} to {}",
                ctx.application.name,
                ctx.destination().server.name
            ))
            .await;

        self.start_helper(ctx, executor).await?;
        let from_source = ctx.application.build_pack != BuildPack::DockerImage;
        if from_source {
            git::resolve_commit(self.git.as_ref(), ctx, executor).await?;
            self.update_record(&uuid, Some(ctx.commit.clone()), None).await;
        }
        registry::apply_names(ctx);
        ctx.previous_containers = self.previous_containers(ctx, executor).await?;
        self.status.check_cancelled(&uuid).await?;

        self.compose_environment(ctx)?;
        if registry::can_skip_build(ctx, executor).await? {
            executor
                .log()
                .info(format!(
                    "Image {} already exists with the same build inputs, skipping the build",
                    ctx.production_image
                ))
                .await;
        } else {
            if from_source {
                let message = git::checkout(self.git.as_ref(), ctx, executor).await?;
                if message.is_some() {
                    self.update_record(&uuid, None, message).await;
                }
            }
            self.build(ctx, executor).await?;
        }
        self.status.check_cancelled(&uuid).await?;

        self.write_configuration(ctx, executor).await?;
        registry::push(ctx, executor).await?;
        self.status.check_cancelled(&uuid).await?;

        self.rollout.rollout(ctx, executor).await?;
        self.post_deployment(ctx, executor).await
    }

    async fn update_record(&self, deployment_uuid: &str, commit: Option<String>, commit_message: Option<String>) {
        let update = DeploymentUpdate {
            commit,
            commit_message,
        };
        if let Err(e) = self.store.update_deployment(deployment_uuid, update).await {
            warn!("Failed to update deployment {}: {}", deployment_uuid, e);
        }
    }

    async fn start_helper(&self, ctx: &BuildContext, executor: &RemoteExecutor) -> Result<(), EngineError> {
        executor.log().info("Preparing the helper container").await;
        let helper = shell::quote_arg(&ctx.helper_container);
        executor
            .run(vec![
                RemoteCommand::host(format!("docker rm -f {helper} >/dev/null 2>&1 || true"))
                    .hidden()
                    .ignore_errors(),
                RemoteCommand::host(format!(
                    "docker run -d --rm --network {} --name {helper} -v /var/run/docker.sock:/var/run/docker.sock {}",
                    shell::quote_arg(&ctx.destination().network),
                    shell::quote_arg(&self.options.helper_image)
                ))
                .hidden(),
                RemoteCommand::helper(
                    &ctx.helper_container,
                    format!("mkdir -p {}", shell::quote_arg(&ctx.work_dir)),
                )
                .hidden(),
            ])
            .await?;
        Ok(())
    }

    async fn remove_helper(&self, ctx: &BuildContext, executor: &RemoteExecutor) {
        let command = RemoteCommand::host(format!(
            "docker rm -f {}",
            shell::quote_arg(&ctx.helper_container)
        ))
        .hidden()
        .ignore_errors();
        if let Err(e) = executor.run_one(command).await {
            warn!("Failed to remove helper container {}: {}", ctx.helper_container, e);
        }
    }

    async fn previous_containers(
        &self,
        ctx: &BuildContext,
        executor: &RemoteExecutor,
    ) -> Result<Vec<String>, EngineError> {
        let output = executor
            .run_one(
                RemoteCommand::host(format!(
                    "docker ps -a --filter name=^{} --format '{{{{.Names}}}}'",
                    shell::quote_arg(&ctx.application.uuid)
                ))
                .hidden()
                .ignore_errors(),
            )
            .await?;
        Ok(parse_container_names(ctx, &output.stdout))
    }

    fn secrets_key(&self, ctx: &BuildContext) -> Vec<u8> {
        match &self.options.secrets_hash_key {
            Some(key) => key.expose_secret().as_bytes().to_vec(),
            None => ctx.application.uuid.as_bytes().to_vec(),
        }
    }

    fn compose_environment(&self, ctx: &mut BuildContext) -> Result<(), EngineError> {
        composer::compose(ctx);
        let key = self.secrets_key(ctx);
        composer::apply_secrets_hash(ctx, &key)
    }

    async fn build(&self, ctx: &mut BuildContext, executor: &RemoteExecutor) -> Result<(), EngineError> {
        let strategy = build::strategy_for(&ctx.application);
        executor
            .log()
            .info(format!("Building with the {} build pack", strategy.name()))
            .await;

        strategy.prepare(ctx, executor).await?;
        self.compose_environment(ctx)?;
        if ctx.flags.use_build_secrets {
            ctx.buildkit = buildkit::probe(executor, &ctx.helper_container).await?;
        }

        let plan = strategy.plan(ctx, executor).await?;
        if let Some(image) = &plan.image {
            executor.log().info(format!("Building image {image}")).await;
        }
        executor.run(plan.commands).await.map_err(build_error)?;
        executor.log().info("Build finished").await;
        Ok(())
    }

    /// Write `.env` and the compose file to the host config dir
    async fn write_configuration(&self, ctx: &BuildContext, executor: &RemoteExecutor) -> Result<(), EngineError> {
        let compose_yaml = if ctx.application.build_pack == BuildPack::DockerCompose {
            let document = ctx.user_compose.clone().ok_or_else(|| {
                EngineError::ValidationError("the compose file was not loaded".to_string())
            })?;
            let augmented = compose::augment_user_compose(ctx, document, &self.proxy)?;
            serde_yaml::to_string(&augmented)?
        } else {
            compose::render(ctx, &self.proxy).to_yaml()?
        };

        executor.log().info("Writing the compose file").await;
        executor
            .run(vec![
                RemoteCommand::host(format!("mkdir -p {}", shell::quote_arg(&ctx.config_dir))),
                RemoteCommand::host(shell::write_file(
                    &ctx.env_file_path(),
                    &ctx.runtime_env.render_dotenv(),
                ))
                .hidden(),
                RemoteCommand::host(shell::write_file(&ctx.compose_path(), &compose_yaml)).hidden(),
            ])
            .await?;
        executor.log().debug(compose_yaml).await;
        Ok(())
    }

    /// Run the configured command in the new container; failures are logged
    async fn post_deployment(&self, ctx: &BuildContext, executor: &RemoteExecutor) -> Result<(), EngineError> {
        let Some(command) = ctx
            .application
            .post_deployment_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
        else {
            return Ok(());
        };
        if ctx.application.build_pack == BuildPack::DockerCompose || ctx.flags.is_swarm {
            executor
                .log()
                .info("Post-deployment commands are not run for compose or swarm deployments")
                .await;
            return Ok(());
        }

        executor
            .log()
            .info(format!("Running post-deployment command: {command}"))
            .await;
        let result = executor
            .run_one(RemoteCommand::host(format!(
                "docker exec {} sh -c {}",
                shell::quote_arg(&ctx.container_name),
                shell::quote(command)
            )))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                executor
                    .log()
                    .error(format!("Post-deployment command failed: {e}"))
                    .await;
                info!("Post-deployment command of {} failed: {}", ctx.application.name, e);
                Ok(())
            }
        }
    }
}
