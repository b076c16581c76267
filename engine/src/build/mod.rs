//! Build planning per build pack
//!
//! A [`BuildStrategy`] turns the checked out repository into build commands.
//! Strategies may run discovery commands through the executor (reading a
//! Dockerfile, generating a Nixpacks plan); the returned [`BuildPlan`] holds
//! the commands that actually build the image.

pub mod buildkit;
pub mod compose_pack;
pub mod docker_cli;
pub mod dockerfile;
pub mod nixpacks;
pub mod node;
pub mod prebuilt;
pub mod static_site;

use async_trait::async_trait;
use platform_models::{Application, BuildPack};

use crate::build::docker_cli::DockerBuild;
use crate::build::dockerfile::DockerfileMutation;
use crate::context::BuildContext;
use crate::errors::EngineError;
use crate::registry::BUILD_INPUTS_LABEL;
use crate::remote::{shell, RemoteCommand, RemoteExecutor};

pub use compose_pack::ComposeStrategy;
pub use dockerfile::DockerfileStrategy;
pub use nixpacks::NixpacksStrategy;
pub use prebuilt::PrebuiltImageStrategy;
pub use static_site::StaticStrategy;

/// Commands producing the deployment image
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    pub commands: Vec<RemoteCommand>,
    /// Image produced, `None` for compose builds
    pub image: Option<String>,
    pub dockerfile: Option<DockerfileMutation>,
}

#[async_trait]
pub trait BuildStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Discovery run before the environment is composed, e.g. reading
    /// build pack defaults
    async fn prepare(
        &self,
        _ctx: &mut BuildContext,
        _executor: &RemoteExecutor,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    async fn plan(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
    ) -> Result<BuildPlan, EngineError>;
}

/// Strategy of an application's build pack
pub fn strategy_for(application: &Application) -> Box<dyn BuildStrategy> {
    match application.build_pack {
        BuildPack::Dockerfile => Box::new(DockerfileStrategy),
        BuildPack::Nixpacks => Box::new(NixpacksStrategy),
        BuildPack::DockerCompose => Box::new(ComposeStrategy),
        BuildPack::DockerImage => Box::new(PrebuiltImageStrategy),
        BuildPack::Static => Box::new(StaticStrategy::new(application.static_base)),
    }
}

/// Read a file inside the helper container, `None` when missing
pub async fn read_helper_file(
    ctx: &BuildContext,
    executor: &RemoteExecutor,
    path: &str,
) -> Result<Option<String>, EngineError> {
    let output = executor
        .run_one(
            RemoteCommand::helper(
                &ctx.helper_container,
                format!("cat {} 2>/dev/null", shell::quote_arg(path)),
            )
            .hidden()
            .ignore_errors(),
        )
        .await?;
    Ok(output.success().then_some(output.stdout))
}

/// Apply ARG or secret mount injection to a Dockerfile and build it
pub fn dockerfile_build(
    ctx: &BuildContext,
    dockerfile_path: &str,
    contents: &str,
    context_dir: &str,
    image: &str,
) -> BuildPlan {
    let mut mutated = contents.to_string();
    if ctx.buildkit && !ctx.build_secrets.is_empty() {
        let ids: Vec<String> = ctx.build_secrets.keys().cloned().collect();
        mutated = dockerfile::inject_secret_mounts(&mutated, &ids);
    } else if ctx.flags.inject_build_args {
        mutated = dockerfile::inject_build_args(&mutated, &ctx.build_env.keys());
    }

    let mut commands = Vec::new();
    let mutation = (mutated != contents).then(|| DockerfileMutation {
        path: dockerfile_path.to_string(),
        contents: mutated.clone(),
    });
    if let Some(mutation) = &mutation {
        commands.push(
            RemoteCommand::helper(
                &ctx.helper_container,
                shell::write_file(&mutation.path, &mutation.contents),
            )
            .hidden(),
        );
    }

    let mut build = DockerBuild::new(context_dir)
        .dockerfile(dockerfile_path)
        .tag(image)
        .network(&ctx.destination().network)
        .pull(true)
        .no_cache(ctx.flags.force_rebuild)
        .buildkit(ctx.buildkit);
    if let Some(hash) = &ctx.secrets_hash {
        build = build.label(BUILD_INPUTS_LABEL, hash);
    }

    let secrets_file = format!("{}/.build-secrets", ctx.work_dir);
    if ctx.buildkit && !ctx.build_secrets.is_empty() {
        let contents: String = ctx
            .build_secrets
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, shell::quote(v)))
            .collect();
        commands.push(
            RemoteCommand::helper(&ctx.helper_container, shell::write_file(&secrets_file, &contents))
                .hidden(),
        );
        for id in ctx.build_secrets.keys() {
            build = build.secret(id);
        }
        build = build.secrets_file(&secrets_file);
    } else {
        for var in ctx.build_env.iter() {
            build = build.build_arg(&var.key, &var.value);
        }
    }

    commands.push(RemoteCommand::helper(&ctx.helper_container, build.render()));
    if ctx.buildkit && !ctx.build_secrets.is_empty() {
        commands.push(
            RemoteCommand::helper(
                &ctx.helper_container,
                format!("rm -f {}", shell::quote_arg(&secrets_file)),
            )
            .hidden()
            .ignore_errors(),
        );
    }

    BuildPlan {
        commands,
        image: Some(image.to_string()),
        dockerfile: mutation,
    }
}
