//! Image names, existence checks and registry pushes

use platform_models::BuildPack;

use crate::context::BuildContext;
use crate::errors::EngineError;
use crate::remote::{shell, RemoteCommand, RemoteExecutor};

/// Image label carrying the build-input hash the image was built from
pub const BUILD_INPUTS_LABEL: &str = "dev.launchpad.build-inputs";

/// Build and production image names of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageNames {
    pub build_image: String,
    pub production_image: String,
}

fn repository(ctx: &BuildContext) -> String {
    match ctx.application.docker_registry_image_name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => ctx.application.uuid.clone(),
    }
}

fn tag_configured(ctx: &BuildContext) -> bool {
    ctx.application
        .docker_registry_image_tag
        .as_deref()
        .map(|t| !t.is_empty())
        .unwrap_or(false)
}

/// Whether the production tag names the commit, so that an image under it
/// can only hold this commit's code
fn tag_follows_commit(ctx: &BuildContext) -> bool {
    !ctx.flags.is_pull_request()
        && !tag_configured(ctx)
        && !matches!(
            ctx.application.build_pack,
            BuildPack::DockerImage | BuildPack::DockerCompose
        )
}

fn tag(ctx: &BuildContext) -> String {
    let application = &ctx.application;
    if ctx.flags.is_pull_request() {
        return format!("pr-{}", ctx.flags.pull_request_id);
    }
    let configured = match application.build_pack {
        BuildPack::DockerImage => application.docker_image_tag.as_deref(),
        _ => application.docker_registry_image_tag.as_deref(),
    };
    match configured {
        Some(tag) if !tag.is_empty() => tag.to_string(),
        _ => ctx.commit.clone(),
    }
}

/// Derive image names from the registry settings and resolved commit
pub fn generate_names(ctx: &BuildContext) -> ImageNames {
    let tag = tag(ctx);
    let repository = repository(ctx);
    let production_image = match (&ctx.application.build_pack, &ctx.application.docker_image) {
        (BuildPack::DockerImage, Some(image)) => format!("{image}:{tag}"),
        _ => format!("{repository}:{tag}"),
    };
    ImageNames {
        build_image: format!("{repository}:{tag}-build"),
        production_image,
    }
}

/// Store the generated names on the context
pub fn apply_names(ctx: &mut BuildContext) {
    let names = generate_names(ctx);
    ctx.build_image = names.build_image;
    ctx.production_image = names.production_image;
}

async fn exists_locally(executor: &RemoteExecutor, image: &str) -> Result<bool, EngineError> {
    let output = executor
        .run_one(
            RemoteCommand::host(format!("docker images -q {} 2>/dev/null", shell::quote_arg(image)))
                .hidden()
                .ignore_errors(),
        )
        .await?;
    Ok(output.success() && !output.stdout_trimmed().is_empty())
}

/// Whether `image` is present on the host, pulling it when the registry has it
pub async fn exists_locally_or_remotely(
    executor: &RemoteExecutor,
    image: &str,
) -> Result<bool, EngineError> {
    if exists_locally(executor, image).await? {
        return Ok(true);
    }
    executor
        .run_one(
            RemoteCommand::host(format!("docker pull {} 2>/dev/null", shell::quote_arg(image)))
                .hidden()
                .ignore_errors(),
        )
        .await?;
    exists_locally(executor, image).await
}

async fn recorded_build_inputs(executor: &RemoteExecutor, image: &str) -> Result<Option<String>, EngineError> {
    let output = executor
        .run_one(
            RemoteCommand::host(format!(
                "docker inspect --format '{{{{ index .Config.Labels \"{BUILD_INPUTS_LABEL}\" }}}}' {}",
                shell::quote_arg(image)
            ))
            .hidden()
            .ignore_errors(),
        )
        .await?;
    let recorded = output.stdout_trimmed();
    if !output.success() || recorded.is_empty() || recorded == "<no value>" {
        return Ok(None);
    }
    Ok(Some(recorded.to_string()))
}

/// Whether an existing production image can be reused instead of rebuilt.
///
/// Only commit-tagged images qualify, and only when the image was labelled
/// with the build-input hash of the current build environment.
pub async fn can_skip_build(ctx: &BuildContext, executor: &RemoteExecutor) -> Result<bool, EngineError> {
    if ctx.flags.force_rebuild || !tag_follows_commit(ctx) {
        return Ok(false);
    }
    let Some(expected) = ctx.secrets_hash.as_deref() else {
        return Ok(false);
    };
    if !exists_locally_or_remotely(executor, &ctx.production_image).await? {
        return Ok(false);
    }
    let recorded = recorded_build_inputs(executor, &ctx.production_image).await?;
    Ok(recorded.as_deref() == Some(expected))
}

fn push_skipped(ctx: &BuildContext) -> bool {
    let no_registry = ctx
        .application
        .docker_registry_image_name
        .as_deref()
        .map(str::is_empty)
        .unwrap_or(true);
    no_registry
        || ctx.flags.restart_only
        || ctx.flags.is_additional
        || ctx.application.build_pack == BuildPack::DockerImage
}

/// Push the production image to the configured registry
pub async fn push(ctx: &BuildContext, executor: &RemoteExecutor) -> Result<(), EngineError> {
    if push_skipped(ctx) {
        return Ok(());
    }

    executor
        .log()
        .info(format!("Pushing image {} to the registry", ctx.production_image))
        .await;
    let mut commands = vec![RemoteCommand::host(format!(
        "docker push {}",
        shell::quote_arg(&ctx.production_image)
    ))];

    if !tag_configured(ctx) && !ctx.flags.is_pull_request() {
        let latest = format!("{}:latest", repository(ctx));
        commands.push(RemoteCommand::host(format!(
            "docker tag {} {}",
            shell::quote_arg(&ctx.production_image),
            shell::quote_arg(&latest)
        )));
        commands.push(RemoteCommand::host(format!("docker push {}", shell::quote_arg(&latest))));
    }

    match executor.run(commands).await {
        Ok(_) => {
            executor.log().info("Image pushed").await;
            Ok(())
        }
        Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
        Err(e) => {
            executor
                .log()
                .error(format!("Failed to push image {}", ctx.production_image))
                .await;
            Err(EngineError::RegistryError(format!("{}: {}", e.kind(), e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{HostPaths, PipelineFlags};
    use chrono::Utc;
    use platform_models::{Application, DeploymentRequest, DeploymentStatus, Destination, Server};

    fn context(application: Application, pull_request_id: u32) -> BuildContext {
        let now = Utc::now();
        let deployment = DeploymentRequest {
            deployment_uuid: "dep1".to_string(),
            application_id: application.id.clone(),
            destination: Destination {
                id: "d1".to_string(),
                network: "launchpad".to_string(),
                server: Server::local("s1"),
                is_swarm: false,
            },
            commit: "0123456789abcdef0123456789abcdef01234567".to_string(),
            commit_message: None,
            pull_request_id,
            force_rebuild: false,
            restart_only: false,
            is_additional: false,
            status: DeploymentStatus::InProgress,
            canary_state: None,
            created_at: now,
            updated_at: now,
        };
        let flags = PipelineFlags::resolve(&application, &deployment, false);
        BuildContext::new(application, deployment, flags, &HostPaths::default())
    }

    fn application() -> Application {
        serde_json::from_value(serde_json::json!({
            "id": "1",
            "uuid": "app1",
            "name": "shop",
            "git_repository": "https://github.com/acme/shop.git",
            "build_pack": "dockerfile",
            "destination": {
                "id": "d1",
                "network": "launchpad",
                "server": {"id": "s1", "name": "local", "ip": "127.0.0.1", "is_local": true}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_names_default_to_uuid_and_commit() {
        let names = generate_names(&context(application(), 0));
        let sha = "0123456789abcdef0123456789abcdef01234567";
        assert_eq!(names.production_image, format!("app1:{sha}"));
        assert_eq!(names.build_image, format!("app1:{sha}-build"));
    }

    #[test]
    fn test_pull_request_tag() {
        let mut app = application();
        app.docker_registry_image_name = Some("ghcr.io/acme/shop".to_string());
        app.docker_registry_image_tag = Some("stable".to_string());
        let names = generate_names(&context(app, 42));
        assert_eq!(names.production_image, "ghcr.io/acme/shop:pr-42");
    }

    #[test]
    fn test_push_skipped_without_registry() {
        assert!(push_skipped(&context(application(), 0)));

        let mut app = application();
        app.docker_registry_image_name = Some("ghcr.io/acme/shop".to_string());
        assert!(!push_skipped(&context(app, 0)));
    }
}
