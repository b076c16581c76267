//! Docker Compose build pack

use async_trait::async_trait;
use serde_yaml::Value;

use crate::build::{dockerfile, read_helper_file, BuildPlan, BuildStrategy};
use crate::compose::render::service_names;
use crate::context::BuildContext;
use crate::errors::EngineError;
use crate::remote::{shell, RemoteCommand, RemoteExecutor};

/// Dockerfile of a service `build` section, relative to the compose directory
pub fn build_dockerfile(build: &Value) -> Option<String> {
    let (context, file) = match build {
        Value::String(context) => (context.as_str(), "Dockerfile"),
        Value::Mapping(_) => (
            build.get("context").and_then(Value::as_str).unwrap_or("."),
            build
                .get("dockerfile")
                .and_then(Value::as_str)
                .unwrap_or("Dockerfile"),
        ),
        _ => return None,
    };
    let context = context.trim_start_matches("./").trim_end_matches('/');
    if context.is_empty() || context == "." {
        Some(file.to_string())
    } else {
        Some(format!("{context}/{file}"))
    }
}

/// Builds every service with a `build` section using `docker compose build`
pub struct ComposeStrategy;

impl ComposeStrategy {
    fn compose_dir(ctx: &BuildContext) -> String {
        let location = &ctx.application.docker_compose_location;
        let dir = match location.rfind('/') {
            Some(i) => &location[..i],
            None => "",
        };
        format!("{}{}", ctx.source_dir(), dir)
    }
}

#[async_trait]
impl BuildStrategy for ComposeStrategy {
    fn name(&self) -> &'static str {
        "dockercompose"
    }

    /// Load the user compose file so its services feed the environment
    async fn prepare(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
    ) -> Result<(), EngineError> {
        let path = format!(
            "{}{}",
            ctx.source_dir(),
            ctx.application.docker_compose_location
        );
        let raw = read_helper_file(ctx, executor, &path)
            .await?
            .ok_or_else(|| EngineError::BuildError(format!("Compose file not found at {path}")))?;
        let document: Value = serde_yaml::from_str(&raw)?;
        ctx.compose_services = service_names(&document);
        if ctx.compose_services.is_empty() {
            return Err(EngineError::ValidationError(format!(
                "{path} defines no services"
            )));
        }
        executor
            .log()
            .info(format!("Found services: {}", ctx.compose_services.join(", ")))
            .await;
        ctx.user_compose = Some(document);
        Ok(())
    }

    async fn plan(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
    ) -> Result<BuildPlan, EngineError> {
        let mut document = ctx.user_compose.clone().ok_or_else(|| {
            EngineError::Internal("compose file was not loaded".to_string())
        })?;
        let compose_dir = Self::compose_dir(ctx);
        let mut commands = Vec::new();
        let mut built = Vec::new();

        if let Some(services) = document
            .get_mut("services")
            .and_then(Value::as_mapping_mut)
        {
            for (name, service) in services.iter_mut() {
                let (Some(name), Some(service)) = (name.as_str(), service.as_mapping_mut()) else {
                    continue;
                };
                let Some(build) = service.get("build").cloned() else {
                    continue;
                };
                built.push(name.to_string());
                if !service.contains_key("image") {
                    service.insert(
                        Value::String("image".to_string()),
                        Value::String(format!("{}-{}", ctx.production_image, name)),
                    );
                }

                if !ctx.flags.inject_build_args {
                    continue;
                }
                let Some(file) = build_dockerfile(&build) else {
                    continue;
                };
                let path = format!("{compose_dir}/{file}");
                if let Some(contents) = read_helper_file(ctx, executor, &path).await? {
                    let mutated = dockerfile::inject_build_args(&contents, &ctx.build_env.keys());
                    if mutated != contents {
                        commands.push(
                            RemoteCommand::helper(
                                &ctx.helper_container,
                                shell::write_file(&path, &mutated),
                            )
                            .hidden(),
                        );
                    }
                }
            }
        }

        if built.is_empty() {
            executor
                .log()
                .info("No service has a build section, images are pulled on start")
                .await;
            ctx.user_compose = Some(document);
            return Ok(BuildPlan::default());
        }

        let build_file = format!("{compose_dir}/.launchpad-compose.yaml");
        commands.push(
            RemoteCommand::helper(
                &ctx.helper_container,
                shell::write_file(&build_file, &serde_yaml::to_string(&document)?),
            )
            .hidden(),
        );

        let mut argv = vec![
            "docker".to_string(),
            "compose".to_string(),
            "--project-name".to_string(),
            ctx.compose_project(),
            "--project-directory".to_string(),
            compose_dir.clone(),
            "-f".to_string(),
            build_file,
            "build".to_string(),
            "--pull".to_string(),
        ];
        if ctx.flags.force_rebuild {
            argv.push("--no-cache".to_string());
        }
        for var in ctx.build_env.iter() {
            argv.push("--build-arg".to_string());
            argv.push(format!("{}={}", var.key, var.value));
        }
        commands.push(RemoteCommand::helper(
            &ctx.helper_container,
            shell::join_argv(&argv),
        ));

        ctx.user_compose = Some(document);
        Ok(BuildPlan {
            commands,
            image: None,
            dockerfile: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_dockerfile_paths() {
        let short: Value = serde_yaml::from_str("./api").unwrap();
        assert_eq!(build_dockerfile(&short).as_deref(), Some("api/Dockerfile"));

        let long: Value =
            serde_yaml::from_str("{context: ., dockerfile: docker/Dockerfile.prod}").unwrap();
        assert_eq!(
            build_dockerfile(&long).as_deref(),
            Some("docker/Dockerfile.prod")
        );
    }
}
