//! Prebuilt images pulled from a registry

use async_trait::async_trait;

use crate::build::{BuildPlan, BuildStrategy};
use crate::context::BuildContext;
use crate::errors::EngineError;
use crate::remote::{shell, RemoteCommand, RemoteExecutor};

pub struct PrebuiltImageStrategy;

#[async_trait]
impl BuildStrategy for PrebuiltImageStrategy {
    fn name(&self) -> &'static str {
        "dockerimage"
    }

    async fn plan(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
    ) -> Result<BuildPlan, EngineError> {
        if ctx.application.docker_image.is_none() {
            return Err(EngineError::ValidationError(
                "the dockerimage build pack needs an image name".to_string(),
            ));
        }
        executor
            .log()
            .info(format!("Pulling image {}", ctx.production_image))
            .await;
        Ok(BuildPlan {
            commands: vec![RemoteCommand::host(format!(
                "docker pull {}",
                shell::quote_arg(&ctx.production_image)
            ))],
            image: Some(ctx.production_image.clone()),
            dockerfile: None,
        })
    }
}
