//! Static sites served by nginx

use async_trait::async_trait;
use platform_models::StaticBase;

use crate::build::docker_cli::DockerBuild;
use crate::build::{BuildPlan, BuildStrategy, DockerfileStrategy, NixpacksStrategy};
use crate::context::BuildContext;
use crate::errors::EngineError;
use crate::registry::BUILD_INPUTS_LABEL;
use crate::remote::{shell, RemoteCommand, RemoteExecutor};

pub const NGINX_IMAGE: &str = "nginx:alpine";

/// nginx server block; single page applications fall back to `index.html`
pub fn nginx_config(is_spa: bool) -> String {
    let location = if is_spa {
        "        try_files $uri $uri.html $uri/index.html $uri/ /index.html =404;"
    } else {
        "        try_files $uri $uri.html $uri/index.html $uri/ =404;"
    };
    let error_page = if is_spa {
        ""
    } else {
        "\n    error_page 404 /404.html;\n    location = /404.html {\n        internal;\n    }\n"
    };
    format!(
        "server {{\n    listen 80;\n    listen [::]:80;\n    server_name localhost;\n\n    location / {{\n        root /usr/share/nginx/html;\n        index index.html index.htm;\n{location}\n    }}\n{error_page}\n    error_page 500 502 503 504 /50x.html;\n    location = /50x.html {{\n        root /usr/share/nginx/html;\n    }}\n}}\n"
    )
}

/// Second stage copying the publish directory out of the build image
pub fn nginx_dockerfile(build_image: &str, publish_directory: &str) -> String {
    let publish = publish_directory.trim_end_matches('/');
    format!(
        "FROM {build_image} AS builder\nFROM {NGINX_IMAGE}\nWORKDIR /usr/share/nginx/html/\nCOPY --from=builder /app{publish} .\nCOPY ./nginx.conf /etc/nginx/conf.d/default.conf\n"
    )
}

/// Builds with the inner pack into the build image, then wraps the output
/// in an nginx image
pub struct StaticStrategy {
    base: StaticBase,
}

impl StaticStrategy {
    pub fn new(base: StaticBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl BuildStrategy for StaticStrategy {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn prepare(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
    ) -> Result<(), EngineError> {
        match self.base {
            StaticBase::Nixpacks => NixpacksStrategy.prepare(ctx, executor).await,
            StaticBase::Dockerfile => DockerfileStrategy.prepare(ctx, executor).await,
        }
    }

    async fn plan(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
    ) -> Result<BuildPlan, EngineError> {
        let build_image = ctx.build_image.clone();
        let mut plan = match self.base {
            StaticBase::Nixpacks => NixpacksStrategy.plan_into(ctx, executor, &build_image).await?,
            StaticBase::Dockerfile => {
                DockerfileStrategy
                    .plan_into(ctx, executor, &build_image)
                    .await?
            }
        };

        let publish = ctx
            .application
            .publish_directory
            .clone()
            .unwrap_or_else(|| "/".to_string());
        let dockerfile_path = format!("{}/Dockerfile.static", ctx.work_dir);
        let nginx_path = format!("{}/nginx.conf", ctx.work_dir);

        plan.commands.push(
            RemoteCommand::helper(
                &ctx.helper_container,
                shell::write_file(&dockerfile_path, &nginx_dockerfile(&build_image, &publish)),
            )
            .hidden(),
        );
        plan.commands.push(
            RemoteCommand::helper(
                &ctx.helper_container,
                shell::write_file(&nginx_path, &nginx_config(ctx.flags.is_spa)),
            )
            .hidden(),
        );

        // The build image only exists locally
        let mut build = DockerBuild::new(&ctx.work_dir)
            .dockerfile(&dockerfile_path)
            .tag(&ctx.production_image)
            .network(&ctx.destination().network)
            .pull(false)
            .no_cache(ctx.flags.force_rebuild);
        if let Some(hash) = &ctx.secrets_hash {
            build = build.label(BUILD_INPUTS_LABEL, hash);
        }
        plan.commands
            .push(RemoteCommand::helper(&ctx.helper_container, build.render()));
        plan.image = Some(ctx.production_image.clone());
        Ok(plan)
    }
}
