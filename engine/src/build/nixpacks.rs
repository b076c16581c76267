//! Nixpacks build pack

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::build::{dockerfile_build, node, read_helper_file, BuildPlan, BuildStrategy};
use crate::context::BuildContext;
use crate::env::EnvSet;
use crate::errors::EngineError;
use crate::remote::{shell, RemoteCommand, RemoteExecutor};

pub const DOCS_URL: &str = "https://nixpacks.com/docs/providers";

/// Packages the generated healthcheck relies on
const HEALTHCHECK_PACKAGES: [&str; 2] = ["curl", "wget"];

const ELIXIR_REQUIRED: [&str; 3] = ["MIX_ENV", "SECRET_KEY_BASE", "DATABASE_URL"];

/// Framework specific plan adjustments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanFixups {
    pub laravel: bool,
    pub elixir: bool,
    pub rust: bool,
}

impl PlanFixups {
    pub fn detect(providers: &[String], has_artisan: bool) -> Self {
        let has = |name: &str| providers.iter().any(|p| p == name);
        Self {
            laravel: has("php") && has_artisan,
            elixir: has("elixir"),
            rust: has("rust"),
        }
    }
}

/// Outcome of mutating a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanReport {
    pub warnings: Vec<String>,
    pub disable_healthcheck: bool,
}

/// Variables declared by a plan, empty when the plan has none
pub fn plan_variables(plan: &Value) -> BTreeMap<String, String> {
    plan.get("variables")
        .and_then(Value::as_object)
        .map(|vars| {
            vars.iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Entry `key` of `value`, turning `value` into an object first when it is not one
fn object_entry<'a>(value: &'a mut Value, key: &str) -> &'a mut Value {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map.entry(key.to_string()).or_insert_with(|| json!({})),
        other => other,
    }
}

/// Merge the build environment into a plan and apply framework fix-ups
pub fn mutate_plan(plan: &mut Value, build_env: &EnvSet, fixups: &PlanFixups) -> PlanReport {
    let mut report = PlanReport::default();

    let variables = object_entry(plan, "variables");
    if let Some(vars) = variables.as_object_mut() {
        for var in build_env.iter() {
            vars.insert(var.key.clone(), Value::String(var.value.clone()));
        }
        if fixups.laravel {
            vars.entry("NIXPACKS_PHP_FALLBACK_PATH")
                .or_insert_with(|| json!("/index.php"));
            vars.entry("NIXPACKS_PHP_ROOT_DIR")
                .or_insert_with(|| json!("/app/public"));
        }
        if fixups.elixir {
            for key in ELIXIR_REQUIRED {
                if !vars.contains_key(key) {
                    report
                        .warnings
                        .push(format!("Elixir application is missing {key}, the build may fail"));
                }
            }
        }
    }

    let setup = object_entry(object_entry(plan, "phases"), "setup");
    let apt = object_entry(setup, "aptPkgs");
    if !apt.is_array() {
        *apt = json!([]);
    }
    if let Some(packages) = apt.as_array_mut() {
        for package in HEALTHCHECK_PACKAGES {
            if !packages.iter().any(|p| p.as_str() == Some(package)) {
                packages.push(json!(package));
            }
        }
    }

    if fixups.rust {
        // The runtime stage has neither curl nor wget
        report.disable_healthcheck = true;
    }
    report
}

/// Nixpacks generated build
pub struct NixpacksStrategy;

impl NixpacksStrategy {
    fn plan_path(ctx: &BuildContext) -> String {
        format!("{}/nixpacks-plan.json", ctx.work_dir)
    }

    /// Generate the Dockerfile from the mutated plan and build into `image`
    pub async fn plan_into(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
        image: &str,
    ) -> Result<BuildPlan, EngineError> {
        let source_dir = ctx.source_dir();
        let has_artisan = read_helper_file(ctx, executor, &format!("{source_dir}/artisan"))
            .await?
            .is_some();
        let fixups = PlanFixups::detect(&ctx.nixpacks_providers, has_artisan);

        let mut plan = ctx.nixpacks_plan.clone().unwrap_or_else(|| json!({}));
        let report = mutate_plan(&mut plan, &ctx.build_env, &fixups);
        for warning in &report.warnings {
            executor.log().error(warning.as_str()).await;
        }
        if report.disable_healthcheck {
            executor
                .log()
                .info("Rust build detected, the generated healthcheck is disabled")
                .await;
            ctx.healthcheck_disabled_by_pack = true;
        }

        let plan_path = Self::plan_path(ctx);
        let plan_json = serde_json::to_string_pretty(&plan)?;
        executor
            .run(vec![
                RemoteCommand::helper(&ctx.helper_container, shell::write_file(&plan_path, &plan_json))
                    .hidden(),
                RemoteCommand::helper(
                    &ctx.helper_container,
                    format!(
                        "nixpacks build -c {plan} --no-error-without-start -n {image} {dir} -o {dir}",
                        plan = shell::quote_arg(&plan_path),
                        image = shell::quote_arg(image),
                        dir = shell::quote_arg(&source_dir),
                    ),
                ),
            ])
            .await?;
        ctx.nixpacks_plan = Some(plan);

        let dockerfile_path = format!("{source_dir}/.nixpacks/Dockerfile");
        let mut dockerfile = read_helper_file(ctx, executor, &dockerfile_path)
            .await?
            .ok_or_else(|| {
                EngineError::BuildError(format!("Nixpacks did not generate {dockerfile_path}"))
            })?;

        if ctx.nixpacks_providers.iter().any(|p| p == "node") {
            dockerfile = self
                .reconcile_node(ctx, executor, &source_dir, dockerfile)
                .await?;
        }

        Ok(dockerfile_build(ctx, &dockerfile_path, &dockerfile, &source_dir, image))
    }

    async fn reconcile_node(
        &self,
        ctx: &BuildContext,
        executor: &RemoteExecutor,
        source_dir: &str,
        dockerfile: String,
    ) -> Result<String, EngineError> {
        let nvmrc = read_helper_file(ctx, executor, &format!("{source_dir}/.nvmrc")).await?;
        let package_json = read_helper_file(ctx, executor, &format!("{source_dir}/package.json"))
            .await?
            .and_then(|raw| match serde_json::from_str::<Value>(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Unparseable package.json: {}", e);
                    None
                }
            });

        let Some(version) = node::resolve(nvmrc.as_deref(), package_json.as_ref()) else {
            return Ok(dockerfile);
        };
        if !node::needs_override(&version) {
            executor
                .log()
                .debug(format!("Node.js {version} is provided by Nixpacks"))
                .await;
            return Ok(dockerfile);
        }

        executor
            .log()
            .info(format!(
                "Node.js {version} is newer than the Nixpacks build, installing the official binary"
            ))
            .await;
        Ok(node::patch_dockerfile(&dockerfile, &version))
    }
}

#[async_trait]
impl BuildStrategy for NixpacksStrategy {
    fn name(&self) -> &'static str {
        "nixpacks"
    }

    /// Detect the application type and read the plan's default variables
    async fn prepare(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
    ) -> Result<(), EngineError> {
        let source_dir = ctx.source_dir();
        executor.log().info("Generating Nixpacks configuration").await;

        let detected = executor
            .run_one(
                RemoteCommand::helper(
                    &ctx.helper_container,
                    format!("nixpacks detect {}", shell::quote_arg(&source_dir)),
                )
                .hidden(),
            )
            .await?;
        let providers: Vec<String> = detected
            .stdout
            .split([',', '\n'])
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if providers.is_empty() {
            executor
                .log()
                .error(format!(
                    "Nixpacks could not detect the application type. Supported providers: {DOCS_URL}"
                ))
                .await;
            return Err(EngineError::NixpacksDetection(format!(
                "no provider matched {source_dir}, see {DOCS_URL}"
            )));
        }
        executor
            .log()
            .info(format!("Found application type: {}", providers.join(", ")))
            .await;
        ctx.nixpacks_providers = providers;

        let output = executor
            .run_one(
                RemoteCommand::helper(
                    &ctx.helper_container,
                    format!("nixpacks plan -f json {}", shell::quote_arg(&source_dir)),
                )
                .hidden()
                .ignore_errors(),
            )
            .await?;
        let plan = match serde_json::from_str::<Value>(output.stdout_trimmed()) {
            Ok(plan) if output.success() => plan,
            Ok(_) | Err(_) => {
                executor
                    .log()
                    .debug("Nixpacks plan unavailable, continuing without build pack defaults")
                    .await;
                warn!("Nixpacks plan unavailable for {}", ctx.deployment_uuid());
                json!({})
            }
        };
        ctx.buildpack_defaults = plan_variables(&plan);
        ctx.nixpacks_plan = Some(plan);
        Ok(())
    }

    async fn plan(
        &self,
        ctx: &mut BuildContext,
        executor: &RemoteExecutor,
    ) -> Result<BuildPlan, EngineError> {
        let image = ctx.production_image.clone();
        self.plan_into(ctx, executor, &image).await
    }
}
