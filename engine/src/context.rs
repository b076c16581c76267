//! Per-run deployment context

use std::collections::BTreeMap;

use platform_models::{Application, BuildPack, DeploymentRequest, Destination};

use crate::compose::custom_options;
use crate::env::EnvSet;

/// Feature flags resolved once at the start of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineFlags {
    pub use_build_secrets: bool,
    pub inject_build_args: bool,
    pub env_sorting: bool,
    pub include_source_commit_in_build: bool,
    pub consistent_container_name: bool,
    pub pull_request_id: u32,
    pub force_rebuild: bool,
    pub restart_only: bool,
    pub is_additional: bool,
    pub is_swarm: bool,
    pub canary: bool,
    pub is_spa: bool,
}

impl PipelineFlags {
    /// Gather flags from the application, the deployment and engine-wide settings
    pub fn resolve(
        application: &Application,
        deployment: &DeploymentRequest,
        engine_build_secrets: bool,
    ) -> Self {
        let settings = &application.settings;
        Self {
            use_build_secrets: settings.use_build_secrets || engine_build_secrets,
            inject_build_args: settings.inject_build_args_to_dockerfile,
            env_sorting: settings.is_env_sorting_enabled,
            include_source_commit_in_build: settings.include_source_commit_in_build,
            consistent_container_name: settings.is_consistent_container_name_enabled,
            pull_request_id: deployment.pull_request_id,
            force_rebuild: deployment.force_rebuild,
            restart_only: deployment.restart_only,
            is_additional: deployment.is_additional,
            is_swarm: deployment.destination.is_swarm,
            canary: application.canary.enabled && deployment.pull_request_id == 0,
            is_spa: settings.is_spa,
        }
    }

    pub fn is_pull_request(&self) -> bool {
        self.pull_request_id != 0
    }
}

/// Locations on the deployment host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// Work directories inside the helper container
    pub artifacts_root: String,
    /// Compose and `.env` files on the host
    pub config_root: String,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            artifacts_root: "/artifacts".to_string(),
            config_root: "/data/launchpad/applications".to_string(),
        }
    }
}

/// Container pair of a canary rollout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanaryPair {
    pub stable: String,
    pub canary: String,
}

/// Values derived once and shared by every stage of a run
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub application: Application,
    pub deployment: DeploymentRequest,
    pub flags: PipelineFlags,

    /// Resolved commit SHA, `HEAD` until resolved
    pub commit: String,
    pub helper_container: String,
    pub work_dir: String,
    pub config_dir: String,
    pub container_name: String,
    pub build_image: String,
    pub production_image: String,

    /// Variables contributed by the build pack (Nixpacks plan)
    pub buildpack_defaults: BTreeMap<String, String>,
    /// Nixpacks build plan and detected providers
    pub nixpacks_plan: Option<serde_json::Value>,
    pub nixpacks_providers: Vec<String>,
    /// User compose file and its services, for the compose build pack
    pub user_compose: Option<serde_yaml::Value>,
    pub compose_services: Vec<String>,
    pub build_env: EnvSet,
    pub runtime_env: EnvSet,
    pub system_env: EnvSet,
    pub build_secrets: BTreeMap<String, String>,
    pub secrets_hash: Option<String>,

    pub buildkit: bool,
    pub custom_healthcheck: bool,
    pub healthcheck_disabled_by_pack: bool,

    /// Containers of the application running before this deployment
    pub previous_containers: Vec<String>,
    pub canary: Option<CanaryPair>,
}

impl BuildContext {
    pub fn new(
        application: Application,
        deployment: DeploymentRequest,
        flags: PipelineFlags,
        paths: &HostPaths,
    ) -> Self {
        let helper_container = deployment.deployment_uuid.clone();
        let work_dir = format!("{}/{}", paths.artifacts_root, deployment.deployment_uuid);
        let config_dir = format!("{}/{}", paths.config_root, application.uuid);
        let container_name = container_name(&application, &deployment, &flags);
        let commit = deployment.commit.clone();

        Self {
            application,
            deployment,
            flags,
            commit,
            helper_container,
            work_dir,
            config_dir,
            container_name,
            build_image: String::new(),
            production_image: String::new(),
            buildpack_defaults: BTreeMap::new(),
            nixpacks_plan: None,
            nixpacks_providers: Vec::new(),
            user_compose: None,
            compose_services: Vec::new(),
            build_env: EnvSet::new(),
            runtime_env: EnvSet::new(),
            system_env: EnvSet::new(),
            build_secrets: BTreeMap::new(),
            secrets_hash: None,
            buildkit: false,
            custom_healthcheck: false,
            healthcheck_disabled_by_pack: false,
            previous_containers: Vec::new(),
            canary: None,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.deployment.destination
    }

    pub fn deployment_uuid(&self) -> &str {
        &self.deployment.deployment_uuid
    }

    /// Repository checkout including the base directory
    pub fn source_dir(&self) -> String {
        format!("{}{}", self.work_dir, self.application.base_dir())
    }

    /// Compose project; previews get their own project
    pub fn compose_project(&self) -> String {
        if self.flags.is_pull_request() {
            format!("{}-pr-{}", self.application.uuid, self.flags.pull_request_id)
        } else {
            self.application.uuid.clone()
        }
    }

    /// Compose file written to the host
    pub fn compose_path(&self) -> String {
        format!("{}/docker-compose.yaml", self.config_dir)
    }

    pub fn env_file_path(&self) -> String {
        format!("{}/.env", self.config_dir)
    }

    /// Whether the compose healthcheck block is generated
    pub fn healthcheck_enabled(&self) -> bool {
        self.application.health_check.enabled
            && !self.custom_healthcheck
            && !self.healthcheck_disabled_by_pack
    }

    /// Reasons a blue/green start is impossible, empty when supported
    pub fn rolling_update_blockers(&self) -> Vec<&'static str> {
        let mut blockers = Vec::new();
        if !self.application.ports_mappings_array().is_empty() {
            blockers.push("host port mappings");
        }
        if self.flags.consistent_container_name {
            blockers.push("consistent container name");
        }
        if self.application.settings.custom_internal_name.is_some() {
            blockers.push("custom internal name");
        }
        if self.flags.is_pull_request() {
            blockers.push("pull request preview");
        }
        let static_ip = self
            .application
            .custom_docker_run_options
            .as_deref()
            .map(custom_options::requests_static_ip)
            .unwrap_or(false);
        if static_ip {
            blockers.push("static IP address");
        }
        blockers
    }

    /// Port the container serves on
    pub fn service_port(&self) -> u16 {
        service_port(&self.application)
    }
}

/// Port an application's container serves on; static sites are served by nginx
pub fn service_port(application: &Application) -> u16 {
    match application.build_pack {
        BuildPack::Static => 80,
        _ => application.health_check_port().unwrap_or(80),
    }
}

fn container_name(
    application: &Application,
    deployment: &DeploymentRequest,
    flags: &PipelineFlags,
) -> String {
    if flags.is_pull_request() {
        return format!("{}-pr-{}", application.uuid, flags.pull_request_id);
    }
    if flags.consistent_container_name {
        return application.uuid.clone();
    }
    format!(
        "{}-{}",
        application.uuid,
        deployment.created_at.format("%H%M%S")
    )
}
