//! Application configuration models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::environment::EnvironmentVariable;

/// Strategy used to turn a repository into a runnable image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildPack {
    Nixpacks,
    Dockerfile,
    #[serde(rename = "dockercompose")]
    DockerCompose,
    Static,
    #[serde(rename = "dockerimage")]
    DockerImage,
}

impl BuildPack {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPack::Nixpacks => "nixpacks",
            BuildPack::Dockerfile => "dockerfile",
            BuildPack::DockerCompose => "dockercompose",
            BuildPack::Static => "static",
            BuildPack::DockerImage => "dockerimage",
        }
    }
}

impl std::fmt::Display for BuildPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inner build pack used by static sites before the nginx stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaticBase {
    #[default]
    Nixpacks,
    Dockerfile,
}

/// A remote Docker host reachable over SSH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,

    pub name: String,

    /// IP address or hostname
    pub ip: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Run commands locally instead of over SSH
    #[serde(default)]
    pub is_local: bool,

    /// Private key used for this host; the engine default applies when absent
    #[serde(default)]
    pub private_key_path: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

impl Server {
    pub fn local(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: "localhost".to_string(),
            ip: "127.0.0.1".to_string(),
            port: default_ssh_port(),
            user: default_ssh_user(),
            is_local: true,
            private_key_path: None,
        }
    }
}

/// A docker network on a server that applications are deployed into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,

    /// Docker network name
    pub network: String,

    pub server: Server,

    /// Swarm manager target
    #[serde(default)]
    pub is_swarm: bool,
}

/// Health check configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckSettings {
    pub enabled: bool,
    pub path: String,
    /// Defaults to the first exposed port
    pub port: Option<u16>,
    pub host: String,
    pub method: String,
    pub scheme: String,
    pub return_code: u16,
    pub interval: u64,
    pub timeout: u64,
    pub retries: u32,
    pub start_period: u64,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/".to_string(),
            port: None,
            host: "localhost".to_string(),
            method: "GET".to_string(),
            scheme: "http".to_string(),
            return_code: 200,
            interval: 5,
            timeout: 5,
            retries: 10,
            start_period: 5,
        }
    }
}

/// Container resource limits (docker compose notation)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub memory: String,
    pub memory_swap: String,
    pub memory_swappiness: u32,
    pub memory_reservation: String,
    pub cpus: String,
    pub cpuset: Option<String>,
    pub cpu_shares: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: "0".to_string(),
            memory_swap: "0".to_string(),
            memory_swappiness: 60,
            memory_reservation: "0".to_string(),
            cpus: "0".to_string(),
            cpuset: None,
            cpu_shares: 1024,
        }
    }
}

/// GPU reservation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuSettings {
    pub enabled: bool,
    pub driver: String,
    /// Number of GPUs or `all`
    pub count: Option<String>,
    /// Comma separated device ids, takes precedence over `count`
    pub device_ids: Option<String>,
    pub options: Option<serde_json::Value>,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            driver: "nvidia".to_string(),
            count: None,
            device_ids: None,
            options: None,
        }
    }
}

/// Named volume or bind mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentStorage {
    pub name: String,
    pub mount_path: String,
    /// Bind mount source; a named volume is created when absent
    #[serde(default)]
    pub host_path: Option<String>,
}

/// File on the host mounted as a compose secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSecret {
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub target: Option<String>,
}

/// Per-application feature toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub is_consistent_container_name_enabled: bool,
    pub custom_internal_name: Option<String>,
    pub use_build_secrets: bool,
    pub inject_build_args_to_dockerfile: bool,
    pub is_env_sorting_enabled: bool,
    pub include_source_commit_in_build: bool,
    pub is_spa: bool,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            is_consistent_container_name_enabled: false,
            custom_internal_name: None,
            use_build_secrets: false,
            inject_build_args_to_dockerfile: true,
            is_env_sorting_enabled: false,
            include_source_commit_in_build: false,
            is_spa: false,
        }
    }
}

/// Canary rollout configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanarySettings {
    pub enabled: bool,
    /// Canary weight per step; the last step must be 100
    pub steps: Vec<u8>,
    pub step_interval_secs: u64,
}

impl Default for CanarySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            steps: vec![10, 25, 50, 100],
            step_interval_secs: 300,
        }
    }
}

/// An application as configured in the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub uuid: String,
    pub name: String,

    pub git_repository: String,
    #[serde(default = "default_branch")]
    pub git_branch: String,
    #[serde(default = "default_commit")]
    pub git_commit_sha: String,
    /// Deploy key path on the target host
    #[serde(default)]
    pub git_private_key_path: Option<String>,

    pub build_pack: BuildPack,
    #[serde(default)]
    pub static_base: StaticBase,
    #[serde(default = "default_base_directory")]
    pub base_directory: String,
    #[serde(default = "default_dockerfile_location")]
    pub dockerfile_location: String,
    #[serde(default = "default_compose_location")]
    pub docker_compose_location: String,
    #[serde(default)]
    pub publish_directory: Option<String>,

    /// Prebuilt image for the `dockerimage` build pack
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub docker_image_tag: Option<String>,
    #[serde(default)]
    pub docker_registry_image_name: Option<String>,
    #[serde(default)]
    pub docker_registry_image_tag: Option<String>,

    /// Comma separated URLs
    #[serde(default)]
    pub fqdn: Option<String>,
    /// Compose service name to URL, for the compose build pack
    #[serde(default)]
    pub docker_compose_domains: BTreeMap<String, String>,
    #[serde(default = "default_ports_exposes")]
    pub ports_exposes: String,
    #[serde(default)]
    pub ports_mappings: Option<String>,

    #[serde(default)]
    pub health_check: HealthCheckSettings,
    #[serde(default)]
    pub limits: ResourceLimits,
    /// Newline separated docker labels, replacing the generated ones
    #[serde(default)]
    pub custom_labels: Option<String>,
    #[serde(default)]
    pub custom_docker_run_options: Option<String>,
    #[serde(default)]
    pub gpu: GpuSettings,
    #[serde(default)]
    pub storages: Vec<PersistentStorage>,
    #[serde(default)]
    pub file_secrets: Vec<FileSecret>,
    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,
    #[serde(default)]
    pub settings: ApplicationSettings,

    #[serde(default)]
    pub post_deployment_command: Option<String>,
    #[serde(default = "default_replicas")]
    pub swarm_replicas: u32,

    pub destination: Destination,
    #[serde(default)]
    pub additional_destinations: Vec<Destination>,

    #[serde(default)]
    pub canary: CanarySettings,

    #[serde(default)]
    pub restart_count: u32,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_commit() -> String {
    "HEAD".to_string()
}

fn default_base_directory() -> String {
    "/".to_string()
}

fn default_dockerfile_location() -> String {
    "/Dockerfile".to_string()
}

fn default_compose_location() -> String {
    "/docker-compose.yaml".to_string()
}

fn default_ports_exposes() -> String {
    "3000".to_string()
}

fn default_replicas() -> u32 {
    1
}

fn default_status() -> String {
    "exited".to_string()
}

impl Application {
    /// Exposed container ports, in configured order
    pub fn ports_exposes_array(&self) -> Vec<u16> {
        self.ports_exposes
            .split(',')
            .filter_map(|p| p.trim().parse().ok())
            .collect()
    }

    /// Host port mappings such as `8080:3000`
    pub fn ports_mappings_array(&self) -> Vec<String> {
        self.ports_mappings
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Configured URLs
    pub fn fqdns(&self) -> Vec<String> {
        self.fqdn
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect()
    }

    /// Port used by health checks and proxy routing
    pub fn health_check_port(&self) -> Option<u16> {
        self.health_check
            .port
            .or_else(|| self.ports_exposes_array().first().copied())
    }

    /// Base directory without a trailing slash, empty for the repository root
    pub fn base_dir(&self) -> &str {
        self.base_directory.trim_end_matches('/')
    }
}
