//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use platform_models::Server;
use secrecy::SecretString;
use serde::Deserialize;

use crate::context::HostPaths;
use crate::logs::LogLevel;
use crate::remote::SshOptions;
use crate::rollout::ProxyOptions;

/// Engine settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to daily files in the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP API configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Deployment record persistence
    #[serde(default)]
    pub store: StoreSettings,

    /// Deployment pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Reverse proxy configuration
    #[serde(default)]
    pub proxy: ProxySettings,

    /// SSH client configuration
    #[serde(default)]
    pub ssh: SshSettings,

    /// Outgoing notifications
    #[serde(default)]
    pub notifications: NotificationSettings,

    /// Maximum delay for graceful shutdown, in seconds
    #[serde(default = "default_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            store: StoreSettings::default(),
            pipeline: PipelineSettings::default(),
            proxy: ProxySettings::default(),
            ssh: SshSettings::default(),
            notifications: NotificationSettings::default(),
            max_shutdown_delay_secs: default_shutdown_delay(),
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-memory records seeded from `applications.json`
    #[default]
    Memory,
    /// Control plane REST API
    Http,
}

/// Store settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub kind: StoreKind,

    /// Control plane API base URL
    #[serde(default = "default_store_url")]
    pub base_url: String,

    /// Control plane API token
    #[serde(default)]
    pub token: Option<SecretString>,

    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

fn default_store_url() -> String {
    "http://localhost:8080/api/v1".to_string()
}

fn default_store_timeout() -> u64 {
    30
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            base_url: default_store_url(),
            token: None,
            timeout_secs: default_store_timeout(),
        }
    }
}

/// Pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_helper_image")]
    pub helper_image: String,

    /// Work directories inside the helper container
    #[serde(default = "default_artifacts_root")]
    pub artifacts_root: String,

    /// Compose and `.env` files on the hosts
    #[serde(default = "default_config_root")]
    pub config_root: String,

    /// Use BuildKit secrets for every application
    #[serde(default)]
    pub use_build_secrets: bool,

    /// Key of the build secrets hash
    #[serde(default)]
    pub build_secrets_key: Option<SecretString>,

    #[serde(default = "default_log_flush_batch")]
    pub log_flush_batch: usize,

    #[serde(default = "default_concurrent_builds")]
    pub concurrent_builds: usize,
}

fn default_helper_image() -> String {
    "ghcr.io/launchpad/helper:latest".to_string()
}

fn default_artifacts_root() -> String {
    HostPaths::default().artifacts_root
}

fn default_config_root() -> String {
    HostPaths::default().config_root
}

fn default_log_flush_batch() -> usize {
    50
}

fn default_concurrent_builds() -> usize {
    4
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            helper_image: default_helper_image(),
            artifacts_root: default_artifacts_root(),
            config_root: default_config_root(),
            use_build_secrets: false,
            build_secrets_key: None,
            log_flush_batch: default_log_flush_batch(),
            concurrent_builds: default_concurrent_builds(),
        }
    }
}

impl PipelineSettings {
    pub fn host_paths(&self) -> HostPaths {
        HostPaths {
            artifacts_root: self.artifacts_root.clone(),
            config_root: self.config_root.clone(),
        }
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxySettings {
    /// Host running Traefik, the deployment host when absent
    #[serde(default)]
    pub server: Option<Server>,

    #[serde(default)]
    pub dynamic_config_dir: Option<String>,

    #[serde(default)]
    pub reload_wait_secs: Option<u64>,

    #[serde(default)]
    pub cert_resolver: Option<String>,
}

impl ProxySettings {
    pub fn to_options(&self) -> ProxyOptions {
        let defaults = ProxyOptions::default();
        ProxyOptions {
            server: self.server.clone(),
            dynamic_config_dir: self
                .dynamic_config_dir
                .clone()
                .unwrap_or(defaults.dynamic_config_dir),
            reload_wait: self
                .reload_wait_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reload_wait),
            cert_resolver: self.cert_resolver.clone().unwrap_or(defaults.cert_resolver),
            ..defaults
        }
    }
}

/// SSH client settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SshSettings {
    /// Default private key
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Directory of multiplexed control sockets
    #[serde(default)]
    pub mux_dir: Option<PathBuf>,
}

impl SshSettings {
    pub fn to_options(&self) -> SshOptions {
        let defaults = SshOptions::default();
        SshOptions {
            private_key_path: self.private_key_path.clone(),
            connect_timeout: self
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            mux_dir: self.mux_dir.clone().or(defaults.mux_dir.clone()),
            ..defaults
        }
    }
}

/// Notification settings
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    /// Webhook receiving deployment events
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// HMAC key of the webhook signature header
    #[serde(default)]
    pub webhook_secret: Option<SecretString>,

    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_secret: None,
            webhook_timeout_secs: default_webhook_timeout(),
        }
    }
}
