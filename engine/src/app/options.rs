//! Application configuration options

use std::time::Duration;

use crate::deploy::pipeline;
use crate::remote::SshOptions;
use crate::rollout::ProxyOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{NotificationSettings, Settings, StoreSettings};
use crate::workers::{canary, deployer};

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Enable the HTTP API
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Where application and deployment records live
    pub store: StoreSettings,

    pub pipeline: pipeline::Options,

    pub deployer: deployer::Options,

    pub canary_worker: canary::Options,

    pub proxy: ProxyOptions,

    pub ssh: SshOptions,

    pub notifications: NotificationSettings,
}

impl AppOptions {
    /// Options described by a settings file
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
            },
            layout,
            enable_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            store: settings.store.clone(),
            pipeline: pipeline::Options {
                paths: settings.pipeline.host_paths(),
                helper_image: settings.pipeline.helper_image.clone(),
                use_build_secrets: settings.pipeline.use_build_secrets,
                secrets_hash_key: settings.pipeline.build_secrets_key.clone(),
                log_flush_batch: settings.pipeline.log_flush_batch,
            },
            deployer: deployer::Options {
                concurrent_builds: settings.pipeline.concurrent_builds,
            },
            canary_worker: canary::Options::default(),
            proxy: settings.proxy.to_options(),
            ssh: settings.ssh.to_options(),
            notifications: settings.notifications.clone(),
        }
    }
}

/// Lifecycle options for the engine
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP API server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_settings() {
        let settings: Settings = serde_json::from_str(
            r#"{"server": {"port": 9100}, "pipeline": {"concurrent_builds": 2}, "max_shutdown_delay_secs": 5}"#,
        )
        .unwrap();
        let options = AppOptions::from_settings(StorageLayout::new("/tmp/lp"), &settings);
        assert_eq!(options.server.port, 9100);
        assert_eq!(options.deployer.concurrent_builds, 2);
        assert_eq!(options.lifecycle.max_shutdown_delay, Duration::from_secs(5));
        assert!(options.enable_server);
    }
}
