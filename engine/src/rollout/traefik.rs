//! Traefik file provider configuration for weighted canary routing

use std::collections::BTreeMap;
use std::time::Duration;

use platform_models::Server;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::remote::{shell, RemoteCommand};

/// Reverse proxy settings
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Host running the proxy, the deployment host when absent
    pub server: Option<Server>,

    /// Directory watched by the Traefik file provider
    pub dynamic_config_dir: String,

    /// Time Traefik needs to pick up a changed file
    pub reload_wait: Duration,

    pub cert_resolver: String,

    pub http_entrypoint: String,

    pub https_entrypoint: String,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            server: None,
            dynamic_config_dir: "/data/launchpad/proxy/dynamic".to_string(),
            reload_wait: Duration::from_secs(5),
            cert_resolver: "letsencrypt".to_string(),
            http_entrypoint: "http".to_string(),
            https_entrypoint: "https".to_string(),
        }
    }
}

/// Stable share of the traffic for a canary weight
pub fn calc_stable_weight(canary_weight: u8) -> u8 {
    100 - canary_weight.min(100)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicConfig {
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub routers: BTreeMap<String, Router>,
    pub services: BTreeMap<String, Service>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    pub rule: String,
    pub entry_points: Vec<String>,
    pub service: String,
    pub priority: u32,
    pub tls: RouterTls,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterTls {
    pub cert_resolver: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighted: Option<Weighted>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weighted {
    pub services: Vec<WeightedService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedService {
    pub name: String,
    pub weight: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub servers: Vec<ServerUrl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerUrl {
    pub url: String,
}

/// Public route split between two containers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedRoute {
    pub deployment_uuid: String,
    pub host: String,
    pub stable_container: String,
    pub canary_container: String,
    pub port: u16,
}

/// Router priority, above the container label routers
const PRIORITY: u32 = 1000;

impl WeightedRoute {
    pub fn router_name(&self) -> String {
        format!("{}-canary", self.deployment_uuid)
    }

    fn backend(container: &str, port: u16) -> Service {
        Service {
            weighted: None,
            load_balancer: Some(LoadBalancer {
                servers: vec![ServerUrl {
                    url: format!("http://{container}:{port}"),
                }],
            }),
        }
    }

    /// Configuration sending `canary_weight` percent of the traffic to the canary
    pub fn config(&self, canary_weight: u8, proxy: &ProxyOptions) -> DynamicConfig {
        let uuid = &self.deployment_uuid;
        let stable = format!("{uuid}-stable");
        let canary = format!("{uuid}-canary");
        let weighted = format!("{uuid}-weighted");

        let router = Router {
            rule: format!("Host(`{}`)", self.host),
            // The weighted split is served over TLS whatever the domain scheme
            entry_points: vec![proxy.https_entrypoint.clone()],
            service: weighted.clone(),
            priority: PRIORITY,
            tls: RouterTls {
                cert_resolver: proxy.cert_resolver.clone(),
            },
        };

        let mut services = BTreeMap::new();
        services.insert(
            weighted,
            Service {
                weighted: Some(Weighted {
                    services: vec![
                        WeightedService {
                            name: stable.clone(),
                            weight: calc_stable_weight(canary_weight),
                        },
                        WeightedService {
                            name: canary.clone(),
                            weight: canary_weight.min(100),
                        },
                    ],
                }),
                load_balancer: None,
            },
        );
        services.insert(stable, Self::backend(&self.stable_container, self.port));
        services.insert(canary, Self::backend(&self.canary_container, self.port));

        let mut routers = BTreeMap::new();
        routers.insert(self.router_name(), router);
        DynamicConfig {
            http: HttpConfig { routers, services },
        }
    }
}

/// File of a deployment's canary route on the proxy host
pub fn config_path(proxy: &ProxyOptions, deployment_uuid: &str) -> String {
    format!(
        "{}/{}-canary.yaml",
        proxy.dynamic_config_dir.trim_end_matches('/'),
        deployment_uuid
    )
}

/// Command writing the configuration to the proxy host
pub fn write_command(
    proxy: &ProxyOptions,
    deployment_uuid: &str,
    config: &DynamicConfig,
) -> Result<RemoteCommand, EngineError> {
    let yaml = serde_yaml::to_string(config)?;
    Ok(RemoteCommand::host(format!(
        "mkdir -p {} && {}",
        shell::quote_arg(&proxy.dynamic_config_dir),
        shell::write_file(&config_path(proxy, deployment_uuid), &yaml)
    ))
    .hidden())
}

pub fn delete_command(proxy: &ProxyOptions, deployment_uuid: &str) -> RemoteCommand {
    RemoteCommand::host(format!(
        "rm -f {}",
        shell::quote_arg(&config_path(proxy, deployment_uuid))
    ))
    .hidden()
    .ignore_errors()
}
