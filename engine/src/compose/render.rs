//! Compose document generation

use serde_yaml::{Mapping, Value};
use url::Url;

use crate::compose::custom_options;
use crate::compose::labels;
use crate::compose::merge::deep_merge;
use crate::context::BuildContext;
use crate::errors::EngineError;
use crate::rollout::traefik::ProxyOptions;

fn s(value: &str) -> Value {
    Value::String(value.to_string())
}

fn seq<I, S>(items: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Value::Sequence(items.into_iter().map(|i| s(i.as_ref())).collect())
}

fn map(entries: Vec<(&str, Value)>) -> Value {
    let mut mapping = Mapping::new();
    for (key, value) in entries {
        mapping.insert(s(key), value);
    }
    Value::Mapping(mapping)
}

/// Generated compose file; keys keep insertion order so equal inputs
/// serialize to identical YAML
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeDocument {
    root: Mapping,
}

impl ComposeDocument {
    pub fn to_yaml(&self) -> Result<String, EngineError> {
        Ok(serde_yaml::to_string(&self.root)?)
    }

    pub fn root(&self) -> &Mapping {
        &self.root
    }

    /// The generated service
    pub fn service(&self, name: &str) -> Option<&Value> {
        self.root.get("services").and_then(|services| services.get(name))
    }
}

/// Healthcheck probing the configured endpoint with curl, falling back to wget
pub fn healthcheck(ctx: &BuildContext) -> Value {
    let hc = &ctx.application.health_check;
    let port = hc.port.unwrap_or_else(|| ctx.service_port());
    let url = format!("{}://{}:{}{}", hc.scheme, hc.host, port, hc.path);
    let test = format!(
        "curl -s -X {} -f {url} > /dev/null || wget -q -O- {url} > /dev/null || exit 1",
        hc.method
    );
    map(vec![
        ("test", seq(["CMD-SHELL", test.as_str()])),
        ("interval", s(&format!("{}s", hc.interval))),
        ("timeout", s(&format!("{}s", hc.timeout))),
        ("retries", Value::from(hc.retries)),
        ("start_period", s(&format!("{}s", hc.start_period))),
    ])
}

fn gpu_devices(ctx: &BuildContext) -> Option<Value> {
    let gpu = &ctx.application.gpu;
    if !gpu.enabled {
        return None;
    }
    let mut device = vec![("driver", s(&gpu.driver)), ("capabilities", seq(["gpu"]))];
    match gpu.device_ids.as_deref() {
        Some(ids) if !ids.trim().is_empty() => {
            device.push(("device_ids", seq(ids.split(',').map(str::trim))));
        }
        _ => {
            let count = gpu.count.as_deref().unwrap_or("all");
            let count = count
                .parse::<u64>()
                .map(Value::from)
                .unwrap_or_else(|_| s(count));
            device.push(("count", count));
        }
    }
    if let Some(options) = &gpu.options {
        if let Ok(options) = serde_yaml::to_value(options) {
            device.push(("options", options));
        }
    }
    Some(Value::Sequence(vec![map(device)]))
}

fn deploy_block(ctx: &BuildContext) -> Option<Value> {
    let limits = &ctx.application.limits;
    let mut resources = Mapping::new();
    if ctx.flags.is_swarm {
        resources.insert(
            s("limits"),
            map(vec![("cpus", s(&limits.cpus)), ("memory", s(&limits.memory))]),
        );
        resources.insert(
            s("reservations"),
            map(vec![("memory", s(&limits.memory_reservation))]),
        );
    }
    if let Some(devices) = gpu_devices(ctx) {
        let reservations = resources
            .entry(s("reservations"))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if let Value::Mapping(reservations) = reservations {
            reservations.insert(s("devices"), devices);
        }
    }

    let mut deploy = Mapping::new();
    if ctx.flags.is_swarm {
        deploy.insert(s("mode"), s("replicated"));
        deploy.insert(s("replicas"), Value::from(ctx.application.swarm_replicas));
        deploy.insert(s("update_config"), map(vec![("order", s("start-first"))]));
        deploy.insert(s("rollback_config"), map(vec![("order", s("start-first"))]));
    }
    if !resources.is_empty() {
        deploy.insert(s("resources"), Value::Mapping(resources));
    }
    (!deploy.is_empty()).then_some(Value::Mapping(deploy))
}

fn service_networks(ctx: &BuildContext, options: &custom_options::CustomOptions) -> Value {
    let network = &ctx.destination().network;
    let attachment = if options.requests_static_ip() {
        let mut addresses = Vec::new();
        if let Some(ip) = &options.ip {
            addresses.push(("ipv4_address", s(ip)));
        }
        if let Some(ip6) = &options.ip6 {
            addresses.push(("ipv6_address", s(ip6)));
        }
        map(addresses)
    } else {
        let mut aliases = vec![ctx.container_name.clone()];
        if let Some(internal) = &ctx.application.settings.custom_internal_name {
            aliases.push(internal.clone());
        }
        map(vec![("aliases", seq(aliases))])
    };
    map(vec![(network.as_str(), attachment)])
}

fn external_network(network: &str) -> Value {
    map(vec![(
        network,
        map(vec![("name", s(network)), ("external", Value::Bool(true))]),
    )])
}

/// Render the compose document of a single-container application
pub fn render(ctx: &BuildContext, proxy: &ProxyOptions) -> ComposeDocument {
    let app = &ctx.application;
    let options = app
        .custom_docker_run_options
        .as_deref()
        .map(custom_options::parse)
        .unwrap_or_default();

    let mut service = Mapping::new();
    service.insert(s("image"), s(&ctx.production_image));
    if !ctx.flags.is_swarm {
        service.insert(s("container_name"), s(&ctx.container_name));
        service.insert(s("restart"), s("unless-stopped"));
    }
    service.insert(
        s("expose"),
        seq(app.ports_exposes_array().iter().map(u16::to_string)),
    );
    let ports = app.ports_mappings_array();
    if !ports.is_empty() {
        service.insert(s("ports"), seq(ports));
    }
    service.insert(s("env_file"), seq([".env"]));
    service.insert(s("networks"), service_networks(ctx, &options));
    if ctx.healthcheck_enabled() {
        service.insert(s("healthcheck"), healthcheck(ctx));
    }
    service.insert(s("labels"), seq(labels::service_labels(ctx, proxy)));

    if !ctx.flags.is_swarm {
        let limits = &app.limits;
        service.insert(s("mem_limit"), s(&limits.memory));
        service.insert(s("memswap_limit"), s(&limits.memory_swap));
        service.insert(s("mem_swappiness"), Value::from(limits.memory_swappiness));
        service.insert(s("mem_reservation"), s(&limits.memory_reservation));
        service.insert(s("cpus"), s(&limits.cpus));
        if let Some(cpuset) = &limits.cpuset {
            service.insert(s("cpuset"), s(cpuset));
        }
        service.insert(s("cpu_shares"), Value::from(limits.cpu_shares));
    }
    if let Some(deploy) = deploy_block(ctx) {
        service.insert(s("deploy"), deploy);
    }

    if !app.storages.is_empty() {
        let volumes = app.storages.iter().map(|storage| {
            let source = storage.host_path.as_deref().unwrap_or(&storage.name);
            format!("{}:{}", source, storage.mount_path)
        });
        service.insert(s("volumes"), seq(volumes));
    }
    if !app.file_secrets.is_empty() {
        let secrets = app
            .file_secrets
            .iter()
            .map(|secret| {
                let target = secret.target.as_deref().unwrap_or(&secret.name);
                map(vec![("source", s(&secret.name)), ("target", s(target))])
            })
            .collect();
        service.insert(s("secrets"), Value::Sequence(secrets));
    }

    let mut service = Value::Mapping(service);
    if !options.fragment.is_empty() {
        deep_merge(&mut service, Value::Mapping(options.fragment.clone()));
    }

    let mut root = Mapping::new();
    root.insert(s("services"), map(vec![(ctx.container_name.as_str(), service)]));
    root.insert(s("networks"), external_network(&ctx.destination().network));

    let named: Vec<_> = app.storages.iter().filter(|v| v.host_path.is_none()).collect();
    if !named.is_empty() {
        let mut volumes = Mapping::new();
        for volume in named {
            volumes.insert(
                s(&volume.name),
                map(vec![("name", s(&volume.name)), ("external", Value::Bool(false))]),
            );
        }
        root.insert(s("volumes"), Value::Mapping(volumes));
    }
    if !app.file_secrets.is_empty() {
        let mut secrets = Mapping::new();
        for secret in &app.file_secrets {
            secrets.insert(s(&secret.name), map(vec![("file", s(&secret.file))]));
        }
        root.insert(s("secrets"), Value::Mapping(secrets));
    }

    ComposeDocument { root }
}

fn add_labels(service: &mut Mapping, new_labels: Vec<String>) {
    let labels = service
        .entry(s("labels"))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    match labels {
        Value::Sequence(items) => {
            for label in new_labels {
                let label = s(&label);
                if !items.contains(&label) {
                    items.push(label);
                }
            }
        }
        Value::Mapping(items) => {
            for label in new_labels {
                if let Some((key, value)) = label.split_once('=') {
                    items.entry(s(key)).or_insert_with(|| s(value));
                }
            }
        }
        other => *other = seq(new_labels),
    }
}

fn add_network(service: &mut Mapping, network: &str) {
    let networks = service
        .entry(s("networks"))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    match networks {
        Value::Sequence(items) => {
            if !items.contains(&s(network)) {
                items.push(s(network));
            }
        }
        Value::Mapping(items) => {
            items
                .entry(s(network))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
        }
        other => *other = seq([network]),
    }
}

/// Container port of a compose domain, the explicit URL port or 80
fn domain_port(fqdn: &str) -> u16 {
    Url::parse(fqdn)
        .ok()
        .and_then(|url| url.port())
        .unwrap_or(80)
}

/// Add platform labels, routing and the destination network to every
/// service of a user compose file
pub fn augment_user_compose(
    ctx: &BuildContext,
    mut document: Value,
    proxy: &ProxyOptions,
) -> Result<Value, EngineError> {
    let network = ctx.destination().network.clone();
    let root = document.as_mapping_mut().ok_or_else(|| {
        EngineError::ValidationError("compose file is not a mapping".to_string())
    })?;
    let services = root
        .get_mut("services")
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| EngineError::ValidationError("compose file has no services".to_string()))?;

    for (name, service) in services.iter_mut() {
        let Some(name) = name.as_str() else {
            continue;
        };
        let Some(service) = service.as_mapping_mut() else {
            continue;
        };

        let mut service_labels = labels::platform_labels(ctx);
        service_labels.push(format!("launchpad.service.subName={name}"));
        if let Some(domains) = ctx.application.docker_compose_domains.get(name) {
            for (i, fqdn) in domains
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .enumerate()
            {
                let id = format!("{}-{}-{}", labels::router_id(ctx), name, i);
                service_labels.extend(labels::traefik_labels(
                    &id,
                    &[fqdn.to_string()],
                    domain_port(fqdn),
                    proxy,
                ));
            }
        }
        add_labels(service, service_labels);
        add_network(service, &network);
        // Images were built in the helper container, the host has no build context
        if service.contains_key("image") {
            service.remove("build");
        }

        service
            .entry(s("container_name"))
            .or_insert_with(|| s(&format!("{}-{}", name, ctx.application.uuid)));
        service
            .entry(s("restart"))
            .or_insert_with(|| s("unless-stopped"));
        let env_file = service
            .entry(s("env_file"))
            .or_insert_with(|| Value::Sequence(Vec::new()));
        if let Value::Sequence(files) = env_file {
            if !files.contains(&s(".env")) {
                files.push(s(".env"));
            }
        }
    }

    let mut networks = external_network(&network);
    if let Some(existing) = root.remove("networks") {
        deep_merge(&mut networks, existing);
    }
    root.insert(s("networks"), networks);
    Ok(document)
}

/// Service names of a user compose file
pub fn service_names(document: &Value) -> Vec<String> {
    document
        .get("services")
        .and_then(Value::as_mapping)
        .map(|services| {
            services
                .keys()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
