//! Generated compose documents

use launchpad::compose::render;
use launchpad::context::BuildContext;
use launchpad::rollout::ProxyOptions;
use platform_models::Application;
use serde_yaml::Value;

use crate::common::{application, context, deployment};

fn rendered(app: Application) -> (BuildContext, Value) {
    let dep = deployment(&app);
    let mut ctx = context(app, dep);
    ctx.production_image = "a1uuid:0123456789ab".to_string();
    let yaml = render(&ctx, &ProxyOptions::default()).to_yaml().unwrap();
    (ctx, serde_yaml::from_str(&yaml).unwrap())
}

fn yaml(text: &str) -> Value {
    serde_yaml::from_str(text).unwrap()
}

#[test]
fn test_render_is_deterministic() {
    let app = application("a1");
    let dep = deployment(&app);
    let ctx = context(app, dep);
    let proxy = ProxyOptions::default();

    let first = render(&ctx, &proxy).to_yaml().unwrap();
    let second = render(&ctx, &proxy).to_yaml().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_standalone_service() {
    let (ctx, doc) = rendered(application("a1"));
    let service = &doc["services"][ctx.container_name.as_str()];

    assert_eq!(service["image"], yaml("a1uuid:0123456789ab"));
    assert_eq!(service["container_name"], yaml(&ctx.container_name));
    assert_eq!(service["restart"], yaml("unless-stopped"));
    assert_eq!(service["expose"], yaml("['3000']"));
    assert_eq!(service["env_file"], yaml("['.env']"));
    assert!(service.get("healthcheck").is_some());
    assert_eq!(service["mem_limit"], yaml("'0'"));
    assert!(service.get("deploy").is_none());
    assert_eq!(
        service["networks"]["launchpad"]["aliases"][0],
        yaml(&ctx.container_name)
    );
    assert_eq!(doc["networks"]["launchpad"]["external"], Value::Bool(true));
}

#[test]
fn test_swarm_limits_move_under_deploy() {
    let mut app = application("a1");
    app.destination.is_swarm = true;
    app.limits.memory = "512m".to_string();
    let (ctx, doc) = rendered(app);
    let service = &doc["services"][ctx.container_name.as_str()];

    assert!(service.get("container_name").is_none());
    assert!(service.get("mem_limit").is_none());
    assert_eq!(
        service["deploy"]["resources"]["limits"]["memory"],
        yaml("512m")
    );
    assert_eq!(service["deploy"]["mode"], yaml("replicated"));
}

#[test]
fn test_disabled_healthcheck_is_omitted() {
    let mut app = application("a1");
    app.health_check.enabled = false;
    let (ctx, doc) = rendered(app);
    assert!(doc["services"][ctx.container_name.as_str()]
        .get("healthcheck")
        .is_none());
}

#[test]
fn test_static_ip_replaces_aliases() {
    let mut app = application("a1");
    app.custom_docker_run_options = Some("--ip 10.0.1.20 --cap-add NET_ADMIN".to_string());
    let (ctx, doc) = rendered(app);
    let service = &doc["services"][ctx.container_name.as_str()];

    let network = &service["networks"]["launchpad"];
    assert_eq!(network["ipv4_address"], yaml("10.0.1.20"));
    assert!(network.get("aliases").is_none());
    assert_eq!(service["cap_add"], yaml("[NET_ADMIN]"));
}

#[test]
fn test_gpu_device_ids_replace_count() {
    let mut app = application("a1");
    app.gpu.enabled = true;
    app.gpu.driver = "nvidia".to_string();
    app.gpu.device_ids = Some("0, 1".to_string());
    let (ctx, doc) = rendered(app);
    let device =
        &doc["services"][ctx.container_name.as_str()]["deploy"]["resources"]["reservations"]["devices"][0];

    assert_eq!(device["device_ids"], yaml("['0', '1']"));
    assert!(device.get("count").is_none());
    assert_eq!(device["driver"], yaml("nvidia"));
}
