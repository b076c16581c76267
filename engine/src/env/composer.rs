//! Build-time, runtime and system variable sets

use platform_models::Application;
use tracing::warn;
use url::Url;

use crate::context::BuildContext;
use crate::env::secrets::{secrets_hash, SECRETS_HASH_KEY};
use crate::env::set::EnvSet;
use crate::errors::EngineError;

/// Which half of a variable's lifetime a set is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Build,
    Runtime,
}

/// Upper-cased variable suffix for a compose service name
pub fn service_suffix(service: &str) -> String {
    service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Host part of a configured URL
pub fn fqdn_host(fqdn: &str) -> Option<String> {
    let with_scheme = if fqdn.contains("://") {
        fqdn.to_string()
    } else {
        format!("http://{fqdn}")
    };
    match Url::parse(&with_scheme) {
        Ok(url) => url.host_str().map(str::to_string),
        Err(e) => {
            warn!("Ignoring unparseable URL {}: {}", fqdn, e);
            None
        }
    }
}

/// User variables of one scope; preview deployments only see preview variables
pub fn user_variables(application: &Application, is_pull_request: bool, scope: Scope) -> EnvSet {
    let mut vars: Vec<_> = application
        .environment_variables
        .iter()
        .filter(|v| v.is_preview == is_pull_request)
        .filter(|v| match scope {
            Scope::Build => v.is_buildtime,
            Scope::Runtime => v.is_runtime,
        })
        .collect();
    vars.sort_by_key(|v| v.order);

    let mut env = EnvSet::new();
    for var in vars {
        if var.is_literal || var.is_multiline {
            env.insert_literal(&var.key, var.resolved_value());
        } else {
            env.insert(&var.key, var.resolved_value());
        }
    }
    env
}

/// Variables injected by the platform
pub fn system_variables(ctx: &BuildContext, scope: Scope) -> EnvSet {
    let app = &ctx.application;
    let mut env = EnvSet::new();

    if let Some(url) = app.fqdns().first() {
        env.insert("LAUNCHPAD_URL", url.as_str());
        if let Some(host) = fqdn_host(url) {
            env.insert("LAUNCHPAD_FQDN", host);
        }
    }
    let branch = if ctx.flags.is_pull_request() {
        format!("pull/{}/head", ctx.flags.pull_request_id)
    } else {
        app.git_branch.clone()
    };
    env.insert("LAUNCHPAD_BRANCH", branch);
    env.insert("LAUNCHPAD_RESOURCE_UUID", app.uuid.as_str());

    // Container name and commit change on every deployment and would bust
    // the build cache
    if scope == Scope::Runtime {
        env.insert("LAUNCHPAD_CONTAINER_NAME", ctx.container_name.as_str());
    }
    if scope == Scope::Runtime || ctx.flags.include_source_commit_in_build {
        env.insert("SOURCE_COMMIT", ctx.commit.as_str());
    }
    env
}

/// `SERVICE_NAME_*`, `SERVICE_URL_*` and `SERVICE_FQDN_*` of compose services
pub fn service_variables(ctx: &BuildContext) -> EnvSet {
    let mut env = EnvSet::new();
    for service in &ctx.compose_services {
        env.insert(format!("SERVICE_NAME_{}", service_suffix(service)), service.as_str());
    }
    for (service, urls) in &ctx.application.docker_compose_domains {
        let Some(url) = urls.split(',').map(str::trim).find(|u| !u.is_empty()) else {
            continue;
        };
        let suffix = service_suffix(service);
        env.insert(format!("SERVICE_URL_{suffix}"), url);
        if let Some(host) = fqdn_host(url) {
            env.insert(format!("SERVICE_FQDN_{suffix}"), host);
        }
    }
    env
}

/// Build-time set: build pack defaults < system < compose services < user
pub fn build_time(ctx: &BuildContext) -> EnvSet {
    let mut env = EnvSet::new();
    for (key, value) in &ctx.buildpack_defaults {
        env.insert(key.as_str(), value.as_str());
    }
    env.extend(&system_variables(ctx, Scope::Build));
    env.extend(&service_variables(ctx));
    env.extend(&user_variables(
        &ctx.application,
        ctx.flags.is_pull_request(),
        Scope::Build,
    ));
    env
}

/// Runtime set: system < compose services < user, then `PORT`/`HOST`
/// defaults and dependency ordering
pub fn runtime(ctx: &BuildContext) -> EnvSet {
    let mut env = system_variables(ctx, Scope::Runtime);
    env.extend(&service_variables(ctx));
    env.extend(&user_variables(
        &ctx.application,
        ctx.flags.is_pull_request(),
        Scope::Runtime,
    ));

    if !env.contains("PORT") {
        if let Some(port) = ctx.application.ports_exposes_array().first() {
            env.insert("PORT", port.to_string());
        }
    }
    if !env.contains("HOST") {
        env.insert("HOST", "0.0.0.0");
    }

    if ctx.flags.env_sorting {
        env.sort_by_key();
    }
    env.order_service_references_last();
    env
}

/// Recompute the environment sets of a context
pub fn compose(ctx: &mut BuildContext) {
    ctx.system_env = system_variables(ctx, Scope::Runtime);
    ctx.build_env = build_time(ctx);
    ctx.runtime_env = runtime(ctx);
}

/// Hash the build-time set and expose the hash as a variable and, when
/// build secrets are in use, as a build secret
pub fn apply_secrets_hash(ctx: &mut BuildContext, key: &[u8]) -> Result<(), EngineError> {
    let hash = secrets_hash(&ctx.build_env, key)?;

    ctx.build_secrets.clear();
    if ctx.flags.use_build_secrets {
        ctx.build_secrets = ctx.build_env.to_map();
        ctx.build_secrets
            .insert(SECRETS_HASH_KEY.to_string(), hash.clone());
    }
    ctx.build_env.insert(SECRETS_HASH_KEY, hash.as_str());
    ctx.secrets_hash = Some(hash);
    Ok(())
}
