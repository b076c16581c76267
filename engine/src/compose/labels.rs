//! Container labels: platform bookkeeping and Traefik routing

use url::Url;

use crate::context::BuildContext;
use crate::rollout::traefik::ProxyOptions;

pub const REDIRECT_MIDDLEWARE: &str = "redirect-to-https";

/// Labels identifying the container as managed by the engine
pub fn platform_labels(ctx: &BuildContext) -> Vec<String> {
    vec![
        "launchpad.managed=true".to_string(),
        format!("launchpad.version={}", env!("CARGO_PKG_VERSION")),
        format!("launchpad.applicationId={}", ctx.application.id),
        "launchpad.type=application".to_string(),
        format!("launchpad.name={}", ctx.container_name),
        format!("launchpad.resourceName={}", ctx.application.name),
        format!("launchpad.pullRequestId={}", ctx.flags.pull_request_id),
    ]
}

/// Newline separated labels configured by the user
pub fn custom_labels(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

struct Route {
    https: bool,
    host: String,
    path: String,
}

fn parse_route(fqdn: &str) -> Option<Route> {
    let with_scheme = if fqdn.contains("://") {
        fqdn.to_string()
    } else {
        format!("http://{fqdn}")
    };
    let url = Url::parse(&with_scheme).ok()?;
    Some(Route {
        https: url.scheme() == "https",
        host: url.host_str()?.to_string(),
        path: url.path().to_string(),
    })
}

fn rule(route: &Route) -> String {
    if route.path.is_empty() || route.path == "/" {
        format!("Host(`{}`)", route.host)
    } else {
        format!("Host(`{}`) && PathPrefix(`{}`)", route.host, route.path)
    }
}

/// Router and service labels for each URL, `id` keeps names unique per resource
pub fn traefik_labels(id: &str, fqdns: &[String], port: u16, proxy: &ProxyOptions) -> Vec<String> {
    let routes: Vec<Route> = fqdns.iter().filter_map(|f| parse_route(f)).collect();
    if routes.is_empty() {
        return Vec::new();
    }

    let mut labels = vec![
        "traefik.enable=true".to_string(),
        format!("traefik.http.middlewares.{REDIRECT_MIDDLEWARE}.redirectscheme.scheme=https"),
    ];
    for (i, route) in routes.iter().enumerate() {
        let http = format!("http-{i}-{id}");
        labels.push(format!(
            "traefik.http.routers.{http}.entryPoints={}",
            proxy.http_entrypoint
        ));
        labels.push(format!("traefik.http.routers.{http}.rule={}", rule(route)));
        labels.push(format!("traefik.http.routers.{http}.service={http}"));
        labels.push(format!(
            "traefik.http.services.{http}.loadbalancer.server.port={port}"
        ));
        if !route.https {
            continue;
        }

        labels.push(format!(
            "traefik.http.routers.{http}.middlewares={REDIRECT_MIDDLEWARE}"
        ));
        let https = format!("https-{i}-{id}");
        labels.push(format!(
            "traefik.http.routers.{https}.entryPoints={}",
            proxy.https_entrypoint
        ));
        labels.push(format!("traefik.http.routers.{https}.rule={}", rule(route)));
        labels.push(format!("traefik.http.routers.{https}.service={https}"));
        labels.push(format!("traefik.http.routers.{https}.tls=true"));
        labels.push(format!(
            "traefik.http.routers.{https}.tls.certresolver={}",
            proxy.cert_resolver
        ));
        labels.push(format!(
            "traefik.http.services.{https}.loadbalancer.server.port={port}"
        ));
    }
    labels
}

/// Router id of the application; previews get their own routers
pub fn router_id(ctx: &BuildContext) -> String {
    ctx.compose_project()
}

/// Labels of the generated service
pub fn service_labels(ctx: &BuildContext, proxy: &ProxyOptions) -> Vec<String> {
    let mut labels = platform_labels(ctx);
    match ctx.application.custom_labels.as_deref().map(custom_labels) {
        Some(custom) if !custom.is_empty() => labels.extend(custom),
        _ => labels.extend(traefik_labels(
            &router_id(ctx),
            &ctx.application.fqdns(),
            ctx.service_port(),
            proxy,
        )),
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_route_redirects_and_resolves_certs() {
        let labels = traefik_labels(
            "app1",
            &["https://shop.example.com/api".to_string()],
            3000,
            &ProxyOptions::default(),
        );

        assert!(labels.contains(
            &"traefik.http.routers.http-0-app1.middlewares=redirect-to-https".to_string()
        ));
        assert!(labels.contains(
            &"traefik.http.routers.https-0-app1.rule=Host(`shop.example.com`) && PathPrefix(`/api`)"
                .to_string()
        ));
        assert!(labels.contains(
            &"traefik.http.routers.https-0-app1.tls.certresolver=letsencrypt".to_string()
        ));
        assert!(labels.contains(
            &"traefik.http.services.https-0-app1.loadbalancer.server.port=3000".to_string()
        ));
    }

    #[test]
    fn test_plain_http_has_no_tls_router() {
        let labels = traefik_labels(
            "app1",
            &["shop.example.com".to_string()],
            80,
            &ProxyOptions::default(),
        );
        assert!(labels.iter().all(|l| !l.contains("https-0-app1")));
        assert!(labels.contains(
            &"traefik.http.routers.http-0-app1.rule=Host(`shop.example.com`)".to_string()
        ));
    }

    #[test]
    fn test_no_fqdn_no_labels() {
        assert!(traefik_labels("app1", &[], 80, &ProxyOptions::default()).is_empty());
    }
}
