//! Environment composition and the build secrets hash

use launchpad::env::composer;
use platform_models::EnvironmentVariable;

use crate::common::{application, context, deployment};

const SECRETS_HASH: &str = "LAUNCHPAD_BUILD_SECRETS_HASH";

#[test]
fn test_user_variables_override_platform_values() {
    let mut app = application("a1");
    app.environment_variables = vec![
        EnvironmentVariable::new("LAUNCHPAD_BRANCH", "custom"),
        EnvironmentVariable::new("PORT", "8080"),
    ];
    let dep = deployment(&app);
    let mut ctx = context(app, dep);
    ctx.buildpack_defaults
        .insert("LAUNCHPAD_BRANCH".to_string(), "from-pack".to_string());
    ctx.buildpack_defaults
        .insert("NIXPACKS_NODE_VERSION".to_string(), "20".to_string());

    composer::compose(&mut ctx);
    assert_eq!(ctx.build_env.get("LAUNCHPAD_BRANCH"), Some("custom"));
    assert_eq!(ctx.build_env.get("NIXPACKS_NODE_VERSION"), Some("20"));
    assert_eq!(ctx.runtime_env.get("PORT"), Some("8080"));
    assert_eq!(ctx.runtime_env.get("HOST"), Some("0.0.0.0"));
    assert_eq!(ctx.runtime_env.get("LAUNCHPAD_FQDN"), Some("web.example.com"));
}

#[test]
fn test_runtime_defaults_and_commit_scope() {
    let app = application("a1");
    let dep = deployment(&app);
    let mut ctx = context(app, dep);
    composer::compose(&mut ctx);

    assert_eq!(ctx.runtime_env.get("PORT"), Some("3000"));
    assert_eq!(ctx.runtime_env.get("SOURCE_COMMIT"), Some(ctx.commit.as_str()));
    assert!(!ctx.build_env.contains("SOURCE_COMMIT"));

    ctx.flags.include_source_commit_in_build = true;
    composer::compose(&mut ctx);
    assert_eq!(ctx.build_env.get("SOURCE_COMMIT"), Some(ctx.commit.as_str()));
}

#[test]
fn test_preview_variables_only_for_pull_requests() {
    let mut app = application("a1");
    let mut preview = EnvironmentVariable::new("API_URL", "https://preview.example.com");
    preview.is_preview = true;
    app.environment_variables = vec![
        EnvironmentVariable::new("API_URL", "https://api.example.com"),
        preview,
    ];

    let dep = deployment(&app);
    let mut ctx = context(app.clone(), dep.clone());
    composer::compose(&mut ctx);
    assert_eq!(ctx.runtime_env.get("API_URL"), Some("https://api.example.com"));

    let mut pr = dep;
    pr.pull_request_id = 7;
    let mut ctx = context(app, pr);
    composer::compose(&mut ctx);
    assert_eq!(ctx.runtime_env.get("API_URL"), Some("https://preview.example.com"));
    assert_eq!(ctx.runtime_env.get("LAUNCHPAD_BRANCH"), Some("pull/7/head"));
}

#[test]
fn test_service_references_are_written_last() {
    let mut app = application("a1");
    app.environment_variables = vec![
        EnvironmentVariable::new("API", "${SERVICE_URL_API}/v1"),
        EnvironmentVariable::new("TOKEN", "abc"),
    ];
    let dep = deployment(&app);
    let mut ctx = context(app, dep);
    composer::compose(&mut ctx);

    let keys = ctx.runtime_env.keys();
    assert_eq!(keys.last().map(String::as_str), Some("API"));
    let dotenv = ctx.runtime_env.render_dotenv();
    assert!(dotenv.find("TOKEN=").unwrap() < dotenv.find("API=").unwrap());
}

#[test]
fn test_secrets_hash_is_deterministic() {
    let mut app = application("a1");
    app.environment_variables = vec![EnvironmentVariable::new("DATABASE_URL", "postgres://db")];
    let dep = deployment(&app);

    let hash_of = |ctx: &mut launchpad::context::BuildContext, key: &[u8]| {
        composer::compose(ctx);
        composer::apply_secrets_hash(ctx, key).unwrap();
        ctx.secrets_hash.clone().unwrap()
    };

    let mut first = context(app.clone(), dep.clone());
    let mut second = context(app.clone(), dep.clone());
    let hash = hash_of(&mut first, b"key");
    assert_eq!(hash, hash_of(&mut second, b"key"));
    assert_eq!(first.build_env.get(SECRETS_HASH), Some(hash.as_str()));

    // Recomputing over a set that already carries the hash is stable
    composer::apply_secrets_hash(&mut first, b"key").unwrap();
    assert_eq!(first.secrets_hash.as_deref(), Some(hash.as_str()));

    assert_ne!(hash, hash_of(&mut context(app.clone(), dep.clone()), b"other"));

    let mut changed = app;
    changed.environment_variables = vec![EnvironmentVariable::new("DATABASE_URL", "postgres://db2")];
    assert_ne!(hash, hash_of(&mut context(changed, dep), b"key"));
}

#[test]
fn test_build_secrets_only_with_secrets_enabled() {
    let mut app = application("a1");
    app.environment_variables = vec![EnvironmentVariable::new("NPM_TOKEN", "secret")];
    let dep = deployment(&app);

    let mut ctx = context(app.clone(), dep.clone());
    composer::compose(&mut ctx);
    composer::apply_secrets_hash(&mut ctx, b"key").unwrap();
    assert!(ctx.build_secrets.is_empty());

    let mut ctx = context(app, dep);
    ctx.flags.use_build_secrets = true;
    composer::compose(&mut ctx);
    composer::apply_secrets_hash(&mut ctx, b"key").unwrap();
    assert_eq!(ctx.build_secrets.get("NPM_TOKEN").map(String::as_str), Some("secret"));
    assert!(ctx.build_secrets.contains_key(SECRETS_HASH));
}

#[test]
fn test_redeploying_same_commit_keeps_the_hash() {
    let mut app = application("a1");
    app.environment_variables = vec![EnvironmentVariable::new("DATABASE_URL", "postgres://db")];
    let first_dep = deployment(&app);
    let mut second_dep = deployment(&app);
    second_dep.created_at = first_dep.created_at + chrono::Duration::seconds(7);

    let mut first = context(app.clone(), first_dep);
    let mut second = context(app, second_dep);
    assert_ne!(first.container_name, second.container_name);

    for ctx in [&mut first, &mut second] {
        composer::compose(ctx);
        composer::apply_secrets_hash(ctx, b"key").unwrap();
    }
    assert_eq!(first.secrets_hash, second.secrets_hash);
    assert!(!first.build_env.contains("LAUNCHPAD_CONTAINER_NAME"));
    assert_eq!(
        first.runtime_env.get("LAUNCHPAD_CONTAINER_NAME"),
        Some(first.container_name.as_str())
    );
}
