//! Whole deployments run through the pipeline against a scripted host

use std::time::Duration;

use launchpad::registry::{self, BUILD_INPUTS_LABEL};
use launchpad::store::DeploymentStore;
use launchpad::workers::deployer;
use platform_models::{Application, BuildPack, DeploymentStatus, EnvironmentVariable, NewDeployment};
use tokio::sync::{mpsc, oneshot};

use crate::common::{application, context, deployment, Harness, Reply};

const STARTING: &str = r#"{"Status":"starting","Log":null}"#;
const HEALTHY: &str = r#"{"Status":"healthy","Log":null}"#;

fn image_application() -> Application {
    let mut app = application("a1");
    app.build_pack = BuildPack::DockerImage;
    app.docker_image = Some("nginx".to_string());
    app.docker_image_tag = Some("1.25".to_string());
    app
}

const DOCKERFILE: &str = "FROM node:20-alpine\nWORKDIR /app\nCOPY . .\nRUN npm ci\nCMD [\"node\", \"server.js\"]\n";

fn script_previous_containers(harness: &Harness) {
    harness
        .transport
        .respond("docker ps -a", vec![Reply::ok("a1uuid-old\na1uuid-pr-3\n")]);
}

fn script_dockerfile(harness: &Harness) {
    harness
        .transport
        .respond("Dockerfile 2>/dev/null", vec![Reply::ok(DOCKERFILE)]);
}

fn build_inputs_label(scripts: &[String]) -> Option<String> {
    let build = scripts.iter().find(|s| s.contains("docker build"))?;
    let start = build.find(BUILD_INPUTS_LABEL)? + BUILD_INPUTS_LABEL.len() + 1;
    let value: String = build[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    Some(value)
}

#[tokio::test(start_paused = true)]
async fn test_prebuilt_image_deployment_finishes() {
    let app = image_application();
    let harness = Harness::new(vec![app.clone()]);
    script_previous_containers(&harness);
    harness.transport.respond(
        ".State.Health",
        vec![Reply::ok(STARTING), Reply::ok(STARTING), Reply::ok(HEALTHY)],
    );

    let (running, cancel) = harness.start(deployment(&app)).await;
    let uuid = running.deployment_uuid.clone();
    let status = harness.pipeline().run(running, cancel).await;

    assert_eq!(status, DeploymentStatus::Finished);
    let stored = harness.store.deployment(&uuid).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Finished);

    let transport = &harness.transport;
    assert_eq!(transport.count(&[".State.Health"]), 3);
    assert_eq!(transport.count(&["docker stop", "a1uuid-old"]), 1);
    // Preview containers belong to another project
    assert_eq!(transport.count(&["docker stop", "a1uuid-pr-3"]), 0);
    // Prebuilt images are always pulled and never pushed
    assert_eq!(transport.count(&["docker pull", "nginx:1.25"]), 1);
    assert_eq!(transport.count(&["docker push"]), 0);
    assert_eq!(transport.count(&["docker-compose.yaml", "base64 -d"]), 1);
    assert_eq!(transport.count(&[".env", "base64 -d"]), 1);
    // Helper started and removed
    assert_eq!(transport.count(&["docker run -d --rm", uuid.as_str()]), 1);
    assert_eq!(transport.count(&["docker rm -f", uuid.as_str()]), 2);

    let logs = harness.store.logs_after(&uuid, 0).await.unwrap();
    assert_eq!(logs.first().map(|l| l.order), Some(1));
    assert!(logs.windows(2).all(|w| w[1].order == w[0].order + 1));
    assert!(logs.iter().any(|l| l.output == "Deployment finished"));
    // Inspect output is kept out of the public log
    assert!(logs
        .iter()
        .filter(|l| l.output.contains("FailingStreak") || l.output.contains("\"Status\""))
        .all(|l| l.hidden));

    assert_eq!(
        harness.events.names(),
        vec!["configuration_changed", "deployment_succeeded"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_branch_fails_the_deployment() {
    let app = application("a1");
    let harness = Harness::new(vec![app.clone()]);
    harness.transport.respond("git ls-remote", vec![Reply::ok("")]);

    let request = NewDeployment {
        application_id: app.id.clone(),
        ..Default::default()
    }
    .into_request(app.destination.clone());
    let (running, cancel) = harness.start(request).await;
    let uuid = running.deployment_uuid.clone();
    let status = harness.pipeline().run(running, cancel).await;

    assert_eq!(status, DeploymentStatus::Failed);
    assert_eq!(
        harness.store.deployment(&uuid).await.unwrap().status,
        DeploymentStatus::Failed
    );
    assert_eq!(harness.transport.count(&["git clone"]), 0);
    assert_eq!(harness.transport.count(&["docker compose"]), 0);
    assert_eq!(harness.transport.count(&["docker rm -f", uuid.as_str()]), 2);

    let logs = harness.store.logs_after(&uuid, 0).await.unwrap();
    assert!(logs
        .iter()
        .any(|l| l.output.starts_with("Deployment failed: Git error")));
    assert_eq!(harness.events.names(), vec!["deployment_failed"]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_application_fails_the_deployment() {
    let app = application("a1");
    let harness = Harness::new(vec![]);
    let request = deployment(&app);
    let uuid = request.deployment_uuid.clone();
    harness.queue.enqueue(request).await.unwrap();
    let (running, cancel) = harness.queue.claim_next("a1").await.unwrap().unwrap();

    let status = harness.pipeline().run(running, cancel).await;
    assert_eq!(status, DeploymentStatus::Failed);
    assert!(harness.transport.scripts().is_empty());
    let logs = harness.store.logs_after(&uuid, 0).await.unwrap();
    assert!(logs.iter().any(|l| l.output.contains("Failed to load application a1")));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_health_wait_keeps_the_old_container() {
    let app = image_application();
    let harness = Harness::new(vec![app.clone()]);
    script_previous_containers(&harness);
    harness
        .transport
        .respond(".State.Health", vec![Reply::ok(STARTING)]);

    let (running, cancel) = harness.start(deployment(&app)).await;
    let uuid = running.deployment_uuid.clone();
    let pipeline = harness.pipeline();
    let task = tokio::spawn(async move { pipeline.run(running, cancel).await });

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(harness.transport.count(&[".State.Health"]) >= 1);
    assert!(harness
        .status
        .transition_to(&uuid, DeploymentStatus::CancelledByUser)
        .await
        .unwrap());
    assert!(harness.queue.cancel(&uuid).await);

    let status = task.await.unwrap();
    assert_eq!(status, DeploymentStatus::CancelledByUser);
    assert_eq!(
        harness.store.deployment(&uuid).await.unwrap().status,
        DeploymentStatus::CancelledByUser
    );
    assert_eq!(harness.transport.count(&["docker stop", "a1uuid-old"]), 0);
    // The helper is still removed after the cancel
    assert_eq!(harness.transport.count(&["docker rm -f", uuid.as_str()]), 2);
    assert!(harness.events.names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deployer_runs_queued_deployments_in_turn() {
    let app = image_application();
    let mut harness = Harness::new(vec![app.clone()]);
    script_previous_containers(&harness);
    harness
        .transport
        .respond(".State.Health", vec![Reply::ok(HEALTHY)]);

    let first = harness.queue.enqueue(deployment(&app)).await.unwrap();
    let second = harness.queue.enqueue(deployment(&app)).await.unwrap();

    let signals = std::mem::replace(&mut harness.signals, mpsc::unbounded_channel().1);
    let queue = harness.queue.clone();
    let pipeline = harness.pipeline();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let worker = tokio::spawn(async move {
        let shutdown = Box::pin(async move {
            let _ = stop_rx.await;
        });
        deployer::run(&deployer::Options::default(), queue, pipeline, signals, shutdown).await;
    });

    tokio::time::sleep(Duration::from_secs(300)).await;
    for queued in [&first, &second] {
        let stored = harness.store.deployment(&queued.deployment_uuid).await.unwrap();
        assert_eq!(stored.status, DeploymentStatus::Finished);
    }
    assert_eq!(harness.transport.count(&["docker run -d --rm"]), 2);
    assert!(!harness.queue.is_running(&first.deployment_uuid).await);

    stop_tx.send(()).unwrap();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dockerfile_deployment_finishes() {
    let app = application("a1");
    let harness = Harness::new(vec![app.clone()]);
    script_previous_containers(&harness);
    script_dockerfile(&harness);
    harness.transport.respond(
        ".State.Health",
        vec![Reply::ok(STARTING), Reply::ok(STARTING), Reply::ok(HEALTHY)],
    );

    let (running, cancel) = harness.start(deployment(&app)).await;
    let uuid = running.deployment_uuid.clone();
    let status = harness.pipeline().run(running, cancel).await;

    assert_eq!(status, DeploymentStatus::Finished);
    assert_eq!(
        harness.store.deployment(&uuid).await.unwrap().status,
        DeploymentStatus::Finished
    );

    let transport = &harness.transport;
    assert_eq!(transport.count(&["git clone"]), 1);
    assert_eq!(transport.count(&["docker build", "-t a1uuid:0123456789abcdef"]), 1);
    assert_eq!(transport.count(&[".State.Health"]), 3);
    assert_eq!(transport.count(&["docker stop", "a1uuid-old"]), 1);
    assert_eq!(transport.count(&["docker stop", "a1uuid-pr-3"]), 0);
    // No registry configured
    assert_eq!(transport.count(&["docker push"]), 0);

    let label = build_inputs_label(&transport.scripts()).unwrap();
    assert_eq!(label.len(), 64);
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_build_inputs_reuse_the_image() {
    let app = application("a1");
    let harness = Harness::new(vec![app.clone()]);
    script_previous_containers(&harness);
    script_dockerfile(&harness);
    harness
        .transport
        .respond(".State.Health", vec![Reply::ok(HEALTHY)]);

    let (running, cancel) = harness.start(deployment(&app)).await;
    let first = running.deployment_uuid.clone();
    assert_eq!(
        harness.pipeline().run(running, cancel).await,
        DeploymentStatus::Finished
    );
    harness.queue.finish(&first).await;
    let label = build_inputs_label(&harness.transport.scripts()).unwrap();

    // The image is now on the host, labelled by the first build
    harness
        .transport
        .respond("docker images -q", vec![Reply::ok("f1e2d3c4b5a6")]);
    harness
        .transport
        .respond("index .Config.Labels", vec![Reply::ok(&format!("{label}\n"))]);

    let (running, cancel) = harness.start(deployment(&app)).await;
    let second = running.deployment_uuid.clone();
    assert_eq!(
        harness.pipeline().run(running, cancel).await,
        DeploymentStatus::Finished
    );
    harness.queue.finish(&second).await;
    assert_eq!(harness.transport.count(&["docker build"]), 1);
    assert_eq!(harness.transport.count(&["git clone"]), 1);

    // A changed build variable no longer matches the label
    let mut changed = app.clone();
    changed.environment_variables = vec![EnvironmentVariable::new("NODE_ENV", "staging")];
    harness.store.upsert_application(changed.clone());
    let (running, cancel) = harness.start(deployment(&changed)).await;
    assert_eq!(
        harness.pipeline().run(running, cancel).await,
        DeploymentStatus::Finished
    );
    assert_eq!(harness.transport.count(&["docker build"]), 2);
}

#[tokio::test]
async fn test_configured_tag_is_never_reused() {
    let mut app = application("a1");
    app.docker_registry_image_name = Some("ghcr.io/acme/web".to_string());
    app.docker_registry_image_tag = Some("stable".to_string());
    let harness = Harness::new(vec![app.clone()]);
    harness
        .transport
        .respond("docker images -q", vec![Reply::ok("f1e2d3c4b5a6")]);

    let mut request = deployment(&app);
    request.commit = "ffffffffffffffffffffffffffffffffffffffff".to_string();
    let mut ctx = context(app, request);
    registry::apply_names(&mut ctx);
    ctx.secrets_hash = Some("0".repeat(64));
    let executor = harness.executor(&ctx).await;

    assert_eq!(ctx.production_image, "ghcr.io/acme/web:stable");
    assert!(!registry::can_skip_build(&ctx, &executor).await.unwrap());
    assert_eq!(harness.transport.count(&["docker images -q"]), 0);
}
