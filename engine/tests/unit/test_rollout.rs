//! Blue/green rollout against a scripted host

use launchpad::errors::EngineError;
use launchpad::rollout::{RolloutController, RolloutOutcome};
use launchpad::store::DeploymentStore;
use platform_models::BuildPack;

use crate::common::{application, context, deployment, Harness, Reply};

const STARTING: &str = r#"{"Status":"starting","FailingStreak":0,"Log":null}"#;
const HEALTHY: &str = r#"{"Status":"healthy","FailingStreak":0,"Log":[{"ExitCode":0,"Output":"ok"}]}"#;
const UNHEALTHY: &str = r#"{"Status":"unhealthy","FailingStreak":3,"Log":[{"ExitCode":7,"Output":"connection refused"}]}"#;

fn position(scripts: &[String], patterns: &[&str]) -> Option<usize> {
    scripts
        .iter()
        .position(|s| patterns.iter().all(|p| s.contains(p)))
}

#[tokio::test(start_paused = true)]
async fn test_healthy_container_replaces_the_old_one() {
    let app = application("a1");
    let harness = Harness::new(vec![app.clone()]);
    harness.transport.respond(
        ".State.Health",
        vec![Reply::ok(STARTING), Reply::ok(STARTING), Reply::ok(HEALTHY)],
    );

    let mut ctx = context(app.clone(), deployment(&app));
    ctx.previous_containers = vec!["a1uuid-old".to_string()];
    let executor = harness.executor(&ctx).await;
    let controller = RolloutController::new(harness.store.clone(), harness.canary.clone());

    let outcome = controller.rollout(&mut ctx, &executor).await.unwrap();
    assert_eq!(outcome, RolloutOutcome::Promoted);

    let scripts = harness.transport.scripts();
    assert_eq!(harness.transport.count(&[".State.Health"]), 3);
    assert_eq!(harness.transport.count(&["docker stop", "a1uuid-old"]), 1);

    // The old container is only stopped once the new one is healthy
    let up = position(&scripts, &["docker compose", "up -d"]).unwrap();
    let stop = position(&scripts, &["docker stop", "a1uuid-old"]).unwrap();
    assert!(up < stop);

    let app = harness.store.application("a1").await.unwrap();
    assert_eq!(app.status, "running");
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_container_keeps_the_old_one() {
    let app = application("a1");
    let harness = Harness::new(vec![app.clone()]);
    harness
        .transport
        .respond(".State.Health", vec![Reply::ok(UNHEALTHY)]);

    let mut ctx = context(app.clone(), deployment(&app));
    ctx.previous_containers = vec!["a1uuid-old".to_string()];
    let executor = harness.executor(&ctx).await;
    let controller = RolloutController::new(harness.store.clone(), harness.canary.clone());

    let err = controller.rollout(&mut ctx, &executor).await.unwrap_err();
    match err {
        EngineError::RolloutError { cause, message } => {
            assert_eq!(cause, "HealthCheckError");
            assert!(message.contains("connection refused"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(harness.transport.count(&["docker stop", "a1uuid-old"]), 0);
    assert_eq!(
        harness
            .transport
            .count(&["docker rm -f", ctx.container_name.as_str()]),
        1
    );
    assert_eq!(harness.transport.count(&["docker logs -n 100"]), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_removes_the_new_container() {
    let app = application("a1");
    let harness = Harness::new(vec![app.clone()]);
    harness
        .transport
        .respond("docker compose", vec![Reply::fail(1)]);

    let mut ctx = context(app.clone(), deployment(&app));
    ctx.previous_containers = vec!["a1uuid-old".to_string()];
    let executor = harness.executor(&ctx).await;
    let controller = RolloutController::new(harness.store.clone(), harness.canary.clone());

    let err = controller.rollout(&mut ctx, &executor).await.unwrap_err();
    assert!(matches!(err, EngineError::RolloutError { ref cause, .. } if cause == "RemoteCommand"));
    assert_eq!(harness.transport.count(&[".State.Health"]), 0);
    assert_eq!(harness.transport.count(&["docker stop", "a1uuid-old"]), 0);
}

#[tokio::test(start_paused = true)]
async fn test_port_mappings_stop_the_old_container_first() {
    let mut app = application("a1");
    app.ports_mappings = Some("8080:3000".to_string());
    let harness = Harness::new(vec![app.clone()]);
    harness
        .transport
        .respond(".State.Health", vec![Reply::ok(HEALTHY)]);

    let mut ctx = context(app.clone(), deployment(&app));
    ctx.previous_containers = vec!["a1uuid-old".to_string()];
    let executor = harness.executor(&ctx).await;
    let controller = RolloutController::new(harness.store.clone(), harness.canary.clone());

    controller.rollout(&mut ctx, &executor).await.unwrap();

    let scripts = harness.transport.scripts();
    let stop = position(&scripts, &["docker stop", "a1uuid-old"]).unwrap();
    let up = position(&scripts, &["docker compose", "up -d"]).unwrap();
    assert!(stop < up);
    assert_eq!(harness.transport.count(&["docker stop", "a1uuid-old"]), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_healthcheck_checks_the_container_runs() {
    let mut app = application("a1");
    app.health_check.enabled = false;
    let harness = Harness::new(vec![app.clone()]);
    harness
        .transport
        .respond(".State.Status", vec![Reply::ok("running:false")]);

    let mut ctx = context(app.clone(), deployment(&app));
    let executor = harness.executor(&ctx).await;
    let controller = RolloutController::new(harness.store.clone(), harness.canary.clone());

    controller.rollout(&mut ctx, &executor).await.unwrap();
    assert_eq!(harness.transport.count(&[".State.Health"]), 0);
    assert_eq!(harness.transport.count(&[".State.Status"]), 1);
}

#[tokio::test(start_paused = true)]
async fn test_compose_pack_is_brought_up_by_compose() {
    let mut app = application("a1");
    app.build_pack = BuildPack::DockerCompose;
    let harness = Harness::new(vec![app.clone()]);

    let mut ctx = context(app.clone(), deployment(&app));
    let executor = harness.executor(&ctx).await;
    let controller = RolloutController::new(harness.store.clone(), harness.canary.clone());

    controller.rollout(&mut ctx, &executor).await.unwrap();
    assert_eq!(harness.transport.count(&["up -d --remove-orphans"]), 1);
    assert_eq!(harness.transport.count(&[".State.Health"]), 0);
}
