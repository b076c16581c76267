//! Canary rollouts: weight steps, promotion, rollback and stale ticks

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use launchpad::context::BuildContext;
use launchpad::rollout::traefik::DynamicConfig;
use launchpad::rollout::{CanaryProgress, RolloutController, RolloutOutcome};
use launchpad::store::DeploymentStore;
use launchpad::workers::canary as canary_worker;
use platform_models::Application;
use tokio::sync::{mpsc, oneshot};
use tokio_test::assert_err;

use crate::common::{application, context, deployment, Harness, Reply};

const HEALTHY: &str = r#"{"Status":"healthy","Log":null}"#;

fn canary_application() -> Application {
    let mut app = application("a1");
    app.canary.enabled = true;
    app.canary.steps = vec![10, 50, 100];
    app.canary.step_interval_secs = 60;
    app
}

/// (stable, canary) weights of every proxy configuration written
fn written_weights(scripts: &[String]) -> Vec<(u8, u8)> {
    scripts
        .iter()
        .filter(|s| s.contains("-canary.yaml") && s.contains("base64 -d"))
        .map(|s| {
            let encoded = s.split("echo '").nth(1).unwrap().split('\'').next().unwrap();
            let yaml = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
            let config: DynamicConfig = serde_yaml::from_str(&yaml).unwrap();
            let weighted = config
                .http
                .services
                .values()
                .find_map(|s| s.weighted.clone())
                .unwrap();
            (weighted.services[0].weight, weighted.services[1].weight)
        })
        .collect()
}

/// Run a healthy rollout next to `a1uuid-old`, leaving a canary at step 0
async fn start_canary(harness: &mut Harness) -> BuildContext {
    let app = canary_application();
    harness
        .transport
        .respond(".State.Health", vec![Reply::ok(HEALTHY)]);
    harness
        .transport
        .respond(".State.Running", vec![Reply::ok("true")]);

    let (running, _) = harness.start(deployment(&app)).await;
    let mut ctx = context(app, running);
    ctx.previous_containers = vec!["a1uuid-old".to_string()];
    let executor = harness.executor(&ctx).await;
    let controller = RolloutController::new(harness.store.clone(), harness.canary.clone());

    let outcome = controller.rollout(&mut ctx, &executor).await.unwrap();
    assert_eq!(outcome, RolloutOutcome::Promoted);
    ctx
}

#[tokio::test(start_paused = true)]
async fn test_rollout_starts_canary_at_first_step() {
    let mut harness = Harness::new(vec![canary_application()]);
    let ctx = start_canary(&mut harness).await;
    let uuid = ctx.deployment_uuid().to_string();

    assert!(ctx.canary.is_some());
    // The stable container keeps serving
    assert_eq!(harness.transport.count(&["docker stop", "a1uuid-old"]), 0);

    let state = harness
        .store
        .deployment(&uuid)
        .await
        .unwrap()
        .canary_state
        .unwrap();
    assert_eq!(state.current_step, 0);
    assert_eq!(state.current_weight, 10);
    assert_eq!(state.stable_container, "a1uuid-old");
    assert_eq!(state.canary_container, ctx.container_name);

    assert_eq!(written_weights(&harness.transport.scripts()), vec![(90, 10)]);

    let tick = harness.ticks.recv().await.unwrap();
    assert_eq!(tick.deployment_uuid, uuid);
    assert_eq!(tick.step, 0);
    assert_eq!(tick.delay, Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_canary_steps_then_promotes() {
    let mut harness = Harness::new(vec![canary_application()]);
    let ctx = start_canary(&mut harness).await;
    let uuid = ctx.deployment_uuid().to_string();

    let progress = harness.canary.advance(&uuid, 0).await.unwrap();
    assert_eq!(progress, CanaryProgress::Advanced { step: 1, weight: 50 });

    // A duplicate tick for the same step does nothing
    assert_eq!(
        harness.canary.advance(&uuid, 0).await.unwrap(),
        CanaryProgress::Stale
    );

    assert_eq!(
        harness.canary.advance(&uuid, 1).await.unwrap(),
        CanaryProgress::Promoted
    );
    assert_eq!(
        written_weights(&harness.transport.scripts()),
        vec![(90, 10), (50, 50), (0, 100)]
    );

    let stored = harness.store.deployment(&uuid).await.unwrap();
    assert!(stored.canary_state.is_none());
    assert_eq!(harness.transport.count(&["docker stop", "a1uuid-old"]), 1);
    assert_eq!(
        harness
            .transport
            .count(&["docker rename", ctx.container_name.as_str()]),
        1
    );
    assert!(harness.events.names().contains(&"canary_promoted"));

    // Ticks after promotion are stale
    assert_eq!(
        harness.canary.advance(&uuid, 1).await.unwrap(),
        CanaryProgress::Stale
    );
}

#[tokio::test(start_paused = true)]
async fn test_canary_that_stopped_running_is_rolled_back() {
    let mut harness = Harness::new(vec![canary_application()]);
    let ctx = start_canary(&mut harness).await;
    let uuid = ctx.deployment_uuid().to_string();
    harness
        .transport
        .respond(".State.Running", vec![Reply::ok("false")]);

    assert_eq!(
        harness.canary.advance(&uuid, 0).await.unwrap(),
        CanaryProgress::RolledBack
    );
    assert_eq!(
        written_weights(&harness.transport.scripts()),
        vec![(90, 10), (100, 0)]
    );

    let events = harness.store.rollback_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].weight_at_rollback, 10);
    assert_eq!(events[0].step, 0);
    assert_eq!(events[0].reason, "canary container is not running");
    assert_eq!(
        harness
            .transport
            .count(&["docker rm -f", ctx.container_name.as_str()]),
        1
    );
    // The stable container is untouched
    assert_eq!(harness.transport.count(&["docker stop", "a1uuid-old"]), 0);
    assert!(harness.events.names().contains(&"canary_rolled_back"));
}

#[tokio::test(start_paused = true)]
async fn test_manual_rollback_and_promote_need_a_canary() {
    let mut harness = Harness::new(vec![canary_application()]);
    let ctx = start_canary(&mut harness).await;
    let uuid = ctx.deployment_uuid().to_string();

    assert_eq!(
        harness.canary.rollback(&uuid, "manual rollback").await.unwrap(),
        CanaryProgress::RolledBack
    );
    assert_eq!(harness.store.rollback_events()[0].reason, "manual rollback");

    assert_err!(harness.canary.promote(&uuid).await);
    assert_err!(harness.canary.rollback(&uuid, "again").await);
}

#[tokio::test(start_paused = true)]
async fn test_recover_reschedules_persisted_canaries() {
    let mut harness = Harness::new(vec![canary_application()]);
    let ctx = start_canary(&mut harness).await;
    let _ = harness.ticks.recv().await.unwrap();

    assert_eq!(harness.canary.recover().await.unwrap(), 1);
    let tick = harness.ticks.recv().await.unwrap();
    assert_eq!(tick.deployment_uuid, ctx.deployment_uuid());
    assert_eq!(tick.step, 0);
}

#[tokio::test(start_paused = true)]
async fn test_worker_walks_canary_to_promotion() {
    let mut harness = Harness::new(vec![canary_application()]);
    let ctx = start_canary(&mut harness).await;
    let uuid = ctx.deployment_uuid().to_string();

    let ticks = std::mem::replace(&mut harness.ticks, mpsc::unbounded_channel().1);
    let manager = harness.canary.clone();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let worker = tokio::spawn(async move {
        let options = canary_worker::Options {
            recover_on_start: false,
        };
        let shutdown = Box::pin(async move {
            let _ = stop_rx.await;
        });
        canary_worker::run(&options, manager, ticks, tokio::time::sleep, shutdown).await;
    });

    // One step interval: the canary moves to 50%
    tokio::time::sleep(Duration::from_secs(61)).await;
    let state = harness
        .store
        .deployment(&uuid)
        .await
        .unwrap()
        .canary_state
        .unwrap();
    assert_eq!(state.current_step, 1);
    assert_eq!(state.current_weight, 50);

    // The next interval promotes
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(harness
        .store
        .deployment(&uuid)
        .await
        .unwrap()
        .canary_state
        .is_none());
    assert_eq!(
        written_weights(&harness.transport.scripts()),
        vec![(90, 10), (50, 50), (0, 100)]
    );

    stop_tx.send(()).unwrap();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_promotion_still_removes_the_route() {
    let mut harness = Harness::new(vec![canary_application()]);
    let ctx = start_canary(&mut harness).await;
    let uuid = ctx.deployment_uuid().to_string();
    harness
        .transport
        .respond("docker rename", vec![Reply::fail(1)]);

    assert_err!(harness.canary.promote(&uuid).await);

    let stored = harness.store.deployment(&uuid).await.unwrap();
    assert!(stored.canary_state.is_none());
    assert_eq!(harness.transport.count(&["rm -f", "-canary.yaml"]), 1);
    assert!(!harness.events.names().contains(&"canary_promoted"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_weight_change_keeps_the_step() {
    let mut harness = Harness::new(vec![canary_application()]);
    let ctx = start_canary(&mut harness).await;
    let uuid = ctx.deployment_uuid().to_string();
    let first = harness.ticks.recv().await.unwrap();
    assert_eq!(first.step, 0);

    harness.transport.respond("base64 -d", vec![Reply::fail(1)]);
    assert_err!(harness.canary.advance(&uuid, 0).await);

    let state = harness
        .store
        .deployment(&uuid)
        .await
        .unwrap()
        .canary_state
        .unwrap();
    assert_eq!(state.current_step, 0);
    assert_eq!(state.current_weight, 10);
    // The same step is retried after another interval
    let retry = harness.ticks.recv().await.unwrap();
    assert_eq!(retry.step, 0);
    assert_eq!(retry.delay, Duration::from_secs(60));

    harness.transport.respond("base64 -d", vec![Reply::ok("")]);
    assert_eq!(
        harness.canary.advance(&uuid, 0).await.unwrap(),
        CanaryProgress::Advanced { step: 1, weight: 50 }
    );
}
