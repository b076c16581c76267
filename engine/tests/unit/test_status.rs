//! Status transitions, fan-out and the per-application queue

use chrono::{Duration, Utc};
use launchpad::errors::EngineError;
use launchpad::store::DeploymentStore;
use platform_models::DeploymentStatus;

use crate::common::{application, deployment, destination, Harness};

#[tokio::test]
async fn test_terminal_status_is_never_left() {
    let app = application("a1");
    let harness = Harness::new(vec![app.clone()]);
    let (running, _) = harness.start(deployment(&app)).await;
    let uuid = running.deployment_uuid.clone();

    assert!(harness
        .status
        .transition_to(&uuid, DeploymentStatus::Finished)
        .await
        .unwrap());
    assert!(!harness
        .status
        .transition_to(&uuid, DeploymentStatus::Failed)
        .await
        .unwrap());
    assert!(!harness
        .status
        .transition_to(&uuid, DeploymentStatus::CancelledByUser)
        .await
        .unwrap());

    let stored = harness.store.deployment(&uuid).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Finished);
    assert_eq!(
        harness.events.names(),
        vec!["configuration_changed", "deployment_succeeded"]
    );
}

#[tokio::test]
async fn test_failure_emits_failed_event() {
    let app = application("a1");
    let harness = Harness::new(vec![app.clone()]);
    let (running, _) = harness.start(deployment(&app)).await;

    harness
        .status
        .transition_to(&running.deployment_uuid, DeploymentStatus::Failed)
        .await
        .unwrap();
    assert_eq!(harness.events.names(), vec!["deployment_failed"]);
}

#[tokio::test]
async fn test_finished_deployment_fans_out_to_additional_destinations() {
    let mut app = application("a1");
    app.additional_destinations = vec![destination("edge")];
    let harness = Harness::new(vec![app.clone()]);
    let (running, _) = harness.start(deployment(&app)).await;

    harness
        .status
        .transition_to(&running.deployment_uuid, DeploymentStatus::Finished)
        .await
        .unwrap();

    let deployments = harness.store.deployments_for("a1");
    assert_eq!(deployments.len(), 2);
    let fan_out = deployments
        .iter()
        .find(|d| d.deployment_uuid != running.deployment_uuid)
        .unwrap();
    assert!(fan_out.is_additional);
    assert!(fan_out.restart_only);
    assert_eq!(fan_out.commit, running.commit);
    assert_eq!(fan_out.destination.id, "edge");
    assert_eq!(fan_out.status, DeploymentStatus::Queued);
    harness.queue.finish(&running.deployment_uuid).await;

    // The additional deployment does not fan out again
    let (additional, _) = harness
        .queue
        .claim_next("a1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(additional.deployment_uuid, fan_out.deployment_uuid);
    harness
        .status
        .transition_to(&additional.deployment_uuid, DeploymentStatus::Finished)
        .await
        .unwrap();
    assert_eq!(harness.store.deployments_for("a1").len(), 2);
}

#[tokio::test]
async fn test_one_active_deployment_per_application() {
    let app = application("a1");
    let other = application("b1");
    let harness = Harness::new(vec![app.clone(), other.clone()]);

    let mut first = deployment(&app);
    let mut second = deployment(&app);
    first.created_at = Utc::now() - Duration::seconds(10);
    second.created_at = Utc::now();
    harness.queue.enqueue(second.clone()).await.unwrap();
    harness.queue.enqueue(first.clone()).await.unwrap();
    harness.queue.enqueue(deployment(&other)).await.unwrap();

    let (claimed, _) = harness.queue.claim_next("a1").await.unwrap().unwrap();
    assert_eq!(claimed.deployment_uuid, first.deployment_uuid);
    assert!(harness.queue.claim_next("a1").await.unwrap().is_none());

    // Other applications are not blocked
    assert!(harness.queue.claim_next("b1").await.unwrap().is_some());

    harness
        .status
        .transition_to(&first.deployment_uuid, DeploymentStatus::Failed)
        .await
        .unwrap();
    harness.queue.finish(&first.deployment_uuid).await;
    let (next, _) = harness.queue.claim_next("a1").await.unwrap().unwrap();
    assert_eq!(next.deployment_uuid, second.deployment_uuid);
}

#[tokio::test]
async fn test_transitions_signal_the_queue() {
    let app = application("a1");
    let mut harness = Harness::new(vec![app.clone()]);
    let (running, _) = harness.start(deployment(&app)).await;
    // Signal of the enqueue
    assert_eq!(harness.signals.recv().await.unwrap().application_id, "a1");

    harness
        .status
        .transition_to(&running.deployment_uuid, DeploymentStatus::Finished)
        .await
        .unwrap();
    assert_eq!(harness.signals.recv().await.unwrap().application_id, "a1");
}

#[tokio::test]
async fn test_cancel_flags_running_deployment() {
    let app = application("a1");
    let harness = Harness::new(vec![app.clone()]);
    let (running, cancel) = harness.start(deployment(&app)).await;
    let uuid = running.deployment_uuid.clone();

    assert!(harness.queue.is_running(&uuid).await);
    assert!(harness
        .status
        .transition_to(&uuid, DeploymentStatus::CancelledByUser)
        .await
        .unwrap());
    assert!(harness.queue.cancel(&uuid).await);
    assert!(cancel.is_cancelled());
    assert!(matches!(
        harness.status.check_cancelled(&uuid).await,
        Err(EngineError::Cancelled)
    ));

    harness.queue.finish(&uuid).await;
    assert!(!harness.queue.cancel(&uuid).await);
}

#[tokio::test]
async fn test_cancelled_deployment_blocks_the_queue_until_it_returns() {
    let app = application("a1");
    let mut harness = Harness::new(vec![app.clone()]);
    let (running, _) = harness.start(deployment(&app)).await;
    let uuid = running.deployment_uuid.clone();
    let next = harness.queue.enqueue(deployment(&app)).await.unwrap();

    harness
        .status
        .transition_to(&uuid, DeploymentStatus::CancelledByUser)
        .await
        .unwrap();
    assert!(harness.queue.cancel(&uuid).await);

    // The cancelled pipeline is still unwinding on the host
    assert!(harness.queue.claim_next("a1").await.unwrap().is_none());

    while harness.signals.try_recv().is_ok() {}
    harness.queue.finish(&uuid).await;
    assert_eq!(harness.signals.recv().await.unwrap().application_id, "a1");
    let (claimed, _) = harness.queue.claim_next("a1").await.unwrap().unwrap();
    assert_eq!(claimed.deployment_uuid, next.deployment_uuid);
}
