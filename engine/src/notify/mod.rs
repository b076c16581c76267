//! Notifications about deployment outcomes
//!
//! Sinks are fire and forget: emitting never fails and never blocks a
//! deployment on a slow receiver.

pub mod log;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use log::LogEventSink;
pub use webhook::WebhookEventSink;

/// Event published by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    DeploymentSucceeded {
        deployment_uuid: String,
        application_id: String,
    },
    DeploymentFailed {
        deployment_uuid: String,
        application_id: String,
    },
    /// Running configuration of an application changed
    ConfigurationChanged { application_id: String },
    CanaryPromoted {
        deployment_uuid: String,
        application_id: String,
    },
    CanaryRolledBack {
        deployment_uuid: String,
        application_id: String,
        reason: String,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::DeploymentSucceeded { .. } => "deployment_succeeded",
            EngineEvent::DeploymentFailed { .. } => "deployment_failed",
            EngineEvent::ConfigurationChanged { .. } => "configuration_changed",
            EngineEvent::CanaryPromoted { .. } => "canary_promoted",
            EngineEvent::CanaryRolledBack { .. } => "canary_rolled_back",
        }
    }
}

/// Notification collaborator
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: EngineEvent);
}

/// Forwards every event to each sink in turn
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for FanoutEventSink {
    async fn emit(&self, event: EngineEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}
