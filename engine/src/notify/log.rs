//! Event sink writing to the engine log

use async_trait::async_trait;
use tracing::info;

use crate::notify::{EngineEvent, EventSink};

#[derive(Debug, Default)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn emit(&self, event: EngineEvent) {
        match &event {
            EngineEvent::CanaryRolledBack {
                deployment_uuid,
                reason,
                ..
            } => info!(
                event = event.name(),
                "Canary of deployment {} rolled back: {}", deployment_uuid, reason
            ),
            _ => info!(event = event.name(), "{:?}", event),
        }
    }
}
