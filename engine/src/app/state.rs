//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::{DeploymentPipeline, DeploymentQueue, DeploymentStatusManager, QueueSignal};
use crate::errors::EngineError;
use crate::git::DefaultGitSource;
use crate::http::client::HttpClient;
use crate::notify::{EventSink, FanoutEventSink, LogEventSink, WebhookEventSink};
use crate::remote::{ShellTransport, Transport};
use crate::rollout::{CanaryManager, CanaryTick, RolloutController};
use crate::server::state::ServerState;
use crate::storage::settings::{NotificationSettings, StoreKind, StoreSettings};
use crate::store::http::HttpStore;
use crate::store::memory::MemoryStore;
use crate::store::DeploymentStore;

/// Receiving ends consumed by the workers
pub struct WorkerChannels {
    pub queue_signals: mpsc::UnboundedReceiver<QueueSignal>,
    pub canary_ticks: mpsc::UnboundedReceiver<CanaryTick>,
}

/// Main application state
pub struct AppState {
    pub store: Arc<dyn DeploymentStore>,
    pub events: Arc<dyn EventSink>,
    pub queue: Arc<DeploymentQueue>,
    pub status: Arc<DeploymentStatusManager>,
    pub canary: Arc<CanaryManager>,
    pub pipeline: Arc<DeploymentPipeline>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<(Self, WorkerChannels), EngineError> {
        info!("Initializing application state...");

        let store = init_store(options).await?;
        let events = init_events(&options.notifications)?;
        let transport: Arc<dyn Transport> = Arc::new(ShellTransport::new(options.ssh.clone()));

        let (signals_tx, queue_signals) = mpsc::unbounded_channel();
        let (ticks_tx, canary_ticks) = mpsc::unbounded_channel();

        let queue = Arc::new(DeploymentQueue::new(store.clone(), signals_tx));
        let status = Arc::new(DeploymentStatusManager::new(
            store.clone(),
            events.clone(),
            queue.clone(),
        ));
        let canary = Arc::new(CanaryManager::new(
            store.clone(),
            transport.clone(),
            events.clone(),
            options.proxy.clone(),
            ticks_tx,
            options.pipeline.log_flush_batch,
        ));
        let pipeline = Arc::new(DeploymentPipeline::new(
            options.pipeline.clone(),
            store.clone(),
            transport,
            Arc::new(DefaultGitSource),
            status.clone(),
            RolloutController::new(store.clone(), canary.clone()),
            options.proxy.clone(),
        ));

        let state = Self {
            store,
            events,
            queue,
            status,
            canary,
            pipeline,
        };
        let channels = WorkerChannels {
            queue_signals,
            canary_ticks,
        };
        Ok((state, channels))
    }

    /// State handed to the HTTP handlers
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.store.clone(),
            self.queue.clone(),
            self.status.clone(),
            self.canary.clone(),
        )
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        info!("Shutting down application state...");
        Ok(())
    }
}

async fn init_store(options: &AppOptions) -> Result<Arc<dyn DeploymentStore>, EngineError> {
    let StoreSettings {
        kind,
        base_url,
        token,
        timeout_secs,
    } = &options.store;
    match kind {
        StoreKind::Memory => {
            let file = options.layout.applications_file();
            info!("Using in-memory store seeded from {}", file.path().display());
            Ok(Arc::new(MemoryStore::load(&file).await?))
        }
        StoreKind::Http => {
            let token = token.clone().ok_or_else(|| {
                EngineError::ConfigError("store.token is required for the http store".to_string())
            })?;
            info!("Using control plane store at {}", base_url);
            let client = HttpClient::new(base_url, token, Duration::from_secs(*timeout_secs))?;
            Ok(Arc::new(HttpStore::new(client)))
        }
    }
}

fn init_events(settings: &NotificationSettings) -> Result<Arc<dyn EventSink>, EngineError> {
    let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(LogEventSink)];
    if let Some(url) = &settings.webhook_url {
        info!("Publishing deployment events to {}", url);
        sinks.push(Arc::new(WebhookEventSink::new(
            url.clone(),
            settings.webhook_secret.clone(),
            Duration::from_secs(settings.webhook_timeout_secs),
        )?));
    }
    Ok(Arc::new(FanoutEventSink::new(sinks)))
}
