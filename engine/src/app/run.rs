//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{AppState, WorkerChannels};
use crate::deploy::QueueSignal;
use crate::errors::EngineError;
use crate::rollout::CanaryTick;
use crate::server::serve::serve;
use crate::workers::{canary, deployer};

/// Run the deployment engine until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), EngineError> {
    info!("Initializing Launchpad engine...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start engine: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), EngineError> {
    options.layout.setup().await?;

    let (app_state, channels) = AppState::init(options).await?;
    let app_state = Arc::new(app_state);
    shutdown_manager.with_app_state(app_state.clone())?;

    let WorkerChannels {
        queue_signals,
        canary_ticks,
    } = channels;

    init_canary_worker(
        options.canary_worker.clone(),
        app_state.clone(),
        canary_ticks,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_deployer_worker(
        options.deployer.clone(),
        app_state.clone(),
        queue_signals,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_server {
        init_server(options, app_state, shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(())
}

fn init_deployer_worker(
    options: deployer::Options,
    app_state: Arc<AppState>,
    signals: mpsc::UnboundedReceiver<QueueSignal>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), EngineError> {
    info!(
        "Initializing deployer worker ({} concurrent builds)...",
        options.concurrent_builds
    );

    let queue = app_state.queue.clone();
    let pipeline = app_state.pipeline.clone();
    let handle = tokio::spawn(async move {
        deployer::run(
            &options,
            queue,
            pipeline,
            signals,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_deployer_worker_handle(handle)
}

fn init_canary_worker(
    options: canary::Options,
    app_state: Arc<AppState>,
    ticks: mpsc::UnboundedReceiver<CanaryTick>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), EngineError> {
    info!("Initializing canary worker...");

    let manager = app_state.canary.clone();
    let handle = tokio::spawn(async move {
        canary::run(
            &options,
            manager,
            ticks,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_canary_worker_handle(handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), EngineError> {
    info!("Initializing HTTP server...");

    let state = Arc::new(app_state.server_state());
    let handle = serve(&options.server, state, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(handle)
}

// ================================= SHUTDOWN ====================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), EngineError>>>,
    deployer_worker_handle: Option<JoinHandle<()>>,
    canary_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            deployer_worker_handle: None,
            canary_worker_handle: None,
        }
    }

    fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), EngineError> {
        if self.app_state.is_some() {
            return Err(EngineError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    fn with_deployer_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), EngineError> {
        if self.deployer_worker_handle.is_some() {
            return Err(EngineError::ShutdownError("deployer_handle already set".to_string()));
        }
        self.deployer_worker_handle = Some(handle);
        Ok(())
    }

    fn with_canary_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), EngineError> {
        if self.canary_worker_handle.is_some() {
            return Err(EngineError::ShutdownError("canary_handle already set".to_string()));
        }
        self.canary_worker_handle = Some(handle);
        Ok(())
    }

    fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), EngineError>>,
    ) -> Result<(), EngineError> {
        if self.server_handle.is_some() {
            return Err(EngineError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), EngineError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), EngineError> {
        info!("Shutting down Launchpad engine...");

        // 1. Stop accepting requests
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| EngineError::ShutdownError(e.to_string()))??;
        }

        // 2. Deployer worker
        if let Some(handle) = self.deployer_worker_handle.take() {
            handle.await.map_err(|e| EngineError::ShutdownError(e.to_string()))?;
        }

        // 3. Canary worker
        if let Some(handle) = self.canary_worker_handle.take() {
            handle.await.map_err(|e| EngineError::ShutdownError(e.to_string()))?;
        }

        // 4. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
