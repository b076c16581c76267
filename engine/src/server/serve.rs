//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::EngineError;
use crate::server::handlers::{
    cancel_handler, deployment_handler, health_handler, logs_handler, promote_handler,
    queue_handler, rollback_handler, version_handler,
};
use crate::server::state::ServerState;

/// Routes of the engine API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route("/applications/{id}/deployments", post(queue_handler))
        .route("/deployments/{uuid}", get(deployment_handler))
        .route("/deployments/{uuid}/cancel", post(cancel_handler))
        .route("/deployments/{uuid}/logs", get(logs_handler))
        // Canary
        .route("/deployments/{uuid}/canary/promote", post(promote_handler))
        .route("/deployments/{uuid}/canary/rollback", post(rollback_handler))
        // State and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), EngineError>>, EngineError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| EngineError::ServerError(e.to_string()))
    });

    Ok(handle)
}
