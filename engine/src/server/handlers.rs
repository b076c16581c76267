//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine_api::models::{
    CancelResponse, CanaryActionResponse, DeploymentResponse, ErrorResponse, HealthResponse,
    LogsQuery, LogsResponse, QueueDeploymentRequest, QueueDeploymentResponse, VersionResponse,
};
use platform_models::{DeploymentStatus, NewDeployment};
use tracing::error;

use crate::errors::EngineError;
use crate::rollout::CanaryProgress;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Engine error rendered as a JSON error body
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::ValidationError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "launchpad".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Queue a deployment of an application
pub async fn queue_handler(
    State(state): State<Arc<ServerState>>,
    Path(application_id): Path<String>,
    Json(request): Json<QueueDeploymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let application = state.store.application(&application_id).await?;
    let deployment = NewDeployment {
        application_id: application.id.clone(),
        destination: None,
        commit: request.commit,
        pull_request_id: request.pull_request_id,
        force_rebuild: request.force_rebuild,
        restart_only: request.restart_only,
        is_additional: false,
    }
    .into_request(application.destination.clone());

    let deployment = state.queue.enqueue(deployment).await?;
    Ok((
        StatusCode::CREATED,
        Json(QueueDeploymentResponse {
            deployment_uuid: deployment.deployment_uuid,
            status: deployment.status,
            message: format!("Deployment of {} queued", application.name),
        }),
    ))
}

/// Deployment summary handler
pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(uuid): Path<String>,
) -> Result<Json<DeploymentResponse>, ApiError> {
    let deployment = state.store.deployment(&uuid).await?;
    Ok(Json(deployment.into()))
}

/// Cancel a queued or running deployment
pub async fn cancel_handler(
    State(state): State<Arc<ServerState>>,
    Path(uuid): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = state
        .status
        .transition_to(&uuid, DeploymentStatus::CancelledByUser)
        .await?;
    if cancelled {
        state.queue.cancel(&uuid).await;
    }
    let deployment = state.store.deployment(&uuid).await?;
    Ok(Json(CancelResponse {
        deployment_uuid: uuid,
        cancelled,
        status: deployment.status,
    }))
}

/// Incremental log tail, hidden lines excluded
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(uuid): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    // Status first: a terminal deployment has flushed its last lines
    let deployment = state.store.deployment(&uuid).await?;
    let entries = state.store.logs_after(&uuid, query.after).await?;
    let next_after = entries.last().map(|e| e.order).unwrap_or(query.after);
    Ok(Json(LogsResponse {
        entries: entries.into_iter().filter(|e| !e.hidden).collect(),
        next_after,
        status: deployment.status,
        complete: deployment.status.is_terminal() && deployment.canary_state.is_none(),
    }))
}

fn canary_response(uuid: String, action: &str, progress: CanaryProgress) -> CanaryActionResponse {
    let message = match progress {
        CanaryProgress::Promoted => "Canary promoted".to_string(),
        CanaryProgress::RolledBack => "Canary rolled back".to_string(),
        CanaryProgress::Advanced { step, weight } => {
            format!("Canary at step {step} with {weight}% of traffic")
        }
        CanaryProgress::Stale => "Canary already moved on".to_string(),
    };
    CanaryActionResponse {
        deployment_uuid: uuid,
        action: action.to_string(),
        message,
    }
}

/// Send all traffic to the canary
pub async fn promote_handler(
    State(state): State<Arc<ServerState>>,
    Path(uuid): Path<String>,
) -> Result<Json<CanaryActionResponse>, ApiError> {
    let progress = state.canary.promote(&uuid).await?;
    Ok(Json(canary_response(uuid, "promote", progress)))
}

/// Send all traffic back to the stable container
pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path(uuid): Path<String>,
) -> Result<Json<CanaryActionResponse>, ApiError> {
    let progress = state.canary.rollback(&uuid, "manual rollback").await?;
    Ok(Json(canary_response(uuid, "rollback", progress)))
}
