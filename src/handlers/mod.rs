//! # API Handlers
//!
//! This module contains all the HTTP endpoint handlers for the automations
//! service.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;

use crate::db;
use crate::models::ServiceInfo;
use crate::server::AppState;

pub mod credentials;
pub mod jobs;
pub mod webhooks;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness/readiness probe backed by a database round trip
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy"),
        (status = 503, description = "Database unreachable")
    ),
    tag = "root"
)]
pub async fn health(State(state): State<AppState>) -> StatusCode {
    match db::health_check(&state.db).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::error!(error = ?err, "Health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
