//! # Scheduled Job Handlers
//!
//! The two background loops are not in-process timers: each is an idempotent
//! tick invoked by an external scheduler through these endpoints. Overlapping
//! invocations are safe because every state transition inside a tick is a
//! filtered update over a bounded batch.

use axum::{extract::State, response::Json};

use crate::error::ApiError;
use crate::follow_gate::FollowGateTickReport;
use crate::server::AppState;
use crate::token_refresh::TokenRefreshTickReport;

/// Run one follow-gate poll tick: expire overdue promises, re-check follow
/// status for the rest, and release fulfilled ones to the dispatcher.
#[utoipa::path(
    post,
    path = "/jobs/follow-gate/run",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Tick completed", body = FollowGateTickReport),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Tick aborted", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn run_follow_gate(
    State(state): State<AppState>,
) -> Result<Json<FollowGateTickReport>, ApiError> {
    let report = state.follow_gate.tick().await?;
    Ok(Json(report))
}

/// Run one token-refresh tick over credentials nearing expiry.
#[utoipa::path(
    post,
    path = "/jobs/token-refresh/run",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Tick completed", body = TokenRefreshTickReport),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Tick aborted", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn run_token_refresh(
    State(state): State<AppState>,
) -> Result<Json<TokenRefreshTickReport>, ApiError> {
    let report = state.token_refresh.tick().await?;
    Ok(Json(report))
}
