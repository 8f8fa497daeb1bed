//! # Webhook Handlers
//!
//! Ingestion endpoints for platform webhooks: the unsigned GET subscription
//! handshake and the signed POST event delivery. Signature verification and
//! rate limiting happen in middleware before the POST handler runs.
//!
//! The POST handler acknowledges immediately and processes on a spawned
//! task: platforms interpret anything but a fast success as "retry me",
//! which would re-trigger already-handled logic.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::creator;
use crate::normalization::Platform;
use crate::server::AppState;

/// Path parameters for the public webhook routes
#[derive(Debug, Deserialize, IntoParams)]
pub struct PlatformCreatorPath {
    /// Platform slug (e.g. "instagram", "whatsapp")
    #[param(min_length = 1, example = "instagram")]
    pub platform: String,
    /// Creator UUID the webhook is addressed to
    #[param(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub creator_id: String,
}

/// Query parameters of the Meta subscription handshake
#[derive(Debug, Deserialize, IntoParams)]
pub struct HubChallengeQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Webhook accept response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAcceptResponse {
    /// Acceptance status
    pub status: String,
}

fn parse_path(path: &PlatformCreatorPath) -> Result<(Platform, Uuid), ApiError> {
    let platform = Platform::from_str(&path.platform).map_err(|_| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            &format!("Unsupported platform: {}", path.platform),
        )
    })?;

    let creator_id = Uuid::parse_str(&path.creator_id).map_err(|_| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "creator_id must be a UUID",
        )
    })?;

    Ok((platform, creator_id))
}

/// Subscription handshake: echo `hub.challenge` when the verify token
/// matches the creator's stored token.
#[utoipa::path(
    get,
    path = "/webhooks/{platform}/{creator_id}",
    params(PlatformCreatorPath, HubChallengeQuery),
    responses(
        (status = 200, description = "Challenge echoed"),
        (status = 401, description = "Verify token mismatch"),
        (status = 404, description = "Unknown platform or creator")
    ),
    tag = "webhooks"
)]
pub async fn verify_subscription(
    State(state): State<AppState>,
    Path(path): Path<PlatformCreatorPath>,
    Query(query): Query<HubChallengeQuery>,
) -> Result<String, ApiError> {
    let (platform, creator_id) = parse_path(&path)?;

    if query.mode.as_deref() != Some("subscribe") {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "hub.mode must be 'subscribe'",
        ));
    }

    let creator = creator::Entity::find_by_id(creator_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| {
            ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Creator not found")
        })?;

    let expected = creator.webhook_verify_token.as_deref().ok_or_else(|| {
        ApiError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Creator has no webhook verify token",
        )
    })?;

    let presented = query.verify_token.as_deref().unwrap_or("");
    let matches: bool = expected.as_bytes().ct_eq(presented.as_bytes()).into();
    if !matches {
        warn!(creator_id = %creator_id, platform = %platform, "Handshake verify token mismatch");
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Verify token mismatch",
        ));
    }

    info!(creator_id = %creator_id, platform = %platform, "Webhook subscription verified");
    Ok(query.challenge.unwrap_or_default())
}

/// Signed event delivery. The middleware has already verified the signature
/// over the raw body; this handler acknowledges fast and defers all
/// processing. Downstream failures never change the acknowledgment.
#[utoipa::path(
    post,
    path = "/webhooks/{platform}/{creator_id}",
    params(PlatformCreatorPath),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAcceptResponse),
        (status = 401, description = "Signature verification failed"),
        (status = 404, description = "Unknown platform")
    ),
    tag = "webhooks"
)]
pub async fn accept_event(
    State(state): State<AppState>,
    Path(path): Path<PlatformCreatorPath>,
    body: Bytes,
) -> Result<Json<WebhookAcceptResponse>, ApiError> {
    let (platform, creator_id) = parse_path(&path)?;

    // A verified-but-unparseable body is still acknowledged: returning an
    // error would only make the platform redeliver it forever
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(payload) => {
            let processor = Arc::clone(&state.processor);
            tokio::spawn(async move {
                processor.process_webhook(platform, creator_id, payload).await;
            });
        }
        Err(err) => {
            warn!(
                platform = %platform,
                creator_id = %creator_id,
                error = %err,
                "Discarding verified webhook with unparseable body"
            );
        }
    }

    Ok(Json(WebhookAcceptResponse {
        status: "accepted".to_string(),
    }))
}
