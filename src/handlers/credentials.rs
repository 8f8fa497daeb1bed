//! # Credential Handlers
//!
//! The contract with the excluded OAuth flow: the dashboard backend performs
//! the interactive token exchange and hands the resulting token pair over
//! here for sealed storage. Responses never echo token material back.

use std::str::FromStr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{ApiError, validation_error};
use crate::models::creator;
use crate::normalization::Platform;
use crate::repositories::credential::{CredentialRepository, TokenIntake};
use crate::server::AppState;

/// Path parameters for the credential routes
#[derive(Debug, Deserialize, IntoParams)]
pub struct CreatorPlatformPath {
    /// Creator UUID the credential belongs to
    #[param(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub creator_id: String,
    /// Platform slug (e.g. "instagram", "whatsapp")
    #[param(min_length = 1, example = "instagram")]
    pub platform: String,
}

/// Token material handed over by the completed OAuth exchange
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConnectCredentialRequest {
    /// Access token obtained by the exchange flow
    pub access_token: String,
    /// Refresh token, when the platform issues one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token expiry, when known
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted OAuth scopes
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

/// Stored credential metadata; token material is never returned
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CredentialInfo {
    /// Platform the credential authenticates against
    pub platform: String,
    /// Credential status (active|revoked|error)
    pub status: String,
    /// Access token expiry (RFC 3339), when known
    pub expires_at: Option<String>,
    /// When the creator connected this platform
    pub connected_at: String,
    /// Whether a sealed refresh token is stored alongside
    pub has_refresh_token: bool,
}

impl From<crate::models::credential::Model> for CredentialInfo {
    fn from(model: crate::models::credential::Model) -> Self {
        Self {
            platform: model.platform,
            status: model.status,
            expires_at: model.expires_at.map(|dt| dt.to_rfc3339()),
            connected_at: model.connected_at.to_rfc3339(),
            has_refresh_token: model.refresh_token_ciphertext.is_some(),
        }
    }
}

fn parse_path(path: &CreatorPlatformPath) -> Result<(Uuid, Platform), ApiError> {
    let creator_id = Uuid::parse_str(&path.creator_id).map_err(|_| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "creator_id must be a UUID",
        )
    })?;

    let platform = Platform::from_str(&path.platform).map_err(|_| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            &format!("Unsupported platform: {}", path.platform),
        )
    })?;

    Ok((creator_id, platform))
}

/// Store (or replace) a creator's platform credential.
#[utoipa::path(
    put,
    path = "/creators/{creator_id}/credentials/{platform}",
    security(("bearer_auth" = [])),
    params(CreatorPlatformPath),
    request_body = ConnectCredentialRequest,
    responses(
        (status = 200, description = "Credential stored", body = CredentialInfo),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Unknown creator or platform", body = ApiError)
    ),
    tag = "credentials"
)]
pub async fn connect_credential(
    State(state): State<AppState>,
    Path(path): Path<CreatorPlatformPath>,
    Json(request): Json<ConnectCredentialRequest>,
) -> Result<Json<CredentialInfo>, ApiError> {
    let (creator_id, platform) = parse_path(&path)?;

    if request.access_token.trim().is_empty() {
        return Err(validation_error(
            "Invalid credential",
            serde_json::json!({"access_token": "must not be empty"}),
        ));
    }

    creator::Entity::find_by_id(creator_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Creator not found"))?;

    let repo = CredentialRepository::new(state.db.clone(), state.crypto_key.clone());
    let model = repo
        .upsert_tokens(
            creator_id,
            platform,
            TokenIntake {
                access_token: request.access_token,
                refresh_token: request.refresh_token,
                expires_at: request.expires_at,
                scopes: request.scopes.map(|scopes| serde_json::json!(scopes)),
            },
            Utc::now(),
        )
        .await?;

    info!(creator_id = %creator_id, platform = %platform, "Credential connected");
    Ok(Json(CredentialInfo::from(model)))
}

/// Disconnect a creator's platform credential. Waiting follow-gate promises
/// for the creator become eligible for early expiry on the next poll.
#[utoipa::path(
    delete,
    path = "/creators/{creator_id}/credentials/{platform}",
    security(("bearer_auth" = [])),
    params(CreatorPlatformPath),
    responses(
        (status = 204, description = "Credential revoked"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "No credential for this creator and platform", body = ApiError)
    ),
    tag = "credentials"
)]
pub async fn disconnect_credential(
    State(state): State<AppState>,
    Path(path): Path<CreatorPlatformPath>,
) -> Result<StatusCode, ApiError> {
    let (creator_id, platform) = parse_path(&path)?;

    let repo = CredentialRepository::new(state.db.clone(), state.crypto_key.clone());
    let existed = repo.disconnect(creator_id, platform, Utc::now()).await?;

    if !existed {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "No credential stored for this creator and platform",
        ));
    }

    info!(creator_id = %creator_id, platform = %platform, "Credential disconnected");
    Ok(StatusCode::NO_CONTENT)
}
