//! # Credential Repository
//!
//! The credential store: sealed platform tokens, decrypted only on read.
//! Plaintext tokens exist in memory for the duration of one platform call
//! and are never persisted or logged.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::crypto::{CryptoKey, SealedToken, credential_aad};
use crate::error::ApiError;
use crate::models::credential::{ActiveModel, Column, Entity, Model};
use crate::normalization::Platform;

/// A credential with its access token opened for immediate use.
#[derive(Debug, Clone)]
pub struct DecryptedCredential {
    pub model: Model,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Incoming token material from the (external) OAuth exchange flow.
#[derive(Debug, Clone)]
pub struct TokenIntake {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<JsonValue>,
}

/// Repository for credential database operations
pub struct CredentialRepository {
    db: DatabaseConnection,
    key: CryptoKey,
}

impl CredentialRepository {
    /// Create a new CredentialRepository with the given connection and key
    pub fn new(db: DatabaseConnection, key: CryptoKey) -> Self {
        Self { db, key }
    }

    /// Find the stored credential row for (creator, platform).
    pub async fn find(
        &self,
        creator_id: Uuid,
        platform: Platform,
    ) -> Result<Option<Model>, ApiError> {
        Entity::find()
            .filter(Column::CreatorId.eq(creator_id))
            .filter(Column::Platform.eq(platform.as_str()))
            .one(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(creator_id = %creator_id, error = %e, "Failed to load credential");
                ApiError::from(e)
            })
    }

    /// Decrypt-on-read for an `active` credential. Returns `None` when the
    /// creator has no usable credential for the platform (missing, revoked,
    /// or flagged after failed refreshes).
    pub async fn get_active(
        &self,
        creator_id: Uuid,
        platform: Platform,
    ) -> Result<Option<DecryptedCredential>, ApiError> {
        let Some(model) = self.find(creator_id, platform).await? else {
            return Ok(None);
        };

        if model.status != "active" {
            return Ok(None);
        }

        self.decrypt(model).map(Some)
    }

    fn decrypt(&self, model: Model) -> Result<DecryptedCredential, ApiError> {
        let aad = credential_aad(model.creator_id, &model.platform);

        let access_token = SealedToken::from_bytes(model.access_token_ciphertext.clone())
            .and_then(|sealed| sealed.open_string(&self.key, aad.as_bytes()))
            .map_err(|e| {
                tracing::error!(credential_id = %model.id, error = %e, "Failed to open access token");
                ApiError::internal("Failed to open stored credential")
            })?;

        let refresh_token = model
            .refresh_token_ciphertext
            .clone()
            .map(|bytes| {
                SealedToken::from_bytes(bytes)
                    .and_then(|sealed| sealed.open_string(&self.key, aad.as_bytes()))
            })
            .transpose()
            .map_err(|e| {
                tracing::error!(credential_id = %model.id, error = %e, "Failed to open refresh token");
                ApiError::internal("Failed to open stored credential")
            })?;

        Ok(DecryptedCredential {
            model,
            access_token,
            refresh_token,
        })
    }

    /// Store tokens handed over by the OAuth exchange flow, replacing any
    /// previous credential for the pair and resetting its failure state.
    pub async fn upsert_tokens(
        &self,
        creator_id: Uuid,
        platform: Platform,
        intake: TokenIntake,
        now: DateTime<Utc>,
    ) -> Result<Model, ApiError> {
        let aad = credential_aad(creator_id, platform.as_str());
        let access_ciphertext =
            SealedToken::seal(&self.key, aad.as_bytes(), intake.access_token.as_bytes())
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to seal access token");
                    ApiError::internal("Failed to seal credential")
                })?
                .into_bytes();
        let refresh_ciphertext = intake
            .refresh_token
            .as_deref()
            .map(|token| SealedToken::seal(&self.key, aad.as_bytes(), token.as_bytes()))
            .transpose()
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to seal refresh token");
                ApiError::internal("Failed to seal credential")
            })?
            .map(SealedToken::into_bytes);

        if let Some(existing) = self.find(creator_id, platform).await? {
            let mut active: ActiveModel = existing.into();
            active.access_token_ciphertext = Set(access_ciphertext);
            active.refresh_token_ciphertext = Set(refresh_ciphertext);
            active.expires_at = Set(intake.expires_at.map(|dt| dt.fixed_offset()));
            active.scopes = Set(intake.scopes);
            active.status = Set("active".to_string());
            active.refresh_failure_count = Set(0);
            active.connected_at = Set(now.fixed_offset());
            active.updated_at = Set(now.fixed_offset());

            return active.update(&self.db).await.map_err(|e| {
                tracing::error!(error = %e, "Failed to update credential");
                ApiError::from(e)
            });
        }

        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            creator_id: Set(creator_id),
            platform: Set(platform.as_str().to_string()),
            access_token_ciphertext: Set(access_ciphertext),
            refresh_token_ciphertext: Set(refresh_ciphertext),
            expires_at: Set(intake.expires_at.map(|dt| dt.fixed_offset())),
            scopes: Set(intake.scopes),
            status: Set("active".to_string()),
            refresh_failure_count: Set(0),
            connected_at: Set(now.fixed_offset()),
            created_at: Set(now.fixed_offset()),
            updated_at: Set(now.fixed_offset()),
        };

        row.insert(&self.db).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to insert credential");
            ApiError::from(e)
        })
    }

    /// Atomically replace token material after a successful refresh, clearing
    /// the failure counter.
    pub async fn replace_tokens(
        &self,
        credential: &Model,
        new_access_token: &str,
        new_refresh_token: Option<&str>,
        new_expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let aad = credential_aad(credential.creator_id, &credential.platform);
        let access_ciphertext =
            SealedToken::seal(&self.key, aad.as_bytes(), new_access_token.as_bytes())
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to seal refreshed access token");
                    ApiError::internal("Failed to seal credential")
                })?
                .into_bytes();
        let refresh_ciphertext = new_refresh_token
            .map(|token| SealedToken::seal(&self.key, aad.as_bytes(), token.as_bytes()))
            .transpose()
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to seal refreshed refresh token");
                ApiError::internal("Failed to seal credential")
            })?
            .map(SealedToken::into_bytes);

        let mut update = Entity::update_many()
            .col_expr(
                Column::AccessTokenCiphertext,
                Expr::value(access_ciphertext),
            )
            .col_expr(Column::RefreshFailureCount, Expr::value(0))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()));

        if let Some(ciphertext) = refresh_ciphertext {
            update = update.col_expr(Column::RefreshTokenCiphertext, Expr::value(ciphertext));
        }
        if let Some(expires_at) = new_expires_at {
            update = update.col_expr(Column::ExpiresAt, Expr::value(expires_at.fixed_offset()));
        }

        update
            .filter(Column::Id.eq(credential.id))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(credential_id = %credential.id, error = %e, "Failed to replace tokens");
                ApiError::from(e)
            })?;

        Ok(())
    }

    /// Flag a credential so the dispatcher short-circuits with an auth error
    /// instead of attempting doomed sends.
    pub async fn mark_error(&self, credential_id: Uuid, now: DateTime<Utc>) -> Result<(), ApiError> {
        Entity::update_many()
            .col_expr(Column::Status, Expr::value("error"))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(credential_id))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(credential_id = %credential_id, error = %e, "Failed to mark credential error");
                ApiError::from(e)
            })?;

        Ok(())
    }

    /// Bump the transient refresh failure counter in place and return the new
    /// value so the caller can apply its threshold.
    pub async fn record_refresh_failure(
        &self,
        credential_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i32, ApiError> {
        Entity::update_many()
            .col_expr(
                Column::RefreshFailureCount,
                Expr::col(Column::RefreshFailureCount).add(1),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(credential_id))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(credential_id = %credential_id, error = %e, "Failed to record refresh failure");
                ApiError::from(e)
            })?;

        let model = Entity::find_by_id(credential_id)
            .one(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(credential_id = %credential_id, error = %e, "Failed to reload credential");
                ApiError::from(e)
            })?;

        Ok(model.map(|m| m.refresh_failure_count).unwrap_or_default())
    }

    /// Disconnect a platform: mark the credential revoked. Waiting follow
    /// gates for the creator become eligible for early expiry on the next
    /// poll. Returns whether a credential existed.
    pub async fn disconnect(
        &self,
        creator_id: Uuid,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<bool, ApiError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value("revoked"))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::CreatorId.eq(creator_id))
            .filter(Column::Platform.eq(platform.as_str()))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(creator_id = %creator_id, error = %e, "Failed to disconnect credential");
                ApiError::from(e)
            })?;

        Ok(result.rows_affected > 0)
    }

    /// Active credentials whose expiry falls at or before `cutoff`, soonest
    /// first — the refresh job's work list.
    pub async fn due_for_refresh(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Model>, ApiError> {
        Entity::find()
            .filter(Column::Status.eq("active"))
            .filter(Column::ExpiresAt.is_not_null())
            .filter(Column::ExpiresAt.lte(cutoff.fixed_offset()))
            .order_by_asc(Column::ExpiresAt)
            .all(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to query credentials due for refresh");
                ApiError::from(e)
            })
    }

    /// Open a specific credential regardless of status (used by the refresh
    /// job, which operates on rows it just selected).
    pub fn decrypt_model(&self, model: Model) -> Result<DecryptedCredential, ApiError> {
        self.decrypt(model)
    }
}
