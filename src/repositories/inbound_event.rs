//! # Inbound Event Repository
//!
//! The dedup log. `begin_processing` is the idempotency barrier for the
//! whole pipeline: whoever wins the unique insert owns the event, every
//! other delivery of it short-circuits as a duplicate.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{ApiError, is_unique_violation};
use crate::models::inbound_event::{ActiveModel, Column, Entity, Model};
use crate::normalization::Platform;

/// Window inside which an identical payload under a fresh event id is still
/// treated as a redelivery.
const REDELIVERY_WINDOW_MINUTES: i64 = 60;

/// Result of the check-and-insert dedup step.
#[derive(Debug)]
pub enum DedupDecision {
    /// First sighting; the caller owns processing of this record.
    Fresh(Model),
    /// Already seen (same id, or same content within the redelivery window).
    Duplicate,
}

/// Repository for the inbound event dedup log
pub struct InboundEventRepository {
    db: DatabaseConnection,
}

impl InboundEventRepository {
    /// Create a new InboundEventRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Atomically decide whether an event should be processed, inserting the
    /// `pending` record when it should.
    pub async fn begin_processing(
        &self,
        creator_id: Uuid,
        platform: Platform,
        platform_event_id: &str,
        content_hash: &str,
        payload: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<DedupDecision, ApiError> {
        // Redelivery under a new id: same content hash seen recently
        let window_start = now - Duration::minutes(REDELIVERY_WINDOW_MINUTES);
        let redelivered = Entity::find()
            .filter(Column::ContentHash.eq(content_hash))
            .filter(Column::PlatformEventId.ne(platform_event_id))
            .filter(Column::ReceivedAt.gte(window_start.fixed_offset()))
            .count(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to query content-hash window");
                ApiError::from(e)
            })?
            > 0;

        if redelivered {
            tracing::info!(
                platform_event_id = %platform_event_id,
                "Duplicate content within redelivery window; skipping"
            );
            return Ok(DedupDecision::Duplicate);
        }

        let record = ActiveModel {
            id: Set(Uuid::new_v4()),
            creator_id: Set(creator_id),
            platform_event_id: Set(platform_event_id.to_string()),
            content_hash: Set(content_hash.to_string()),
            platform: Set(platform.as_str().to_string()),
            status: Set("pending".to_string()),
            payload: Set(payload),
            received_at: Set(now.fixed_offset()),
            processed_at: Set(None),
        };

        match record.insert(&self.db).await {
            Ok(model) => Ok(DedupDecision::Fresh(model)),
            Err(err) if is_unique_violation(&err) => {
                tracing::info!(
                    platform_event_id = %platform_event_id,
                    "Event already recorded; treating as duplicate"
                );
                Ok(DedupDecision::Duplicate)
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to insert inbound event record");
                Err(ApiError::from(err))
            }
        }
    }

    /// Mark an event `processed`. Only a `pending` record transitions; a
    /// record that already left `pending` stays immutable.
    pub async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ApiError> {
        self.transition(id, "processed", now).await
    }

    /// Mark an event `failed`.
    pub async fn mark_failed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ApiError> {
        self.transition(id, "failed", now).await
    }

    /// Mark an event `skipped` (no rule matched; not an error).
    pub async fn mark_skipped(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ApiError> {
        self.transition(id, "skipped", now).await
    }

    async fn transition(
        &self,
        id: Uuid,
        status: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(status))
            .col_expr(Column::ProcessedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq("pending"))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(event_record_id = %id, error = %e, "Failed to transition event status");
                ApiError::from(e)
            })?;

        Ok(())
    }

    /// Delete records older than the retention cutoff; returns rows purged.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ApiError> {
        let result = Entity::delete_many()
            .filter(Column::ReceivedAt.lt(cutoff.fixed_offset()))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to purge inbound event records");
                ApiError::from(e)
            })?;

        Ok(result.rows_affected)
    }
}
