//! # Delivery Log Repository
//!
//! Append-only delivery attempts. The cooldown and daily-cap pre-checks in
//! the dispatcher read success rows through this repository; nothing ever
//! mutates a row once written.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::delivery_log_entry::{ActiveModel, Column, Entity, Model};

/// Maximum characters kept of the sent message in the log row.
const PREVIEW_MAX_CHARS: usize = 120;

/// Fields of a new delivery log row.
#[derive(Debug, Clone)]
pub struct NewDeliveryLogEntry<'a> {
    pub creator_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub recipient_id: &'a str,
    pub platform: &'a str,
    pub trigger_type: &'a str,
    pub matched_keyword: Option<&'a str>,
    pub message: &'a str,
    pub outcome: &'a str,
    pub failure_reason: Option<&'a str>,
}

/// Repository for delivery log database operations
pub struct DeliveryLogRepository {
    db: DatabaseConnection,
}

impl DeliveryLogRepository {
    /// Create a new DeliveryLogRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Whether a successful delivery for (rule, recipient) exists at or after
    /// `since` — the cooldown predicate.
    pub async fn has_success_since(
        &self,
        rule_id: Uuid,
        recipient_id: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, ApiError> {
        let count = Entity::find()
            .filter(Column::RuleId.eq(rule_id))
            .filter(Column::RecipientId.eq(recipient_id))
            .filter(Column::Outcome.eq("success"))
            .filter(Column::CreatedAt.gte(since.fixed_offset()))
            .count(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(rule_id = %rule_id, error = %e, "Failed to query cooldown window");
                ApiError::from(e)
            })?;

        Ok(count > 0)
    }

    /// Successful sends for a creator at or after `since` — the daily-cap
    /// predicate.
    pub async fn success_count_since(
        &self,
        creator_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, ApiError> {
        Entity::find()
            .filter(Column::CreatorId.eq(creator_id))
            .filter(Column::Outcome.eq("success"))
            .filter(Column::CreatedAt.gte(since.fixed_offset()))
            .count(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(creator_id = %creator_id, error = %e, "Failed to query send quota");
                ApiError::from(e)
            })
    }

    /// Append one delivery attempt. The message is truncated to a preview;
    /// full content never lands in the log.
    pub async fn record(
        &self,
        entry: NewDeliveryLogEntry<'_>,
        now: DateTime<Utc>,
    ) -> Result<Model, ApiError> {
        let preview: String = if entry.message.chars().count() > PREVIEW_MAX_CHARS {
            let truncated: String = entry.message.chars().take(PREVIEW_MAX_CHARS).collect();
            format!("{}…", truncated)
        } else {
            entry.message.to_string()
        };

        let row = ActiveModel {
            id: Set(Uuid::new_v4()),
            creator_id: Set(entry.creator_id),
            rule_id: Set(entry.rule_id),
            recipient_id: Set(entry.recipient_id.to_string()),
            platform: Set(entry.platform.to_string()),
            trigger_type: Set(entry.trigger_type.to_string()),
            matched_keyword: Set(entry.matched_keyword.map(str::to_string)),
            message_preview: Set(preview),
            outcome: Set(entry.outcome.to_string()),
            failure_reason: Set(entry.failure_reason.map(str::to_string)),
            created_at: Set(now.fixed_offset()),
        };

        row.insert(&self.db).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to record delivery log entry");
            ApiError::from(e)
        })
    }

    /// Delete rows older than the retention cutoff; returns rows purged.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ApiError> {
        let result = Entity::delete_many()
            .filter(Column::CreatedAt.lt(cutoff.fixed_offset()))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to purge delivery log rows");
                ApiError::from(e)
            })?;

        Ok(result.rows_affected)
    }
}
