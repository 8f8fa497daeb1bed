//! # Pending Follow Repository
//!
//! State machine storage for follow-gated deliveries. Every transition is a
//! filtered UPDATE from `waiting`, so overlapping poll runs and the webhook
//! fast path can race freely: exactly one caller wins each transition.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::error::{ApiError, is_unique_violation};
use crate::models::pending_follow_request::{ActiveModel, Column, Entity, Model};

/// Repository for pending follow request database operations
pub struct PendingFollowRepository {
    db: DatabaseConnection,
}

impl PendingFollowRepository {
    /// Create a new PendingFollowRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a `waiting` record, or return the existing one when the same
    /// sender re-triggers the same rule while a promise is already parked.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_or_get_waiting(
        &self,
        creator_id: Uuid,
        rule_id: Uuid,
        recipient_id: &str,
        recipient_username: Option<&str>,
        message: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Model, ApiError> {
        let record = ActiveModel {
            id: Set(Uuid::new_v4()),
            creator_id: Set(creator_id),
            rule_id: Set(rule_id),
            recipient_id: Set(recipient_id.to_string()),
            recipient_username: Set(recipient_username.map(str::to_string)),
            message: Set(message.to_string()),
            status: Set("waiting".to_string()),
            expires_at: Set(expires_at.fixed_offset()),
            last_checked_at: Set(None),
            check_count: Set(0),
            created_at: Set(now.fixed_offset()),
            updated_at: Set(now.fixed_offset()),
        };

        match record.insert(&self.db).await {
            Ok(model) => Ok(model),
            Err(err) if is_unique_violation(&err) => {
                tracing::debug!(
                    rule_id = %rule_id,
                    recipient_id = %recipient_id,
                    "Waiting follow request already exists; reusing it"
                );
                self.find_waiting(rule_id, recipient_id)
                    .await?
                    .ok_or_else(|| {
                        // Lost a race with a transition between insert and read
                        ApiError::internal("waiting follow request vanished during insert race")
                    })
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to insert pending follow request");
                Err(ApiError::from(err))
            }
        }
    }

    /// Find the `waiting` record for (rule, recipient), if one exists.
    pub async fn find_waiting(
        &self,
        rule_id: Uuid,
        recipient_id: &str,
    ) -> Result<Option<Model>, ApiError> {
        Entity::find()
            .filter(Column::RuleId.eq(rule_id))
            .filter(Column::RecipientId.eq(recipient_id))
            .filter(Column::Status.eq("waiting"))
            .one(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to load waiting follow request");
                ApiError::from(e)
            })
    }

    /// Waiting records still inside their window, least recently checked
    /// first, bounded by `limit`.
    pub async fn due_batch(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, ApiError> {
        Entity::find()
            .filter(Column::Status.eq("waiting"))
            .filter(Column::ExpiresAt.gt(now.fixed_offset()))
            .order_by_asc(Column::LastCheckedAt)
            .order_by_asc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to load due follow requests");
                ApiError::from(e)
            })
    }

    /// Sweep every overdue `waiting` record to `expired`; returns how many
    /// promises lapsed.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, ApiError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value("expired"))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Status.eq("waiting"))
            .filter(Column::ExpiresAt.lte(now.fixed_offset()))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to expire overdue follow requests");
                ApiError::from(e)
            })?;

        Ok(result.rows_affected)
    }

    /// Expire one record early (e.g. the creator disconnected the platform).
    /// Returns true when this caller performed the transition.
    pub async fn expire(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, ApiError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value("expired"))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq("waiting"))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(pending_id = %id, error = %e, "Failed to expire follow request");
                ApiError::from(e)
            })?;

        Ok(result.rows_affected == 1)
    }

    /// Transition `waiting → completed`. Returns true when this caller won
    /// the transition and therefore owns the delivery.
    pub async fn complete(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, ApiError> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value("completed"))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq("waiting"))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(pending_id = %id, error = %e, "Failed to complete follow request");
                ApiError::from(e)
            })?;

        Ok(result.rows_affected == 1)
    }

    /// Record one follow-status poll: bump the counter in place and stamp the
    /// check time.
    pub async fn record_check(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ApiError> {
        Entity::update_many()
            .col_expr(Column::CheckCount, Expr::col(Column::CheckCount).add(1))
            .col_expr(Column::LastCheckedAt, Expr::value(now.fixed_offset()))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(pending_id = %id, error = %e, "Failed to record follow check");
                ApiError::from(e)
            })?;

        Ok(())
    }
}
