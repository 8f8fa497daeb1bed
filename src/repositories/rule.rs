//! # Rule Repository
//!
//! Read access to creator rules plus the atomic lifetime counters. Rules are
//! authored elsewhere; nothing here creates or edits them.

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::rule::{Column, Entity, Model};
use crate::normalization::{Platform, TriggerKind};

/// Repository for rule database operations
pub struct RuleRepository {
    db: DatabaseConnection,
}

impl RuleRepository {
    /// Create a new RuleRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Load the active rules a matching pass considers for one event shape.
    pub async fn active_for(
        &self,
        creator_id: Uuid,
        platform: Platform,
        trigger: TriggerKind,
    ) -> Result<Vec<Model>, ApiError> {
        Entity::find()
            .filter(Column::CreatorId.eq(creator_id))
            .filter(Column::Platform.eq(platform.as_str()))
            .filter(Column::TriggerType.eq(trigger.as_str()))
            .filter(Column::IsActive.eq(true))
            .all(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(creator_id = %creator_id, error = %e, "Failed to load active rules");
                ApiError::from(e)
            })
    }

    /// Find a rule by ID.
    pub async fn find_by_id(&self, rule_id: Uuid) -> Result<Option<Model>, ApiError> {
        Entity::find_by_id(rule_id)
            .one(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(rule_id = %rule_id, error = %e, "Failed to load rule");
                ApiError::from(e)
            })
    }

    /// Bump `total_sent` in place. Never read-modify-write: concurrent
    /// deliveries for the same rule must not lose updates.
    pub async fn increment_sent(&self, rule_id: Uuid) -> Result<(), ApiError> {
        Entity::update_many()
            .col_expr(Column::TotalSent, Expr::col(Column::TotalSent).add(1))
            .filter(Column::Id.eq(rule_id))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(rule_id = %rule_id, error = %e, "Failed to increment total_sent");
                ApiError::from(e)
            })?;

        Ok(())
    }

    /// Bump `total_failed` in place.
    pub async fn increment_failed(&self, rule_id: Uuid) -> Result<(), ApiError> {
        Entity::update_many()
            .col_expr(Column::TotalFailed, Expr::col(Column::TotalFailed).add(1))
            .filter(Column::Id.eq(rule_id))
            .exec(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(rule_id = %rule_id, error = %e, "Failed to increment total_failed");
                ApiError::from(e)
            })?;

        Ok(())
    }
}
