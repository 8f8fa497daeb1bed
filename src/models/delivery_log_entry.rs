//! Delivery log entity model
//!
//! This module contains the SeaORM entity model for the delivery_log table.
//! One append-only row per attempted delivery; never mutated.

use super::creator::Entity as Creator;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Immutable record of one delivery attempt
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "delivery_log")]
pub struct Model {
    /// Unique identifier for the entry (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning creator
    pub creator_id: Uuid,

    /// Rule that produced the delivery; null for ad-hoc sends
    pub rule_id: Option<Uuid>,

    /// Platform identifier of the recipient
    pub recipient_id: String,

    /// Platform the delivery went through (instagram|whatsapp)
    pub platform: String,

    /// Trigger type that caused the delivery
    pub trigger_type: String,

    /// Keyword that matched, when the trigger was keyword-based
    pub matched_keyword: Option<String>,

    /// Truncated preview of the sent message
    pub message_preview: String,

    /// Delivery outcome (success|failed|rate_limited)
    pub outcome: String,

    /// Failure reason code (auth_error|rate_limited|api_error)
    pub failure_reason: Option<String>,

    /// Timestamp when the attempt was made
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Creator",
        from = "Column::CreatorId",
        to = "super::creator::Column::Id"
    )]
    Creator,
}

impl Related<Creator> for Entity {
    fn to() -> RelationDef {
        Relation::Creator.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
