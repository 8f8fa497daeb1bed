//! Rule entity model
//!
//! This module contains the SeaORM entity model for the rules table. Rules
//! are authored through the dashboard; the engine reads active rows and
//! bumps the lifetime counters in place.

use super::creator::Entity as Creator;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Rule entity representing one creator-defined trigger
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "rules")]
pub struct Model {
    /// Unique identifier for the rule (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning creator
    pub creator_id: Uuid,

    /// Platform the rule listens on (instagram|whatsapp)
    pub platform: String,

    /// Trigger type (keyword_comment|keyword_dm|new_follower|story_reply)
    pub trigger_type: String,

    /// Keywords that fire this rule (JSON array of strings)
    #[sea_orm(column_type = "JsonBinary")]
    pub keywords: JsonValue,

    /// Keyword semantics (contains|exact)
    pub keyword_match: String,

    /// Response template; `{{username}}` resolves at match time
    pub reply_text: String,

    /// Optional attachment reference sent with the reply
    pub reply_attachment_id: Option<String>,

    /// Whether the sender must follow the creator before delivery
    pub requires_follow: bool,

    /// Minimum hours between two sends to the same recipient for this rule
    pub cooldown_hours: i32,

    /// Whether the rule participates in matching
    pub is_active: bool,

    /// Higher priority wins when several rules match
    pub priority: i32,

    /// Lifetime successful deliveries
    pub total_sent: i64,

    /// Lifetime failed deliveries
    pub total_failed: i64,

    /// Timestamp when the rule was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the rule was last updated
    pub updated_at: DateTimeWithTimeZone,
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
