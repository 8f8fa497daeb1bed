//! Pending follow request entity model
//!
//! This module contains the SeaORM entity model for the
//! pending_follow_requests table: a matched rule whose delivery waits for the
//! sender to follow the creator. Unique on (rule, recipient) while waiting.

use super::creator::Entity as Creator;
use super::rule::Entity as Rule;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Pending follow-gate record
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "pending_follow_requests")]
pub struct Model {
    /// Unique identifier for the record (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning creator
    pub creator_id: Uuid,

    /// Rule that matched and requires the follow
    pub rule_id: Uuid,

    /// Platform identifier of the prospective recipient
    pub recipient_id: String,

    /// Recipient username at match time, when the payload carried one
    pub recipient_username: Option<String>,

    /// Message snapshot resolved at match time
    pub message: String,

    /// Gate status (waiting|completed|expired)
    pub status: String,

    /// When the promise lapses if the follow never happens
    pub expires_at: DateTimeWithTimeZone,

    /// Last follow-status poll for this record
    pub last_checked_at: Option<DateTimeWithTimeZone>,

    /// Number of follow-status polls performed
    pub check_count: i32,

    /// Timestamp when the record was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the record was last updated
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
    #[sea_orm(
        belongs_to = "Rule",
        from = "Column::RuleId",
        to = "super::rule::Column::Id"
    )]
    Rule,
}

impl Related<Creator> for Entity {
    fn to() -> RelationDef {
        Relation::Creator.def()
    }
}

impl Related<Rule> for Entity {
    fn to() -> RelationDef {
        Relation::Rule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
