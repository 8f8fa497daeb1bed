//! Inbound event entity model
//!
//! This module contains the SeaORM entity model for the inbound_events table,
//! the dedup log of platform-issued webhook deliveries. A row is immutable
//! once its status leaves `pending`.

use super::creator::Entity as Creator;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Inbound event record for deduplication and auditing
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "inbound_events")]
pub struct Model {
    /// Unique identifier for the record (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Creator the webhook was addressed to
    pub creator_id: Uuid,

    /// Platform-issued event identifier (globally unique)
    pub platform_event_id: String,

    /// Hash of the normalized payload, for redeliveries under a new id
    pub content_hash: String,

    /// Platform the event arrived from (instagram|whatsapp)
    pub platform: String,

    /// Processing status (pending|processed|failed|skipped)
    pub status: String,

    /// Raw webhook payload as received
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Option<JsonValue>,

    /// Timestamp when the event was first seen
    pub received_at: DateTimeWithTimeZone,

    /// Timestamp when processing finished
    pub processed_at: Option<DateTimeWithTimeZone>,
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
