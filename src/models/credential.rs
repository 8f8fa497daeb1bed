//! Credential entity model
//!
//! This module contains the SeaORM entity model for the credentials table,
//! which stores one sealed platform access token per (creator, platform).

use super::creator::Entity as Creator;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Credential entity holding sealed platform tokens for one creator
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    /// Unique identifier for the credential (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning creator
    pub creator_id: Uuid,

    /// Platform this credential authenticates against (instagram|whatsapp)
    pub platform: String,

    /// Sealed access token (version byte + nonce + ciphertext)
    pub access_token_ciphertext: Vec<u8>,

    /// Sealed refresh token, when the platform issues one
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Access token expiry, when known
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// OAuth scopes (stored as JSON array)
    #[sea_orm(column_type = "JsonBinary")]
    pub scopes: Option<JsonValue>,

    /// Credential status (active|revoked|error)
    pub status: String,

    /// Consecutive transient refresh failures since the last success
    pub refresh_failure_count: i32,

    /// Timestamp when the creator connected this platform
    pub connected_at: DateTimeWithTimeZone,

    /// Timestamp when the credential was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the credential was last updated
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
