//! Creator entity model
//!
//! This module contains the SeaORM entity model for the creators table,
//! the tenant root every rule, credential, and log row is scoped to.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Creator entity representing one storefront owner
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "creators")]
pub struct Model {
    /// Unique identifier for the creator (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Display name shown in operator tooling
    pub display_name: String,

    /// Per-creator token used for the webhook subscription handshake
    pub webhook_verify_token: Option<String>,

    /// Timestamp when the creator was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the creator was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
