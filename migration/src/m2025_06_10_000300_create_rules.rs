//! Migration to create the rules table.
//!
//! Rules are authored in the dashboard; the automation engine only reads
//! active rows and atomically bumps the lifetime counters.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Rules::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Rules::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Rules::CreatorId).uuid().not_null())
                    .col(ColumnDef::new(Rules::Platform).text().not_null())
                    .col(ColumnDef::new(Rules::TriggerType).text().not_null())
                    .col(ColumnDef::new(Rules::Keywords).json_binary().not_null())
                    .col(
                        ColumnDef::new(Rules::KeywordMatch)
                            .text()
                            .not_null()
                            .default("contains"),
                    )
                    .col(ColumnDef::new(Rules::ReplyText).text().not_null())
                    .col(ColumnDef::new(Rules::ReplyAttachmentId).text().null())
                    .col(
                        ColumnDef::new(Rules::RequiresFollow)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Rules::CooldownHours)
                            .integer()
                            .not_null()
                            .default(24),
                    )
                    .col(
                        ColumnDef::new(Rules::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Rules::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Rules::TotalSent)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Rules::TotalFailed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Rules::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Rules::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_rules_creator_id")
                            .from(Rules::Table, Rules::CreatorId)
                            .to(Creators::Table, Creators::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Matcher lookup path: active rules for a creator on one platform/trigger
        manager
            .create_index(
                Index::create()
                    .name("idx_rules_creator_platform_trigger_active")
                    .table(Rules::Table)
                    .col(Rules::CreatorId)
                    .col(Rules::Platform)
                    .col(Rules::TriggerType)
                    .col(Rules::IsActive)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_rules_creator_platform_trigger_active")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Rules::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Rules {
    Table,
    Id,
    CreatorId,
    Platform,
    TriggerType,
    Keywords,
    KeywordMatch,
    ReplyText,
    ReplyAttachmentId,
    RequiresFollow,
    CooldownHours,
    IsActive,
    Priority,
    TotalSent,
    TotalFailed,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Creators {
    Table,
    Id,
}
