//! Migration to create the delivery_log table.
//!
//! Append-only record of every attempted delivery. The cooldown check reads
//! success rows per (rule, recipient); analytics reads everything else.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeliveryLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeliveryLog::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DeliveryLog::CreatorId).uuid().not_null())
                    .col(ColumnDef::new(DeliveryLog::RuleId).uuid().null())
                    .col(ColumnDef::new(DeliveryLog::RecipientId).text().not_null())
                    .col(ColumnDef::new(DeliveryLog::Platform).text().not_null())
                    .col(ColumnDef::new(DeliveryLog::TriggerType).text().not_null())
                    .col(ColumnDef::new(DeliveryLog::MatchedKeyword).text().null())
                    .col(ColumnDef::new(DeliveryLog::MessagePreview).text().not_null())
                    .col(ColumnDef::new(DeliveryLog::Outcome).text().not_null())
                    .col(ColumnDef::new(DeliveryLog::FailureReason).text().null())
                    .col(
                        ColumnDef::new(DeliveryLog::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_delivery_log_creator_id")
                            .from(DeliveryLog::Table, DeliveryLog::CreatorId)
                            .to(Creators::Table, Creators::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Cooldown lookup: latest success per (rule, recipient)
        manager
            .create_index(
                Index::create()
                    .name("idx_delivery_log_rule_recipient_outcome_created")
                    .table(DeliveryLog::Table)
                    .col(DeliveryLog::RuleId)
                    .col(DeliveryLog::RecipientId)
                    .col(DeliveryLog::Outcome)
                    .col(DeliveryLog::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Daily-cap lookup and retention purge
        manager
            .create_index(
                Index::create()
                    .name("idx_delivery_log_creator_created")
                    .table(DeliveryLog::Table)
                    .col(DeliveryLog::CreatorId)
                    .col(DeliveryLog::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_delivery_log_rule_recipient_outcome_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_delivery_log_creator_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(DeliveryLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DeliveryLog {
    Table,
    Id,
    CreatorId,
    RuleId,
    RecipientId,
    Platform,
    TriggerType,
    MatchedKeyword,
    MessagePreview,
    Outcome,
    FailureReason,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Creators {
    Table,
    Id,
}
