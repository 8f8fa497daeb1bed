//! Migration to create the inbound_events table.
//!
//! One row per platform-issued webhook event. The unique index on the
//! platform event id is the dedup barrier: a second concurrent insert of the
//! same event fails and that caller treats the event as a duplicate.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(InboundEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InboundEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(InboundEvents::CreatorId).uuid().not_null())
                    .col(
                        ColumnDef::new(InboundEvents::PlatformEventId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(InboundEvents::ContentHash).text().not_null())
                    .col(ColumnDef::new(InboundEvents::Platform).text().not_null())
                    .col(
                        ColumnDef::new(InboundEvents::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(InboundEvents::Payload).json_binary().null())
                    .col(
                        ColumnDef::new(InboundEvents::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(InboundEvents::ProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_inbound_events_creator_id")
                            .from(InboundEvents::Table, InboundEvents::CreatorId)
                            .to(Creators::Table, Creators::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_inbound_events_platform_event_id")
                    .table(InboundEvents::Table)
                    .col(InboundEvents::PlatformEventId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Redelivery-with-new-id detection scans by hash inside a short window
        manager
            .create_index(
                Index::create()
                    .name("idx_inbound_events_content_hash_received")
                    .table(InboundEvents::Table)
                    .col(InboundEvents::ContentHash)
                    .col(InboundEvents::ReceivedAt)
                    .to_owned(),
            )
            .await?;

        // Retention purge deletes by received_at
        manager
            .create_index(
                Index::create()
                    .name("idx_inbound_events_received_at")
                    .table(InboundEvents::Table)
                    .col(InboundEvents::ReceivedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_inbound_events_platform_event_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_inbound_events_content_hash_received")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_inbound_events_received_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(InboundEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum InboundEvents {
    Table,
    Id,
    CreatorId,
    PlatformEventId,
    ContentHash,
    Platform,
    Status,
    Payload,
    ReceivedAt,
    ProcessedAt,
}

#[derive(DeriveIden)]
enum Creators {
    Table,
    Id,
}
