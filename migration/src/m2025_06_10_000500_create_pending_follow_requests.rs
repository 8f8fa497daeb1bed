//! Migration to create the pending_follow_requests table.
//!
//! A row represents a matched rule whose delivery is parked until the sender
//! follows the creator. The message snapshot is resolved at match time so
//! later rule edits do not change an already-made promise.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PendingFollowRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PendingFollowRequests::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PendingFollowRequests::CreatorId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingFollowRequests::RuleId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingFollowRequests::RecipientId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingFollowRequests::RecipientUsername)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PendingFollowRequests::Message)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingFollowRequests::Status)
                            .text()
                            .not_null()
                            .default("waiting"),
                    )
                    .col(
                        ColumnDef::new(PendingFollowRequests::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingFollowRequests::LastCheckedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PendingFollowRequests::CheckCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PendingFollowRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PendingFollowRequests::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pending_follow_requests_creator_id")
                            .from(
                                PendingFollowRequests::Table,
                                PendingFollowRequests::CreatorId,
                            )
                            .to(Creators::Table, Creators::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pending_follow_requests_rule_id")
                            .from(PendingFollowRequests::Table, PendingFollowRequests::RuleId)
                            .to(Rules::Table, Rules::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Poll path: waiting rows ordered by expiry / last check
        manager
            .create_index(
                Index::create()
                    .name("idx_pending_follow_requests_status_expires")
                    .table(PendingFollowRequests::Table)
                    .col(PendingFollowRequests::Status)
                    .col(PendingFollowRequests::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_pending_follow_requests_status_expires")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(PendingFollowRequests::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum PendingFollowRequests {
    Table,
    Id,
    CreatorId,
    RuleId,
    RecipientId,
    RecipientUsername,
    Message,
    Status,
    ExpiresAt,
    LastCheckedAt,
    CheckCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Creators {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Rules {
    Table,
    Id,
}
