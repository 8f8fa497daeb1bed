//! Migration to create the credentials table.
//!
//! Stores one sealed platform access token per (creator, platform) pair,
//! together with refresh bookkeeping used by the token refresh job.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Credentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Credentials::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Credentials::CreatorId).uuid().not_null())
                    .col(ColumnDef::new(Credentials::Platform).text().not_null())
                    .col(
                        ColumnDef::new(Credentials::AccessTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Credentials::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Credentials::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Credentials::Scopes).json_binary().null())
                    .col(
                        ColumnDef::new(Credentials::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Credentials::RefreshFailureCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Credentials::ConnectedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Credentials::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Credentials::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_credentials_creator_id")
                            .from(Credentials::Table, Credentials::CreatorId)
                            .to(Creators::Table, Creators::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_credentials_creator_platform")
                    .table(Credentials::Table)
                    .col(Credentials::CreatorId)
                    .col(Credentials::Platform)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Refresh job scans active credentials ordered by expiry
        manager
            .create_index(
                Index::create()
                    .name("idx_credentials_status_expires")
                    .table(Credentials::Table)
                    .col(Credentials::Status)
                    .col(Credentials::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_credentials_creator_platform")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_credentials_status_expires")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Credentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Credentials {
    Table,
    Id,
    CreatorId,
    Platform,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    ExpiresAt,
    Scopes,
    Status,
    RefreshFailureCount,
    ConnectedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Creators {
    Table,
    Id,
}
