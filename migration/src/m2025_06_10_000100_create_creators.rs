//! Migration to create the creators table.
//!
//! Creators are the tenant root for the automation engine; every rule,
//! credential, and log row is scoped to one creator.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Creators::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Creators::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Creators::DisplayName).text().not_null())
                    .col(ColumnDef::new(Creators::WebhookVerifyToken).text().null())
                    .col(
                        ColumnDef::new(Creators::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Creators::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Creators::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Creators {
    Table,
    Id,
    DisplayName,
    WebhookVerifyToken,
    CreatedAt,
    UpdatedAt,
}
