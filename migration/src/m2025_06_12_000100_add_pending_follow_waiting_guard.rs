//! Adds a partial unique index preventing duplicate waiting follow-gate rows.
//!
//! Re-triggering the same rule from the same sender while a waiting row
//! exists must not create a second promise; the losing insert surfaces a
//! unique violation and the caller reuses the existing row.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        match backend {
            DatabaseBackend::Postgres => {
                manager
                    .get_connection()
                    .execute(Statement::from_string(
                        backend,
                        "DO $$\nBEGIN\n    IF NOT EXISTS (\n        SELECT 1 FROM pg_indexes\n        WHERE schemaname = current_schema()\n          AND indexname = 'idx_pending_follow_requests_waiting'\n    ) THEN\n        CREATE UNIQUE INDEX idx_pending_follow_requests_waiting\n            ON pending_follow_requests (rule_id, recipient_id)\n            WHERE status = 'waiting';\n    END IF;\nEND\n$$;"
                            .to_string(),
                    ))
                    .await
                    .map(|_| ())
            }
            _ => manager
                .get_connection()
                .execute(Statement::from_string(
                    backend,
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_follow_requests_waiting \
                     ON pending_follow_requests (rule_id, recipient_id) \
                     WHERE status = 'waiting'"
                        .to_string(),
                ))
                .await
                .map(|_| ()),
        }
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "DROP INDEX IF EXISTS idx_pending_follow_requests_waiting",
            ))
            .await
            .map(|_| ())
    }
}
