//! Database migrations for the automations service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_10_000100_create_creators;
mod m2025_06_10_000200_create_credentials;
mod m2025_06_10_000300_create_rules;
mod m2025_06_10_000400_create_inbound_events;
mod m2025_06_10_000500_create_pending_follow_requests;
mod m2025_06_10_000600_create_delivery_log;
mod m2025_06_12_000100_add_pending_follow_waiting_guard;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_10_000100_create_creators::Migration),
            Box::new(m2025_06_10_000200_create_credentials::Migration),
            Box::new(m2025_06_10_000300_create_rules::Migration),
            Box::new(m2025_06_10_000400_create_inbound_events::Migration),
            Box::new(m2025_06_10_000500_create_pending_follow_requests::Migration),
            Box::new(m2025_06_10_000600_create_delivery_log::Migration),
            Box::new(m2025_06_12_000100_add_pending_follow_waiting_guard::Migration),
        ]
    }
}
