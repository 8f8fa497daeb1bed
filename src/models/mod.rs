//! # Data Models
//!
//! This module contains the SeaORM entities used throughout the automation engine.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod creator;
pub mod credential;
pub mod delivery_log_entry;
pub mod inbound_event;
pub mod pending_follow_request;
pub mod rule;

pub use creator::Entity as Creator;
pub use credential::Entity as Credential;
pub use delivery_log_entry::Entity as DeliveryLogEntry;
pub use inbound_event::Entity as InboundEventRecord;
pub use pending_follow_request::Entity as PendingFollowRequest;
pub use rule::Entity as Rule;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "automations".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
