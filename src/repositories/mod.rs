//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM
//! operations for database entities. Every concurrent-write concern in the
//! pipeline lives here: unique-key inserts for dedup, filtered updates for
//! status transitions, and in-place increments for counters.

pub mod credential;
pub mod delivery_log;
pub mod inbound_event;
pub mod pending_follow;
pub mod rule;

pub use credential::CredentialRepository;
pub use delivery_log::DeliveryLogRepository;
pub use inbound_event::InboundEventRepository;
pub use pending_follow::PendingFollowRepository;
pub use rule::RuleRepository;
