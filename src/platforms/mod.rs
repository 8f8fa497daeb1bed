//! Platform API clients.
//!
//! Outbound calls to the messaging platforms' Graph APIs: sending replies,
//! checking follow status, and refreshing access tokens. All calls carry a
//! bounded timeout; errors are classified so the dispatcher and the refresh
//! job can react without string matching.

pub mod instagram;
pub mod registry;
pub mod trait_;
pub mod whatsapp;

pub use instagram::InstagramClient;
pub use registry::PlatformRegistry;
pub use trait_::{
    OutboundMessage, PlatformClient, PlatformError, RefreshedToken, SendReceipt,
};
pub use whatsapp::WhatsAppClient;
