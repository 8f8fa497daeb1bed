//! Platform client registry
//!
//! Builds one client per supported platform from configuration and hands
//! them out to the dispatcher, follow-gate scheduler, and refresh job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::normalization::Platform;
use crate::platforms::instagram::InstagramClient;
use crate::platforms::trait_::PlatformClient;
use crate::platforms::whatsapp::WhatsAppClient;

/// Registry of platform clients keyed by platform.
#[derive(Clone)]
pub struct PlatformRegistry {
    clients: HashMap<Platform, Arc<dyn PlatformClient>>,
}

impl PlatformRegistry {
    /// Build clients for every supported platform from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = Duration::from_secs(config.platform_timeout_seconds);

        let mut clients: HashMap<Platform, Arc<dyn PlatformClient>> = HashMap::new();
        clients.insert(
            Platform::Instagram,
            Arc::new(InstagramClient::new(
                config.instagram_api_base.clone(),
                timeout,
            )),
        );
        clients.insert(
            Platform::Whatsapp,
            Arc::new(WhatsAppClient::new(
                config.whatsapp_api_base.clone(),
                timeout,
            )),
        );

        Self { clients }
    }

    /// Get the client for a platform. Every [`Platform`] variant is
    /// registered by construction.
    pub fn get(&self, platform: Platform) -> Arc<dyn PlatformClient> {
        Arc::clone(
            self.clients
                .get(&platform)
                .expect("all platforms registered at construction"),
        )
    }
}
