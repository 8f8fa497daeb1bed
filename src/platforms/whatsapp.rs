//! WhatsApp platform client
//!
//! Talks to the WhatsApp Business Cloud API for outbound text messages and
//! token exchange. WhatsApp has no follow relationship, so follow checks
//! always report true and gated rules degrade to immediate delivery.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::normalization::Platform;
use crate::platforms::trait_::{
    OutboundMessage, PlatformClient, PlatformError, RefreshedToken, SendReceipt, classify_response,
};

const DEFAULT_API_BASE: &str = "https://graph.facebook.com";
const GRAPH_VERSION: &str = "v19.0";

/// WhatsApp Business Cloud API client
#[derive(Clone)]
pub struct WhatsAppClient {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    messages: Option<Vec<SentMessage>>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    expires_in: Option<i64>,
}

impl WhatsAppClient {
    /// Create a client, optionally overriding the API base (used by tests to
    /// point at a mock server).
    pub fn new(api_base: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            http,
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        }
    }

    async fn error_from_response(response: reqwest::Response) -> PlatformError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse().ok());
        let body = response.text().await.ok().filter(|b| !b.is_empty());
        classify_response(status, body, retry_after)
    }
}

#[async_trait]
impl PlatformClient for WhatsAppClient {
    fn platform(&self) -> Platform {
        Platform::Whatsapp
    }

    async fn send_message(
        &self,
        access_token: &str,
        recipient_id: &str,
        message: &OutboundMessage<'_>,
    ) -> Result<SendReceipt, PlatformError> {
        let url = format!("{}/{}/me/messages", self.api_base, GRAPH_VERSION);

        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": recipient_id,
            "type": "text",
            "text": {"body": message.text}
        });

        debug!(recipient_id = %recipient_id, "Sending whatsapp message");

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: SendResponse = response.json().await.map_err(|e| {
            PlatformError::Malformed {
                details: format!("send response: {}", e),
            }
        })?;

        Ok(SendReceipt {
            message_id: body
                .messages
                .and_then(|messages| messages.into_iter().next())
                .map(|message| message.id),
        })
    }

    async fn check_follows(
        &self,
        _access_token: &str,
        _recipient_id: &str,
    ) -> Result<bool, PlatformError> {
        // No follow graph on WhatsApp
        Ok(true)
    }

    async fn refresh_token(
        &self,
        access_token: &str,
        _refresh_token: Option<&str>,
    ) -> Result<RefreshedToken, PlatformError> {
        let url = format!(
            "{}/{}/oauth/access_token?grant_type=fb_exchange_token&fb_exchange_token={}",
            self.api_base, GRAPH_VERSION, access_token
        );

        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: ExchangeResponse = response.json().await.map_err(|e| {
            PlatformError::Malformed {
                details: format!("exchange response: {}", e),
            }
        })?;

        Ok(RefreshedToken {
            access_token: body.access_token,
            refresh_token: None,
            expires_at: body
                .expires_in
                .map(|seconds| Utc::now() + ChronoDuration::seconds(seconds)),
        })
    }
}
