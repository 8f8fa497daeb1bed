//! Instagram platform client
//!
//! Talks to the Instagram Graph API: private replies via the messages
//! endpoint, follow-status lookups, and long-lived token refresh.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::normalization::Platform;
use crate::platforms::trait_::{
    OutboundMessage, PlatformClient, PlatformError, RefreshedToken, SendReceipt, classify_response,
};

const DEFAULT_API_BASE: &str = "https://graph.instagram.com";
const GRAPH_VERSION: &str = "v19.0";

/// Instagram Graph API client
#[derive(Clone)]
pub struct InstagramClient {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FollowStatusResponse {
    #[serde(default)]
    is_user_follow_business: bool,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
}

impl InstagramClient {
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
impl PlatformClient for InstagramClient {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn send_message(
        &self,
        access_token: &str,
        recipient_id: &str,
        message: &OutboundMessage<'_>,
    ) -> Result<SendReceipt, PlatformError> {
        let url = format!("{}/{}/me/messages", self.api_base, GRAPH_VERSION);

        let payload = match message.attachment_id {
            Some(attachment_id) => serde_json::json!({
                "recipient": {"id": recipient_id},
                "message": {
                    "text": message.text,
                    "attachment": {"type": "template", "payload": {"attachment_id": attachment_id}}
                }
            }),
            None => serde_json::json!({
                "recipient": {"id": recipient_id},
                "message": {"text": message.text}
            }),
        };

        debug!(recipient_id = %recipient_id, "Sending instagram message");

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
            message_id: body.message_id,
        })
    }

    async fn check_follows(
        &self,
        access_token: &str,
        recipient_id: &str,
    ) -> Result<bool, PlatformError> {
        let url = format!(
            "{}/{}/{}?fields=is_user_follow_business",
            self.api_base, GRAPH_VERSION, recipient_id
        );

        let response = self.http.get(&url).bearer_auth(access_token).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: FollowStatusResponse = response.json().await.map_err(|e| {
            PlatformError::Malformed {
                details: format!("follow status response: {}", e),
            }
        })?;

        Ok(body.is_user_follow_business)
    }

    async fn refresh_token(
        &self,
        access_token: &str,
        _refresh_token: Option<&str>,
    ) -> Result<RefreshedToken, PlatformError> {
        // Instagram long-lived tokens refresh themselves; no separate grant
        let url = format!(
            "{}/refresh_access_token?grant_type=ig_refresh_token",
            self.api_base
        );

        let response = self.http.get(&url).bearer_auth(access_token).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: RefreshResponse = response.json().await.map_err(|e| {
            PlatformError::Malformed {
                details: format!("refresh response: {}", e),
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
