//! # Delivery Dispatcher
//!
//! The single path every outbound automated message goes through, whether
//! triggered directly by a webhook or released by the follow-gate poll.
//! Cooldown and quota are evaluated here, at send time, so concurrent
//! trigger paths cannot double-deliver. Nothing retries inline: a failed
//! delivery is recorded and the next naturally-occurring trigger is the
//! retry.

use chrono::{Duration, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::error::ApiError;
use crate::normalization::{Platform, TriggerKind};
use crate::platforms::{OutboundMessage, PlatformError, PlatformRegistry};
use crate::repositories::delivery_log::NewDeliveryLogEntry;
use crate::repositories::{CredentialRepository, DeliveryLogRepository, RuleRepository};

/// Which limit refused the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    /// Same (rule, recipient) delivered inside the cooldown window
    Cooldown,
    /// Creator exhausted the rolling daily send cap
    DailyCap,
    /// The platform answered HTTP 429
    Platform,
}

/// Why a delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Credential missing, revoked, or rejected by the platform
    AuthError,
    /// Unexpected platform failure
    ApiError,
}

impl FailureReason {
    /// Reason code persisted on the delivery log row.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::AuthError => "auth_error",
            FailureReason::ApiError => "api_error",
        }
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Sent; a success row was recorded and `total_sent` bumped
    Success,
    /// Refused without side effects beyond a `rate_limited` row
    RateLimited(RateLimitKind),
    /// Failed; a `failed` row was recorded
    Failed(FailureReason),
    /// Transport-level failure: nothing recorded, nothing counted, so the
    /// next natural trigger retries cleanly
    Transient,
}

/// One delivery to attempt.
#[derive(Debug, Clone)]
pub struct DeliveryRequest<'a> {
    pub creator_id: Uuid,
    /// None for ad-hoc sends that did not originate from a rule
    pub rule_id: Option<Uuid>,
    pub platform: Platform,
    pub trigger: TriggerKind,
    pub recipient_id: &'a str,
    pub matched_keyword: Option<&'a str>,
    pub message: &'a str,
    pub attachment_id: Option<&'a str>,
    /// Cooldown snapshotted from the rule at match time
    pub cooldown_hours: i64,
}

/// Sends resolved messages through the platform APIs with cooldown, quota,
/// and credential handling.
pub struct DeliveryDispatcher {
    config: Arc<AppConfig>,
    registry: PlatformRegistry,
    rules: RuleRepository,
    deliveries: DeliveryLogRepository,
    credentials: CredentialRepository,
}

impl DeliveryDispatcher {
    /// Create a new dispatcher over the shared database connection.
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        registry: PlatformRegistry,
        key: CryptoKey,
    ) -> Self {
        Self {
            config,
            registry,
            rules: RuleRepository::new(db.clone()),
            deliveries: DeliveryLogRepository::new(db.clone()),
            credentials: CredentialRepository::new(db, key),
        }
    }

    /// Attempt one delivery, applying the pre-checks in order: cooldown,
    /// daily cap, credential, then the platform call.
    #[instrument(skip_all, fields(creator_id = %request.creator_id, recipient_id = %request.recipient_id))]
    pub async fn deliver(
        &self,
        request: DeliveryRequest<'_>,
    ) -> Result<DeliveryOutcome, ApiError> {
        let now = Utc::now();
        let platform_label = request.platform.as_str();

        // (a) cooldown for rule-originated sends
        if let Some(rule_id) = request.rule_id {
            let since = now - Duration::hours(request.cooldown_hours.max(0));
            if self
                .deliveries
                .has_success_since(rule_id, request.recipient_id, since)
                .await?
            {
                info!(
                    rule_id = %rule_id,
                    cooldown_hours = request.cooldown_hours,
                    "Delivery refused by cooldown"
                );
                self.record(&request, "rate_limited", Some("rate_limited"))
                    .await?;
                counter!("delivery_rate_limited_total", "platform" => platform_label, "kind" => "cooldown")
                    .increment(1);
                return Ok(DeliveryOutcome::RateLimited(RateLimitKind::Cooldown));
            }
        }

        // (b) rolling daily cap per creator
        let window_start = now - Duration::hours(24);
        let sent_today = self
            .deliveries
            .success_count_since(request.creator_id, window_start)
            .await?;
        if sent_today >= self.config.dispatch.daily_send_cap {
            warn!(
                sent_today = sent_today,
                cap = self.config.dispatch.daily_send_cap,
                "Delivery refused by daily send cap"
            );
            self.record(&request, "rate_limited", Some("rate_limited"))
                .await?;
            counter!("delivery_rate_limited_total", "platform" => platform_label, "kind" => "daily_cap")
                .increment(1);
            return Ok(DeliveryOutcome::RateLimited(RateLimitKind::DailyCap));
        }

        // Credential must be live; flagged credentials short-circuit here
        let Some(credential) = self
            .credentials
            .get_active(request.creator_id, request.platform)
            .await?
        else {
            warn!("Delivery failed: no active credential");
            self.record(&request, "failed", Some(FailureReason::AuthError.as_str()))
                .await?;
            counter!("delivery_failure_total", "platform" => platform_label, "reason" => "auth_error")
                .increment(1);
            return Ok(DeliveryOutcome::Failed(FailureReason::AuthError));
        };

        let client = self.registry.get(request.platform);
        let outbound = OutboundMessage {
            text: request.message,
            attachment_id: request.attachment_id,
        };

        match client
            .send_message(&credential.access_token, request.recipient_id, &outbound)
            .await
        {
            Ok(receipt) => {
                info!(message_id = ?receipt.message_id, "Delivery succeeded");
                self.record(&request, "success", None).await?;
                if let Some(rule_id) = request.rule_id {
                    self.rules.increment_sent(rule_id).await?;
                }
                counter!("delivery_success_total", "platform" => platform_label).increment(1);
                Ok(DeliveryOutcome::Success)
            }
            Err(PlatformError::Auth { details }) => {
                warn!(details = %details, "Delivery failed: platform rejected credential");
                // Flag the credential so subsequent sends short-circuit and
                // the refresh job knows it is doomed until reconnected
                self.credentials.mark_error(credential.model.id, now).await?;
                self.record(&request, "failed", Some(FailureReason::AuthError.as_str()))
                    .await?;
                counter!("delivery_failure_total", "platform" => platform_label, "reason" => "auth_error")
                    .increment(1);
                Ok(DeliveryOutcome::Failed(FailureReason::AuthError))
            }
            Err(PlatformError::RateLimited { retry_after_secs }) => {
                warn!(
                    retry_after_secs = ?retry_after_secs,
                    "Delivery failed: platform rate limit"
                );
                self.record(&request, "rate_limited", Some("rate_limited"))
                    .await?;
                counter!("delivery_rate_limited_total", "platform" => platform_label, "kind" => "platform")
                    .increment(1);
                Ok(DeliveryOutcome::RateLimited(RateLimitKind::Platform))
            }
            Err(err) if err.is_transient() => {
                warn!(error = %err, "Delivery hit transient transport failure; leaving no record");
                counter!("delivery_transient_total", "platform" => platform_label).increment(1);
                Ok(DeliveryOutcome::Transient)
            }
            Err(err) => {
                warn!(error = %err, "Delivery failed: platform error");
                self.record(&request, "failed", Some(FailureReason::ApiError.as_str()))
                    .await?;
                if let Some(rule_id) = request.rule_id {
                    self.rules.increment_failed(rule_id).await?;
                }
                counter!("delivery_failure_total", "platform" => platform_label, "reason" => "api_error")
                    .increment(1);
                Ok(DeliveryOutcome::Failed(FailureReason::ApiError))
            }
        }
    }

    async fn record(
        &self,
        request: &DeliveryRequest<'_>,
        outcome: &str,
        failure_reason: Option<&str>,
    ) -> Result<(), ApiError> {
        self.deliveries
            .record(
                NewDeliveryLogEntry {
                    creator_id: request.creator_id,
                    rule_id: request.rule_id,
                    recipient_id: request.recipient_id,
                    platform: request.platform.as_str(),
                    trigger_type: request.trigger.as_str(),
                    matched_keyword: request.matched_keyword,
                    message: request.message,
                    outcome,
                    failure_reason,
                },
                Utc::now(),
            )
            .await?;

        Ok(())
    }
}
