//! # Event Processor
//!
//! The ingestion pipeline behind the webhook endpoint: dedup, rule matching,
//! then either immediate dispatch or parking behind the follow gate. Runs
//! after the HTTP acknowledgment has been sent; nothing here can change the
//! response the platform saw, and no failure in one event may disturb the
//! processing of another.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::dispatcher::{DeliveryDispatcher, DeliveryOutcome, DeliveryRequest};
use crate::error::ApiError;
use crate::matcher::{self, RuleMatch};
use crate::models::rule::Model as RuleModel;
use crate::normalization::{self, InboundEvent, Platform};
use crate::platforms::PlatformRegistry;
use crate::repositories::inbound_event::DedupDecision;
use crate::repositories::{
    CredentialRepository, InboundEventRepository, PendingFollowRepository, RuleRepository,
};

/// Positive follow checks are cached this long before re-verification.
const FOLLOWER_CACHE_TTL_MINUTES: i64 = 15;

/// Bounded size of the known-followers cache across all creators.
const FOLLOWER_CACHE_CAPACITY: usize = 10_000;

/// Terminal state of one event's trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    /// Already handled; redelivery short-circuited silently
    Duplicate,
    /// No active rule matched; recorded and done, not an error
    NoRuleMatched,
    /// Handed to the dispatcher; carries its outcome
    Delivered(DeliveryOutcome),
    /// Parked behind the follow gate as a waiting promise
    Gated,
}

/// Orchestrates dedup → match → gate|dispatch for inbound events.
pub struct EventProcessor {
    config: Arc<AppConfig>,
    events: InboundEventRepository,
    rules: RuleRepository,
    pending: PendingFollowRepository,
    credentials: CredentialRepository,
    registry: PlatformRegistry,
    dispatcher: Arc<DeliveryDispatcher>,
    known_followers: Mutex<LruCache<(Uuid, String), DateTime<Utc>>>,
}

impl EventProcessor {
    /// Create a new processor over the shared database connection.
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        registry: PlatformRegistry,
        dispatcher: Arc<DeliveryDispatcher>,
        key: CryptoKey,
    ) -> Self {
        Self {
            config,
            events: InboundEventRepository::new(db.clone()),
            rules: RuleRepository::new(db.clone()),
            pending: PendingFollowRepository::new(db.clone()),
            credentials: CredentialRepository::new(db, key),
            registry,
            dispatcher,
            known_followers: Mutex::new(LruCache::new(
                NonZeroUsize::new(FOLLOWER_CACHE_CAPACITY).expect("nonzero capacity"),
            )),
        }
    }

    /// Normalize a verified webhook payload and process every event in it.
    /// Failures are logged per event; the payload as a whole never errors.
    pub async fn process_webhook(
        &self,
        platform: Platform,
        creator_id: Uuid,
        payload: JsonValue,
    ) {
        let received_at = Utc::now();
        let events = normalization::normalize(platform, &payload, received_at);

        if events.is_empty() {
            counter!("webhook_payloads_empty_total", "platform" => platform.as_str()).increment(1);
            return;
        }

        for event in events {
            match self
                .process_event(creator_id, &event, Some(payload.clone()))
                .await
            {
                Ok(status) => {
                    info!(
                        platform_event_id = %event.platform_event_id,
                        status = ?status,
                        "Event processed"
                    );
                }
                Err(err) => {
                    // One bad event must not disturb the rest of the batch
                    error!(
                        platform_event_id = %event.platform_event_id,
                        error = ?err,
                        "Event processing failed"
                    );
                }
            }
        }
    }

    /// Process one canonical event through dedup, matching, and dispatch.
    #[instrument(skip_all, fields(creator_id = %creator_id, platform_event_id = %event.platform_event_id))]
    pub async fn process_event(
        &self,
        creator_id: Uuid,
        event: &InboundEvent,
        raw_payload: Option<JsonValue>,
    ) -> Result<ProcessingStatus, ApiError> {
        let now = Utc::now();
        let platform_label = event.platform.as_str();

        let record = match self
            .events
            .begin_processing(
                creator_id,
                event.platform,
                &event.platform_event_id,
                &event.content_hash(),
                raw_payload,
                now,
            )
            .await?
        {
            DedupDecision::Fresh(record) => record,
            DedupDecision::Duplicate => {
                counter!("events_duplicate_total", "platform" => platform_label).increment(1);
                return Ok(ProcessingStatus::Duplicate);
            }
        };

        let rules = self
            .rules
            .active_for(creator_id, event.platform, event.trigger)
            .await?;

        let Some(matched) = matcher::select_rule(event, &rules) else {
            self.events.mark_skipped(record.id, Utc::now()).await?;
            counter!("events_unmatched_total", "platform" => platform_label).increment(1);
            return Ok(ProcessingStatus::NoRuleMatched);
        };

        let message = matcher::resolve_reply(
            &matched.rule.reply_text,
            event.sender_username.as_deref(),
        );

        if matched.rule.requires_follow && !self.sender_follows(creator_id, event).await? {
            let expires_at =
                Utc::now() + Duration::hours(self.config.follow_gate.window_hours as i64);
            self.pending
                .create_or_get_waiting(
                    creator_id,
                    matched.rule.id,
                    &event.sender_id,
                    event.sender_username.as_deref(),
                    &message,
                    expires_at,
                    Utc::now(),
                )
                .await?;
            self.events.mark_processed(record.id, Utc::now()).await?;
            counter!("events_gated_total", "platform" => platform_label).increment(1);
            info!(rule_id = %matched.rule.id, "Event gated awaiting follow");
            return Ok(ProcessingStatus::Gated);
        }

        let outcome = self.dispatch(creator_id, event, &matched, &message).await?;

        match outcome {
            DeliveryOutcome::Failed(_) | DeliveryOutcome::Transient => {
                self.events.mark_failed(record.id, Utc::now()).await?;
            }
            DeliveryOutcome::Success | DeliveryOutcome::RateLimited(_) => {
                self.events.mark_processed(record.id, Utc::now()).await?;
            }
        }

        Ok(ProcessingStatus::Delivered(outcome))
    }

    async fn dispatch(
        &self,
        creator_id: Uuid,
        event: &InboundEvent,
        matched: &RuleMatch<'_>,
        message: &str,
    ) -> Result<DeliveryOutcome, ApiError> {
        let rule: &RuleModel = matched.rule;
        self.dispatcher
            .deliver(DeliveryRequest {
                creator_id,
                rule_id: Some(rule.id),
                platform: event.platform,
                trigger: event.trigger,
                recipient_id: &event.sender_id,
                matched_keyword: matched.keyword.as_deref(),
                message,
                attachment_id: rule.reply_attachment_id.as_deref(),
                cooldown_hours: rule.cooldown_hours as i64,
            })
            .await
    }

    /// Fast-path follow check: known-followers cache first, then the
    /// platform API. An unanswerable check (no credential, transport
    /// failure) reports "not following" so the event parks behind the gate
    /// and the poll retries the check later.
    async fn sender_follows(
        &self,
        creator_id: Uuid,
        event: &InboundEvent,
    ) -> Result<bool, ApiError> {
        if self.cached_follower(creator_id, &event.sender_id) {
            return Ok(true);
        }

        let Some(credential) = self
            .credentials
            .get_active(creator_id, event.platform)
            .await?
        else {
            warn!("No active credential for follow check; gating event");
            return Ok(false);
        };

        let client = self.registry.get(event.platform);
        match client
            .check_follows(&credential.access_token, &event.sender_id)
            .await
        {
            Ok(true) => {
                self.remember_follower(creator_id, &event.sender_id);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => {
                warn!(error = %err, "Follow check failed; gating event for the poll to retry");
                Ok(false)
            }
        }
    }

    fn cached_follower(&self, creator_id: Uuid, sender_id: &str) -> bool {
        let mut cache = match self.known_followers.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };

        let key = (creator_id, sender_id.to_string());
        match cache.get(&key) {
            Some(seen_at)
                if Utc::now() - *seen_at
                    < Duration::minutes(FOLLOWER_CACHE_TTL_MINUTES) =>
            {
                true
            }
            Some(_) => {
                cache.pop(&key);
                false
            }
            None => false,
        }
    }

    fn remember_follower(&self, creator_id: Uuid, sender_id: &str) {
        let mut cache = match self.known_followers.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.put((creator_id, sender_id.to_string()), Utc::now());
    }
}
