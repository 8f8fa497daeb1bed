//! # Follow-Gate Scheduler
//!
//! Periodic poll over waiting follow-gate promises: expire the overdue ones,
//! re-check follow status for the rest in bounded batches, and release
//! fulfilled promises to the dispatcher. Invoked by an external scheduler
//! through the jobs endpoint; safe under overlapping invocation because every
//! transition is a filtered update and only one caller can win it.
//!
//! Retention purges for the dedup log and delivery log ride along on the
//! same tick.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::{counter, gauge};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::dispatcher::{DeliveryDispatcher, DeliveryRequest};
use crate::error::ApiError;
use crate::models::pending_follow_request::Model as PendingModel;
use crate::normalization::{Platform, TriggerKind};
use crate::platforms::PlatformRegistry;
use crate::repositories::{
    CredentialRepository, DeliveryLogRepository, InboundEventRepository, PendingFollowRepository,
    RuleRepository,
};

/// Summary of one poll tick, returned to the triggering scheduler.
#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct FollowGateTickReport {
    /// Waiting promises past their window, swept to `expired`
    pub expired: u64,
    /// Promises whose rule or credential vanished, expired early
    pub expired_early: u64,
    /// Waiting promises polled this tick
    pub checked: u64,
    /// Promises fulfilled and handed to the dispatcher
    pub completed: u64,
    /// Promises still waiting after a negative check
    pub still_waiting: u64,
    /// Promises left untouched (transient check failures)
    pub skipped: u64,
    /// Dedup-log rows purged by retention
    pub events_purged: u64,
    /// Delivery-log rows purged by retention
    pub deliveries_purged: u64,
}

/// Outcome of processing one waiting record.
enum RecordOutcome {
    Completed,
    StillWaiting,
    ExpiredEarly,
    Skipped,
}

/// Polls waiting follow-gate records and releases fulfilled promises.
pub struct FollowGateScheduler {
    config: Arc<AppConfig>,
    pending: PendingFollowRepository,
    rules: RuleRepository,
    events: InboundEventRepository,
    deliveries: DeliveryLogRepository,
    credentials: CredentialRepository,
    registry: PlatformRegistry,
    dispatcher: Arc<DeliveryDispatcher>,
}

impl FollowGateScheduler {
    /// Create a new scheduler over the shared database connection.
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        registry: PlatformRegistry,
        dispatcher: Arc<DeliveryDispatcher>,
        key: CryptoKey,
    ) -> Self {
        Self {
            config,
            pending: PendingFollowRepository::new(db.clone()),
            rules: RuleRepository::new(db.clone()),
            events: InboundEventRepository::new(db.clone()),
            deliveries: DeliveryLogRepository::new(db.clone()),
            credentials: CredentialRepository::new(db, key),
            registry,
            dispatcher,
        }
    }

    /// Execute one idempotent poll tick.
    #[instrument(skip_all)]
    pub async fn tick(self: &Arc<Self>) -> Result<FollowGateTickReport, ApiError> {
        let now = Utc::now();
        let mut report = FollowGateTickReport::default();

        // Overdue promises lapse first so they can never deliver
        report.expired = self.pending.expire_overdue(now).await?;
        if report.expired > 0 {
            info!(expired = report.expired, "Expired overdue follow-gate promises");
        }
        counter!("follow_gate_expired_total").increment(report.expired);

        // Retention sweeps ride along on the poll
        let event_cutoff = now - Duration::days(self.config.retention.event_days as i64);
        report.events_purged = self.events.purge_older_than(event_cutoff).await?;
        let delivery_cutoff =
            now - Duration::days(self.config.retention.delivery_log_days as i64);
        report.deliveries_purged = self.deliveries.purge_older_than(delivery_cutoff).await?;

        let batch = self
            .pending
            .due_batch(now, self.config.follow_gate.poll_batch_size)
            .await?;
        report.checked = batch.len() as u64;
        gauge!("follow_gate_waiting_batch_gauge").set(batch.len() as f64);

        let semaphore = Arc::new(Semaphore::new(
            self.config.follow_gate.concurrency as usize,
        ));
        let mut handles = Vec::with_capacity(batch.len());

        for record in batch {
            let semaphore = Arc::clone(&semaphore);
            let scheduler = Arc::clone(self);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.ok()?;
                Some(scheduler.process_record(record).await)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Some(Ok(outcome))) => match outcome {
                    RecordOutcome::Completed => report.completed += 1,
                    RecordOutcome::StillWaiting => report.still_waiting += 1,
                    RecordOutcome::ExpiredEarly => report.expired_early += 1,
                    RecordOutcome::Skipped => report.skipped += 1,
                },
                Ok(Some(Err(err))) => {
                    report.skipped += 1;
                    error!(error = ?err, "Follow-gate record processing failed");
                }
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    report.skipped += 1;
                    error!(error = ?err, "Follow-gate task panicked or was cancelled");
                }
            }
        }

        counter!("follow_gate_completed_total").increment(report.completed);
        counter!("follow_gate_checks_total").increment(report.checked);

        debug!(
            expired = report.expired,
            expired_early = report.expired_early,
            checked = report.checked,
            completed = report.completed,
            still_waiting = report.still_waiting,
            skipped = report.skipped,
            "Follow-gate tick completed"
        );

        Ok(report)
    }

    /// Process one waiting record: verify the rule and credential are still
    /// usable, re-check follow status, and release or keep the promise.
    #[instrument(skip_all, fields(pending_id = %record.id, recipient_id = %record.recipient_id))]
    async fn process_record(&self, record: PendingModel) -> Result<RecordOutcome, ApiError> {
        let now = Utc::now();

        // A promise whose rule is gone or deactivated cannot deliver
        let Some(rule) = self.rules.find_by_id(record.rule_id).await? else {
            warn!("Rule for waiting promise no longer exists; expiring");
            self.pending.expire(record.id, now).await?;
            return Ok(RecordOutcome::ExpiredEarly);
        };
        if !rule.is_active {
            info!(rule_id = %rule.id, "Rule deactivated; expiring waiting promise");
            self.pending.expire(record.id, now).await?;
            return Ok(RecordOutcome::ExpiredEarly);
        }

        let (Ok(platform), Ok(trigger)) = (
            Platform::from_str(&rule.platform),
            TriggerKind::from_str(&rule.trigger_type),
        ) else {
            warn!(rule_id = %rule.id, "Rule has unrecognized platform or trigger; expiring");
            self.pending.expire(record.id, now).await?;
            return Ok(RecordOutcome::ExpiredEarly);
        };

        // Credential validity gates the platform call: a disconnected
        // creator's promises lapse instead of hammering a dead token
        let credential = match self.credentials.find(record.creator_id, platform).await? {
            None => {
                info!("Creator has no credential; expiring waiting promise");
                self.pending.expire(record.id, now).await?;
                return Ok(RecordOutcome::ExpiredEarly);
            }
            Some(model) if model.status == "revoked" => {
                info!("Credential revoked; expiring waiting promise");
                self.pending.expire(record.id, now).await?;
                return Ok(RecordOutcome::ExpiredEarly);
            }
            Some(model) if model.status != "active" => {
                // Flagged for refresh; leave the promise for a later poll
                debug!(status = %model.status, "Credential not usable yet; skipping check");
                return Ok(RecordOutcome::Skipped);
            }
            Some(model) => self.credentials.decrypt_model(model)?,
        };

        let client = self.registry.get(platform);
        match client
            .check_follows(&credential.access_token, &record.recipient_id)
            .await
        {
            Ok(true) => {
                // Exactly one caller wins the transition and owns delivery
                if !self.pending.complete(record.id, now).await? {
                    debug!("Lost completion race; another poll owns delivery");
                    return Ok(RecordOutcome::Skipped);
                }

                let outcome = self
                    .dispatcher
                    .deliver(DeliveryRequest {
                        creator_id: record.creator_id,
                        rule_id: Some(rule.id),
                        platform,
                        trigger,
                        recipient_id: &record.recipient_id,
                        matched_keyword: None,
                        message: &record.message,
                        attachment_id: rule.reply_attachment_id.as_deref(),
                        cooldown_hours: rule.cooldown_hours as i64,
                    })
                    .await?;

                info!(outcome = ?outcome, "Follow-gate promise fulfilled");
                Ok(RecordOutcome::Completed)
            }
            Ok(false) => {
                self.pending.record_check(record.id, now).await?;
                Ok(RecordOutcome::StillWaiting)
            }
            Err(err) => {
                // Transient or upstream failure: leave the record untouched
                // so the next poll retries the check
                warn!(error = %err, "Follow check failed; leaving promise waiting");
                Ok(RecordOutcome::Skipped)
            }
        }
    }
}
