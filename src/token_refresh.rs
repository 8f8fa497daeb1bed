//! # Token Refresh Job
//!
//! Proactively refreshes credentials whose expiry falls inside the safety
//! margin. Invoked by an external scheduler through the jobs endpoint; a
//! tick is idempotent, processes a bounded set, and never holds a lock
//! across a platform call. Credentials that keep failing are flagged so the
//! dispatcher short-circuits with an auth error instead of attempting a
//! doomed send.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::counter;
use rand::Rng;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::{Duration as TokioDuration, sleep};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::error::ApiError;
use crate::models::credential::Model as CredentialModel;
use crate::normalization::Platform;
use crate::platforms::{PlatformError, PlatformRegistry};
use crate::repositories::CredentialRepository;

/// Classification of token refresh errors for appropriate handling.
#[derive(Debug, PartialEq, Eq)]
pub enum RefreshErrorClass {
    /// The grant is dead; flag the credential immediately
    Permanent,
    /// Worth retrying on the next tick
    Transient,
    /// Backoff until the next tick without counting a failure
    RateLimited,
}

/// Classify a platform error from a refresh attempt.
pub fn classify_refresh_error(err: &PlatformError) -> RefreshErrorClass {
    match err {
        PlatformError::Auth { .. } => RefreshErrorClass::Permanent,
        PlatformError::RateLimited { .. } => RefreshErrorClass::RateLimited,
        PlatformError::Http { status, .. } if (400..500).contains(status) => {
            RefreshErrorClass::Permanent
        }
        PlatformError::Http { .. }
        | PlatformError::Network { .. }
        | PlatformError::Malformed { .. } => RefreshErrorClass::Transient,
    }
}

/// Summary of one refresh tick, returned to the triggering scheduler.
#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct TokenRefreshTickReport {
    /// Credentials inside the refresh window this tick
    pub scanned: u64,
    /// Credentials successfully refreshed and re-sealed
    pub refreshed: u64,
    /// Credentials flagged after a permanent failure or crossing the
    /// transient-failure threshold
    pub flagged: u64,
    /// Transient failures left for the next tick
    pub failed_transient: u64,
    /// Refreshes skipped due to platform rate limiting
    pub rate_limited: u64,
}

/// Background credential refresh service.
pub struct TokenRefreshService {
    config: Arc<AppConfig>,
    credentials: CredentialRepository,
    registry: PlatformRegistry,
}

impl TokenRefreshService {
    /// Create a new token refresh service instance.
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        registry: PlatformRegistry,
        key: CryptoKey,
    ) -> Self {
        Self {
            config,
            credentials: CredentialRepository::new(db, key),
            registry,
        }
    }

    /// Execute one idempotent refresh tick.
    #[instrument(skip_all)]
    pub async fn tick(self: &Arc<Self>) -> Result<TokenRefreshTickReport, ApiError> {
        let now = Utc::now();
        let cutoff = now + Duration::days(self.config.token_refresh.lead_time_days as i64);

        let due = self.credentials.due_for_refresh(cutoff).await?;
        let mut report = TokenRefreshTickReport {
            scanned: due.len() as u64,
            ..Default::default()
        };

        info!(
            due_credentials = due.len(),
            lead_time_days = self.config.token_refresh.lead_time_days,
            "Found credentials due for refresh"
        );

        let semaphore = Arc::new(Semaphore::new(
            self.config.token_refresh.concurrency as usize,
        ));
        let mut handles = Vec::with_capacity(due.len());

        for credential in due {
            let semaphore = Arc::clone(&semaphore);
            let service = Arc::clone(self);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.ok()?;
                service.jittered_delay().await;
                Some(service.refresh_credential(credential).await)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Some(Ok(outcome))) => match outcome {
                    RefreshOutcome::Refreshed => report.refreshed += 1,
                    RefreshOutcome::Flagged => report.flagged += 1,
                    RefreshOutcome::Transient => report.failed_transient += 1,
                    RefreshOutcome::RateLimited => report.rate_limited += 1,
                },
                Ok(Some(Err(err))) => {
                    report.failed_transient += 1;
                    error!(error = ?err, "Credential refresh failed");
                }
                Ok(None) => report.failed_transient += 1,
                Err(err) => {
                    report.failed_transient += 1;
                    error!(error = ?err, "Refresh task panicked or was cancelled");
                }
            }
        }

        counter!("token_refresh_attempts_total").increment(report.scanned);
        counter!("token_refresh_success_total").increment(report.refreshed);
        counter!("token_refresh_flagged_total").increment(report.flagged);

        debug!(
            scanned = report.scanned,
            refreshed = report.refreshed,
            flagged = report.flagged,
            failed_transient = report.failed_transient,
            rate_limited = report.rate_limited,
            "Token refresh tick completed"
        );

        Ok(report)
    }

    /// Refresh one credential's tokens.
    #[instrument(skip_all, fields(credential_id = %credential.id, platform = %credential.platform))]
    async fn refresh_credential(
        &self,
        credential: CredentialModel,
    ) -> Result<RefreshOutcome, ApiError> {
        let now = Utc::now();

        let platform = match Platform::from_str(&credential.platform) {
            Ok(platform) => platform,
            Err(err) => {
                warn!(error = %err, "Credential has unrecognized platform; flagging");
                self.credentials.mark_error(credential.id, now).await?;
                return Ok(RefreshOutcome::Flagged);
            }
        };

        let decrypted = self.credentials.decrypt_model(credential)?;
        let client = self.registry.get(platform);

        match client
            .refresh_token(
                &decrypted.access_token,
                decrypted.refresh_token.as_deref(),
            )
            .await
        {
            Ok(refreshed) => {
                self.credentials
                    .replace_tokens(
                        &decrypted.model,
                        &refreshed.access_token,
                        refreshed.refresh_token.as_deref(),
                        refreshed.expires_at,
                        now,
                    )
                    .await?;

                info!(
                    new_expires_at = ?refreshed.expires_at,
                    "Credential refreshed"
                );
                Ok(RefreshOutcome::Refreshed)
            }
            Err(err) => {
                let class = classify_refresh_error(&err);
                match class {
                    RefreshErrorClass::Permanent => {
                        error!(error = %err, "Permanent refresh failure; flagging credential");
                        self.credentials.mark_error(decrypted.model.id, now).await?;
                        Ok(RefreshOutcome::Flagged)
                    }
                    RefreshErrorClass::RateLimited => {
                        warn!(error = %err, "Rate limited during refresh; retrying next tick");
                        Ok(RefreshOutcome::RateLimited)
                    }
                    RefreshErrorClass::Transient => {
                        let failures = self
                            .credentials
                            .record_refresh_failure(decrypted.model.id, now)
                            .await?;
                        if failures >= self.config.token_refresh.failure_threshold {
                            warn!(
                                failures = failures,
                                "Transient failures crossed threshold; flagging credential"
                            );
                            self.credentials.mark_error(decrypted.model.id, now).await?;
                            return Ok(RefreshOutcome::Flagged);
                        }
                        warn!(
                            error = %err,
                            failures = failures,
                            "Transient refresh failure; retrying next tick"
                        );
                        Ok(RefreshOutcome::Transient)
                    }
                }
            }
        }
    }

    /// Small random delay before each refresh to avoid thundering herd
    /// against the platform token endpoints.
    async fn jittered_delay(&self) {
        if self.config.token_refresh.jitter_factor <= 0.0 {
            return;
        }

        let max_delay_ms =
            (self.config.token_refresh.jitter_factor * 1_000.0).max(0.0) as u64;
        if max_delay_ms == 0 {
            return;
        }

        let delay_ms = rand::thread_rng().gen_range(0..=max_delay_ms);
        sleep(TokioDuration::from_millis(delay_ms)).await;
    }
}

/// Outcome of one credential refresh attempt.
enum RefreshOutcome {
    Refreshed,
    Flagged,
    Transient,
    RateLimited,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_permanent() {
        let err = PlatformError::Auth {
            details: "invalid_grant".to_string(),
        };
        assert_eq!(classify_refresh_error(&err), RefreshErrorClass::Permanent);
    }

    #[test]
    fn http_4xx_is_permanent_5xx_transient() {
        let bad_request = PlatformError::Http {
            status: 400,
            body: Some("unsupported_grant_type".to_string()),
        };
        assert_eq!(
            classify_refresh_error(&bad_request),
            RefreshErrorClass::Permanent
        );

        let upstream = PlatformError::Http {
            status: 503,
            body: None,
        };
        assert_eq!(
            classify_refresh_error(&upstream),
            RefreshErrorClass::Transient
        );
    }

    #[test]
    fn rate_limits_and_timeouts_classify_separately() {
        let limited = PlatformError::RateLimited {
            retry_after_secs: Some(120),
        };
        assert_eq!(
            classify_refresh_error(&limited),
            RefreshErrorClass::RateLimited
        );

        let timeout = PlatformError::Network {
            details: "deadline exceeded".to_string(),
            timed_out: true,
        };
        assert_eq!(
            classify_refresh_error(&timeout),
            RefreshErrorClass::Transient
        );
    }
}
