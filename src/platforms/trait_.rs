//! Platform client trait definition
//!
//! Defines the interface every platform integration implements, and the
//! classified error type the pipeline branches on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::normalization::Platform;

/// Classified platform API error.
#[derive(Debug, Clone)]
pub enum PlatformError {
    /// Token invalid, expired, or lacking scope
    Auth { details: String },
    /// Platform-imposed rate limit (HTTP 429)
    RateLimited { retry_after_secs: Option<u64> },
    /// Any other upstream HTTP error
    Http { status: u16, body: Option<String> },
    /// Transport failure; `timed_out` distinguishes bounded-timeout hits
    Network { details: String, timed_out: bool },
    /// Response parsed but did not carry the expected shape
    Malformed { details: String },
}

impl PlatformError {
    /// Transient errors leave state untouched so the next natural trigger
    /// retries; everything else is recorded as a failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Network { .. })
    }
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformError::Auth { details } => write!(f, "Authentication error: {}", details),
            PlatformError::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(after) = retry_after_secs {
                    write!(f, " (retry after: {}s)", after)?;
                }
                Ok(())
            }
            PlatformError::Http { status, body } => {
                write!(
                    f,
                    "HTTP error {}: {}",
                    status,
                    body.as_deref().unwrap_or("No body")
                )
            }
            PlatformError::Network { details, timed_out } => {
                if *timed_out {
                    write!(f, "Network timeout: {}", details)
                } else {
                    write!(f, "Network error: {}", details)
                }
            }
            PlatformError::Malformed { details } => {
                write!(f, "Malformed response: {}", details)
            }
        }
    }
}

impl std::error::Error for PlatformError {}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        PlatformError::Network {
            details: err.to_string(),
            timed_out: err.is_timeout(),
        }
    }
}

/// Classify a non-success upstream response by status code.
pub fn classify_response(status: u16, body: Option<String>, retry_after: Option<u64>) -> PlatformError {
    match status {
        401 | 403 => PlatformError::Auth {
            details: body.unwrap_or_else(|| format!("HTTP {}", status)),
        },
        429 => PlatformError::RateLimited {
            retry_after_secs: retry_after,
        },
        _ => PlatformError::Http { status, body },
    }
}

/// Message content for one outbound send.
#[derive(Debug, Clone)]
pub struct OutboundMessage<'a> {
    pub text: &'a str,
    pub attachment_id: Option<&'a str>,
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Platform-issued id of the sent message, when reported
    pub message_id: Option<String>,
}

/// Token material returned by a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Which platform this client talks to.
    fn platform(&self) -> Platform;

    /// Send a direct message to a recipient on the creator's behalf.
    async fn send_message(
        &self,
        access_token: &str,
        recipient_id: &str,
        message: &OutboundMessage<'_>,
    ) -> Result<SendReceipt, PlatformError>;

    /// Whether the account currently follows the creator.
    async fn check_follows(
        &self,
        access_token: &str,
        recipient_id: &str,
    ) -> Result<bool, PlatformError>;

    /// Exchange the current token material for fresh tokens.
    async fn refresh_token(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<RefreshedToken, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_statuses() {
        assert!(matches!(
            classify_response(401, None, None),
            PlatformError::Auth { .. }
        ));
        assert!(matches!(
            classify_response(403, Some("scope".to_string()), None),
            PlatformError::Auth { .. }
        ));
    }

    #[test]
    fn classifies_rate_limit_with_retry_after() {
        match classify_response(429, None, Some(30)) {
            PlatformError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, Some(30))
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn other_statuses_stay_http_errors() {
        assert!(matches!(
            classify_response(500, None, None),
            PlatformError::Http { status: 500, .. }
        ));
    }

    #[test]
    fn only_network_errors_are_transient() {
        assert!(
            PlatformError::Network {
                details: "timeout".to_string(),
                timed_out: true
            }
            .is_transient()
        );
        assert!(!PlatformError::Http {
            status: 500,
            body: None
        }
        .is_transient());
        assert!(
            !PlatformError::Auth {
                details: "expired".to_string()
            }
            .is_transient()
        );
    }
}
