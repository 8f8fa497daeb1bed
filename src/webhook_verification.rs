//! # Webhook Signature Verification
//!
//! Both supported platforms deliver webhooks signed the Meta way: an
//! `X-Hub-Signature-256` header carrying `sha256=<hex>` of an HMAC-SHA256
//! over the raw request body with the app secret. Verification uses
//! constant-time comparison; a failed signature rejects the request before
//! any body processing.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::{ApiError, ErrorType};
use crate::normalization::Platform;

type HmacSha256 = Hmac<Sha256>;

// Simple in-memory fixed-window rate limiter per (platform, creator_id).
// Window unit: seconds epoch rounded to minute.
static WEBHOOK_RL: OnceLock<Mutex<HashMap<String, (u64, u32)>>> = OnceLock::new();

/// Advertised wait on a rate-limited delivery; one fixed window.
const RATE_LIMIT_RETRY_AFTER_SECS: u64 = 60;

fn is_rate_limited(platform: &str, creator_id: &str, limit_per_minute: u32) -> bool {
    let map = WEBHOOK_RL.get_or_init(|| Mutex::new(HashMap::new()));
    let key = format!("{}:{}", platform, creator_id);
    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let window = now_secs / 60;
    let mut guard = match map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let entry = guard.entry(key).or_insert((window, 0));
    if entry.0 != window {
        *entry = (window, 0);
    }
    if entry.1 >= limit_per_minute {
        true
    } else {
        entry.1 += 1;
        false
    }
}

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: String },

    #[error("Invalid signature format: {header}")]
    InvalidSignatureFormat { header: String },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Unsupported platform: {platform}")]
    UnsupportedPlatform { platform: String },

    #[error("Webhook verification not configured for platform: {platform}")]
    NotConfigured { platform: String },
}

impl VerificationError {
    /// Returns the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            VerificationError::MissingSignature { .. } => StatusCode::UNAUTHORIZED,
            VerificationError::InvalidSignatureFormat { .. } => StatusCode::UNAUTHORIZED,
            VerificationError::VerificationFailed => StatusCode::UNAUTHORIZED,
            VerificationError::UnsupportedPlatform { .. } => StatusCode::NOT_FOUND,
            VerificationError::NotConfigured { .. } => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Result type for webhook verification
pub type VerificationResult<T> = Result<T, VerificationError>;

/// Verifies a Meta-style `sha256=<hex>` HMAC signature over the raw body.
pub fn verify_hub_signature(
    body: &[u8],
    signature_header: &str,
    secret: &str,
) -> VerificationResult<()> {
    debug!(body_size = body.len(), "Starting signature verification");

    if signature_header.is_empty() {
        return Err(VerificationError::MissingSignature {
            header: "X-Hub-Signature-256".to_string(),
        });
    }

    let signature_prefix = "sha256=";
    if !signature_header.starts_with(signature_prefix) {
        return Err(VerificationError::InvalidSignatureFormat {
            header: "X-Hub-Signature-256 must start with 'sha256='".to_string(),
        });
    }

    let provided_hex = &signature_header[signature_prefix.len()..];

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    let expected_bytes = mac.finalize().into_bytes();

    let provided_bytes =
        hex::decode(provided_hex).map_err(|_| VerificationError::InvalidSignatureFormat {
            header: "X-Hub-Signature-256 contains invalid hex".to_string(),
        })?;

    // Constant-time comparison to prevent timing attacks
    let expected_bytes_array: &[u8] = expected_bytes.as_ref();
    if subtle::ConstantTimeEq::ct_eq(expected_bytes_array, &provided_bytes[..]).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Verifies the webhook signature for the given platform.
pub fn verify_webhook_signature(
    platform: &str,
    body: &[u8],
    headers: &HeaderMap,
    config: &AppConfig,
) -> VerificationResult<()> {
    let secret = match Platform::from_str(platform) {
        Ok(Platform::Instagram) => config.webhook_instagram_secret.as_ref(),
        Ok(Platform::Whatsapp) => config.webhook_whatsapp_secret.as_ref(),
        Err(_) => {
            return Err(VerificationError::UnsupportedPlatform {
                platform: platform.to_string(),
            });
        }
    };

    let secret = secret.ok_or_else(|| VerificationError::NotConfigured {
        platform: platform.to_string(),
    })?;

    let signature_header = headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    verify_hub_signature(body, signature_header, secret)
}

/// Middleware enforcing signature verification and per-creator rate limiting
/// on the public webhook ingestion routes.
pub async fn webhook_verification_middleware(
    State(config): State<std::sync::Arc<AppConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path().to_string();

    // Only applies to /webhooks/{platform}/{creator_id}
    if !path.starts_with("/webhooks/") || path.split('/').count() != 4 {
        return Ok(next.run(request).await);
    }

    let path_parts: Vec<&str> = path.split('/').collect();
    let platform = path_parts[2];
    let creator_id = path_parts[3];

    // The subscription handshake is an unsigned GET; signatures only cover
    // event deliveries
    if request.method() == Method::GET {
        return Ok(next.run(request).await);
    }

    let verification_enabled = match Platform::from_str(platform) {
        Ok(Platform::Instagram) => config.webhook_instagram_secret.is_some(),
        Ok(Platform::Whatsapp) => config.webhook_whatsapp_secret.is_some(),
        Err(_) => false,
    };

    if !verification_enabled {
        if matches!(config.profile.as_str(), "local" | "test")
            && Platform::from_str(platform).is_ok()
        {
            // Allow unsigned deliveries in dev/test when no secret is set
            return Ok(next.run(request).await);
        }
        warn!(
            platform = %platform,
            "Webhook verification not configured for platform"
        );
        return Err(StatusCode::UNAUTHORIZED);
    }

    if is_rate_limited(platform, creator_id, config.webhook_rate_limit_per_minute) {
        warn!(platform = %platform, creator_id = %creator_id, "Webhook rate limit exceeded");
        let error = ApiError::from(ErrorType::TooManyRequests)
            .with_retry_after(RATE_LIMIT_RETRY_AFTER_SECS);
        return Ok(error.into_response());
    }

    // Buffer the raw body for signature verification, then reattach it
    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX).await.map_err(|e| {
        error!(error = ?e, "Failed to read request body for webhook verification");
        StatusCode::BAD_REQUEST
    })?;

    match verify_webhook_signature(platform, &body_bytes, &parts.headers, &config) {
        Ok(()) => {
            info!(
                platform = %platform,
                body_size = body_bytes.len(),
                "Webhook signature verified successfully"
            );

            let request = Request::from_parts(parts, axum::body::Body::from(body_bytes));
            Ok(next.run(request).await)
        }
        Err(e) => {
            error!(
                platform = %platform,
                error = %e,
                "Webhook signature verification failed"
            );

            Err(e.status_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(body: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_signature_verification_success() {
        let secret = "test_secret";
        let body = b"test payload";

        let signature_header = sign(body, secret);

        assert!(verify_hub_signature(body, &signature_header, secret).is_ok());
    }

    #[test]
    fn test_signature_verification_invalid_signature() {
        let secret = "test_secret";
        let body = b"test payload";
        let signature_header = "sha256=invalid_signature";

        assert!(verify_hub_signature(body, signature_header, secret).is_err());
    }

    #[test]
    fn test_signature_verification_missing_signature() {
        let secret = "test_secret";
        let body = b"test payload";

        assert!(matches!(
            verify_hub_signature(body, "", secret),
            Err(VerificationError::MissingSignature { .. })
        ));
    }

    #[test]
    fn test_signature_verification_invalid_format() {
        let secret = "test_secret";
        let body = b"test payload";

        assert!(matches!(
            verify_hub_signature(body, "invalid_format", secret),
            Err(VerificationError::InvalidSignatureFormat { .. })
        ));
    }

    #[test]
    fn test_signature_verification_wrong_secret() {
        let body = b"test payload";
        let signature_header = sign(body, "right_secret");

        assert!(matches!(
            verify_hub_signature(body, &signature_header, "wrong_secret"),
            Err(VerificationError::VerificationFailed)
        ));
    }

    #[test]
    fn test_signature_verification_tampered_body() {
        let secret = "test_secret";
        let signature_header = sign(b"original body", secret);

        assert!(verify_hub_signature(b"tampered body", &signature_header, secret).is_err());
    }

    #[test]
    fn test_unsupported_platform() {
        let body = b"test payload";
        let headers = HeaderMap::new();
        let config = AppConfig::default();

        assert!(matches!(
            verify_webhook_signature("telegram", body, &headers, &config),
            Err(VerificationError::UnsupportedPlatform { .. })
        ));
    }

    #[test]
    fn test_platform_not_configured() {
        let body = b"test payload";
        let headers = HeaderMap::new();
        let config = AppConfig::default(); // no secrets set

        assert!(matches!(
            verify_webhook_signature("instagram", body, &headers, &config),
            Err(VerificationError::NotConfigured { .. })
        ));
    }

    #[test]
    fn test_instagram_signature_via_headers() {
        let secret = "ig-secret";
        let body = br#"{"object":"instagram","entry":[]}"#;

        let mut headers = HeaderMap::new();
        headers.insert("x-hub-signature-256", sign(body, secret).parse().unwrap());

        let mut config = AppConfig::default();
        config.webhook_instagram_secret = Some(secret.to_string());

        assert!(verify_webhook_signature("instagram", body, &headers, &config).is_ok());
    }

    #[test]
    fn test_whatsapp_uses_its_own_secret() {
        let body = b"{}";
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-hub-signature-256",
            sign(body, "ig-secret").parse().unwrap(),
        );

        let mut config = AppConfig::default();
        config.webhook_instagram_secret = Some("ig-secret".to_string());
        config.webhook_whatsapp_secret = Some("wa-secret".to_string());

        // Signed with the instagram secret, presented to whatsapp
        assert!(verify_webhook_signature("whatsapp", body, &headers, &config).is_err());
    }

    #[test]
    fn test_rate_limiter_counts_per_key() {
        assert!(!is_rate_limited("instagram", "rl-test-creator", 2));
        assert!(!is_rate_limited("instagram", "rl-test-creator", 2));
        assert!(is_rate_limited("instagram", "rl-test-creator", 2));
        // A different creator has its own window
        assert!(!is_rate_limited("instagram", "rl-other-creator", 2));
    }
}
