//! # Authentication and Authorization
//!
//! Operator bearer authentication for the protected routes: job triggers and
//! credential intake. These are called by the dashboard backend and the
//! external scheduler, never by end users.

use std::sync::Arc;

use axum::{
    extract::{FromRef, Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized, unauthorized_with_trace_id};
use crate::server::AppState;
use crate::telemetry::TraceContext;

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Authentication middleware that validates operator bearer tokens.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers().clone();

    // Carry the request trace id into error responses
    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|ctx| ctx.trace_id.clone());

    let token = extract_bearer_token(&headers, trace_id)?;
    validate_token(&config, token)?;

    let mut request = request;
    request.extensions_mut().insert(OperatorAuth);

    Ok(next.run(request).await)
}

fn extract_bearer_token(
    headers: &HeaderMap,
    trace_id: Option<String>,
) -> Result<&str, ApiError> {
    let reject = |message: &str, trace_id: &Option<String>| match trace_id {
        Some(trace_id) => unauthorized_with_trace_id(Some(message), trace_id.clone()),
        None => unauthorized(Some(message)),
    };

    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| reject("Missing Authorization header", &trace_id))?;

    let value = header
        .to_str()
        .map_err(|_| reject("Invalid Authorization header", &trace_id))?;

    value
        .strip_prefix("Bearer ")
        .ok_or_else(|| reject("Authorization header must use Bearer scheme", &trace_id))
}

/// Validate a presented token against the configured operator tokens using
/// constant-time comparison.
pub fn validate_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let authorized = config
        .operator_tokens
        .iter()
        .any(|candidate| candidate.as_bytes().ct_eq(token.as_bytes()).into());

    if authorized {
        Ok(())
    } else {
        tracing::warn!("Operator token rejected");
        Err(unauthorized(Some("Invalid operator token")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_tokens(tokens: &[&str]) -> AppConfig {
        let mut config = AppConfig::default();
        config.operator_tokens = tokens.iter().map(|t| t.to_string()).collect();
        config
    }

    #[test]
    fn accepts_configured_token() {
        let config = config_with_tokens(&["alpha", "beta"]);
        assert!(validate_token(&config, "beta").is_ok());
    }

    #[test]
    fn rejects_unknown_token() {
        let config = config_with_tokens(&["alpha"]);
        assert!(validate_token(&config, "gamma").is_err());
    }

    #[test]
    fn rejects_when_no_tokens_configured() {
        let config = config_with_tokens(&[]);
        assert!(validate_token(&config, "anything").is_err());
    }

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer tok-123".parse().unwrap());

        assert_eq!(extract_bearer_token(&headers, None).unwrap(), "tok-123");
    }

    #[test]
    fn rejects_basic_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());

        assert!(extract_bearer_token(&headers, None).is_err());
    }

    #[test]
    fn rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers, None).is_err());
    }
}
