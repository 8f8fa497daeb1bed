//! HTTP surface tests over the assembled router: the subscription handshake,
//! signed event delivery, operator auth on the job triggers, and the
//! credential intake contract.

mod test_utils;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use hmac::{Hmac, Mac};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde_json::{Value as JsonValue, json};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

use automations::config::AppConfig;
use automations::models::{credential, inbound_event};
use automations::server::{AppState, create_app};

use test_utils::{
    TEST_OPERATOR_TOKEN, insert_creator, setup_test_db, test_config, test_key, wait_until,
};

async fn setup_app(config: AppConfig) -> Result<(Router, DatabaseConnection)> {
    let db = setup_test_db().await?;
    let state = AppState::from_config(Arc::new(config), db.clone())?;
    Ok((create_app(state), db))
}

fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn comment_payload(comment_id: &str) -> JsonValue {
    json!({
        "object": "instagram",
        "entry": [{
            "id": "ig-business-1",
            "changes": [{
                "field": "comments",
                "value": {
                    "id": comment_id,
                    "from": {"id": "u-1", "username": "jane"},
                    "text": "price?",
                    "media": {"id": "m-1"}
                }
            }]
        }]
    })
}

async fn body_json(response: axum::response::Response) -> Result<JsonValue> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn handshake_echoes_challenge_for_matching_verify_token() -> Result<()> {
    let (app, db) = setup_app(test_config()).await?;
    let creator = insert_creator(&db).await?;

    let uri = format!(
        "/webhooks/instagram/{}?hub.mode=subscribe&hub.verify_token=handshake-token&hub.challenge=4242",
        creator.id
    );
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"4242");

    Ok(())
}

#[tokio::test]
async fn handshake_rejects_wrong_verify_token() -> Result<()> {
    let (app, db) = setup_app(test_config()).await?;
    let creator = insert_creator(&db).await?;

    let uri = format!(
        "/webhooks/instagram/{}?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=4242",
        creator.id
    );
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn signed_delivery_is_acknowledged_and_processed() -> Result<()> {
    let secret = "ig-app-secret";
    let mut config = test_config();
    config.webhook_instagram_secret = Some(secret.to_string());
    let (app, db) = setup_app(config).await?;
    let creator = insert_creator(&db).await?;

    let payload = serde_json::to_vec(&comment_payload("c-signed-1"))?;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/instagram/{}", creator.id))
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-hub-signature-256", sign(&payload, secret))
                .body(Body::from(payload))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "accepted");

    // Processing runs on a spawned task; with no rules the event lands as
    // skipped in the dedup log
    let processed = wait_until(|| {
        let db = db.clone();
        async move {
            inbound_event::Entity::find()
                .filter(inbound_event::Column::PlatformEventId.eq("c-signed-1"))
                .filter(inbound_event::Column::Status.eq("skipped"))
                .one(&db)
                .await
                .ok()
                .flatten()
                .is_some()
        }
    })
    .await;
    assert!(processed, "event was not processed into the dedup log");

    Ok(())
}

#[tokio::test]
async fn tampered_signature_is_rejected_before_processing() -> Result<()> {
    let mut config = test_config();
    config.webhook_instagram_secret = Some("ig-app-secret".to_string());
    let (app, db) = setup_app(config).await?;
    let creator = insert_creator(&db).await?;

    let payload = serde_json::to_vec(&comment_payload("c-tampered"))?;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/instagram/{}", creator.id))
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-hub-signature-256", sign(&payload, "wrong-secret"))
                .body(Body::from(payload))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(inbound_event::Entity::find().all(&db).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn rate_limited_delivery_carries_retry_after() -> Result<()> {
    let secret = "ig-app-secret";
    let mut config = test_config();
    config.webhook_instagram_secret = Some(secret.to_string());
    config.webhook_rate_limit_per_minute = 1;
    let (app, db) = setup_app(config).await?;
    let creator = insert_creator(&db).await?;

    let payload = serde_json::to_vec(&comment_payload("c-limited"))?;
    let signature = sign(&payload, secret);

    // The first delivery consumes the window; a retry inside it is refused.
    // Allow one extra attempt in case the fixed window rolls over mid-test.
    let mut limited = None;
    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/webhooks/instagram/{}", creator.id))
                    .header(header::CONTENT_TYPE, "application/json")
                    .header("x-hub-signature-256", signature.clone())
                    .body(Body::from(payload.clone()))?,
            )
            .await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            limited = Some(response);
            break;
        }
    }

    let response = limited.expect("rate limiter never tripped");
    assert_eq!(response.headers().get("retry-after").unwrap(), "60");
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    let body = body_json(response).await?;
    assert_eq!(body["code"], "RATE_LIMITED");

    Ok(())
}

#[tokio::test]
async fn unknown_platform_is_not_found() -> Result<()> {
    let (app, _db) = setup_app(test_config()).await?;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/telegram/{}", Uuid::new_v4()))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn job_triggers_require_operator_auth() -> Result<()> {
    let (app, _db) = setup_app(test_config()).await?;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/jobs/follow-gate/run")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/jobs/token-refresh/run")
                .header(header::AUTHORIZATION, "Bearer wrong-token")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn job_triggers_return_tick_reports() -> Result<()> {
    let (app, _db) = setup_app(test_config()).await?;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/jobs/follow-gate/run")
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", TEST_OPERATOR_TOKEN),
                )
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await?;
    assert_eq!(report["expired"], 0);
    assert_eq!(report["completed"], 0);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/jobs/token-refresh/run")
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", TEST_OPERATOR_TOKEN),
                )
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await?;
    assert_eq!(report["scanned"], 0);

    Ok(())
}

#[tokio::test]
async fn credential_intake_stores_sealed_tokens_and_reveals_none() -> Result<()> {
    let (app, db) = setup_app(test_config()).await?;
    let creator = insert_creator(&db).await?;

    let request_body = json!({
        "access_token": "plaintext-access-token",
        "refresh_token": "plaintext-refresh-token",
        "scopes": ["instagram_business_basic"]
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/creators/{}/credentials/instagram", creator.id))
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", TEST_OPERATOR_TOKEN),
                )
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&request_body)?))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body_text = String::from_utf8(bytes.to_vec())?;
    assert!(!body_text.contains("plaintext-access-token"));
    assert!(!body_text.contains("plaintext-refresh-token"));

    let info: JsonValue = serde_json::from_str(&body_text)?;
    assert_eq!(info["platform"], "instagram");
    assert_eq!(info["status"], "active");
    assert_eq!(info["has_refresh_token"], true);

    // At rest the row is sealed, and opens back to the original through the store
    let row = credential::Entity::find().one(&db).await?.expect("stored");
    assert_ne!(row.access_token_ciphertext, b"plaintext-access-token".to_vec());

    let repo = automations::repositories::credential::CredentialRepository::new(
        db.clone(),
        test_key(),
    );
    let opened = repo
        .get_active(creator.id, automations::normalization::Platform::Instagram)
        .await?
        .expect("active credential");
    assert_eq!(opened.access_token, "plaintext-access-token");

    Ok(())
}

#[tokio::test]
async fn credential_intake_validates_input() -> Result<()> {
    let (app, db) = setup_app(test_config()).await?;
    let creator = insert_creator(&db).await?;

    // Empty token
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/creators/{}/credentials/instagram", creator.id))
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", TEST_OPERATOR_TOKEN),
                )
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"access_token": "  "}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown creator
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/creators/{}/credentials/instagram", Uuid::new_v4()))
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", TEST_OPERATOR_TOKEN),
                )
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"access_token": "tok"}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn disconnect_revokes_and_missing_credential_is_not_found() -> Result<()> {
    let (app, db) = setup_app(test_config()).await?;
    let creator = insert_creator(&db).await?;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/creators/{}/credentials/instagram", creator.id))
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", TEST_OPERATOR_TOKEN),
                )
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"access_token": "tok"}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/creators/{}/credentials/instagram", creator.id))
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", TEST_OPERATOR_TOKEN),
                )
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let row = credential::Entity::find().one(&db).await?.expect("row kept");
    assert_eq!(row.status, "revoked");

    // Nothing was ever stored for whatsapp
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/creators/{}/credentials/whatsapp", creator.id))
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", TEST_OPERATOR_TOKEN),
                )
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}
