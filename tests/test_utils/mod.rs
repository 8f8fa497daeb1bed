//! Shared fixtures for the integration tests: an in-memory SQLite database
//! with migrations applied, plus builders for the rows the pipeline reads.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use serde_json::json;
use uuid::Uuid;

use automations::config::AppConfig;
use automations::crypto::{CryptoKey, SealedToken, credential_aad};
use automations::dispatcher::DeliveryDispatcher;
use automations::models::{creator, credential, pending_follow_request, rule};
use automations::normalization::{InboundEvent, Platform, TriggerKind};
use automations::platforms::PlatformRegistry;
use automations::processor::EventProcessor;

#[allow(dead_code)]
pub const TEST_OPERATOR_TOKEN: &str = "test-operator-token";

/// Deterministic 32-byte key shared by every test that seals credentials.
pub fn test_key_bytes() -> Vec<u8> {
    (0u8..32).collect()
}

#[allow(dead_code)]
pub fn test_key() -> CryptoKey {
    CryptoKey::new(test_key_bytes()).expect("valid test key")
}

/// Baseline test configuration: test profile, operator token, crypto key.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec![TEST_OPERATOR_TOKEN.to_string()],
        crypto_key: Some(test_key_bytes()),
        ..Default::default()
    };
    config.follow_gate.poll_batch_size = 50;
    config
}

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Inserts a creator row with a webhook verify token.
pub async fn insert_creator(db: &DatabaseConnection) -> Result<creator::Model> {
    let now = Utc::now().fixed_offset();
    let model = creator::ActiveModel {
        id: Set(Uuid::new_v4()),
        display_name: Set("Test Creator".to_string()),
        webhook_verify_token: Set(Some("handshake-token".to_string())),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    Ok(model)
}

/// Adjustable rule fixture; defaults to an active instagram keyword-comment
/// rule on "price" with no follow gate.
#[allow(dead_code)]
pub struct RuleFixture {
    pub platform: &'static str,
    pub trigger_type: &'static str,
    pub keywords: Vec<&'static str>,
    pub keyword_match: &'static str,
    pub reply_text: &'static str,
    pub requires_follow: bool,
    pub cooldown_hours: i32,
    pub priority: i32,
    pub is_active: bool,
    pub created_minutes_ago: i64,
}

impl Default for RuleFixture {
    fn default() -> Self {
        Self {
            platform: "instagram",
            trigger_type: "keyword_comment",
            keywords: vec!["price"],
            keyword_match: "contains",
            reply_text: "Hi {{username}}, the link is in your DMs!",
            requires_follow: false,
            cooldown_hours: 24,
            priority: 0,
            is_active: true,
            created_minutes_ago: 0,
        }
    }
}

#[allow(dead_code)]
pub async fn insert_rule(
    db: &DatabaseConnection,
    creator_id: Uuid,
    fixture: RuleFixture,
) -> Result<rule::Model> {
    let created = (Utc::now() - Duration::minutes(fixture.created_minutes_ago)).fixed_offset();
    let model = rule::ActiveModel {
        id: Set(Uuid::new_v4()),
        creator_id: Set(creator_id),
        platform: Set(fixture.platform.to_string()),
        trigger_type: Set(fixture.trigger_type.to_string()),
        keywords: Set(json!(fixture.keywords)),
        keyword_match: Set(fixture.keyword_match.to_string()),
        reply_text: Set(fixture.reply_text.to_string()),
        reply_attachment_id: Set(None),
        requires_follow: Set(fixture.requires_follow),
        cooldown_hours: Set(fixture.cooldown_hours),
        is_active: Set(fixture.is_active),
        priority: Set(fixture.priority),
        total_sent: Set(0),
        total_failed: Set(0),
        created_at: Set(created),
        updated_at: Set(created),
    }
    .insert(db)
    .await?;

    Ok(model)
}

/// Inserts a credential with tokens sealed under [`test_key`].
#[allow(dead_code)]
pub async fn insert_credential(
    db: &DatabaseConnection,
    creator_id: Uuid,
    platform: &str,
    access_token: &str,
    status: &str,
    expires_at: Option<DateTime<Utc>>,
) -> Result<credential::Model> {
    let key = test_key();
    let aad = credential_aad(creator_id, platform);
    let sealed = SealedToken::seal(&key, aad.as_bytes(), access_token.as_bytes())
        .expect("sealing test token")
        .into_bytes();

    let now = Utc::now().fixed_offset();
    let model = credential::ActiveModel {
        id: Set(Uuid::new_v4()),
        creator_id: Set(creator_id),
        platform: Set(platform.to_string()),
        access_token_ciphertext: Set(sealed),
        refresh_token_ciphertext: Set(None),
        expires_at: Set(expires_at.map(|dt| dt.fixed_offset())),
        scopes: Set(None),
        status: Set(status.to_string()),
        refresh_failure_count: Set(0),
        connected_at: Set(now),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    Ok(model)
}

/// Inserts a waiting follow-gate promise directly.
#[allow(dead_code)]
pub async fn insert_waiting_request(
    db: &DatabaseConnection,
    creator_id: Uuid,
    rule_id: Uuid,
    recipient_id: &str,
    message: &str,
    expires_at: DateTime<Utc>,
) -> Result<pending_follow_request::Model> {
    let now = Utc::now().fixed_offset();
    let model = pending_follow_request::ActiveModel {
        id: Set(Uuid::new_v4()),
        creator_id: Set(creator_id),
        rule_id: Set(rule_id),
        recipient_id: Set(recipient_id.to_string()),
        recipient_username: Set(None),
        message: Set(message.to_string()),
        status: Set("waiting".to_string()),
        expires_at: Set(expires_at.fixed_offset()),
        last_checked_at: Set(None),
        check_count: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    Ok(model)
}

/// A canonical instagram comment event.
#[allow(dead_code)]
pub fn comment_event(event_id: &str, sender_id: &str, text: &str) -> InboundEvent {
    InboundEvent {
        platform: Platform::Instagram,
        trigger: TriggerKind::KeywordComment,
        platform_event_id: event_id.to_string(),
        sender_id: sender_id.to_string(),
        sender_username: Some("jane".to_string()),
        text: text.to_string(),
        post_id: Some("m-1".to_string()),
        comment_id: Some(event_id.to_string()),
        received_at: Utc::now(),
    }
}

/// Builds the dispatch pipeline over one shared config and database.
#[allow(dead_code)]
pub fn build_processor(config: Arc<AppConfig>, db: DatabaseConnection) -> Arc<EventProcessor> {
    let registry = PlatformRegistry::from_config(&config);
    let dispatcher = Arc::new(DeliveryDispatcher::new(
        Arc::clone(&config),
        db.clone(),
        registry.clone(),
        test_key(),
    ));
    Arc::new(EventProcessor::new(
        config,
        db,
        registry,
        dispatcher,
        test_key(),
    ))
}

/// Polls `probe` until it reports true or a bounded number of attempts ran
/// out. Used where processing happens on a spawned task after the HTTP
/// acknowledgment.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..50 {
        if probe().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
    }
    false
}
