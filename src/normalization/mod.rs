//! Canonical inbound events and webhook payload normalization.
//!
//! Each platform delivers webhook batches in its own envelope; this module
//! flattens them into [`InboundEvent`] values the rest of the pipeline works
//! on. Platform and trigger are closed enumerations so adding a variant is a
//! compile-time-checked change across the matcher and dispatcher.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Messaging platform an event arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Instagram,
    Whatsapp,
}

impl Platform {
    /// Storage/string form of the platform.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Whatsapp => "whatsapp",
        }
    }

    /// All supported platforms.
    pub fn all() -> [Platform; 2] {
        [Platform::Instagram, Platform::Whatsapp]
    }
}

/// Error for unrecognized platform strings.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl std::str::FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instagram" => Ok(Platform::Instagram),
            "whatsapp" => Ok(Platform::Whatsapp),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of inbound interaction an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    KeywordComment,
    KeywordDm,
    NewFollower,
    StoryReply,
}

impl TriggerKind {
    /// Storage/string form of the trigger.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::KeywordComment => "keyword_comment",
            TriggerKind::KeywordDm => "keyword_dm",
            TriggerKind::NewFollower => "new_follower",
            TriggerKind::StoryReply => "story_reply",
        }
    }

    /// Whether this trigger matches on keywords in the event text.
    pub fn is_keyword_based(&self) -> bool {
        match self {
            TriggerKind::KeywordComment | TriggerKind::KeywordDm | TriggerKind::StoryReply => true,
            TriggerKind::NewFollower => false,
        }
    }
}

/// Error for unrecognized trigger strings.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown trigger type: {0}")]
pub struct UnknownTrigger(pub String);

impl std::str::FromStr for TriggerKind {
    type Err = UnknownTrigger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword_comment" => Ok(TriggerKind::KeywordComment),
            "keyword_dm" => Ok(TriggerKind::KeywordDm),
            "new_follower" => Ok(TriggerKind::NewFollower),
            "story_reply" => Ok(TriggerKind::StoryReply),
            other => Err(UnknownTrigger(other.to_string())),
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical form of one inbound platform event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub platform: Platform,
    pub trigger: TriggerKind,
    /// Platform-issued event id; synthesized from the content hash when the
    /// platform omits one.
    pub platform_event_id: String,
    pub sender_id: String,
    pub sender_username: Option<String>,
    pub text: String,
    pub post_id: Option<String>,
    pub comment_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Hash of the normalized content, deliberately excluding the platform
    /// event id so a redelivery under a fresh id still collides.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.platform.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.trigger.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.sender_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.text.as_bytes());
        hasher.update(b"|");
        hasher.update(self.post_id.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(self.comment_id.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Flatten a platform webhook payload into canonical events.
///
/// Unrecognized entries are skipped; an empty result is not an error (Meta
/// sends test pings and field types we do not subscribe to).
pub fn normalize(
    platform: Platform,
    payload: &JsonValue,
    received_at: DateTime<Utc>,
) -> Vec<InboundEvent> {
    match platform {
        Platform::Instagram => normalize_instagram(payload, received_at),
        Platform::Whatsapp => normalize_whatsapp(payload, received_at),
    }
}

fn entries(payload: &JsonValue) -> impl Iterator<Item = &JsonValue> {
    payload
        .get("entry")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
}

fn normalize_instagram(payload: &JsonValue, received_at: DateTime<Utc>) -> Vec<InboundEvent> {
    let mut events = Vec::new();

    for entry in entries(payload) {
        for change in entry
            .get("changes")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
        {
            let field = change.get("field").and_then(JsonValue::as_str);
            let value = match change.get("value") {
                Some(value) => value,
                None => continue,
            };

            match field {
                Some("comments") => {
                    if let Some(event) = instagram_comment(value, received_at) {
                        events.push(event);
                    }
                }
                Some("follows") => {
                    if let Some(event) = instagram_follow(value, received_at) {
                        events.push(event);
                    }
                }
                _ => {
                    tracing::debug!(field = ?field, "Skipping unsubscribed instagram change field");
                }
            }
        }

        for messaging in entry
            .get("messaging")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(event) = instagram_message(messaging, received_at) {
                events.push(event);
            }
        }
    }

    events
}

fn instagram_comment(value: &JsonValue, received_at: DateTime<Utc>) -> Option<InboundEvent> {
    let sender = value.get("from")?;
    let sender_id = sender.get("id").and_then(JsonValue::as_str)?.to_string();
    let comment_id = value.get("id").and_then(JsonValue::as_str)?.to_string();

    Some(InboundEvent {
        platform: Platform::Instagram,
        trigger: TriggerKind::KeywordComment,
        platform_event_id: comment_id.clone(),
        sender_id,
        sender_username: sender
            .get("username")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        text: value
            .get("text")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string(),
        post_id: value
            .get("media")
            .and_then(|media| media.get("id"))
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        comment_id: Some(comment_id),
        received_at,
    })
}

fn instagram_follow(value: &JsonValue, received_at: DateTime<Utc>) -> Option<InboundEvent> {
    let sender_id = value
        .get("follower_id")
        .and_then(JsonValue::as_str)?
        .to_string();

    let mut event = InboundEvent {
        platform: Platform::Instagram,
        trigger: TriggerKind::NewFollower,
        platform_event_id: String::new(),
        sender_id,
        sender_username: value
            .get("username")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        text: String::new(),
        post_id: None,
        comment_id: None,
        received_at,
    };

    // Follow notifications carry no stable id; derive one from content
    event.platform_event_id = format!("follow:{}", event.content_hash());
    Some(event)
}

fn instagram_message(messaging: &JsonValue, received_at: DateTime<Utc>) -> Option<InboundEvent> {
    let sender_id = messaging
        .get("sender")
        .and_then(|sender| sender.get("id"))
        .and_then(JsonValue::as_str)?
        .to_string();
    let message = messaging.get("message")?;

    // Echoes of our own sends come back through the same subscription
    if message
        .get("is_echo")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false)
    {
        return None;
    }

    let mid = message.get("mid").and_then(JsonValue::as_str)?.to_string();
    let story_id = message
        .get("reply_to")
        .and_then(|reply| reply.get("story"))
        .and_then(|story| story.get("id"))
        .and_then(JsonValue::as_str)
        .map(str::to_string);

    let trigger = if story_id.is_some() {
        TriggerKind::StoryReply
    } else {
        TriggerKind::KeywordDm
    };

    Some(InboundEvent {
        platform: Platform::Instagram,
        trigger,
        platform_event_id: mid,
        sender_id,
        sender_username: None,
        text: message
            .get("text")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string(),
        post_id: story_id,
        comment_id: None,
        received_at,
    })
}

fn normalize_whatsapp(payload: &JsonValue, received_at: DateTime<Utc>) -> Vec<InboundEvent> {
    let mut events = Vec::new();

    for entry in entries(payload) {
        for change in entry
            .get("changes")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
        {
            if change.get("field").and_then(JsonValue::as_str) != Some("messages") {
                continue;
            }
            let value = match change.get("value") {
                Some(value) => value,
                None => continue,
            };

            let contact_name = value
                .get("contacts")
                .and_then(JsonValue::as_array)
                .and_then(|contacts| contacts.first())
                .and_then(|contact| contact.get("profile"))
                .and_then(|profile| profile.get("name"))
                .and_then(JsonValue::as_str)
                .map(str::to_string);

            for message in value
                .get("messages")
                .and_then(JsonValue::as_array)
                .into_iter()
                .flatten()
            {
                let (Some(id), Some(from)) = (
                    message.get("id").and_then(JsonValue::as_str),
                    message.get("from").and_then(JsonValue::as_str),
                ) else {
                    continue;
                };

                events.push(InboundEvent {
                    platform: Platform::Whatsapp,
                    trigger: TriggerKind::KeywordDm,
                    platform_event_id: id.to_string(),
                    sender_id: from.to_string(),
                    sender_username: contact_name.clone(),
                    text: message
                        .get("text")
                        .and_then(|text| text.get("body"))
                        .and_then(JsonValue::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    post_id: None,
                    comment_id: None,
                    received_at,
                });
            }
        }
    }

    events
}
