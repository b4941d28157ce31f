//! WebSocket Message Types
//!
//! Wire formats of the chat socket. Server events are tagged by `kind`;
//! client frames follow the HTMX `ws-send` shape, form fields plus a
//! `HEADERS` object.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::StoredMessage;

/// Header HTMX sets to the id of the element that triggered the send
pub const TRIGGER_HEADER: &str = "HX-Trigger";

/// Trigger id of the message input; frames carrying it are typing signals
pub const TYPING_TRIGGER: &str = "user-input";

/// A persisted chat message as clients see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: Uuid,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredMessage> for ChatMessage {
    fn from(m: StoredMessage) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            username: m.username,
            content: m.content,
            created_at: m.created_at,
        }
    }
}

/// Server to client event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerEvent {
    Message(ChatMessage),

    #[serde(rename_all = "camelCase")]
    Typing { user_id: Uuid, username: String },

    PresenceCount { count: usize },

    /// Sent only to the connection that exceeded its message limit
    #[serde(rename_all = "camelCase")]
    RateLimitNotice { retry_after_secs: u64 },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => "message",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::PresenceCount { .. } => "presenceCount",
            ServerEvent::RateLimitNotice { .. } => "rateLimitNotice",
        }
    }
}

/// Client to server frame.
///
/// Identity fields a client might add (`userId`, `username`, `createdAt`)
/// are not part of this type and are discarded during decoding.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub content: String,

    /// HTMX leaves unset headers as `null`
    #[serde(rename = "HEADERS", default)]
    pub headers: HashMap<String, serde_json::Value>,
}

impl ClientFrame {
    pub fn is_typing(&self) -> bool {
        self.headers
            .get(TRIGGER_HEADER)
            .and_then(|trigger| trigger.as_str())
            .is_some_and(|trigger| trigger == TYPING_TRIGGER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_message_event_wire_format() {
        let user_id = Uuid::nil();
        let created_at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = ServerEvent::Message(ChatMessage {
            id: 7,
            user_id,
            username: "alice".into(),
            content: "hi".into(),
            created_at,
        });

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "kind": "message",
                "id": 7,
                "userId": "00000000-0000-0000-0000-000000000000",
                "username": "alice",
                "content": "hi",
                "createdAt": "2024-05-01T12:00:00Z",
            })
        );
    }

    #[test]
    fn test_control_event_wire_format() {
        assert_eq!(
            serde_json::to_value(ServerEvent::PresenceCount { count: 3 }).unwrap(),
            json!({"kind": "presenceCount", "count": 3})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::RateLimitNotice { retry_after_secs: 10 }).unwrap(),
            json!({"kind": "rateLimitNotice", "retryAfterSecs": 10})
        );
    }

    #[test]
    fn test_client_frame_ignores_identity_fields() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "content": "hello",
            "userId": "11111111-1111-1111-1111-111111111111",
            "username": "mallory",
            "HEADERS": {"HX-Request": "true", "HX-Trigger": "chat-form"}
        }))
        .unwrap();

        assert_eq!(frame.content, "hello");
        assert!(!frame.is_typing());
    }

    #[test]
    fn test_typing_trigger_detection() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "content": "hel",
            "HEADERS": {"HX-Trigger": "user-input", "HX-Trigger-Name": null}
        }))
        .unwrap();
        assert!(frame.is_typing());

        let bare: ClientFrame = serde_json::from_value(json!({"content": "x"})).unwrap();
        assert!(!bare.is_typing());
    }
}
