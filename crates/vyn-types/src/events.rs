use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageId, MessageState, UserId};

/// Frames sent FROM client TO server over the live WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Send a direct message. Fields are optional on the wire so a frame with
    /// a missing field can be answered with an error instead of being dropped.
    Message {
        #[serde(default)]
        receiver_id: Option<UserId>,
        #[serde(default)]
        content: Option<String>,
    },

    /// Typing indicator for one peer. Relayed only, never stored.
    Typing { to: UserId, is_typing: bool },

    /// Mark every message from `peer_id` as read.
    MarkRead { peer_id: UserId },
}

impl ClientFrame {
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Frames sent FROM server TO client over the live WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Connection registered; sent once before anything else.
    Ready { user_id: UserId },

    /// A message pushed to its recipient, carrying the stored id and timestamp.
    Message {
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        content: String,
        created_at: DateTime<Utc>,
    },

    /// A peer started or stopped typing.
    Typing { from: UserId, is_typing: bool },

    /// Acknowledges a `message` frame to its sender.
    Ack {
        id: MessageId,
        state: MessageState,
        created_at: DateTime<Utc>,
    },

    /// Reply to a `mark_read` frame.
    Read { peer_id: UserId, updated_count: usize },

    Error { reason: String },
}

impl ServerFrame {
    pub fn push(message: &Message) -> Self {
        Self::Message {
            id: message.id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content.clone(),
            created_at: message.created_at,
        }
    }

    pub fn ack(message: &Message) -> Self {
        Self::Ack {
            id: message.id,
            state: message.state,
            created_at: message.created_at,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error { reason: reason.into() }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_message_frame() {
        let frame = ClientFrame::decode(r#"{"type":"message","receiver_id":2,"content":"hi"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Message {
                receiver_id: Some(2),
                content: Some("hi".into()),
            }
        );
    }

    #[test]
    fn decode_message_frame_with_missing_fields() {
        let frame = ClientFrame::decode(r#"{"type":"message","content":"hi"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Message {
                receiver_id: None,
                content: Some("hi".into()),
            }
        );
    }

    #[test]
    fn decode_typing_frame() {
        let frame = ClientFrame::decode(r#"{"type":"typing","to":5,"is_typing":true}"#).unwrap();
        assert_eq!(frame, ClientFrame::Typing { to: 5, is_typing: true });
    }

    #[test]
    fn unknown_or_untagged_frames_fail() {
        assert!(ClientFrame::decode(r#"{"type":"wave","to":5}"#).is_err());
        assert!(ClientFrame::decode(r#"{"receiver_id":2,"content":"hi"}"#).is_err());
        assert!(ClientFrame::decode("not json").is_err());
    }

    #[test]
    fn ack_shape() {
        let created_at = DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let json: serde_json::Value = serde_json::from_str(
            &ServerFrame::Ack {
                id: 42,
                state: MessageState::Delivered,
                created_at,
            }
            .encode()
            .unwrap(),
        )
        .unwrap();

        assert_eq!(json["type"], "ack");
        assert_eq!(json["id"], 42);
        assert_eq!(json["state"], "Delivered");
        assert_eq!(json["created_at"], "2025-01-02T03:04:05Z");
    }
}
