use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Conversation, Message, MessageId, MessageState, UserId};

// -- Identity --

/// Claims carried by the bearer token the auth service issues.
/// `sub` is the verified numeric user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    #[serde(default)]
    pub username: String,
    pub exp: usize,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub state: MessageState,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            content: m.content,
            created_at: m.created_at,
            state: m.state,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated_count: usize,
}

// -- Conversations --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub partner_id: UserId,
    pub username: String,
    pub last_message: MessageResponse,
    pub last_timestamp: DateTime<Utc>,
    pub unread_count: u64,
}

impl From<Conversation> for ConversationResponse {
    fn from(c: Conversation) -> Self {
        let last_timestamp = c.last_timestamp();
        Self {
            partner_id: c.partner_id,
            username: c.username,
            last_message: c.last_message.into(),
            last_timestamp,
            unread_count: c.unread_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
