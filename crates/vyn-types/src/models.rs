use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Users are owned by the registration service; the core only ever sees ids.
pub type UserId = i64;

pub type MessageId = i64;

/// Delivery state of a message. Transitions only move forward:
/// `Sent -> Delivered -> Read`, or `Sent -> Read` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageState {
    Sent,
    Delivered,
    Read,
}

impl MessageState {
    /// Storage representation used in the `messages.state` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn can_advance_to(&self, next: MessageState) -> bool {
        next > *self
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl fmt::Display for UnknownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message state '{}'", self.0)
    }
}

impl std::error::Error for UnknownState {}

impl FromStr for MessageState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// A persisted direct message. Everything except `state` is immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub state: MessageState,
}

impl Message {
    /// The other side of this message as seen by `viewer`.
    pub fn partner_of(&self, viewer: UserId) -> UserId {
        if self.sender_id == viewer {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

/// Per-viewer summary of the latest exchange with one partner.
/// Derived from the message log on every request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub partner_id: UserId,
    pub username: String,
    pub last_message: Message,
    pub unread_count: u64,
}

impl Conversation {
    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.last_message.created_at
    }
}
