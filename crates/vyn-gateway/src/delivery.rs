use std::sync::Arc;

use tracing::{debug, info, warn};

use vyn_db::{Database, StoreError};
use vyn_types::events::{ClientFrame, ServerFrame};
use vyn_types::models::{Message, UserId};

use crate::registry::ConnectionRegistry;

/// Store-and-forward delivery: every message is persisted first, then pushed
/// to the recipient if they are online.
#[derive(Clone)]
pub struct DeliveryRouter {
    db: Arc<Database>,
    registry: ConnectionRegistry,
}

impl DeliveryRouter {
    pub fn new(db: Arc<Database>, registry: ConnectionRegistry) -> Self {
        Self { db, registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Persist and push a message. The returned message carries the state the
    /// store holds after the push attempt: it moves past `Sent` only if the
    /// recipient's socket accepted the frame.
    pub async fn send(&self, sender_id: UserId, receiver_id: UserId, content: String) -> Result<Message, StoreError> {
        let mut message = self
            .db
            .call(move |db| db.append(sender_id, receiver_id, &content))
            .await?;

        if !self.registry.try_send(receiver_id, ServerFrame::push(&message)).await {
            debug!("User {} offline, message {} stored for later", receiver_id, message.id);
            return Ok(message);
        }

        let id = message.id;
        // The recipient may already have read it; report whatever the store holds
        match self.db.call(move |db| db.set_delivered(id)).await {
            Ok(state) => message.state = state,
            Err(e) => warn!("Message {} pushed but not marked delivered: {}", id, e),
        }

        Ok(message)
    }

    pub async fn mark_read(&self, reader_id: UserId, peer_id: UserId) -> Result<usize, StoreError> {
        self.db.call(move |db| db.mark_read(reader_id, peer_id)).await
    }

    pub async fn typing(&self, from: UserId, to: UserId, is_typing: bool) {
        self.registry
            .relay(to, ServerFrame::Typing { from, is_typing })
            .await;
    }

    /// Process one decoded frame from `user_id`. Returns the reply for the
    /// sender, if the frame kind has one.
    pub async fn handle_frame(&self, user_id: UserId, frame: ClientFrame) -> Option<ServerFrame> {
        match frame {
            ClientFrame::Message { receiver_id, content } => {
                let Some(receiver_id) = receiver_id else {
                    return Some(ServerFrame::error("missing receiver_id"));
                };
                let content = match content {
                    Some(c) if !c.trim().is_empty() => c,
                    _ => return Some(ServerFrame::error("content must not be empty")),
                };

                match self.send(user_id, receiver_id, content).await {
                    Ok(message) => {
                        info!("User {} -> {}: message {} ({})", user_id, receiver_id, message.id, message.state);
                        Some(ServerFrame::ack(&message))
                    }
                    Err(e) => Some(error_frame(user_id, e)),
                }
            }

            ClientFrame::Typing { to, is_typing } => {
                self.typing(user_id, to, is_typing).await;
                None
            }

            ClientFrame::MarkRead { peer_id } => match self.mark_read(user_id, peer_id).await {
                Ok(updated_count) => Some(ServerFrame::Read {
                    peer_id,
                    updated_count,
                }),
                Err(e) => Some(error_frame(user_id, e)),
            },
        }
    }
}

fn error_frame(user_id: UserId, e: StoreError) -> ServerFrame {
    if e.is_persistence() {
        warn!("Store failure for user {}: {}", user_id, e);
        ServerFrame::error("message store unavailable, nothing was saved")
    } else {
        ServerFrame::error(e.to_string())
    }
}
