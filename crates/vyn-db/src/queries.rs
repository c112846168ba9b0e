use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use vyn_types::models::{Message, MessageId, MessageState, UserId};

use crate::{Database, Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, created_at, state";

impl Database {
    /// Persist a new message in state `Sent`. The insert is committed before this returns.
    pub fn append(&self, sender_id: UserId, receiver_id: UserId, content: &str) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(StoreError::Validation("content must not be empty".into()));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            // created_at never goes backwards, even if the wall clock does
            let now = Utc::now().timestamp_micros();
            let last: Option<i64> = tx
                .query_row(
                    "SELECT created_at FROM messages ORDER BY id DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            let created_at = last.map_or(now, |last| now.max(last));

            tx.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, created_at, state)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![sender_id, receiver_id, content, created_at, MessageState::Sent.as_str()],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;

            debug!("Stored message {} ({} -> {})", id, sender_id, receiver_id);

            Ok(Message {
                id,
                sender_id,
                receiver_id,
                content: content.to_string(),
                created_at: micros_to_datetime(created_at)
                    .ok_or(rusqlite::Error::IntegralValueOutOfRange(4, created_at))?,
                state: MessageState::Sent,
            })
        })
    }

    /// All messages exchanged between two users, oldest first.
    pub fn history(&self, user_a: UserId, user_b: UserId) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, id ASC"
            ))?;

            let rows = stmt
                .query_map(params![user_a, user_b], row_to_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn message(&self, id: MessageId) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    [id],
                    row_to_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Mark everything `peer_id` sent to `reader_id` as read. Returns how many rows changed.
    pub fn mark_read(&self, reader_id: UserId, peer_id: UserId) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET state = 'read'
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND state != 'read'",
                params![peer_id, reader_id],
            )?;
            Ok(updated)
        })
    }

    /// `Sent -> Delivered` for one message. Later states are left alone.
    /// Returns the state the store holds afterwards.
    pub fn set_delivered(&self, id: MessageId) -> Result<MessageState> {
        self.with_conn(|conn| {
            let current: String = conn
                .query_row("SELECT state FROM messages WHERE id = ?1", [id], |row| row.get(0))
                .optional()?
                .ok_or(StoreError::NotFound(id))?;
            let current = current.parse::<MessageState>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?;

            if !current.can_advance_to(MessageState::Delivered) {
                return Ok(current);
            }

            conn.execute(
                "UPDATE messages SET state = 'delivered' WHERE id = ?1 AND state = 'sent'",
                [id],
            )?;
            Ok(MessageState::Delivered)
        })
    }

    /// `Sent -> Delivered` for everything `peer_id` sent to `reader_id`,
    /// used when the reader pulls the history itself.
    pub fn deliver_pending(&self, reader_id: UserId, peer_id: UserId) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET state = 'delivered'
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND state = 'sent'",
                params![peer_id, reader_id],
            )?;
            Ok(updated)
        })
    }

    pub fn unread_count(&self, reader_id: UserId, peer_id: UserId) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND state != 'read'",
                params![peer_id, reader_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Every user that appears on the other side of a message involving `user_id`.
    pub fn conversation_partners(&self, user_id: UserId) -> Result<BTreeSet<UserId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
                 FROM messages
                 WHERE sender_id = ?1 OR receiver_id = ?1",
            )?;

            let partners = stmt
                .query_map([user_id], |row| row.get::<_, UserId>(0))?
                .collect::<std::result::Result<BTreeSet<UserId>, _>>()?;

            Ok(partners)
        })
    }
}

pub(crate) fn micros_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

/// Maps the `MESSAGE_COLUMNS` projection, starting at column `offset`.
pub(crate) fn message_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Message> {
    let created_at: i64 = row.get(offset + 4)?;
    let state: String = row.get(offset + 5)?;

    Ok(Message {
        id: row.get(offset)?,
        sender_id: row.get(offset + 1)?,
        receiver_id: row.get(offset + 2)?,
        content: row.get(offset + 3)?,
        created_at: micros_to_datetime(created_at)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(offset + 4, created_at))?,
        state: state.parse::<MessageState>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                offset + 5,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    message_at(row, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn append_then_history() {
        let db = db();
        let stored = db.append(1, 2, "hi").unwrap();
        assert_eq!(stored.state, MessageState::Sent);

        let history = db.history(1, 2).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], stored);
        assert_eq!(history[0].content, "hi");

        // Same conversation from the other side
        assert_eq!(db.history(2, 1).unwrap(), history);
    }

    #[test]
    fn append_rejects_blank_content() {
        let db = db();
        assert!(matches!(db.append(1, 2, ""), Err(StoreError::Validation(_))));
        assert!(matches!(db.append(1, 2, "  \n\t"), Err(StoreError::Validation(_))));
        assert!(db.history(1, 2).unwrap().is_empty());
    }

    #[test]
    fn self_messages_are_allowed() {
        let db = db();
        db.append(3, 3, "note to self").unwrap();
        assert_eq!(db.history(3, 3).unwrap().len(), 1);
        assert_eq!(db.conversation_partners(3).unwrap(), BTreeSet::from([3]));
    }

    #[test]
    fn history_keeps_append_order() {
        let db = db();
        for i in 0..20 {
            let (from, to) = if i % 2 == 0 { (1, 2) } else { (2, 1) };
            db.append(from, to, &format!("msg {i}")).unwrap();
        }
        db.append(1, 3, "elsewhere").unwrap();

        let history = db.history(1, 2).unwrap();
        assert_eq!(history.len(), 20);
        for (i, msg) in history.iter().enumerate() {
            assert_eq!(msg.content, format!("msg {i}"));
        }
        for pair in history.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
            assert!(pair[0].id < pair[1].id);
        }
    }

    #[test]
    fn empty_history_is_not_an_error() {
        assert!(db().history(10, 11).unwrap().is_empty());
    }

    #[test]
    fn mark_read_is_idempotent() {
        let db = db();
        db.append(1, 2, "a").unwrap();
        db.append(1, 2, "b").unwrap();
        db.append(2, 1, "reply").unwrap();

        assert_eq!(db.mark_read(2, 1).unwrap(), 2);
        assert_eq!(db.mark_read(2, 1).unwrap(), 0);
        assert_eq!(db.unread_count(2, 1).unwrap(), 0);

        // The reply in the other direction is untouched
        assert_eq!(db.unread_count(1, 2).unwrap(), 1);
    }

    #[test]
    fn unread_count_tracks_new_messages_after_read() {
        let db = db();
        for _ in 0..5 {
            db.append(7, 8, "ping").unwrap();
        }
        assert_eq!(db.unread_count(8, 7).unwrap(), 5);

        db.mark_read(8, 7).unwrap();
        assert_eq!(db.unread_count(8, 7).unwrap(), 0);

        db.append(7, 8, "again").unwrap();
        assert_eq!(db.unread_count(8, 7).unwrap(), 1);
    }

    #[test]
    fn set_delivered_only_moves_forward() {
        let db = db();
        let msg = db.append(1, 2, "hi").unwrap();

        assert_eq!(db.set_delivered(msg.id).unwrap(), MessageState::Delivered);
        assert_eq!(db.message(msg.id).unwrap().unwrap().state, MessageState::Delivered);

        // Already delivered: no-op
        assert_eq!(db.set_delivered(msg.id).unwrap(), MessageState::Delivered);

        db.mark_read(2, 1).unwrap();
        assert_eq!(db.set_delivered(msg.id).unwrap(), MessageState::Read);
        assert_eq!(db.message(msg.id).unwrap().unwrap().state, MessageState::Read);
    }

    #[test]
    fn set_delivered_after_read_reports_read() {
        let db = db();
        let msg = db.append(1, 2, "seen before acked").unwrap();
        db.mark_read(2, 1).unwrap();

        assert_eq!(db.set_delivered(msg.id).unwrap(), MessageState::Read);
    }

    #[test]
    fn set_delivered_unknown_id() {
        assert!(matches!(db().set_delivered(999), Err(StoreError::NotFound(999))));
    }

    #[test]
    fn deliver_pending_skips_read_and_outgoing() {
        let db = db();
        let read = db.append(1, 2, "old").unwrap();
        db.mark_read(2, 1).unwrap();
        let pending = db.append(1, 2, "new").unwrap();
        let outgoing = db.append(2, 1, "mine").unwrap();

        assert_eq!(db.deliver_pending(2, 1).unwrap(), 1);

        assert_eq!(db.message(read.id).unwrap().unwrap().state, MessageState::Read);
        assert_eq!(db.message(pending.id).unwrap().unwrap().state, MessageState::Delivered);
        assert_eq!(db.message(outgoing.id).unwrap().unwrap().state, MessageState::Sent);
    }

    #[test]
    fn partners_cover_both_directions() {
        let db = db();
        db.append(1, 2, "a").unwrap();
        db.append(3, 1, "b").unwrap();
        db.append(1, 2, "c").unwrap();
        db.append(4, 5, "unrelated").unwrap();

        assert_eq!(db.conversation_partners(1).unwrap(), BTreeSet::from([2, 3]));
        assert!(db.conversation_partners(9).unwrap().is_empty());
    }

    #[test]
    fn append_surfaces_storage_failure() {
        let db = db();
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE messages")?;
            Ok(())
        })
        .unwrap();

        let err = db.append(1, 2, "lost").unwrap_err();
        assert!(err.is_persistence());
    }
}
