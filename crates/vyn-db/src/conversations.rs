use rusqlite::params;

use vyn_types::models::{Conversation, UserId};

use crate::queries::message_at;
use crate::{Database, Result};

/// Latest message per partner plus unread counts, in one statement.
/// Rows come back most recent conversation first.
const CONVERSATIONS_SQL: &str = "
    WITH involved AS (
        SELECT id, sender_id, receiver_id, content, created_at, state,
               CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS partner_id
        FROM messages
        WHERE sender_id = ?1 OR receiver_id = ?1
    ),
    ranked AS (
        SELECT *,
               ROW_NUMBER() OVER (
                   PARTITION BY partner_id ORDER BY created_at DESC, id DESC
               ) AS rn
        FROM involved
    ),
    unread AS (
        SELECT sender_id AS partner_id, COUNT(*) AS unread_count
        FROM messages
        WHERE receiver_id = ?1 AND state != 'read'
        GROUP BY sender_id
    )
    SELECT u.username,
           COALESCE(n.unread_count, 0),
           r.id, r.sender_id, r.receiver_id, r.content, r.created_at, r.state
    FROM ranked r
    LEFT JOIN unread n ON n.partner_id = r.partner_id
    LEFT JOIN users u ON u.id = r.partner_id
    WHERE r.rn = 1
    ORDER BY r.created_at DESC, r.id DESC";

impl Database {
    /// Conversation list for `viewer`. Empty when the viewer has no messages.
    pub fn conversations(&self, viewer: UserId) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(CONVERSATIONS_SQL)?;

            let rows = stmt
                .query_map(params![viewer], |row| {
                    let unread: i64 = row.get(1)?;
                    let last_message = message_at(row, 2)?;
                    Ok(Conversation {
                        partner_id: last_message.partner_of(viewer),
                        username: row
                            .get::<_, Option<String>>(0)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        unread_count: unread as u64,
                        last_message,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}
