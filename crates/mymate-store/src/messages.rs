use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::params;

use mymate_shared::{ChatMessage, ChatSummary, Identity, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Append a message to the log and return the id the store assigned.
    ///
    /// The insert is only committed if `deadline` has not passed by then;
    /// otherwise it is rolled back and [`StoreError::DeadlineExceeded`] is
    /// returned, so a caller that gave up never leaves a stored message
    /// behind.
    pub fn append_message(
        &self,
        sender: UserId,
        receiver: UserId,
        body: &str,
        created_at: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<MessageId> {
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO chat_messages (sender_id, receiver_id, message, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                sender.to_string(),
                receiver.to_string(),
                body,
                created_at.to_rfc3339(),
            ],
        )?;
        let id = MessageId(tx.last_insert_rowid());

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(StoreError::DeadlineExceeded);
        }
        tx.commit()?;
        Ok(id)
    }

    /// Messages exchanged between `a` and `b`, newest first.
    ///
    /// `before` is an exclusive upper bound on the message id; `None` means
    /// no bound. `offset` rows are skipped before `limit` rows are returned.
    pub fn conversation_page(
        &self,
        a: UserId,
        b: UserId,
        before: Option<MessageId>,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, message, created_at
             FROM chat_messages
             WHERE ((sender_id = ?1 AND receiver_id = ?2)
                 OR (sender_id = ?2 AND receiver_id = ?1))
               AND (?3 IS NULL OR id < ?3)
             ORDER BY id DESC
             LIMIT ?4 OFFSET ?5",
        )?;

        let rows = stmt.query_map(
            params![
                a.to_string(),
                b.to_string(),
                before.map(|id| id.0),
                limit,
                offset
            ],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// One row per counterpart of `user` with the newest message between
    /// them, most recent conversation first. Counterparts without a user
    /// record are left out.
    pub fn recent_chats(&self, user: UserId) -> Result<Vec<ChatSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id, m.sender_id, m.receiver_id, m.message, m.created_at,
                    u.id, u.first_name, u.last_name, u.avatar_url
             FROM chat_messages m
             JOIN (
                 SELECT MAX(id) AS latest_id
                 FROM chat_messages
                 WHERE sender_id = ?1 OR receiver_id = ?1
                 GROUP BY MIN(sender_id, receiver_id), MAX(sender_id, receiver_id)
             ) latest ON latest.latest_id = m.id
             JOIN users u
               ON u.id = CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END
             ORDER BY m.id DESC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], |row| {
            let latest_message = row_to_message(row)?;
            let first_name: String = row.get(6)?;
            let last_name: String = row.get(7)?;
            Ok(ChatSummary {
                counterpart: Identity {
                    id: parse_user_id(row, 5)?,
                    name: Identity::display_name(&first_name, &last_name),
                    avatar_url: row.get(8)?,
                },
                latest_message,
            })
        })?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: MessageId(row.get(0)?),
        sender_id: parse_user_id(row, 1)?,
        receiver_id: parse_user_id(row, 2)?,
        message: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
    })
}

pub(crate) fn parse_user_id(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<UserId> {
    let raw: String = row.get(idx)?;
    UserId::parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_timestamp(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
