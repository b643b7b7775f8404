use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior, params};

use parley_types::models::{
    Chat, ChatId, ChatKind, ChatMember, Message, MessageId, MessageStatus, PublicKeyRecord,
    Reaction, ReadReceipt, UserId,
};

use crate::Database;
use crate::models::{
    CHAT_COLUMNS, MEMBER_COLUMNS, MESSAGE_COLUMNS, NewMessage, chat_from_row, key_from_row,
    member_from_row, message_from_row, reaction_from_row, receipt_from_row, to_db_time,
};

impl Database {
    // -- Chats & membership --

    /// Create a chat and its initial membership (creator included) atomically.
    pub fn create_chat(
        &self,
        kind: ChatKind,
        name: Option<&str>,
        created_by: UserId,
        members: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Chat> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created_at = to_db_time(&now);
            tx.execute(
                "INSERT INTO chats (kind, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![kind.as_str(), name, created_by.to_string(), created_at],
            )?;
            let chat_id = tx.last_insert_rowid();

            for user_id in std::iter::once(&created_by).chain(members) {
                tx.execute(
                    "INSERT OR IGNORE INTO chat_members (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                    params![chat_id, user_id.to_string(), created_at],
                )?;
            }

            let chat = query_chat(&tx, chat_id)?
                .ok_or_else(|| anyhow!("Chat {} missing after insert", chat_id))?;
            tx.commit()?;
            Ok(chat)
        })
    }

    /// Existing one-to-one chat between two users, if any.
    pub fn find_personal_chat(&self, a: UserId, b: UserId) -> Result<Option<ChatId>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT c.id FROM chats c
                 JOIN chat_members m1 ON c.id = m1.chat_id
                 JOIN chat_members m2 ON c.id = m2.chat_id
                 WHERE c.kind = 'personal' AND m1.user_id = ?1 AND m2.user_id = ?2
                 ORDER BY c.id
                 LIMIT 1",
                params![a.to_string(), b.to_string()],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>> {
        self.with_conn(|conn| query_chat(conn, chat_id))
    }

    pub fn chats_for_user(&self, user_id: UserId) -> Result<Vec<Chat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.kind, c.name, c.created_by, c.created_at
                 FROM chats c
                 JOIN chat_members m ON c.id = m.chat_id
                 WHERE m.user_id = ?1
                 ORDER BY c.id",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                    params![chat_id, user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Returns true if the user was not already a member.
    pub fn add_member(&self, chat_id: ChatId, user_id: UserId, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![chat_id, user_id.to_string(), to_db_time(&now)],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Remove a member along with anything they still had scheduled there.
    pub fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_id.to_string()],
            )?;
            if removed > 0 {
                tx.execute(
                    "DELETE FROM scheduled_messages WHERE chat_id = ?1 AND sender_id = ?2 AND delivered = 0",
                    params![chat_id, user_id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    pub fn chat_members(&self, chat_id: ChatId) -> Result<Vec<ChatMember>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_members WHERE chat_id = ?1 ORDER BY joined_at, user_id",
                MEMBER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([chat_id], member_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when the user is not a member of the chat.
    pub fn touch_last_seen(&self, chat_id: ChatId, user_id: UserId, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE chat_members SET last_seen = ?3 WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_id.to_string(), to_db_time(&now)],
            )?;
            Ok(updated > 0)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, new: &NewMessage<'_>) -> Result<Message> {
        self.with_conn(|conn| insert_message_row(conn, new))
    }

    pub fn get_message(&self, message_id: MessageId) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, message_id))
    }

    /// A page of history, newest first. `before` is an exclusive cursor.
    pub fn get_messages(
        &self,
        chat_id: ChatId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE chat_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![chat_id, before.as_ref().map(to_db_time), limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn thread_replies(&self, parent_id: MessageId) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE parent_id = ?1 ORDER BY created_at ASC, id ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([parent_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Every message in the chat created strictly after `since`, oldest first.
    pub fn messages_since(&self, chat_id: ChatId, since: DateTime<Utc>) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE chat_id = ?1 AND created_at > ?2
                 ORDER BY created_at ASC, id ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![chat_id, to_db_time(&since)], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Move a message's status forward. Never regresses; returns whether it changed.
    pub fn advance_status(&self, message_id: MessageId, status: MessageStatus) -> Result<bool> {
        self.with_conn(|conn| advance_status_row(conn, message_id, status))
    }

    /// Replace the payload of a live (not deleted) message.
    pub fn edit_message(&self, message_id: MessageId, payload: &[u8], now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET payload = ?2, edited_at = ?3 WHERE id = ?1 AND deleted = 0",
                params![message_id, payload, to_db_time(&now)],
            )?;
            Ok(updated > 0)
        })
    }

    pub fn soft_delete_message(&self, message_id: MessageId) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET deleted = 1 WHERE id = ?1 AND deleted = 0",
                [message_id],
            )?;
            Ok(updated > 0)
        })
    }

    // -- Mentions --

    /// Remember who a message mentioned. Repeats are ignored.
    pub fn record_mentions(&self, message_id: MessageId, users: &[UserId]) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO message_mentions (message_id, user_id) VALUES (?1, ?2)",
            )?;
            for user_id in users {
                stmt.execute(params![message_id, user_id.to_string()])?;
            }
            Ok(())
        })
    }

    /// Live messages that mention the user, newest first. Chats the user has
    /// since left are skipped.
    pub fn mentions_for_user(&self, user_id: UserId, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE id IN (SELECT message_id FROM message_mentions WHERE user_id = ?1)
                   AND chat_id IN (SELECT chat_id FROM chat_members WHERE user_id = ?1)
                   AND deleted = 0
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_id.to_string(), limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reactions --

    /// Add a reaction. Re-adding the same (message, user, emoji) refreshes its timestamp.
    pub fn upsert_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
        now: DateTime<Utc>,
    ) -> Result<Reaction> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id, user_id, emoji) DO UPDATE SET created_at = excluded.created_at",
                params![message_id, user_id.to_string(), emoji, to_db_time(&now)],
            )?;
            conn.query_row(
                "SELECT message_id, user_id, emoji, created_at FROM reactions
                 WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                params![message_id, user_id.to_string(), emoji],
                reaction_from_row,
            )
            .map_err(Into::into)
        })
    }

    pub fn remove_reaction(&self, message_id: MessageId, user_id: UserId, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                params![message_id, user_id.to_string(), emoji],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn reactions_for_message(&self, message_id: MessageId) -> Result<Vec<Reaction>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, user_id, emoji, created_at FROM reactions
                 WHERE message_id = ?1 ORDER BY created_at, user_id, emoji",
            )?;
            let rows = stmt
                .query_map([message_id], reaction_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Read receipts --

    /// Idempotent upsert of the reader's receipt; also moves the message to `seen`.
    pub fn mark_read(&self, message_id: MessageId, user_id: UserId, now: DateTime<Utc>) -> Result<ReadReceipt> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO read_receipts (message_id, user_id, read_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(message_id, user_id) DO UPDATE SET read_at = excluded.read_at",
                params![message_id, user_id.to_string(), to_db_time(&now)],
            )?;
            advance_status_row(&tx, message_id, MessageStatus::Seen)?;
            let receipt = tx.query_row(
                "SELECT message_id, user_id, read_at FROM read_receipts WHERE message_id = ?1 AND user_id = ?2",
                params![message_id, user_id.to_string()],
                receipt_from_row,
            )?;
            tx.commit()?;
            Ok(receipt)
        })
    }

    pub fn read_receipts(&self, message_id: MessageId) -> Result<Vec<ReadReceipt>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, user_id, read_at FROM read_receipts
                 WHERE message_id = ?1 ORDER BY read_at, user_id",
            )?;
            let rows = stmt
                .query_map([message_id], receipt_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Key directory --

    /// Upsert: a new key silently replaces the previous one.
    pub fn set_public_key(&self, user_id: UserId, public_key: &str, now: DateTime<Utc>) -> Result<PublicKeyRecord> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO public_keys (user_id, public_key, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET public_key = excluded.public_key, updated_at = excluded.updated_at",
                params![user_id.to_string(), public_key, to_db_time(&now)],
            )?;
            conn.query_row(
                "SELECT user_id, public_key, updated_at FROM public_keys WHERE user_id = ?1",
                [user_id.to_string()],
                key_from_row,
            )
            .map_err(Into::into)
        })
    }

    pub fn get_public_key(&self, user_id: UserId) -> Result<Option<PublicKeyRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, public_key, updated_at FROM public_keys WHERE user_id = ?1",
                [user_id.to_string()],
                key_from_row,
            )
            .optional()
        })
    }
}

pub(crate) fn insert_message_row(conn: &Connection, new: &NewMessage<'_>) -> Result<Message> {
    conn.execute(
        "INSERT INTO messages (chat_id, sender_id, payload, kind, status, parent_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.chat_id,
            new.sender_id.to_string(),
            new.payload,
            new.kind.as_str(),
            MessageStatus::Sent.as_str(),
            new.parent_id,
            to_db_time(&new.created_at),
        ],
    )?;
    let id = conn.last_insert_rowid();
    query_message(conn, id)?.ok_or_else(|| anyhow!("Message {} missing after insert", id))
}

fn query_message(conn: &Connection, message_id: MessageId) -> Result<Option<Message>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    conn.query_row(&sql, [message_id], message_from_row).optional()
}

fn query_chat(conn: &Connection, chat_id: ChatId) -> Result<Option<Chat>> {
    let sql = format!("SELECT {} FROM chats WHERE id = ?1", CHAT_COLUMNS);
    conn.query_row(&sql, [chat_id], chat_from_row).optional()
}

fn advance_status_row(conn: &Connection, message_id: MessageId, status: MessageStatus) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE messages SET status = ?2
         WHERE id = ?1
           AND (CASE status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 ELSE 2 END) < ?3",
        params![message_id, status.as_str(), status.rank()],
    )?;
    Ok(updated > 0)
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
