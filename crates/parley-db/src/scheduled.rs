use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{TransactionBehavior, params};
use tracing::{debug, info};

use parley_types::models::{
    ChatId, Message, MessageKind, ScheduledId, ScheduledMessage, UserId,
};

use crate::Database;
use crate::models::{NewMessage, SCHEDULED_COLUMNS, scheduled_from_row, to_db_time};
use crate::queries::{OptionalExt, insert_message_row};

impl Database {
    pub fn schedule_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        payload: &[u8],
        kind: MessageKind,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ScheduledMessage> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scheduled_messages (chat_id, sender_id, payload, kind, scheduled_for, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    chat_id,
                    sender_id.to_string(),
                    payload,
                    kind.as_str(),
                    to_db_time(&scheduled_for),
                    to_db_time(&now),
                ],
            )?;
            let id = conn.last_insert_rowid();
            let sql = format!("SELECT {} FROM scheduled_messages WHERE id = ?1", SCHEDULED_COLUMNS);
            conn.query_row(&sql, [id], scheduled_from_row).map_err(Into::into)
        })
    }

    pub fn get_scheduled(&self, id: ScheduledId) -> Result<Option<ScheduledMessage>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM scheduled_messages WHERE id = ?1", SCHEDULED_COLUMNS);
            conn.query_row(&sql, [id], scheduled_from_row).optional()
        })
    }

    /// The sender's undelivered scheduled messages, soonest first.
    pub fn pending_scheduled_for_sender(&self, sender_id: UserId) -> Result<Vec<ScheduledMessage>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM scheduled_messages
                 WHERE sender_id = ?1 AND delivered = 0
                 ORDER BY scheduled_for ASC, id ASC",
                SCHEDULED_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([sender_id.to_string()], scheduled_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Cancel a pending scheduled message. Delivered ones and other senders'
    /// rows are left alone; returns whether a row was removed.
    pub fn cancel_scheduled(&self, id: ScheduledId, sender_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM scheduled_messages WHERE id = ?1 AND sender_id = ?2 AND delivered = 0",
                params![id, sender_id.to_string()],
            )?;
            Ok(removed > 0)
        })
    }

    /// Undelivered scheduled messages whose time has come.
    pub fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM scheduled_messages
                 WHERE delivered = 0 AND scheduled_for <= ?1
                 ORDER BY scheduled_for ASC, id ASC",
                SCHEDULED_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([to_db_time(&now)], scheduled_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Claim a scheduled message and promote it to a live message.
    ///
    /// The claim is a conditional update inside an immediate transaction, so
    /// exactly one caller can win it, across threads and across processes
    /// sharing the database file. The message insert happens in the same
    /// transaction: if it fails, the claim rolls back and the row stays
    /// undelivered. A sender who is no longer a member of the chat gets
    /// nothing posted; the row is dropped instead.
    pub fn promote_scheduled(&self, id: ScheduledId, now: DateTime<Utc>) -> Result<Promotion> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let claimed = tx.execute(
                "UPDATE scheduled_messages SET delivered = 1 WHERE id = ?1 AND delivered = 0",
                [id],
            )?;
            if claimed == 0 {
                debug!("Scheduled message {} already claimed", id);
                return Ok(Promotion::AlreadyClaimed);
            }

            let sql = format!("SELECT {} FROM scheduled_messages WHERE id = ?1", SCHEDULED_COLUMNS);
            let scheduled = tx.query_row(&sql, [id], scheduled_from_row)?;

            let still_member: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2)",
                params![scheduled.chat_id, scheduled.sender_id.to_string()],
                |row| row.get(0),
            )?;
            if !still_member {
                tx.execute("DELETE FROM scheduled_messages WHERE id = ?1", [id])?;
                tx.commit()?;
                info!(
                    "Dropped scheduled message {}: {} is no longer in chat {}",
                    id, scheduled.sender_id, scheduled.chat_id
                );
                return Ok(Promotion::SenderGone);
            }

            let message = insert_message_row(
                &tx,
                &NewMessage {
                    chat_id: scheduled.chat_id,
                    sender_id: scheduled.sender_id,
                    payload: &scheduled.payload,
                    kind: scheduled.kind,
                    parent_id: None,
                    created_at: now,
                },
            )?;

            tx.execute(
                "UPDATE scheduled_messages SET message_id = ?2 WHERE id = ?1",
                params![id, message.id],
            )?;

            tx.commit()?;
            Ok(Promotion::Delivered(message))
        })
    }
}

/// Outcome of one `promote_scheduled` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Promotion {
    Delivered(Message),
    /// Another sweep won the claim, or the row is gone
    AlreadyClaimed,
    /// The sender left the chat before delivery
    SenderGone,
}

impl Promotion {
    pub fn delivered(self) -> Option<Message> {
        match self {
            Promotion::Delivered(message) => Some(message),
            _ => None,
        }
    }
}
