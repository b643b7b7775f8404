use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use parley_types::models::{CallId, CallRecord, CallType, ChatId, UserId};

use crate::Database;
use crate::models::{CALL_COLUMNS, call_from_row, to_db_time, uuid_at};
use crate::queries::OptionalExt;

impl Database {
    /// Record a new call. The starter is always listed first; invitees who
    /// are not members of the chat are skipped.
    pub fn start_call(
        &self,
        chat_id: ChatId,
        started_by: UserId,
        kind: CallType,
        participants: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<CallRecord> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO call_history (chat_id, started_by, kind, started_at) VALUES (?1, ?2, ?3, ?4)",
                params![chat_id, started_by.to_string(), kind.as_str(), to_db_time(&now)],
            )?;
            let call_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO call_participants (call_id, user_id) VALUES (?1, ?2)",
                params![call_id, started_by.to_string()],
            )?;
            for user_id in participants {
                tx.execute(
                    "INSERT OR IGNORE INTO call_participants (call_id, user_id)
                     SELECT ?1, ?2
                     WHERE EXISTS(SELECT 1 FROM chat_members WHERE chat_id = ?3 AND user_id = ?2)",
                    params![call_id, user_id.to_string(), chat_id],
                )?;
            }

            let call = query_call(&tx, call_id)?
                .ok_or_else(|| anyhow!("Call {} missing after insert", call_id))?;
            tx.commit()?;
            Ok(call)
        })
    }

    pub fn get_call(&self, call_id: CallId) -> Result<Option<CallRecord>> {
        self.with_conn(|conn| query_call(conn, call_id))
    }

    /// Stamp the end time once. Returns false if the call is unknown or
    /// already ended.
    pub fn end_call(&self, call_id: CallId, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE call_history SET ended_at = ?2 WHERE id = ?1 AND ended_at IS NULL",
                params![call_id, to_db_time(&now)],
            )?;
            Ok(updated > 0)
        })
    }

    /// Calls started in a chat, newest first.
    pub fn calls_for_chat(&self, chat_id: ChatId) -> Result<Vec<CallRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM call_history WHERE chat_id = ?1 ORDER BY started_at DESC, id DESC",
                CALL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let calls = stmt
                .query_map([chat_id], call_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            with_participants(conn, calls)
        })
    }

    /// Calls the user took part in, across all chats, newest first.
    pub fn calls_for_user(&self, user_id: UserId) -> Result<Vec<CallRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM call_history
                 WHERE id IN (SELECT call_id FROM call_participants WHERE user_id = ?1)
                 ORDER BY started_at DESC, id DESC",
                CALL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let calls = stmt
                .query_map([user_id.to_string()], call_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            with_participants(conn, calls)
        })
    }
}

fn query_call(conn: &Connection, call_id: CallId) -> Result<Option<CallRecord>> {
    let sql = format!("SELECT {} FROM call_history WHERE id = ?1", CALL_COLUMNS);
    match conn.query_row(&sql, [call_id], call_from_row).optional()? {
        Some(call) => Ok(with_participants(conn, vec![call])?.pop()),
        None => Ok(None),
    }
}

fn with_participants(conn: &Connection, mut calls: Vec<CallRecord>) -> Result<Vec<CallRecord>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM call_participants WHERE call_id = ?1 ORDER BY rowid")?;
    for call in &mut calls {
        call.participants = stmt
            .query_map([call.id], |row| uuid_at(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
    }
    Ok(calls)
}
