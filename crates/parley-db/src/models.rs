//! Row mapping between SQLite rows and `parley-types` records.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (UTC, microseconds) so
//! that string comparison in SQL matches chronological order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use parley_types::models::{
    CallRecord, Chat, ChatId, ChatMember, Message, MessageId, MessageKind, PublicKeyRecord,
    Reaction, ReadReceipt, ScheduledMessage, UserId,
};

/// Input for a message insert.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub payload: &'a [u8],
    pub kind: MessageKind,
    pub parent_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

pub fn to_db_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => time_at(row, idx).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn parsed_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) const CHAT_COLUMNS: &str = "id, kind, name, created_by, created_at";

pub(crate) fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        kind: parsed_at(row, 1)?,
        name: row.get(2)?,
        created_by: uuid_at(row, 3)?,
        created_at: time_at(row, 4)?,
    })
}

pub(crate) const MEMBER_COLUMNS: &str = "chat_id, user_id, joined_at, last_seen";

pub(crate) fn member_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMember> {
    Ok(ChatMember {
        chat_id: row.get(0)?,
        user_id: uuid_at(row, 1)?,
        joined_at: time_at(row, 2)?,
        last_seen: opt_time_at(row, 3)?,
    })
}

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, payload, kind, status, parent_id, created_at, edited_at, deleted";

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: uuid_at(row, 2)?,
        payload: row.get(3)?,
        kind: parsed_at(row, 4)?,
        status: parsed_at(row, 5)?,
        parent_id: row.get(6)?,
        created_at: time_at(row, 7)?,
        edited_at: opt_time_at(row, 8)?,
        deleted: row.get(9)?,
    })
}

pub(crate) const SCHEDULED_COLUMNS: &str =
    "id, chat_id, sender_id, payload, kind, scheduled_for, delivered, message_id, created_at";

pub(crate) fn scheduled_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledMessage> {
    Ok(ScheduledMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: uuid_at(row, 2)?,
        payload: row.get(3)?,
        kind: parsed_at(row, 4)?,
        scheduled_for: time_at(row, 5)?,
        delivered: row.get(6)?,
        message_id: row.get(7)?,
        created_at: time_at(row, 8)?,
    })
}

pub(crate) fn reaction_from_row(row: &Row<'_>) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        message_id: row.get(0)?,
        user_id: uuid_at(row, 1)?,
        emoji: row.get(2)?,
        created_at: time_at(row, 3)?,
    })
}

pub(crate) fn receipt_from_row(row: &Row<'_>) -> rusqlite::Result<ReadReceipt> {
    Ok(ReadReceipt {
        message_id: row.get(0)?,
        user_id: uuid_at(row, 1)?,
        read_at: time_at(row, 2)?,
    })
}

pub(crate) const CALL_COLUMNS: &str = "id, chat_id, started_by, kind, started_at, ended_at";

/// Participants live in their own table; the caller fills them in.
pub(crate) fn call_from_row(row: &Row<'_>) -> rusqlite::Result<CallRecord> {
    Ok(CallRecord {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        started_by: uuid_at(row, 2)?,
        kind: parsed_at(row, 3)?,
        participants: Vec::new(),
        started_at: time_at(row, 4)?,
        ended_at: opt_time_at(row, 5)?,
    })
}

pub(crate) fn key_from_row(row: &Row<'_>) -> rusqlite::Result<PublicKeyRecord> {
    Ok(PublicKeyRecord {
        user_id: uuid_at(row, 0)?,
        public_key: row.get(1)?,
        updated_at: time_at(row, 2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn db_time_sorts_chronologically() {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 59, 59).unwrap();
        let later = base + Duration::microseconds(1);
        let much_later = base + Duration::days(400);

        let mut encoded = vec![to_db_time(&much_later), to_db_time(&base), to_db_time(&later)];
        encoded.sort();
        assert_eq!(encoded, vec![to_db_time(&base), to_db_time(&later), to_db_time(&much_later)]);
        assert_eq!(to_db_time(&base), "2024-05-01T09:59:59.000000Z");
    }
}
