use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE chats (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                kind        TEXT NOT NULL,
                name        TEXT,
                created_by  TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE chat_members (
                chat_id     INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL,
                joined_at   TEXT NOT NULL,
                last_seen   TEXT,
                PRIMARY KEY (chat_id, user_id)
            );

            CREATE INDEX idx_chat_members_user ON chat_members(user_id);

            CREATE TABLE messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     INTEGER NOT NULL REFERENCES chats(id),
                sender_id   TEXT NOT NULL,
                payload     BLOB NOT NULL,
                kind        TEXT NOT NULL DEFAULT 'text',
                status      TEXT NOT NULL DEFAULT 'sent',
                parent_id   INTEGER REFERENCES messages(id),
                created_at  TEXT NOT NULL,
                edited_at   TEXT,
                deleted     INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, created_at);
            CREATE INDEX idx_messages_parent ON messages(parent_id);

            CREATE TABLE reactions (
                message_id  INTEGER NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                emoji       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id, emoji)
            );

            CREATE TABLE read_receipts (
                message_id  INTEGER NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                read_at     TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            CREATE TABLE scheduled_messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id         INTEGER NOT NULL REFERENCES chats(id),
                sender_id       TEXT NOT NULL,
                payload         BLOB NOT NULL,
                kind            TEXT NOT NULL DEFAULT 'text',
                scheduled_for   TEXT NOT NULL,
                delivered       INTEGER NOT NULL DEFAULT 0,
                message_id      INTEGER REFERENCES messages(id),
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_scheduled_due ON scheduled_messages(delivered, scheduled_for);

            CREATE TABLE public_keys (
                user_id     TEXT PRIMARY KEY,
                public_key  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (mentions and call history)");
        conn.execute_batch(
            "
            CREATE TABLE message_mentions (
                message_id  INTEGER NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            CREATE INDEX idx_mentions_user ON message_mentions(user_id);

            CREATE TABLE call_history (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     INTEGER NOT NULL REFERENCES chats(id),
                started_by  TEXT NOT NULL,
                kind        TEXT NOT NULL,
                started_at  TEXT NOT NULL,
                ended_at    TEXT
            );

            CREATE INDEX idx_calls_chat ON call_history(chat_id, started_at);

            CREATE TABLE call_participants (
                call_id     INTEGER NOT NULL REFERENCES call_history(id),
                user_id     TEXT NOT NULL,
                PRIMARY KEY (call_id, user_id)
            );

            CREATE INDEX idx_call_participants_user ON call_participants(user_id);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
