//! v001 -- Initial schema creation.
//!
//! A single `messages` table, indexed by room (for history) and by
//! room + pending flag (for the offline delivery queue).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id        TEXT PRIMARY KEY NOT NULL,   -- sender timestamp + random suffix
    room_id   TEXT NOT NULL,
    sender    TEXT NOT NULL,               -- display name
    content   TEXT NOT NULL,               -- text or data: URL
    kind      TEXT NOT NULL,               -- 'text' | 'image'
    reply_to  TEXT,                        -- JSON-encoded quote, nullable
    timestamp INTEGER NOT NULL,            -- unix epoch millis
    pending   INTEGER NOT NULL DEFAULT 0   -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_messages_room_ts
    ON messages(room_id, timestamp);

CREATE INDEX IF NOT EXISTS idx_messages_room_pending
    ON messages(room_id, pending);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
