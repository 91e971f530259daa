use rusqlite::params;

use quintet_shared::protocol::Quote;
use quintet_shared::types::{ContentKind, RoomId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;

const SELECT_COLUMNS: &str =
    "SELECT id, room_id, sender, content, kind, reply_to, timestamp, pending FROM messages";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.write_message("INSERT", message)?;
        Ok(())
    }

    /// Insert unless a message with the same id exists. Returns whether a
    /// row was written.
    pub fn insert_message_if_absent(&self, message: &Message) -> Result<bool> {
        Ok(self.write_message("INSERT OR IGNORE", message)? > 0)
    }

    fn write_message(&self, verb: &str, message: &Message) -> Result<usize> {
        let reply_to = message
            .reply_to
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let affected = self.conn().execute(
            &format!(
                "{verb} INTO messages (id, room_id, sender, content, kind, reply_to, timestamp, pending)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                message.id,
                message.room_id.as_str(),
                message.sender,
                message.content,
                message.kind.as_str(),
                reply_to,
                message.timestamp,
                message.pending,
            ],
        )?;
        Ok(affected)
    }

    /// All messages of a room, oldest first.
    pub fn get_messages_for_room(&self, room_id: &RoomId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS} WHERE room_id = ?1 ORDER BY timestamp ASC"
        ))?;

        let rows = stmt.query_map(params![room_id.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Messages of a room still waiting for their first delivery, oldest first.
    pub fn get_pending_messages(&self, room_id: &RoomId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS} WHERE room_id = ?1 AND pending = 1 ORDER BY timestamp ASC"
        ))?;

        let rows = stmt.query_map(params![room_id.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: &str) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Clear the pending flag. Returns `true` only for the call that actually
    /// flipped it; the flag never goes back to pending.
    pub fn mark_delivered(&self, id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET pending = 0 WHERE id = ?1 AND pending = 1",
            params![id],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind_str: String = row.get(4)?;
    let reply_json: Option<String> = row.get(5)?;

    let kind = ContentKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown content kind '{kind_str}'").into(),
        )
    })?;

    let reply_to = reply_json
        .map(|json| serde_json::from_str::<Quote>(&json))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: row.get(0)?,
        room_id: RoomId(row.get(1)?),
        sender: row.get(2)?,
        content: row.get(3)?,
        kind,
        reply_to,
        timestamp: row.get(6)?,
        pending: row.get(7)?,
    })
}
