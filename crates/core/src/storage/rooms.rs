//! Room storage operations

use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{
    format_datetime, parse_datetime, parse_estimation_type, parse_uuid, parse_uuid_opt,
    OptionalExt,
};
use crate::error::Result;
use crate::models::Room;

pub struct RoomStore<'a> {
    conn: &'a Connection,
}

impl<'a> RoomStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a new room
    #[instrument(skip(self, room), fields(room_id = %room.id, room_name = %room.name))]
    pub fn create(&self, room: &Room) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rooms (id, name, estimation_type, created_at, current_story_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                room.id.to_string(),
                room.name,
                room.estimation_type.as_str(),
                format_datetime(&room.created_at),
                room.current_story_id.map(|s| s.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Find room by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Room>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, estimation_type, created_at, current_story_id
             FROM rooms WHERE id = ?1",
        )?;

        let room = stmt
            .query_row(params![id.to_string()], |row| {
                Ok(Room {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    name: row.get(1)?,
                    estimation_type: parse_estimation_type(&row.get::<_, String>(2)?)?,
                    created_at: parse_datetime(&row.get::<_, String>(3)?)?,
                    current_story_id: parse_uuid_opt(row.get::<_, Option<String>>(4)?)?,
                })
            })
            .optional()?;

        Ok(room)
    }

    /// Set or clear the current story pointer
    #[instrument(skip(self))]
    pub fn set_current_story(&self, room_id: Uuid, story_id: Option<Uuid>) -> Result<()> {
        self.conn.execute(
            "UPDATE rooms SET current_story_id = ?1 WHERE id = ?2",
            params![story_id.map(|s| s.to_string()), room_id.to_string()],
        )?;
        Ok(())
    }

    /// Delete a room; participants, stories and votes cascade
    #[instrument(skip(self))]
    pub fn delete(&self, room_id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM rooms WHERE id = ?1",
            params![room_id.to_string()],
        )?;
        Ok(())
    }
}
