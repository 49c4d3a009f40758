//! Participant storage operations

use rusqlite::{params, Connection, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::parse::{format_datetime, parse_competence, parse_datetime, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{Competence, JoinOutcome, Participant, ParticipantInfo};

const PARTICIPANT_COLUMNS: &str =
    "id, room_id, name, competence, is_admin, session_token, joined_at";

pub struct ParticipantStore<'a> {
    conn: &'a Connection,
}

impl<'a> ParticipantStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn map_participant(row: &Row<'_>) -> rusqlite::Result<Participant> {
        Ok(Participant {
            id: parse_uuid(&row.get::<_, String>(0)?)?,
            room_id: parse_uuid(&row.get::<_, String>(1)?)?,
            name: row.get(2)?,
            competence: parse_competence(&row.get::<_, String>(3)?)?,
            is_admin: row.get::<_, i32>(4)? != 0,
            session_token: row.get(5)?,
            joined_at: parse_datetime(&row.get::<_, String>(6)?)?,
        })
    }

    /// Join a room, or reconnect as the existing (name, competence) participant
    #[instrument(skip(self, session_token))]
    pub fn join(
        &self,
        room_id: Uuid,
        name: &str,
        competence: Competence,
        session_token: &str,
    ) -> Result<JoinOutcome> {
        let tx = self.conn.unchecked_transaction()?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM participants
                     WHERE room_id = ?1 AND name = ?2 AND competence = ?3"
                ),
                params![room_id.to_string(), name, competence.as_str()],
                Self::map_participant,
            )
            .optional()?;

        if let Some(mut participant) = existing {
            tx.execute(
                "UPDATE participants SET session_token = ?1 WHERE id = ?2",
                params![session_token, participant.id.to_string()],
            )?;
            tx.commit()?;

            debug!(participant_id = %participant.id, "Refreshed session token");
            participant.session_token = session_token.to_string();
            return Ok(JoinOutcome {
                participant,
                created: false,
            });
        }

        let room_is_empty: bool = tx.query_row(
            "SELECT NOT EXISTS(SELECT 1 FROM participants WHERE room_id = ?1)",
            params![room_id.to_string()],
            |row| row.get(0),
        )?;

        let mut participant =
            Participant::new(room_id, name.to_string(), competence, session_token.to_string());
        participant.is_admin = room_is_empty;

        tx.execute(
            "INSERT INTO participants (id, room_id, name, competence, is_admin, session_token, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                participant.id.to_string(),
                participant.room_id.to_string(),
                participant.name,
                participant.competence.as_str(),
                participant.is_admin as i32,
                participant.session_token,
                format_datetime(&participant.joined_at),
            ],
        )?;
        tx.commit()?;

        debug!(participant_id = %participant.id, is_admin = participant.is_admin, "Created participant");
        Ok(JoinOutcome {
            participant,
            created: true,
        })
    }

    /// Find participant by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Participant>> {
        let participant = self
            .conn
            .query_row(
                &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ?1"),
                params![id.to_string()],
                Self::map_participant,
            )
            .optional()?;

        Ok(participant)
    }

    /// List participants of a room in join order
    #[instrument(skip(self))]
    pub fn list_for_room(&self, room_id: Uuid) -> Result<Vec<ParticipantInfo>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants
             WHERE room_id = ?1
             ORDER BY joined_at, rowid"
        ))?;

        let participants = stmt
            .query_map(params![room_id.to_string()], |row| {
                Self::map_participant(row).map(|p| p.info())
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(participants)
    }

    /// Count participants of a room
    pub fn count_for_room(&self, room_id: Uuid) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM participants WHERE room_id = ?1",
            params![room_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Update admin flag
    #[instrument(skip(self))]
    pub fn set_admin(&self, participant_id: Uuid, is_admin: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE participants SET is_admin = ?1 WHERE id = ?2",
            params![is_admin as i32, participant_id.to_string()],
        )?;
        Ok(())
    }
}
