//! Vote storage operations

use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{format_datetime, parse_competence, parse_datetime, parse_uuid};
use crate::error::Result;
use crate::models::{RevealedVote, SimilarEstimate, Vote, VotingState};
use crate::similarity::SimilarityQuery;

pub struct VoteStore<'a> {
    conn: &'a Connection,
}

impl<'a> VoteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a vote or replace the participant's earlier one in a single statement
    #[instrument(skip(self, vote), fields(story_id = %vote.story_id, participant_id = %vote.participant_id))]
    pub fn upsert(&self, vote: &Vote) -> Result<()> {
        self.conn.execute(
            "INSERT INTO votes (id, story_id, participant_id, points, competence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(story_id, participant_id) DO UPDATE SET
                 points = excluded.points,
                 competence = excluded.competence,
                 created_at = excluded.created_at",
            params![
                vote.id.to_string(),
                vote.story_id.to_string(),
                vote.participant_id.to_string(),
                vote.points,
                vote.competence.as_str(),
                format_datetime(&vote.created_at),
            ],
        )?;
        Ok(())
    }

    /// Votes of a story with voter names
    #[instrument(skip(self))]
    pub fn list_revealed(&self, story_id: Uuid) -> Result<Vec<RevealedVote>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.participant_id, p.name, v.competence, v.points
             FROM votes v
             INNER JOIN participants p ON p.id = v.participant_id
             WHERE v.story_id = ?1
             ORDER BY v.created_at, v.rowid",
        )?;

        let votes = stmt
            .query_map(params![story_id.to_string()], |row| {
                Ok(RevealedVote {
                    participant_id: parse_uuid(&row.get::<_, String>(0)?)?,
                    participant_name: row.get(1)?,
                    competence: parse_competence(&row.get::<_, String>(2)?)?,
                    points: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(votes)
    }

    pub fn count_for_story(&self, story_id: Uuid) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM votes WHERE story_id = ?1",
            params![story_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Past votes of the same competence on finalized stories of the room,
    /// within the query bounds, most recent first
    #[instrument(skip(self, query), fields(room_id = %query.room_id, competence = %query.competence))]
    pub fn find_similar(&self, query: &SimilarityQuery) -> Result<Vec<SimilarEstimate>> {
        let (low, high) = query.bounds();
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.title, v.points, v.competence, s.final_estimate, v.created_at
             FROM votes v
             INNER JOIN stories s ON s.id = v.story_id
             WHERE s.room_id = ?1
               AND s.voting_state = ?2
               AND v.competence = ?3
               AND v.points BETWEEN ?4 AND ?5
             ORDER BY v.created_at DESC, v.rowid DESC
             LIMIT ?6",
        )?;

        let estimates = stmt
            .query_map(
                params![
                    query.room_id.to_string(),
                    VotingState::Finalized.as_str(),
                    query.competence.as_str(),
                    low,
                    high,
                    query.limit,
                ],
                |row| {
                    Ok(SimilarEstimate {
                        story_id: parse_uuid(&row.get::<_, String>(0)?)?,
                        title: row.get(1)?,
                        points: row.get(2)?,
                        competence: parse_competence(&row.get::<_, String>(3)?)?,
                        final_estimate: row.get(4)?,
                        created_at: parse_datetime(&row.get::<_, String>(5)?)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(estimates)
    }
}
