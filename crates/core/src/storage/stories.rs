//! Story storage operations

use rusqlite::{params, Connection, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::parse::{
    format_datetime, parse_datetime, parse_uuid, parse_uuid_opt, parse_voting_state, OptionalExt,
};
use crate::error::Result;
use crate::models::{NewStory, Story, VotingState};

const STORY_COLUMNS: &str = "id, room_id, title, description, voting_state, final_estimate, \
                             created_by, order_position, created_at";

pub struct StoryStore<'a> {
    conn: &'a Connection,
}

impl<'a> StoryStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn map_story(row: &Row<'_>) -> rusqlite::Result<Story> {
        let voting_state = parse_voting_state(&row.get::<_, String>(4)?)?;
        Ok(Story {
            id: parse_uuid(&row.get::<_, String>(0)?)?,
            room_id: parse_uuid(&row.get::<_, String>(1)?)?,
            title: row.get(2)?,
            description: row.get(3)?,
            voting_state,
            status: voting_state.status(),
            final_estimate: row.get(5)?,
            created_by: parse_uuid_opt(row.get::<_, Option<String>>(6)?)?,
            order_position: row.get(7)?,
            created_at: parse_datetime(&row.get::<_, String>(8)?)?,
        })
    }

    /// Append stories to the end of a room's backlog and trim it to `max_per_room`
    #[instrument(skip(self, stories), fields(count = stories.len()))]
    pub fn create_many(
        &self,
        room_id: Uuid,
        created_by: Uuid,
        stories: &[NewStory],
        max_per_room: u32,
    ) -> Result<(Vec<Story>, Vec<Uuid>)> {
        let tx = self.conn.unchecked_transaction()?;

        let mut next_position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(order_position), 0) + 1 FROM stories WHERE room_id = ?1",
            params![room_id.to_string()],
            |row| row.get(0),
        )?;

        let mut created = Vec::with_capacity(stories.len());
        for new_story in stories {
            let mut story = Story::new(
                room_id,
                new_story.title.clone(),
                new_story.description.clone(),
                created_by,
            );
            story.order_position = next_position;
            next_position += 1;

            tx.execute(
                "INSERT INTO stories (id, room_id, title, description, voting_state, final_estimate,
                                      created_by, order_position, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    story.id.to_string(),
                    story.room_id.to_string(),
                    story.title,
                    story.description,
                    story.voting_state.as_str(),
                    story.final_estimate,
                    story.created_by.map(|id| id.to_string()),
                    story.order_position,
                    format_datetime(&story.created_at),
                ],
            )?;
            created.push(story);
        }

        // Lowest positions go first; among equal positions the oldest row goes first
        let trimmed = {
            let mut stmt = tx.prepare(
                "SELECT id FROM stories WHERE room_id = ?1
                 ORDER BY order_position DESC, rowid DESC
                 LIMIT -1 OFFSET ?2",
            )?;
            let ids = stmt
                .query_map(params![room_id.to_string(), max_per_room], |row| {
                    parse_uuid(&row.get::<_, String>(0)?)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        for id in &trimmed {
            Self::delete_in(&tx, *id)?;
        }
        tx.commit()?;

        if !trimmed.is_empty() {
            debug!(room_id = %room_id, trimmed = trimmed.len(), "Trimmed story backlog");
        }

        created.retain(|s| !trimmed.contains(&s.id));
        Ok((created, trimmed))
    }

    /// Find story by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Story>> {
        let story = self
            .conn
            .query_row(
                &format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = ?1"),
                params![id.to_string()],
                Self::map_story,
            )
            .optional()?;

        Ok(story)
    }

    /// List stories of a room by position
    #[instrument(skip(self))]
    pub fn list_for_room(&self, room_id: Uuid) -> Result<Vec<Story>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {STORY_COLUMNS} FROM stories
             WHERE room_id = ?1
             ORDER BY order_position, rowid"
        ))?;

        let stories = stmt
            .query_map(params![room_id.to_string()], Self::map_story)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(stories)
    }

    /// Update title and description
    #[instrument(skip(self, description))]
    pub fn update_details(&self, story_id: Uuid, title: &str, description: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE stories SET title = ?1, description = ?2 WHERE id = ?3",
            params![title, description, story_id.to_string()],
        )?;
        Ok(())
    }

    fn delete_in(conn: &Connection, story_id: Uuid) -> Result<()> {
        conn.execute(
            "UPDATE rooms SET current_story_id = NULL WHERE current_story_id = ?1",
            params![story_id.to_string()],
        )?;
        conn.execute(
            "DELETE FROM stories WHERE id = ?1",
            params![story_id.to_string()],
        )?;
        Ok(())
    }

    /// Delete a story and its votes, clearing any room pointer to it
    #[instrument(skip(self))]
    pub fn delete(&self, story_id: Uuid) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        Self::delete_in(&tx, story_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Assign positions 1..n in the given order
    #[instrument(skip(self, story_ids), fields(count = story_ids.len()))]
    pub fn reorder(&self, room_id: Uuid, story_ids: &[Uuid]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for (index, story_id) in story_ids.iter().enumerate() {
            tx.execute(
                "UPDATE stories SET order_position = ?1 WHERE id = ?2 AND room_id = ?3",
                params![index as i64 + 1, story_id.to_string(), room_id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Purge votes and final estimate, then set the state
    #[instrument(skip(self))]
    pub fn reset_voting(&self, story_id: Uuid, state: VotingState) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let purged = tx.execute(
            "DELETE FROM votes WHERE story_id = ?1",
            params![story_id.to_string()],
        )?;
        tx.execute(
            "UPDATE stories SET voting_state = ?1, final_estimate = NULL WHERE id = ?2",
            params![state.as_str(), story_id.to_string()],
        )?;
        tx.commit()?;

        debug!(purged, "Reset voting");
        Ok(())
    }

    /// Persist voting state and final estimate
    #[instrument(skip(self))]
    pub fn save_voting_state(
        &self,
        story_id: Uuid,
        state: VotingState,
        final_estimate: Option<f64>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE stories SET voting_state = ?1, final_estimate = ?2 WHERE id = ?3",
            params![state.as_str(), final_estimate, story_id.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Competence, EstimationType, Room, Vote};
    use crate::storage::{Database, ParticipantRepository, RoomRepository, VoteRepository};

    fn setup() -> (Database, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let room = Room::new("Sprint 1".into(), EstimationType::StoryPoints);
        db.create_room(&room).unwrap();
        let alice = db
            .join_participant(room.id, "Alice", Competence::Backend, "a")
            .unwrap()
            .participant;
        (db, room.id, alice.id)
    }

    fn titles(titles: &[&str]) -> Vec<NewStory> {
        titles
            .iter()
            .map(|t| NewStory {
                title: t.to_string(),
                description: None,
            })
            .collect()
    }

    #[test]
    fn test_stories_append_in_order() {
        let (db, room_id, alice) = setup();
        let store = StoryStore::new(&db.conn);

        store.create_many(room_id, alice, &titles(&["A", "B"]), 100).unwrap();
        store.create_many(room_id, alice, &titles(&["C"]), 100).unwrap();

        let stories = store.list_for_room(room_id).unwrap();
        let names: Vec<_> = stories.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(stories[2].order_position, 3);
        assert_eq!(stories[0].voting_state, VotingState::NotStarted);
    }

    #[test]
    fn test_backlog_trimmed_to_limit() {
        let (db, room_id, alice) = setup();
        let store = StoryStore::new(&db.conn);

        let (first, _) = store.create_many(room_id, alice, &titles(&["A", "B"]), 2).unwrap();
        db.set_current_story(room_id, Some(first[0].id)).unwrap();

        let (created, trimmed) = store.create_many(room_id, alice, &titles(&["C"]), 2).unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(trimmed, vec![first[0].id]);
        assert_eq!(store.list_for_room(room_id).unwrap().len(), 2);
        let room = db.find_room_by_id(room_id).unwrap().unwrap();
        assert_eq!(room.current_story_id, None);
    }

    #[test]
    fn test_trim_breaks_position_ties_by_age() {
        let (db, room_id, alice) = setup();
        let store = StoryStore::new(&db.conn);

        let (first, _) = store.create_many(room_id, alice, &titles(&["A", "B"]), 100).unwrap();
        db.conn
            .execute(
                "UPDATE stories SET order_position = 1 WHERE room_id = ?1",
                params![room_id.to_string()],
            )
            .unwrap();

        let (_, trimmed) = store.create_many(room_id, alice, &titles(&["C"]), 2).unwrap();

        assert_eq!(trimmed, vec![first[0].id]);
        let names: Vec<_> = store
            .list_for_room(room_id)
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn test_reorder() {
        let (db, room_id, alice) = setup();
        let store = StoryStore::new(&db.conn);

        let (created, _) = store.create_many(room_id, alice, &titles(&["A", "B", "C"]), 100).unwrap();
        let order = vec![created[2].id, created[0].id, created[1].id];
        store.reorder(room_id, &order).unwrap();

        let ids: Vec<_> = store.list_for_room(room_id).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, order);
    }

    #[test]
    fn test_reset_voting_purges_votes() {
        let (db, room_id, alice) = setup();
        let store = StoryStore::new(&db.conn);

        let (created, _) = store.create_many(room_id, alice, &titles(&["A"]), 100).unwrap();
        let story_id = created[0].id;
        store.save_voting_state(story_id, VotingState::Finalized, Some(8.0)).unwrap();
        db.upsert_vote(&Vote::new(story_id, alice, 8.0, Competence::Backend)).unwrap();

        store.reset_voting(story_id, VotingState::Accepting).unwrap();

        let story = store.find_by_id(story_id).unwrap().unwrap();
        assert_eq!(story.voting_state, VotingState::Accepting);
        assert_eq!(story.final_estimate, None);
        assert_eq!(db.count_votes(story_id).unwrap(), 0);
    }

    #[test]
    fn test_delete_clears_current_pointer() {
        let (db, room_id, alice) = setup();
        let store = StoryStore::new(&db.conn);

        let (created, _) = store.create_many(room_id, alice, &titles(&["A"]), 100).unwrap();
        db.set_current_story(room_id, Some(created[0].id)).unwrap();
        store.delete(created[0].id).unwrap();

        assert!(store.find_by_id(created[0].id).unwrap().is_none());
        assert_eq!(db.find_room_by_id(room_id).unwrap().unwrap().current_story_id, None);
    }
}
