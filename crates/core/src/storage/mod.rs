//! SQLite storage layer for Estimo

mod migrations;
mod parse;
mod participants;
mod rooms;
mod stories;
mod traits;
mod votes;

use rusqlite::Connection;
use std::path::Path;
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Competence, JoinOutcome, NewStory, Participant, ParticipantInfo, RevealedVote, Room,
    SimilarEstimate, Story, Vote, VotingState,
};
use crate::similarity::SimilarityQuery;

pub use participants::ParticipantStore;
pub use rooms::RoomStore;
pub use stories::StoryStore;
pub use traits::{
    ParticipantRepository, RoomRepository, Storage, StoryRepository, VoteRepository,
};
pub use votes::VoteStore;

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        migrations::get_current_version(&self.conn).unwrap_or(0)
    }

    pub fn rooms(&self) -> RoomStore<'_> {
        RoomStore::new(&self.conn)
    }

    pub fn participants(&self) -> ParticipantStore<'_> {
        ParticipantStore::new(&self.conn)
    }

    pub fn stories(&self) -> StoryStore<'_> {
        StoryStore::new(&self.conn)
    }

    pub fn votes(&self) -> VoteStore<'_> {
        VoteStore::new(&self.conn)
    }
}

// Repository traits delegate to the per-table stores

impl RoomRepository for Database {
    fn create_room(&self, room: &Room) -> Result<()> {
        self.rooms().create(room)
    }

    fn find_room_by_id(&self, id: Uuid) -> Result<Option<Room>> {
        self.rooms().find_by_id(id)
    }

    fn set_current_story(&self, room_id: Uuid, story_id: Option<Uuid>) -> Result<()> {
        self.rooms().set_current_story(room_id, story_id)
    }

    fn delete_room(&self, room_id: Uuid) -> Result<()> {
        self.rooms().delete(room_id)
    }
}

impl ParticipantRepository for Database {
    fn join_participant(
        &self,
        room_id: Uuid,
        name: &str,
        competence: Competence,
        session_token: &str,
    ) -> Result<JoinOutcome> {
        self.participants()
            .join(room_id, name, competence, session_token)
    }

    fn find_participant_by_id(&self, id: Uuid) -> Result<Option<Participant>> {
        self.participants().find_by_id(id)
    }

    fn list_participants(&self, room_id: Uuid) -> Result<Vec<ParticipantInfo>> {
        self.participants().list_for_room(room_id)
    }

    fn count_participants(&self, room_id: Uuid) -> Result<u64> {
        self.participants().count_for_room(room_id)
    }

    fn set_admin(&self, participant_id: Uuid, is_admin: bool) -> Result<()> {
        self.participants().set_admin(participant_id, is_admin)
    }
}

impl StoryRepository for Database {
    fn create_stories(
        &self,
        room_id: Uuid,
        created_by: Uuid,
        stories: &[NewStory],
        max_per_room: u32,
    ) -> Result<(Vec<Story>, Vec<Uuid>)> {
        self.stories()
            .create_many(room_id, created_by, stories, max_per_room)
    }

    fn find_story_by_id(&self, id: Uuid) -> Result<Option<Story>> {
        self.stories().find_by_id(id)
    }

    fn list_stories(&self, room_id: Uuid) -> Result<Vec<Story>> {
        self.stories().list_for_room(room_id)
    }

    fn update_story_details(
        &self,
        story_id: Uuid,
        title: &str,
        description: Option<&str>,
    ) -> Result<()> {
        self.stories().update_details(story_id, title, description)
    }

    fn delete_story(&self, story_id: Uuid) -> Result<()> {
        self.stories().delete(story_id)
    }

    fn reorder_stories(&self, room_id: Uuid, story_ids: &[Uuid]) -> Result<()> {
        self.stories().reorder(room_id, story_ids)
    }

    fn reset_voting(&self, story_id: Uuid, state: VotingState) -> Result<()> {
        self.stories().reset_voting(story_id, state)
    }

    fn save_voting_state(
        &self,
        story_id: Uuid,
        state: VotingState,
        final_estimate: Option<f64>,
    ) -> Result<()> {
        self.stories()
            .save_voting_state(story_id, state, final_estimate)
    }
}

impl VoteRepository for Database {
    fn upsert_vote(&self, vote: &Vote) -> Result<()> {
        self.votes().upsert(vote)
    }

    fn list_revealed_votes(&self, story_id: Uuid) -> Result<Vec<RevealedVote>> {
        self.votes().list_revealed(story_id)
    }

    fn count_votes(&self, story_id: Uuid) -> Result<u64> {
        self.votes().count_for_story(story_id)
    }

    fn find_similar_estimates(&self, query: &SimilarityQuery) -> Result<Vec<SimilarEstimate>> {
        self.votes().find_similar(query)
    }
}
