//! Storage repository traits
//!
//! These traits define the storage interface, allowing for different
//! implementations (SQLite, mock, future remote backend). They carry no
//! business rules; each compound write is atomic.

use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Competence, JoinOutcome, NewStory, Participant, ParticipantInfo, RevealedVote, Room,
    SimilarEstimate, Story, Vote, VotingState,
};
use crate::similarity::SimilarityQuery;

/// Room repository operations
pub trait RoomRepository {
    /// Create a new room
    fn create_room(&self, room: &Room) -> Result<()>;

    /// Find room by ID
    fn find_room_by_id(&self, id: Uuid) -> Result<Option<Room>>;

    /// Point the room at the story under discussion
    fn set_current_story(&self, room_id: Uuid, story_id: Option<Uuid>) -> Result<()>;

    /// Delete a room and everything it owns
    fn delete_room(&self, room_id: Uuid) -> Result<()>;
}

/// Participant repository operations
pub trait ParticipantRepository {
    /// Insert a participant keyed by (room, name, competence), or refresh the
    /// session token of the existing one. A new participant is admin iff the
    /// room had no participants.
    fn join_participant(
        &self,
        room_id: Uuid,
        name: &str,
        competence: Competence,
        session_token: &str,
    ) -> Result<JoinOutcome>;

    /// Find participant by ID
    fn find_participant_by_id(&self, id: Uuid) -> Result<Option<Participant>>;

    /// List participants of a room in join order
    fn list_participants(&self, room_id: Uuid) -> Result<Vec<ParticipantInfo>>;

    /// Number of participants in a room
    fn count_participants(&self, room_id: Uuid) -> Result<u64>;

    /// Grant or revoke admin rights
    fn set_admin(&self, participant_id: Uuid, is_admin: bool) -> Result<()>;
}

/// Story repository operations
pub trait StoryRepository {
    /// Append stories to a room's backlog, then trim the backlog to
    /// `max_per_room`. Returns the stored stories and the ids trimmed.
    fn create_stories(
        &self,
        room_id: Uuid,
        created_by: Uuid,
        stories: &[NewStory],
        max_per_room: u32,
    ) -> Result<(Vec<Story>, Vec<Uuid>)>;

    /// Find story by ID
    fn find_story_by_id(&self, id: Uuid) -> Result<Option<Story>>;

    /// List stories of a room by order position
    fn list_stories(&self, room_id: Uuid) -> Result<Vec<Story>>;

    /// Update title and description
    fn update_story_details(
        &self,
        story_id: Uuid,
        title: &str,
        description: Option<&str>,
    ) -> Result<()>;

    /// Delete a story, clearing the room pointer if it referred to it
    fn delete_story(&self, story_id: Uuid) -> Result<()>;

    /// Assign positions 1..n to the given stories in order
    fn reorder_stories(&self, room_id: Uuid, story_ids: &[Uuid]) -> Result<()>;

    /// Delete all votes, clear the final estimate and set the state, atomically
    fn reset_voting(&self, story_id: Uuid, state: VotingState) -> Result<()>;

    /// Persist voting state and final estimate
    fn save_voting_state(
        &self,
        story_id: Uuid,
        state: VotingState,
        final_estimate: Option<f64>,
    ) -> Result<()>;
}

/// Vote repository operations
pub trait VoteRepository {
    /// Insert or update the vote of (story, participant) atomically
    fn upsert_vote(&self, vote: &Vote) -> Result<()>;

    /// Votes of a story with voter names, in cast order
    fn list_revealed_votes(&self, story_id: Uuid) -> Result<Vec<RevealedVote>>;

    /// Number of votes cast on a story
    fn count_votes(&self, story_id: Uuid) -> Result<u64>;

    /// Past votes close to a candidate value, most recent first
    fn find_similar_estimates(&self, query: &SimilarityQuery) -> Result<Vec<SimilarEstimate>>;
}

/// Combined storage interface
///
/// Provides access to all repository operations.
/// Implementations may be backed by SQLite or mocks.
pub trait Storage: RoomRepository + ParticipantRepository + StoryRepository + VoteRepository {}

// Blanket implementation: any type implementing all traits implements Storage
impl<T> Storage for T where
    T: RoomRepository + ParticipantRepository + StoryRepository + VoteRepository
{
}
