//! Network protocol message types
//!
//! Clients send [`Action`] documents tagged by `"action"`; the server answers
//! with [`Event`] documents tagged by `"event"`. All messages are
//! JSON-serialized and length-prefixed on the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use estimo_core::{
    Error as CoreError, ErrorKind, EstimationType, NewStory, ParticipantInfo, RevealedVote,
    RoomSnapshot, SimilarEstimate, Story,
};

/// Inbound client actions
///
/// Competence values arrive as plain strings so that an unknown tag is
/// reported as `invalid_competence` rather than a malformed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    CreateRoom {
        name: String,
        #[serde(default)]
        estimation_type: EstimationType,
    },

    JoinRoom {
        room: Uuid,
        name: String,
        competence: String,
        #[serde(default)]
        session_id: Option<String>,
    },

    CreateStory {
        room: Uuid,
        title: String,
        #[serde(default)]
        description: Option<String>,
        participant_id: Uuid,
    },

    CreateStories {
        room: Uuid,
        stories: Vec<NewStory>,
        participant_id: Uuid,
    },

    UpdateStory {
        room: Uuid,
        story_id: Uuid,
        title: String,
        #[serde(default)]
        description: Option<String>,
        participant_id: Uuid,
    },

    DeleteStory {
        room: Uuid,
        story_id: Uuid,
        participant_id: Uuid,
    },

    ReorderStories {
        room: Uuid,
        story_ids: Vec<Uuid>,
        participant_id: Uuid,
    },

    SetCurrentStory {
        room: Uuid,
        story_id: Uuid,
        participant_id: Uuid,
    },

    StartVoting {
        room: Uuid,
        story_id: Uuid,
        participant_id: Uuid,
    },

    SubmitVote {
        room: Uuid,
        story_id: Uuid,
        points: f64,
        participant_id: Uuid,
    },

    RevealVotes {
        room: Uuid,
        story_id: Uuid,
        participant_id: Uuid,
    },

    FinalizeEstimate {
        room: Uuid,
        story_id: Uuid,
        final_estimate: f64,
        participant_id: Uuid,
    },

    GetSimilarTasks {
        room: Uuid,
        vote_value: f64,
        competence: String,
        #[serde(default)]
        limit: Option<u32>,
    },

    MakeAdmin {
        room: Uuid,
        target_participant_id: Uuid,
        participant_id: Uuid,
    },

    DeleteRoom {
        room: Uuid,
        participant_id: Uuid,
    },

    Ping,
}

impl Action {
    /// Wire name of the action
    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateRoom { .. } => "create_room",
            Action::JoinRoom { .. } => "join_room",
            Action::CreateStory { .. } => "create_story",
            Action::CreateStories { .. } => "create_stories",
            Action::UpdateStory { .. } => "update_story",
            Action::DeleteStory { .. } => "delete_story",
            Action::ReorderStories { .. } => "reorder_stories",
            Action::SetCurrentStory { .. } => "set_current_story",
            Action::StartVoting { .. } => "start_voting",
            Action::SubmitVote { .. } => "submit_vote",
            Action::RevealVotes { .. } => "reveal_votes",
            Action::FinalizeEstimate { .. } => "finalize_estimate",
            Action::GetSimilarTasks { .. } => "get_similar_tasks",
            Action::MakeAdmin { .. } => "make_admin",
            Action::DeleteRoom { .. } => "delete_room",
            Action::Ping => "ping",
        }
    }

    /// Serialize action to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize action from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Outbound server events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    RoomCreated {
        room_id: Uuid,
        name: String,
        estimation_type: EstimationType,
    },

    /// Sent to the joining connection only; the one payload carrying a token
    RoomJoined {
        participant: ParticipantInfo,
        session_id: String,
        snapshot: RoomSnapshot,
    },

    UserJoined {
        participant: ParticipantInfo,
    },

    StoryCreated {
        story: Story,
    },

    StoriesCreated {
        stories: Vec<Story>,
    },

    StoryUpdated {
        story: Story,
    },

    StoryDeleted {
        story_id: Uuid,
    },

    StoriesReordered {
        story_ids: Vec<Uuid>,
    },

    CurrentStoryChanged {
        story: Option<Story>,
    },

    VotingStarted {
        story_id: Uuid,
    },

    VoteSubmitted {
        story_id: Uuid,
        vote_count: u64,
        participant_count: u64,
    },

    VotesRevealed {
        story_id: Uuid,
        votes: Vec<RevealedVote>,
    },

    EstimateFinalized {
        story_id: Uuid,
        final_estimate: f64,
    },

    SimilarTasks {
        tasks: Vec<SimilarEstimate>,
    },

    AdminAdded {
        participant: ParticipantInfo,
    },

    RoomDeleted {
        room_id: Uuid,
    },

    Pong,

    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Event {
    /// Error event for a failed action
    pub fn error(err: &CoreError) -> Self {
        Event::Error {
            kind: err.kind(),
            message: err.client_message(),
        }
    }

    /// Error event for a document that could not be decoded
    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Event::Error {
            kind: ErrorKind::InvalidInput,
            message: format!("Malformed message: {reason}"),
        }
    }

    /// Serialize event to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize event from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
