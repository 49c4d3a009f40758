//! Story model and its voting state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Voting lifecycle of a story
///
/// `NotStarted` and `Accepting` are both shown to clients as `closed`; only
/// `Accepting` takes votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VotingState {
    #[default]
    NotStarted,
    Accepting,
    Revealed,
    Finalized,
}

/// Legacy visible label of a story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Closed,
    Open,
    Completed,
}

impl VotingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VotingState::NotStarted => "not_started",
            VotingState::Accepting => "accepting",
            VotingState::Revealed => "revealed",
            VotingState::Finalized => "finalized",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_started" => Some(VotingState::NotStarted),
            "accepting" => Some(VotingState::Accepting),
            "revealed" => Some(VotingState::Revealed),
            "finalized" => Some(VotingState::Finalized),
            _ => None,
        }
    }

    pub fn status(&self) -> StoryStatus {
        match self {
            VotingState::NotStarted | VotingState::Accepting => StoryStatus::Closed,
            VotingState::Revealed => StoryStatus::Open,
            VotingState::Finalized => StoryStatus::Completed,
        }
    }

    pub fn is_accepting(&self) -> bool {
        *self == VotingState::Accepting
    }
}

impl std::fmt::Display for VotingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work being estimated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,
    pub room_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub voting_state: VotingState,
    pub status: StoryStatus,
    pub final_estimate: Option<f64>,
    pub created_by: Option<Uuid>,
    pub order_position: i64,
    pub created_at: DateTime<Utc>,
}

impl Story {
    pub fn new(room_id: Uuid, title: String, description: Option<String>, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            title,
            description,
            voting_state: VotingState::NotStarted,
            status: StoryStatus::Closed,
            final_estimate: None,
            created_by: Some(created_by),
            order_position: 0,
            created_at: Utc::now(),
        }
    }

    /// Move to a new voting state, keeping the visible label in step
    pub fn set_voting_state(&mut self, state: VotingState) {
        self.voting_state = state;
        self.status = state.status();
    }
}

/// Title and optional description of a story to be created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStory {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}
