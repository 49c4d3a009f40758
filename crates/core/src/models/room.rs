//! Room model - an isolated estimation session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ParticipantInfo, Story};

/// Unit every estimate in a room is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EstimationType {
    #[default]
    StoryPoints,
    Hours,
}

impl EstimationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimationType::StoryPoints => "story_points",
            EstimationType::Hours => "hours",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "story_points" => Some(EstimationType::StoryPoints),
            "hours" => Some(EstimationType::Hours),
            _ => None,
        }
    }
}

impl std::fmt::Display for EstimationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Room owns its participants and stories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub estimation_type: EstimationType,
    pub created_at: DateTime<Utc>,
    /// Story currently under discussion (UI focus only)
    pub current_story_id: Option<Uuid>,
}

impl Room {
    pub fn new(name: String, estimation_type: EstimationType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            estimation_type,
            created_at: Utc::now(),
            current_story_id: None,
        }
    }
}

/// Full view of a room sent to a (re)joining client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room: Room,
    pub participants: Vec<ParticipantInfo>,
    pub stories: Vec<Story>,
    pub current_story: Option<Story>,
}
