//! Vote model and the read views built from votes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Competence;

/// One participant's estimate for a story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: Uuid,
    pub story_id: Uuid,
    pub participant_id: Uuid,
    pub points: f64,
    /// Competence of the voter when the vote was cast
    pub competence: Competence,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(story_id: Uuid, participant_id: Uuid, points: f64, competence: Competence) -> Self {
        Self {
            id: Uuid::new_v4(),
            story_id,
            participant_id,
            points,
            competence,
            created_at: Utc::now(),
        }
    }
}

/// A vote disclosed on reveal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealedVote {
    pub participant_id: Uuid,
    pub participant_name: String,
    pub competence: Competence,
    pub points: f64,
}

/// Past estimate returned by the similarity lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarEstimate {
    pub story_id: Uuid,
    pub title: String,
    pub points: f64,
    pub competence: Competence,
    pub final_estimate: Option<f64>,
    pub created_at: DateTime<Utc>,
}
