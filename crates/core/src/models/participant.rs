//! Participant model and competence tags

use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Role tag used to segment votes and estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Competence {
    #[serde(rename = "BE")]
    Backend,
    #[serde(rename = "FE")]
    Frontend,
    #[serde(rename = "DB")]
    Database,
    Analyst,
    FullStack,
    #[serde(rename = "QA")]
    Qa,
    Architect,
}

impl Competence {
    /// Wire and storage tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Competence::Backend => "BE",
            Competence::Frontend => "FE",
            Competence::Database => "DB",
            Competence::Analyst => "Analyst",
            Competence::FullStack => "FullStack",
            Competence::Qa => "QA",
            Competence::Architect => "Architect",
        }
    }

    pub fn all() -> &'static [Competence] {
        &[
            Competence::Backend,
            Competence::Frontend,
            Competence::Database,
            Competence::Analyst,
            Competence::FullStack,
            Competence::Qa,
            Competence::Architect,
        ]
    }
}

impl FromStr for Competence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Competence::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::InvalidCompetence(s.to_string()))
    }
}

impl std::fmt::Display for Competence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person taking part in one room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub room_id: Uuid,
    pub name: String,
    pub competence: Competence,
    pub is_admin: bool,
    /// Opaque token a reconnecting client presents to reclaim this identity
    pub session_token: String,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(room_id: Uuid, name: String, competence: Competence, session_token: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            name,
            competence,
            is_admin: false,
            session_token,
            joined_at: Utc::now(),
        }
    }

    /// Public view, without the session token
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id,
            name: self.name.clone(),
            competence: self.competence,
            is_admin: self.is_admin,
        }
    }
}

/// Participant as shown to other members of the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: Uuid,
    pub name: String,
    pub competence: Competence,
    pub is_admin: bool,
}

/// Result of a join: the participant and whether the row was newly created
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub participant: Participant,
    pub created: bool,
}

/// Generate a random session token (16 bytes, URL-safe base64)
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
