//! Error types for Estimo Core

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::VotingState;
use crate::voting::VotingCommand;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Room not found: {0}")]
    RoomNotFound(Uuid),

    #[error("Story not found: {0}")]
    StoryNotFound(Uuid),

    #[error("Participant not found in room: {0}")]
    TargetNotFound(Uuid),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid competence: {0}")]
    InvalidCompetence(String),

    #[error("Voting is not active for story {0}")]
    VotingNotActive(Uuid),

    #[error("Cannot {command} story {story} while it is {from}")]
    InvalidTransition {
        story: Uuid,
        from: VotingState,
        command: VotingCommand,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client-facing classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RoomNotFound,
    StoryNotFound,
    TargetNotFound,
    Unauthorized,
    InvalidCompetence,
    VotingNotActive,
    InvalidTransition,
    InvalidInput,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RoomNotFound(_) => ErrorKind::RoomNotFound,
            Error::StoryNotFound(_) => ErrorKind::StoryNotFound,
            Error::TargetNotFound(_) => ErrorKind::TargetNotFound,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::InvalidCompetence(_) => ErrorKind::InvalidCompetence,
            Error::VotingNotActive(_) => ErrorKind::VotingNotActive,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Database(_) | Error::Io(_) | Error::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// True for errors caused by the request rather than the infrastructure
    pub fn is_client_error(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }

    /// Message safe to hand back to a client
    pub fn client_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            "Internal server error".to_string()
        }
    }
}
