//! Estimo Core Library
//!
//! Models, authorization, the voting state machine, similarity lookup and
//! storage for the Estimo planning poker server.

pub mod error;
pub mod invariants;
pub mod models;
pub mod permissions;
pub mod similarity;
pub mod storage;
pub mod voting;

pub use error::{Error, ErrorKind, Result};
pub use models::*;
pub use permissions::*;
pub use similarity::SimilarityQuery;
pub use storage::{
    Database, ParticipantRepository, RoomRepository, Storage, StoryRepository, VoteRepository,
};
pub use voting::VotingCommand;
