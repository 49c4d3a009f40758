//! Permission checks for room actions
//!
//! Every check is a pure function of the acting participant and the room the
//! action targets. Nothing here touches storage.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Participant;

/// Actions a participant can perform inside a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAction {
    // Backlog
    CreateStory,
    UpdateStory,
    DeleteStory,
    ReorderStories,
    SetCurrentStory,

    // Voting
    StartVoting,
    SubmitVote,
    RevealVotes,
    FinalizeEstimate,
    ViewSimilar,

    // Room management
    MakeAdmin,
    DeleteRoom,
}

impl RoomAction {
    pub fn name(&self) -> &'static str {
        match self {
            RoomAction::CreateStory => "create_story",
            RoomAction::UpdateStory => "update_story",
            RoomAction::DeleteStory => "delete_story",
            RoomAction::ReorderStories => "reorder_stories",
            RoomAction::SetCurrentStory => "set_current_story",
            RoomAction::StartVoting => "start_voting",
            RoomAction::SubmitVote => "submit_vote",
            RoomAction::RevealVotes => "reveal_votes",
            RoomAction::FinalizeEstimate => "finalize_estimate",
            RoomAction::ViewSimilar => "get_similar_tasks",
            RoomAction::MakeAdmin => "make_admin",
            RoomAction::DeleteRoom => "delete_room",
        }
    }
}

/// True iff the participant belongs to the room
pub fn is_member(participant: &Participant, room_id: Uuid) -> bool {
    participant.room_id == room_id
}

/// True iff the participant belongs to the room and is one of its admins
pub fn is_admin(participant: &Participant, room_id: Uuid) -> bool {
    is_member(participant, room_id) && participant.is_admin
}

/// Permission matrix for room actions
pub struct PermissionMatrix;

impl PermissionMatrix {
    /// Does the action need admin rights on top of membership?
    pub fn requires_admin(action: RoomAction) -> bool {
        match action {
            RoomAction::CreateStory
            | RoomAction::UpdateStory
            | RoomAction::SubmitVote
            | RoomAction::ViewSimilar => false,

            RoomAction::DeleteStory
            | RoomAction::ReorderStories
            | RoomAction::SetCurrentStory
            | RoomAction::StartVoting
            | RoomAction::RevealVotes
            | RoomAction::FinalizeEstimate
            | RoomAction::MakeAdmin
            | RoomAction::DeleteRoom => true,
        }
    }

    /// Check if a participant may perform an action in a room
    pub fn can_perform(participant: &Participant, room_id: Uuid, action: RoomAction) -> bool {
        if Self::requires_admin(action) {
            is_admin(participant, room_id)
        } else {
            is_member(participant, room_id)
        }
    }
}

/// Guard an action, turning a refusal into [`Error::Unauthorized`]
///
/// `None` stands for an actor that could not be resolved at all.
pub fn authorize(participant: Option<&Participant>, room_id: Uuid, action: RoomAction) -> Result<()> {
    let Some(participant) = participant else {
        return Err(Error::Unauthorized(format!(
            "unknown participant cannot {}",
            action.name()
        )));
    };

    if !is_member(participant, room_id) {
        return Err(Error::Unauthorized(format!(
            "{} is not a member of this room",
            participant.name
        )));
    }

    if !PermissionMatrix::can_perform(participant, room_id, action) {
        return Err(Error::Unauthorized(format!(
            "only admins can {}",
            action.name()
        )));
    }

    Ok(())
}
