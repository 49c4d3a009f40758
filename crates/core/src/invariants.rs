//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use uuid::Uuid;

use crate::models::{ParticipantInfo, Room, Story, Vote, VotingState};

/// Validate that a Room's state is internally consistent
pub fn assert_room_invariants(room: &Room, stories: &[Story]) {
    debug_assert!(
        !room.name.trim().is_empty(),
        "Room {} has empty name",
        room.id
    );

    if let Some(current) = room.current_story_id {
        debug_assert!(
            stories.iter().any(|s| s.id == current),
            "Room {} points at story {} which it does not own",
            room.id,
            current
        );
    }
}

/// A final estimate exists exactly when voting has been finalized
pub fn assert_story_invariants(story: &Story) {
    debug_assert_eq!(
        story.final_estimate.is_some(),
        story.voting_state == VotingState::Finalized,
        "Story {} is {} with final estimate {:?}",
        story.id,
        story.voting_state,
        story.final_estimate
    );

    debug_assert_eq!(
        story.status,
        story.voting_state.status(),
        "Story {} label {:?} disagrees with state {}",
        story.id,
        story.status,
        story.voting_state
    );
}

/// Validate a vote before it is written
pub fn assert_vote_invariants(vote: &Vote) {
    debug_assert!(
        vote.points.is_finite() && vote.points >= 0.0,
        "Vote {} has invalid points {}",
        vote.id,
        vote.points
    );

    debug_assert!(
        vote.participant_id != Uuid::nil() && vote.story_id != Uuid::nil(),
        "Vote {} has a nil reference",
        vote.id
    );
}

/// A room with members always has at least one admin
pub fn assert_member_list_invariants(room_id: Uuid, members: &[ParticipantInfo]) {
    debug_assert!(
        members.is_empty() || members.iter().any(|m| m.is_admin),
        "Room {} has {} members but no admin",
        room_id,
        members.len()
    );
}
