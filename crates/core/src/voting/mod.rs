//! Voting state machine
//!
//! ```text
//! not_started -> accepting -> revealed -> finalized
//!      ^______________|___________|___________|   (start resets to accepting)
//! ```
//!
//! `start` is valid from every state. `reveal` and `finalize` only move
//! forward; re-revealing an already revealed story is a no-op.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Story, VotingState};

/// Commands that drive a story's voting state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingCommand {
    Start,
    SubmitVote,
    Reveal,
    Finalize,
}

impl std::fmt::Display for VotingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VotingCommand::Start => "start voting on",
            VotingCommand::SubmitVote => "vote on",
            VotingCommand::Reveal => "reveal votes of",
            VotingCommand::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Compute the state a command leads to, or why it is refused
pub fn next_state(story: &Story, command: VotingCommand) -> Result<VotingState> {
    use VotingState::*;

    let from = story.voting_state;
    match (command, from) {
        (VotingCommand::Start, _) => Ok(Accepting),

        (VotingCommand::SubmitVote, Accepting) => Ok(Accepting),
        (VotingCommand::SubmitVote, _) => Err(Error::VotingNotActive(story.id)),

        (VotingCommand::Reveal, Accepting | Revealed) => Ok(Revealed),
        (VotingCommand::Reveal, NotStarted) => Err(Error::VotingNotActive(story.id)),

        (VotingCommand::Finalize, Revealed) => Ok(Finalized),

        (VotingCommand::Reveal, Finalized)
        | (VotingCommand::Finalize, NotStarted | Accepting | Finalized) => {
            Err(Error::InvalidTransition {
                story: story.id,
                from,
                command,
            })
        }
    }
}

/// Apply a command to a story in place
///
/// `Start` clears the final estimate; `Finalize` requires one.
pub fn apply(story: &mut Story, command: VotingCommand, final_estimate: Option<f64>) -> Result<()> {
    let next = next_state(story, command)?;

    match command {
        VotingCommand::Start => story.final_estimate = None,
        VotingCommand::Finalize => {
            let estimate = final_estimate
                .ok_or_else(|| Error::InvalidInput("final estimate is required".into()))?;
            story.final_estimate = Some(estimate);
        }
        VotingCommand::SubmitVote | VotingCommand::Reveal => {}
    }

    story.set_voting_state(next);
    Ok(())
}

/// Validate a numeric estimate (vote points, final estimate, query value)
pub fn validate_points(value: f64, field: &str) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidInput(format!(
            "{field} must be a finite, non-negative number"
        )));
    }
    Ok(value)
}
