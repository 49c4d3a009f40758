//! Session coordinator
//!
//! Turns inbound [`Action`]s into storage mutations and outbound [`Event`]s.
//! Each action runs to completion under the store lock: guard check, voting
//! state check, committed write, then broadcast. A failed action produces a
//! single `error` event for the requesting connection and nothing else.
//!
//! The coordinator keeps no state of its own between actions. Which room and
//! participant a connection is bound to lives in [`ConnectionSession`], owned
//! by the transport.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};
use uuid::Uuid;

use estimo_core::invariants::{
    assert_member_list_invariants, assert_room_invariants, assert_story_invariants,
    assert_vote_invariants,
};
use estimo_core::similarity::{SimilarityQuery, DEFAULT_LIMIT, DEFAULT_TOLERANCE};
use estimo_core::voting::{self, validate_points, VotingCommand};
use estimo_core::{
    authorize, generate_session_token, Competence, Error, EstimationType, NewStory, Participant,
    Result, Room, RoomAction, RoomSnapshot, Storage, Story, Vote,
};

use crate::broadcast::{BroadcastChannel, ConnectionId};
use crate::protocol::{Action, Event};

/// Default cap on stories kept per room
pub const DEFAULT_MAX_STORIES_PER_ROOM: u32 = 100;

/// Tunables for the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub similar_limit: u32,
    pub similarity_tolerance: f64,
    pub max_stories_per_room: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            similar_limit: DEFAULT_LIMIT,
            similarity_tolerance: DEFAULT_TOLERANCE,
            max_stories_per_room: DEFAULT_MAX_STORIES_PER_ROOM,
        }
    }
}

/// Per-connection binding to a room and participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSession {
    pub connection_id: ConnectionId,
    pub room_id: Option<Uuid>,
    pub participant_id: Option<Uuid>,
}

impl ConnectionSession {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            room_id: None,
            participant_id: None,
        }
    }

    fn bind(&mut self, room_id: Uuid, participant_id: Uuid) {
        self.room_id = Some(room_id);
        self.participant_id = Some(participant_id);
    }

    fn unbind(&mut self) {
        self.room_id = None;
        self.participant_id = None;
    }
}

/// Orchestrates guard, voting state machine, storage and broadcast
pub struct Coordinator<S> {
    store: Mutex<S>,
    settings: SessionSettings,
}

impl<S: Storage> Coordinator<S> {
    pub fn new(store: S, settings: SessionSettings) -> Self {
        Self {
            store: Mutex::new(store),
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Handle one action on behalf of a connection
    pub fn handle(
        &self,
        session: &mut ConnectionSession,
        action: Action,
        channel: &dyn BroadcastChannel,
    ) {
        let name = action.name();
        // SQLite transactions keep the store consistent even if a holder panicked
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);

        let mut ctx = ActionContext {
            store: &*store,
            settings: &self.settings,
            session,
            channel,
        };

        match ctx.dispatch(action) {
            Ok(()) => {
                debug!(action = name, connection = ctx.session.connection_id, "Action handled");
            }
            Err(e) => {
                if e.is_client_error() {
                    debug!(action = name, error = %e, "Action rejected");
                } else {
                    warn!(action = name, error = %e, "Action failed");
                }
                channel.send_to(ctx.session.connection_id, Event::error(&e));
            }
        }
    }
}

struct ActionContext<'a, S> {
    store: &'a S,
    settings: &'a SessionSettings,
    session: &'a mut ConnectionSession,
    channel: &'a dyn BroadcastChannel,
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidInput("title must not be blank".into()));
    }
    Ok(title.to_string())
}

fn parse_competence(value: &str) -> Result<Competence> {
    value.parse()
}

impl<S: Storage> ActionContext<'_, S> {
    fn dispatch(&mut self, action: Action) -> Result<()> {
        match action {
            Action::CreateRoom {
                name,
                estimation_type,
            } => self.create_room(&name, estimation_type),
            Action::JoinRoom {
                room,
                name,
                competence,
                session_id,
            } => self.join_room(room, &name, &competence, session_id),
            Action::CreateStory {
                room,
                title,
                description,
                participant_id,
            } => self.create_story(room, participant_id, title, description),
            Action::CreateStories {
                room,
                stories,
                participant_id,
            } => self.create_stories(room, participant_id, stories),
            Action::UpdateStory {
                room,
                story_id,
                title,
                description,
                participant_id,
            } => self.update_story(room, participant_id, story_id, &title, description),
            Action::DeleteStory {
                room,
                story_id,
                participant_id,
            } => self.delete_story(room, participant_id, story_id),
            Action::ReorderStories {
                room,
                story_ids,
                participant_id,
            } => self.reorder_stories(room, participant_id, story_ids),
            Action::SetCurrentStory {
                room,
                story_id,
                participant_id,
            } => self.set_current_story(room, participant_id, story_id),
            Action::StartVoting {
                room,
                story_id,
                participant_id,
            } => self.start_voting(room, participant_id, story_id),
            Action::SubmitVote {
                room,
                story_id,
                points,
                participant_id,
            } => self.submit_vote(room, participant_id, story_id, points),
            Action::RevealVotes {
                room,
                story_id,
                participant_id,
            } => self.reveal_votes(room, participant_id, story_id),
            Action::FinalizeEstimate {
                room,
                story_id,
                final_estimate,
                participant_id,
            } => self.finalize_estimate(room, participant_id, story_id, final_estimate),
            Action::GetSimilarTasks {
                room,
                vote_value,
                competence,
                limit,
            } => self.get_similar_tasks(room, vote_value, &competence, limit),
            Action::MakeAdmin {
                room,
                target_participant_id,
                participant_id,
            } => self.make_admin(room, participant_id, target_participant_id),
            Action::DeleteRoom {
                room,
                participant_id,
            } => self.delete_room(room, participant_id),
            Action::Ping => {
                self.reply(Event::Pong);
                Ok(())
            }
        }
    }

    fn reply(&self, event: Event) {
        self.channel.send_to(self.session.connection_id, event);
    }

    fn load_room(&self, room_id: Uuid) -> Result<Room> {
        self.store
            .find_room_by_id(room_id)?
            .ok_or(Error::RoomNotFound(room_id))
    }

    /// Resolve and authorize the participant acting on this connection
    fn actor(&self, room_id: Uuid, participant_id: Uuid, action: RoomAction) -> Result<Participant> {
        self.load_room(room_id)?;

        if self.session.participant_id != Some(participant_id) {
            return Err(Error::Unauthorized(
                "participant is not bound to this connection".into(),
            ));
        }

        let participant = self.store.find_participant_by_id(participant_id)?;
        authorize(participant.as_ref(), room_id, action)?;
        participant.ok_or_else(|| Error::Unauthorized("unknown participant".into()))
    }

    /// A story of the room; stories of other rooms do not exist here
    fn room_story(&self, room_id: Uuid, story_id: Uuid) -> Result<Story> {
        self.store
            .find_story_by_id(story_id)?
            .filter(|s| s.room_id == room_id)
            .ok_or(Error::StoryNotFound(story_id))
    }

    fn create_room(&mut self, name: &str, estimation_type: EstimationType) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("room name must not be blank".into()));
        }

        let room = Room::new(name.to_string(), estimation_type);
        self.store.create_room(&room)?;
        info!(room_id = %room.id, "Room created");

        self.reply(Event::RoomCreated {
            room_id: room.id,
            name: room.name,
            estimation_type: room.estimation_type,
        });
        Ok(())
    }

    fn join_room(
        &mut self,
        room_id: Uuid,
        name: &str,
        competence: &str,
        session_id: Option<String>,
    ) -> Result<()> {
        let room = self.load_room(room_id)?;
        let competence = parse_competence(competence)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("name must not be blank".into()));
        }

        let token = session_id
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(generate_session_token);
        let outcome = self
            .store
            .join_participant(room_id, name, competence, &token)?;
        let participant = outcome.participant;

        let participants = self.store.list_participants(room_id)?;
        let stories = self.store.list_stories(room_id)?;
        assert_member_list_invariants(room_id, &participants);
        assert_room_invariants(&room, &stories);

        let current_story = room
            .current_story_id
            .and_then(|id| stories.iter().find(|s| s.id == id).cloned());

        self.session.bind(room_id, participant.id);
        self.channel.join(self.session.connection_id, room_id);

        info!(
            room_id = %room_id,
            participant_id = %participant.id,
            created = outcome.created,
            "Participant joined"
        );

        self.reply(Event::RoomJoined {
            participant: participant.info(),
            session_id: participant.session_token.clone(),
            snapshot: RoomSnapshot {
                room,
                participants,
                stories,
                current_story,
            },
        });
        self.channel.broadcast_except(
            room_id,
            self.session.connection_id,
            Event::UserJoined {
                participant: participant.info(),
            },
        );
        Ok(())
    }

    fn insert_stories(
        &self,
        room_id: Uuid,
        created_by: Uuid,
        stories: &[NewStory],
    ) -> Result<Vec<Story>> {
        let current = self.load_room(room_id)?.current_story_id;
        let (created, trimmed) = self.store.create_stories(
            room_id,
            created_by,
            stories,
            self.settings.max_stories_per_room,
        )?;

        let lost_current = current.is_some_and(|id| trimmed.contains(&id));
        for story_id in trimmed {
            self.channel
                .broadcast(room_id, Event::StoryDeleted { story_id });
        }
        // Trimming the focused story cleared the room's pointer
        if lost_current {
            self.channel
                .broadcast(room_id, Event::CurrentStoryChanged { story: None });
        }
        Ok(created)
    }

    fn create_story(
        &mut self,
        room_id: Uuid,
        participant_id: Uuid,
        title: String,
        description: Option<String>,
    ) -> Result<()> {
        let actor = self.actor(room_id, participant_id, RoomAction::CreateStory)?;
        let story = NewStory {
            title: validate_title(&title)?,
            description,
        };

        let created = self.insert_stories(room_id, actor.id, &[story])?;
        if let Some(story) = created.into_iter().next() {
            self.channel
                .broadcast(room_id, Event::StoryCreated { story });
        }
        Ok(())
    }

    fn create_stories(
        &mut self,
        room_id: Uuid,
        participant_id: Uuid,
        stories: Vec<NewStory>,
    ) -> Result<()> {
        let actor = self.actor(room_id, participant_id, RoomAction::CreateStory)?;
        if stories.is_empty() {
            return Err(Error::InvalidInput("no stories given".into()));
        }

        let stories = stories
            .into_iter()
            .map(|s| {
                Ok(NewStory {
                    title: validate_title(&s.title)?,
                    description: s.description,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let created = self.insert_stories(room_id, actor.id, &stories)?;
        self.channel
            .broadcast(room_id, Event::StoriesCreated { stories: created });
        Ok(())
    }

    fn update_story(
        &mut self,
        room_id: Uuid,
        participant_id: Uuid,
        story_id: Uuid,
        title: &str,
        description: Option<String>,
    ) -> Result<()> {
        self.actor(room_id, participant_id, RoomAction::UpdateStory)?;
        let mut story = self.room_story(room_id, story_id)?;
        let title = validate_title(title)?;

        self.store
            .update_story_details(story_id, &title, description.as_deref())?;
        story.title = title;
        story.description = description;

        self.channel
            .broadcast(room_id, Event::StoryUpdated { story });
        Ok(())
    }

    fn delete_story(&mut self, room_id: Uuid, participant_id: Uuid, story_id: Uuid) -> Result<()> {
        self.actor(room_id, participant_id, RoomAction::DeleteStory)?;
        let room = self.load_room(room_id)?;
        self.room_story(room_id, story_id)?;

        self.store.delete_story(story_id)?;

        self.channel
            .broadcast(room_id, Event::StoryDeleted { story_id });
        if room.current_story_id == Some(story_id) {
            self.channel
                .broadcast(room_id, Event::CurrentStoryChanged { story: None });
        }
        Ok(())
    }

    fn reorder_stories(
        &mut self,
        room_id: Uuid,
        participant_id: Uuid,
        story_ids: Vec<Uuid>,
    ) -> Result<()> {
        self.actor(room_id, participant_id, RoomAction::ReorderStories)?;

        let mut seen = HashSet::with_capacity(story_ids.len());
        for story_id in &story_ids {
            if !seen.insert(*story_id) {
                return Err(Error::InvalidInput(format!(
                    "story {story_id} listed twice"
                )));
            }
            self.room_story(room_id, *story_id)?;
        }

        self.store.reorder_stories(room_id, &story_ids)?;

        self.channel
            .broadcast(room_id, Event::StoriesReordered { story_ids });
        Ok(())
    }

    fn set_current_story(
        &mut self,
        room_id: Uuid,
        participant_id: Uuid,
        story_id: Uuid,
    ) -> Result<()> {
        self.actor(room_id, participant_id, RoomAction::SetCurrentStory)?;
        let story = self.room_story(room_id, story_id)?;

        self.store.set_current_story(room_id, Some(story_id))?;

        self.channel.broadcast(
            room_id,
            Event::CurrentStoryChanged { story: Some(story) },
        );
        Ok(())
    }

    fn start_voting(&mut self, room_id: Uuid, participant_id: Uuid, story_id: Uuid) -> Result<()> {
        self.actor(room_id, participant_id, RoomAction::StartVoting)?;
        let mut story = self.room_story(room_id, story_id)?;

        voting::apply(&mut story, VotingCommand::Start, None)?;
        assert_story_invariants(&story);
        self.store.reset_voting(story_id, story.voting_state)?;

        self.channel
            .broadcast(room_id, Event::VotingStarted { story_id });
        Ok(())
    }

    fn submit_vote(
        &mut self,
        room_id: Uuid,
        participant_id: Uuid,
        story_id: Uuid,
        points: f64,
    ) -> Result<()> {
        let actor = self.actor(room_id, participant_id, RoomAction::SubmitVote)?;
        let story = self.room_story(room_id, story_id)?;
        let points = validate_points(points, "points")?;
        voting::next_state(&story, VotingCommand::SubmitVote)?;

        let vote = Vote::new(story_id, actor.id, points, actor.competence);
        assert_vote_invariants(&vote);
        self.store.upsert_vote(&vote)?;

        let vote_count = self.store.count_votes(story_id)?;
        let participant_count = self.store.count_participants(room_id)?;

        self.channel.broadcast(
            room_id,
            Event::VoteSubmitted {
                story_id,
                vote_count,
                participant_count,
            },
        );
        Ok(())
    }

    fn reveal_votes(&mut self, room_id: Uuid, participant_id: Uuid, story_id: Uuid) -> Result<()> {
        self.actor(room_id, participant_id, RoomAction::RevealVotes)?;
        let mut story = self.room_story(room_id, story_id)?;

        voting::apply(&mut story, VotingCommand::Reveal, None)?;
        assert_story_invariants(&story);
        self.store
            .save_voting_state(story_id, story.voting_state, story.final_estimate)?;

        let votes = self.store.list_revealed_votes(story_id)?;
        self.channel
            .broadcast(room_id, Event::VotesRevealed { story_id, votes });
        Ok(())
    }

    fn finalize_estimate(
        &mut self,
        room_id: Uuid,
        participant_id: Uuid,
        story_id: Uuid,
        final_estimate: f64,
    ) -> Result<()> {
        self.actor(room_id, participant_id, RoomAction::FinalizeEstimate)?;
        let mut story = self.room_story(room_id, story_id)?;
        let final_estimate = validate_points(final_estimate, "final_estimate")?;

        voting::apply(&mut story, VotingCommand::Finalize, Some(final_estimate))?;
        assert_story_invariants(&story);
        self.store
            .save_voting_state(story_id, story.voting_state, story.final_estimate)?;

        self.channel.broadcast(
            room_id,
            Event::EstimateFinalized {
                story_id,
                final_estimate,
            },
        );
        Ok(())
    }

    fn get_similar_tasks(
        &mut self,
        room_id: Uuid,
        vote_value: f64,
        competence: &str,
        limit: Option<u32>,
    ) -> Result<()> {
        let participant_id = self
            .session
            .participant_id
            .filter(|_| self.session.room_id == Some(room_id))
            .ok_or_else(|| Error::Unauthorized("join the room first".into()))?;
        self.actor(room_id, participant_id, RoomAction::ViewSimilar)?;

        let competence = parse_competence(competence)?;
        let query = SimilarityQuery::new(room_id, vote_value, competence)?
            .with_tolerance(self.settings.similarity_tolerance)?
            .with_limit(limit.unwrap_or(self.settings.similar_limit))?;

        let tasks = self.store.find_similar_estimates(&query)?;
        self.reply(Event::SimilarTasks { tasks });
        Ok(())
    }

    fn make_admin(
        &mut self,
        room_id: Uuid,
        participant_id: Uuid,
        target_participant_id: Uuid,
    ) -> Result<()> {
        self.actor(room_id, participant_id, RoomAction::MakeAdmin)?;
        let mut target = self
            .store
            .find_participant_by_id(target_participant_id)?
            .filter(|p| p.room_id == room_id)
            .ok_or(Error::TargetNotFound(target_participant_id))?;

        self.store.set_admin(target.id, true)?;
        target.is_admin = true;

        self.channel.broadcast(
            room_id,
            Event::AdminAdded {
                participant: target.info(),
            },
        );
        Ok(())
    }

    fn delete_room(&mut self, room_id: Uuid, participant_id: Uuid) -> Result<()> {
        self.actor(room_id, participant_id, RoomAction::DeleteRoom)?;

        self.store.delete_room(room_id)?;
        info!(room_id = %room_id, "Room deleted");

        self.channel
            .broadcast(room_id, Event::RoomDeleted { room_id });
        self.channel.close_room(room_id);
        self.session.unbind();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estimo_core::{
        Database, ErrorKind, ParticipantInfo, ParticipantRepository, RoomRepository,
        StoryRepository, VoteRepository, VotingState,
    };

    /// Records every delivery as (room or connection, event)
    #[derive(Default)]
    struct RecordingChannel {
        log: Mutex<Vec<Delivery>>,
        rooms: Mutex<Vec<(ConnectionId, Uuid)>>,
    }

    #[derive(Debug, Clone)]
    enum Delivery {
        To(ConnectionId, Event),
        Room(Uuid, Option<ConnectionId>, Event),
    }

    impl RecordingChannel {
        fn take(&self) -> Vec<Delivery> {
            std::mem::take(&mut *self.log.lock().unwrap())
        }
    }

    impl BroadcastChannel for RecordingChannel {
        fn send_to(&self, connection: ConnectionId, event: Event) {
            self.log.lock().unwrap().push(Delivery::To(connection, event));
        }

        fn join(&self, connection: ConnectionId, room: Uuid) {
            self.rooms.lock().unwrap().push((connection, room));
        }

        fn broadcast(&self, room: Uuid, event: Event) {
            self.log.lock().unwrap().push(Delivery::Room(room, None, event));
        }

        fn broadcast_except(&self, room: Uuid, except: ConnectionId, event: Event) {
            self.log
                .lock()
                .unwrap()
                .push(Delivery::Room(room, Some(except), event));
        }

        fn close_room(&self, room: Uuid) {
            self.rooms.lock().unwrap().retain(|(_, r)| *r != room);
        }
    }

    struct Harness {
        coordinator: Coordinator<Database>,
        channel: RecordingChannel,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_settings(SessionSettings::default())
        }

        fn with_settings(settings: SessionSettings) -> Self {
            Self {
                coordinator: Coordinator::new(Database::open_in_memory().unwrap(), settings),
                channel: RecordingChannel::default(),
            }
        }

        fn run(&self, session: &mut ConnectionSession, action: Action) -> Vec<Delivery> {
            self.coordinator.handle(session, action, &self.channel);
            self.channel.take()
        }

        fn create_room(&self, name: &str) -> Uuid {
            let mut session = ConnectionSession::new(999);
            let out = self.run(
                &mut session,
                Action::CreateRoom {
                    name: name.into(),
                    estimation_type: EstimationType::StoryPoints,
                },
            );
            match &out[..] {
                [Delivery::To(999, Event::RoomCreated { room_id, .. })] => *room_id,
                other => panic!("unexpected {other:?}"),
            }
        }

        fn join(
            &self,
            connection: ConnectionId,
            room: Uuid,
            name: &str,
            competence: &str,
        ) -> (ConnectionSession, ParticipantInfo) {
            let mut session = ConnectionSession::new(connection);
            let out = self.run(
                &mut session,
                Action::JoinRoom {
                    room,
                    name: name.into(),
                    competence: competence.into(),
                    session_id: None,
                },
            );
            let participant = out
                .iter()
                .find_map(|d| match d {
                    Delivery::To(_, Event::RoomJoined { participant, .. }) => {
                        Some(participant.clone())
                    }
                    _ => None,
                })
                .unwrap_or_else(|| panic!("join failed: {out:?}"));
            (session, participant)
        }

        fn create_story(&self, session: &mut ConnectionSession, room: Uuid, title: &str) -> Story {
            let participant_id = session.participant_id.unwrap();
            let out = self.run(
                session,
                Action::CreateStory {
                    room,
                    title: title.into(),
                    description: None,
                    participant_id,
                },
            );
            out.into_iter()
                .find_map(|d| match d {
                    Delivery::Room(_, _, Event::StoryCreated { story }) => Some(story),
                    _ => None,
                })
                .unwrap()
        }

        fn story(&self, story_id: Uuid) -> Story {
            let store = self.coordinator.store.lock().unwrap();
            store.find_story_by_id(story_id).unwrap().unwrap()
        }
    }

    fn error_kind(out: &[Delivery]) -> ErrorKind {
        match out {
            [Delivery::To(_, Event::Error { kind, .. })] => *kind,
            other => panic!("expected a single error, got {other:?}"),
        }
    }

    fn start(room: Uuid, story_id: Uuid, participant_id: Uuid) -> Action {
        Action::StartVoting {
            room,
            story_id,
            participant_id,
        }
    }

    fn vote(room: Uuid, story_id: Uuid, participant_id: Uuid, points: f64) -> Action {
        Action::SubmitVote {
            room,
            story_id,
            points,
            participant_id,
        }
    }

    fn reveal(room: Uuid, story_id: Uuid, participant_id: Uuid) -> Action {
        Action::RevealVotes {
            room,
            story_id,
            participant_id,
        }
    }

    fn finalize(room: Uuid, story_id: Uuid, participant_id: Uuid, value: f64) -> Action {
        Action::FinalizeEstimate {
            room,
            story_id,
            final_estimate: value,
            participant_id,
        }
    }

    #[test]
    fn test_full_estimation_round() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        let (mut bob_s, bob) = h.join(2, room, "Bob", "FE");
        assert!(alice.is_admin);
        assert!(!bob.is_admin);

        let story = h.create_story(&mut alice_s, room, "Implement login");

        h.run(&mut alice_s, start(room, story.id, alice.id));
        h.run(&mut alice_s, vote(room, story.id, alice.id, 5.0));
        let out = h.run(&mut bob_s, vote(room, story.id, bob.id, 3.0));
        match &out[..] {
            [Delivery::Room(r, None, Event::VoteSubmitted { vote_count, participant_count, .. })] => {
                assert_eq!(*r, room);
                assert_eq!((*vote_count, *participant_count), (2, 2));
            }
            other => panic!("unexpected {other:?}"),
        }

        let out = h.run(&mut alice_s, reveal(room, story.id, alice.id));
        let votes = match &out[..] {
            [Delivery::Room(_, None, Event::VotesRevealed { votes, .. })] => votes.clone(),
            other => panic!("unexpected {other:?}"),
        };
        let summary: Vec<_> = votes
            .iter()
            .map(|v| (v.participant_name.as_str(), v.points, v.competence))
            .collect();
        assert!(summary.contains(&("Alice", 5.0, Competence::Backend)));
        assert!(summary.contains(&("Bob", 3.0, Competence::Frontend)));

        let out = h.run(&mut alice_s, finalize(room, story.id, alice.id, 5.0));
        assert!(matches!(
            &out[..],
            [Delivery::Room(_, None, Event::EstimateFinalized { final_estimate, .. })] if *final_estimate == 5.0
        ));

        let stored = h.story(story.id);
        assert_eq!(stored.voting_state, VotingState::Finalized);
        assert_eq!(stored.status, estimo_core::StoryStatus::Completed);
        assert_eq!(stored.final_estimate, Some(5.0));
    }

    #[test]
    fn test_non_admin_cannot_start_voting() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, _) = h.join(1, room, "Alice", "BE");
        let (mut bob_s, bob) = h.join(2, room, "Bob", "FE");
        let story = h.create_story(&mut alice_s, room, "Login");

        let out = h.run(&mut bob_s, start(room, story.id, bob.id));

        assert!(matches!(&out[..], [Delivery::To(2, _)]));
        assert_eq!(error_kind(&out), ErrorKind::Unauthorized);
        assert_eq!(h.story(story.id).voting_state, VotingState::NotStarted);
    }

    #[test]
    fn test_unknown_competence_creates_nobody() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let mut session = ConnectionSession::new(1);

        let out = h.run(
            &mut session,
            Action::JoinRoom {
                room,
                name: "Dana".into(),
                competence: "Designer".into(),
                session_id: None,
            },
        );

        assert_eq!(error_kind(&out), ErrorKind::InvalidCompetence);
        assert_eq!(session.participant_id, None);
        let store = h.coordinator.store.lock().unwrap();
        assert_eq!(store.count_participants(room).unwrap(), 0);
    }

    #[test]
    fn test_join_missing_room() {
        let h = Harness::new();
        let mut session = ConnectionSession::new(1);
        let out = h.run(
            &mut session,
            Action::JoinRoom {
                room: Uuid::new_v4(),
                name: "Alice".into(),
                competence: "BE".into(),
                session_id: None,
            },
        );
        assert_eq!(error_kind(&out), ErrorKind::RoomNotFound);
    }

    #[test]
    fn test_rejoin_keeps_identity_and_refreshes_token() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (_, first) = h.join(1, room, "Alice", "BE");

        let mut session = ConnectionSession::new(2);
        let out = h.run(
            &mut session,
            Action::JoinRoom {
                room,
                name: "Alice".into(),
                competence: "BE".into(),
                session_id: Some("fresh-token".into()),
            },
        );

        let (participant, session_id, snapshot) = out
            .into_iter()
            .find_map(|d| match d {
                Delivery::To(2, Event::RoomJoined {
                    participant,
                    session_id,
                    snapshot,
                }) => Some((participant, session_id, snapshot)),
                _ => None,
            })
            .unwrap();
        assert_eq!(participant.id, first.id);
        assert!(participant.is_admin);
        assert_eq!(session_id, "fresh-token");
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(session.participant_id, Some(first.id));
    }

    #[test]
    fn test_join_announces_to_others_without_token() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        h.join(1, room, "Alice", "BE");

        let mut session = ConnectionSession::new(2);
        let out = h.run(
            &mut session,
            Action::JoinRoom {
                room,
                name: "Bob".into(),
                competence: "FE".into(),
                session_id: None,
            },
        );

        let to_others = out
            .iter()
            .find_map(|d| match d {
                Delivery::Room(r, Some(2), event @ Event::UserJoined { .. }) if *r == room => {
                    Some(event.clone())
                }
                _ => None,
            })
            .unwrap();
        let json = serde_json::to_string(&to_others).unwrap();
        assert!(!json.contains("session"));
        assert!(h.channel.rooms.lock().unwrap().contains(&(2, room)));
    }

    #[test]
    fn test_vote_before_start_is_rejected() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        let story = h.create_story(&mut alice_s, room, "Login");

        let out = h.run(&mut alice_s, vote(room, story.id, alice.id, 5.0));

        assert_eq!(error_kind(&out), ErrorKind::VotingNotActive);
        let store = h.coordinator.store.lock().unwrap();
        assert_eq!(store.count_votes(story.id).unwrap(), 0);
    }

    #[test]
    fn test_resubmitting_keeps_latest_vote() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        let story = h.create_story(&mut alice_s, room, "Login");

        h.run(&mut alice_s, start(room, story.id, alice.id));
        h.run(&mut alice_s, vote(room, story.id, alice.id, 3.0));
        let out = h.run(&mut alice_s, vote(room, story.id, alice.id, 8.0));
        assert!(matches!(
            &out[..],
            [Delivery::Room(_, None, Event::VoteSubmitted { vote_count: 1, .. })]
        ));

        let out = h.run(&mut alice_s, reveal(room, story.id, alice.id));
        match &out[..] {
            [Delivery::Room(_, None, Event::VotesRevealed { votes, .. })] => {
                assert_eq!(votes.len(), 1);
                assert_eq!(votes[0].points, 8.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_restart_clears_votes_and_estimate() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        let story = h.create_story(&mut alice_s, room, "Login");

        h.run(&mut alice_s, start(room, story.id, alice.id));
        h.run(&mut alice_s, vote(room, story.id, alice.id, 5.0));
        h.run(&mut alice_s, reveal(room, story.id, alice.id));
        h.run(&mut alice_s, finalize(room, story.id, alice.id, 5.0));

        let out = h.run(&mut alice_s, start(room, story.id, alice.id));
        assert!(matches!(&out[..], [Delivery::Room(_, None, Event::VotingStarted { .. })]));

        let stored = h.story(story.id);
        assert_eq!(stored.voting_state, VotingState::Accepting);
        assert_eq!(stored.final_estimate, None);
        let store = h.coordinator.store.lock().unwrap();
        assert_eq!(store.count_votes(story.id).unwrap(), 0);
    }

    #[test]
    fn test_finalize_requires_reveal() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        let story = h.create_story(&mut alice_s, room, "Login");

        let out = h.run(&mut alice_s, finalize(room, story.id, alice.id, 3.0));
        assert_eq!(error_kind(&out), ErrorKind::InvalidTransition);

        h.run(&mut alice_s, start(room, story.id, alice.id));
        let out = h.run(&mut alice_s, finalize(room, story.id, alice.id, 3.0));
        assert_eq!(error_kind(&out), ErrorKind::InvalidTransition);

        let out = h.run(&mut alice_s, reveal(room, story.id, alice.id));
        assert!(matches!(&out[..], [Delivery::Room(..)]));
        let out = h.run(&mut alice_s, reveal(room, story.id, alice.id));
        assert!(matches!(&out[..], [Delivery::Room(..)]));

        h.run(&mut alice_s, finalize(room, story.id, alice.id, 3.0));
        let out = h.run(&mut alice_s, reveal(room, story.id, alice.id));
        assert_eq!(error_kind(&out), ErrorKind::InvalidTransition);
        assert_eq!(h.story(story.id).final_estimate, Some(3.0));
    }

    #[test]
    fn test_reveal_before_start_is_not_active() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        let story = h.create_story(&mut alice_s, room, "Login");

        let out = h.run(&mut alice_s, reveal(room, story.id, alice.id));
        assert_eq!(error_kind(&out), ErrorKind::VotingNotActive);
    }

    #[test]
    fn test_story_of_other_room_is_not_found() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let other = h.create_room("Sprint 2");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        let (mut carol_s, _) = h.join(2, other, "Carol", "QA");
        let foreign = h.create_story(&mut carol_s, other, "Elsewhere");

        let out = h.run(&mut alice_s, start(room, foreign.id, alice.id));
        assert_eq!(error_kind(&out), ErrorKind::StoryNotFound);

        let out = h.run(
            &mut alice_s,
            Action::SetCurrentStory {
                room,
                story_id: foreign.id,
                participant_id: alice.id,
            },
        );
        assert_eq!(error_kind(&out), ErrorKind::StoryNotFound);
    }

    #[test]
    fn test_acting_for_someone_else_is_unauthorized() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (_, alice) = h.join(1, room, "Alice", "BE");
        let (mut bob_s, _) = h.join(2, room, "Bob", "FE");

        let out = h.run(
            &mut bob_s,
            Action::CreateStory {
                room,
                title: "Sneaky".into(),
                description: None,
                participant_id: alice.id,
            },
        );
        assert_eq!(error_kind(&out), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_make_admin() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        let (mut bob_s, bob) = h.join(2, room, "Bob", "FE");

        let out = h.run(
            &mut alice_s,
            Action::MakeAdmin {
                room,
                target_participant_id: Uuid::new_v4(),
                participant_id: alice.id,
            },
        );
        assert_eq!(error_kind(&out), ErrorKind::TargetNotFound);

        let out = h.run(
            &mut alice_s,
            Action::MakeAdmin {
                room,
                target_participant_id: bob.id,
                participant_id: alice.id,
            },
        );
        assert!(matches!(
            &out[..],
            [Delivery::Room(_, None, Event::AdminAdded { participant })] if participant.id == bob.id && participant.is_admin
        ));

        let story = h.create_story(&mut alice_s, room, "Login");
        let out = h.run(&mut bob_s, start(room, story.id, bob.id));
        assert!(matches!(&out[..], [Delivery::Room(_, None, Event::VotingStarted { .. })]));
    }

    #[test]
    fn test_similar_tasks_reply_to_caller() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");

        for (title, points) in [("Login", 5.0), ("Signup", 13.0)] {
            let story = h.create_story(&mut alice_s, room, title);
            h.run(&mut alice_s, start(room, story.id, alice.id));
            h.run(&mut alice_s, vote(room, story.id, alice.id, points));
            h.run(&mut alice_s, reveal(room, story.id, alice.id));
            h.run(&mut alice_s, finalize(room, story.id, alice.id, points));
        }

        let out = h.run(
            &mut alice_s,
            Action::GetSimilarTasks {
                room,
                vote_value: 4.5,
                competence: "BE".into(),
                limit: None,
            },
        );
        match &out[..] {
            [Delivery::To(1, Event::SimilarTasks { tasks })] => {
                assert_eq!(tasks.len(), 1);
                assert_eq!(tasks[0].title, "Login");
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut stranger = ConnectionSession::new(7);
        let out = h.run(
            &mut stranger,
            Action::GetSimilarTasks {
                room,
                vote_value: 5.0,
                competence: "BE".into(),
                limit: None,
            },
        );
        assert_eq!(error_kind(&out), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_story_limit_trims_oldest() {
        let h = Harness::with_settings(SessionSettings {
            max_stories_per_room: 2,
            ..SessionSettings::default()
        });
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        let first = h.create_story(&mut alice_s, room, "One");
        h.create_story(&mut alice_s, room, "Two");

        let out = h.run(
            &mut alice_s,
            Action::CreateStory {
                room,
                title: "Three".into(),
                description: None,
                participant_id: alice.id,
            },
        );

        assert!(out.iter().any(|d| matches!(
            d,
            Delivery::Room(_, None, Event::StoryDeleted { story_id }) if *story_id == first.id
        )));
        assert!(out.iter().any(|d| matches!(d, Delivery::Room(_, None, Event::StoryCreated { .. }))));
        assert!(!out
            .iter()
            .any(|d| matches!(d, Delivery::Room(_, _, Event::CurrentStoryChanged { .. }))));
    }

    #[test]
    fn test_trimming_current_story_clears_focus() {
        let h = Harness::with_settings(SessionSettings {
            max_stories_per_room: 1,
            ..SessionSettings::default()
        });
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        let first = h.create_story(&mut alice_s, room, "One");
        h.run(
            &mut alice_s,
            Action::SetCurrentStory {
                room,
                story_id: first.id,
                participant_id: alice.id,
            },
        );

        let out = h.run(
            &mut alice_s,
            Action::CreateStory {
                room,
                title: "Two".into(),
                description: None,
                participant_id: alice.id,
            },
        );

        assert!(out.iter().any(|d| matches!(
            d,
            Delivery::Room(_, None, Event::StoryDeleted { story_id }) if *story_id == first.id
        )));
        assert!(out.iter().any(|d| matches!(
            d,
            Delivery::Room(_, None, Event::CurrentStoryChanged { story: None })
        )));
        let store = h.coordinator.store.lock().unwrap();
        let stored = store.find_room_by_id(room).unwrap().unwrap();
        assert_eq!(stored.current_story_id, None);
    }

    #[test]
    fn test_backlog_management() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");

        let out = h.run(
            &mut alice_s,
            Action::CreateStories {
                room,
                stories: vec![
                    NewStory {
                        title: "A".into(),
                        description: None,
                    },
                    NewStory {
                        title: "B".into(),
                        description: Some("second".into()),
                    },
                ],
                participant_id: alice.id,
            },
        );
        let created = match &out[..] {
            [Delivery::Room(_, None, Event::StoriesCreated { stories })] => stories.clone(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(created.len(), 2);

        let out = h.run(
            &mut alice_s,
            Action::UpdateStory {
                room,
                story_id: created[0].id,
                title: "   ".into(),
                description: None,
                participant_id: alice.id,
            },
        );
        assert_eq!(error_kind(&out), ErrorKind::InvalidInput);

        let order = vec![created[1].id, created[0].id];
        h.run(
            &mut alice_s,
            Action::ReorderStories {
                room,
                story_ids: order.clone(),
                participant_id: alice.id,
            },
        );
        {
            let store = h.coordinator.store.lock().unwrap();
            let ids: Vec<_> = store.list_stories(room).unwrap().iter().map(|s| s.id).collect();
            assert_eq!(ids, order);
        }

        h.run(
            &mut alice_s,
            Action::SetCurrentStory {
                room,
                story_id: created[0].id,
                participant_id: alice.id,
            },
        );
        let out = h.run(
            &mut alice_s,
            Action::DeleteStory {
                room,
                story_id: created[0].id,
                participant_id: alice.id,
            },
        );
        assert!(matches!(
            &out[..],
            [
                Delivery::Room(_, None, Event::StoryDeleted { .. }),
                Delivery::Room(_, None, Event::CurrentStoryChanged { story: None }),
            ]
        ));
    }

    #[test]
    fn test_delete_room_unbinds_connection() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        h.join(2, room, "Bob", "FE");

        let out = h.run(
            &mut alice_s,
            Action::DeleteRoom {
                room,
                participant_id: alice.id,
            },
        );

        assert!(matches!(&out[..], [Delivery::Room(_, None, Event::RoomDeleted { .. })]));
        assert_eq!(alice_s.room_id, None);
        assert!(h.channel.rooms.lock().unwrap().is_empty());

        let out = h.run(&mut ConnectionSession::new(3), Action::JoinRoom {
            room,
            name: "Alice".into(),
            competence: "BE".into(),
            session_id: None,
        });
        assert_eq!(error_kind(&out), ErrorKind::RoomNotFound);
    }

    #[test]
    fn test_invalid_points_rejected() {
        let h = Harness::new();
        let room = h.create_room("Sprint 1");
        let (mut alice_s, alice) = h.join(1, room, "Alice", "BE");
        let story = h.create_story(&mut alice_s, room, "Login");
        h.run(&mut alice_s, start(room, story.id, alice.id));

        let out = h.run(&mut alice_s, vote(room, story.id, alice.id, -1.0));
        assert_eq!(error_kind(&out), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_ping() {
        let h = Harness::new();
        let out = h.run(&mut ConnectionSession::new(4), Action::Ping);
        assert!(matches!(&out[..], [Delivery::To(4, Event::Pong)]));
    }
}
