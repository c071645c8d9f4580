//! Room agents.
//!
//! Every automated participant is one [`AgentRole`]. Each role maps to one
//! [`AgentBehavior`], driven by [`run_agent`] over the member's inbox.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::debate_format::Speakers;
use crate::error::DebateError;
use crate::evaluator::StructuredEvaluator;
use crate::message::DebateMessage;
use crate::participant::{Debater, DebaterId, Speaker, SpeakingTurn};
use crate::persist::ArtifactStore;
use crate::room::{Inbox, RoomConnection, RoomTransport};
use crate::scheduler::RoundScheduler;
use crate::scoring::{FinalResults, ScoringEngine};
use crate::state::Mode;
use crate::store::{ProgressWriter, ScoreWriter, StateHandles, StateReader, TranscriptWriter};
use crate::transcript::TranscriptCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Moderator,
    Judge,
    /// Collects transcripts.
    Scribe,
    Debater(DebaterId),
}

impl AgentRole {
    /// Room identity of this role.
    pub fn identity(&self) -> String {
        match self {
            AgentRole::Moderator => "moderator".to_string(),
            AgentRole::Judge => "judge".to_string(),
            AgentRole::Scribe => "scribe".to_string(),
            AgentRole::Debater(id) => format!("debater_{}", id.letter()),
        }
    }

    pub fn from_identity(identity: &str) -> Result<Self, DebateError> {
        match identity {
            "moderator" => Ok(AgentRole::Moderator),
            "judge" => Ok(AgentRole::Judge),
            "scribe" => Ok(AgentRole::Scribe),
            other => other
                .strip_prefix("debater_")
                .filter(|rest| rest.len() == 1)
                .and_then(|rest| rest.chars().next())
                .and_then(DebaterId::from_letter)
                .map(AgentRole::Debater)
                .ok_or_else(|| DebateError::UnknownAgent(other.to_string())),
        }
    }

    /// Agents a debate in `mode` needs. Seats not listed are held by people.
    pub fn roster(mode: Mode) -> Vec<AgentRole> {
        let mut roles = vec![AgentRole::Moderator, AgentRole::Judge, AgentRole::Scribe];
        roles.extend(
            DebaterId::ALL
                .iter()
                .filter(|id| id.is_agent_seat(mode))
                .map(|id| AgentRole::Debater(*id)),
        );
        roles
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}

/// What an agent does with the messages it receives.
#[async_trait]
pub trait AgentBehavior: Send {
    async fn on_start(&mut self) -> Result<ControlFlow<()>, DebateError> {
        Ok(ControlFlow::Continue(()))
    }

    async fn on_message(&mut self, from: &str, message: DebateMessage) -> Result<ControlFlow<()>, DebateError>;
}

/// Drive `behavior` until it breaks or the room goes away.
///
/// Unrecognized payloads and handler errors are logged and skipped; only a
/// closed room or a lost state owner stops the agent early.
pub async fn run_agent(
    role: AgentRole,
    mut behavior: Box<dyn AgentBehavior>,
    mut inbox: Inbox,
) -> Result<(), DebateError> {
    info!(agent = %role, "Agent started");
    if behavior.on_start().await?.is_break() {
        info!(agent = %role, "Agent finished");
        return Ok(());
    }

    while let Some(envelope) = inbox.recv().await {
        let message = match envelope.decode() {
            Ok(message) => message,
            Err(e) => {
                warn!(agent = %role, from = %envelope.from, error = %e, "Dropping unrecognized message");
                continue;
            }
        };
        match behavior.on_message(&envelope.from, message).await {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(())) => {
                info!(agent = %role, "Agent finished");
                return Ok(());
            }
            Err(e @ (DebateError::RoomClosed(_) | DebateError::StateUnavailable)) => return Err(e),
            Err(e) => error!(agent = %role, error = %e, "Message handling failed"),
        }
    }
    info!(agent = %role, "Agent disconnected");
    Ok(())
}

/// Scores rounds on request and produces the final results.
pub struct JudgeAgent {
    engine: ScoringEngine,
    results: Option<oneshot::Sender<FinalResults>>,
}

impl JudgeAgent {
    pub fn new(engine: ScoringEngine, results: oneshot::Sender<FinalResults>) -> Self {
        Self {
            engine,
            results: Some(results),
        }
    }
}

#[async_trait]
impl AgentBehavior for JudgeAgent {
    async fn on_message(&mut self, from: &str, message: DebateMessage) -> Result<ControlFlow<()>, DebateError> {
        match message {
            DebateMessage::ScoreRound => {
                self.engine.score_round().await?;
            }
            DebateMessage::FinalizeScores => {
                let results = self.engine.finalize().await?;
                if let Some(tx) = self.results.take() {
                    let _ = tx.send(results);
                }
                return Ok(ControlFlow::Break(()));
            }
            other => trace!(kind = other.kind(), from, "Judge ignoring message"),
        }
        Ok(ControlFlow::Continue(()))
    }
}

/// Hands inbound speech to the transcript collector.
pub struct ScribeAgent {
    collector: TranscriptCollector,
}

impl ScribeAgent {
    pub fn new(collector: TranscriptCollector) -> Self {
        Self { collector }
    }
}

#[async_trait]
impl AgentBehavior for ScribeAgent {
    async fn on_message(&mut self, from: &str, message: DebateMessage) -> Result<ControlFlow<()>, DebateError> {
        if let DebateMessage::Transcript { text } = message {
            match AgentRole::from_identity(from) {
                Ok(AgentRole::Debater(_)) => {
                    self.collector.receive_transcript(from, &text).await?;
                }
                _ => warn!(from, "Dropping speech from a member without a debater seat"),
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}

/// A consumer's view of the round clock.
///
/// Updates for a round older than the newest one seen are dropped, so
/// late or duplicated deliveries cannot roll the view back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundView {
    pub round_index: Option<usize>,
    pub round: String,
    pub speakers: Option<Speakers>,
    pub time_remaining: f64,
}

impl RoundView {
    /// Returns false when the update was stale and ignored.
    pub fn apply(&mut self, round_index: usize, round: &str, speakers: &Speakers, time_remaining: f64) -> bool {
        if self.round_index.is_some_and(|current| round_index < current) {
            return false;
        }
        self.round_index = Some(round_index);
        self.round = round.to_string();
        self.speakers = Some(speakers.clone());
        self.time_remaining = time_remaining;
        true
    }
}

/// An automated debater seat.
pub struct DebaterAgent {
    id: DebaterId,
    room: Arc<dyn RoomTransport>,
    state: StateReader,
    speaker: Arc<dyn Speaker>,
    view: RoundView,
}

impl DebaterAgent {
    pub fn new(
        id: DebaterId,
        room: Arc<dyn RoomTransport>,
        state: StateReader,
        speaker: Arc<dyn Speaker>,
    ) -> Self {
        Self {
            id,
            room,
            state,
            speaker,
            view: RoundView::default(),
        }
    }

    async fn take_turn(&mut self) -> Result<(), DebateError> {
        let state = self.state.snapshot().await?;
        let Some(side) = state.roles.get(&self.id.team()).copied() else {
            warn!(debater = %self.id, "Given the floor before sides were assigned");
            return Ok(());
        };
        let Some(round) = state.current_round() else {
            return Ok(());
        };

        let turn = SpeakingTurn {
            debater: Debater::new(self.id, side, state.topic.clone()),
            round: round.name.clone(),
            crossfire: round.speakers.is_crossfire(),
            time_remaining: self.view.time_remaining,
        };
        match self.speaker.speak(&turn).await? {
            Some(text) => {
                debug!(debater = %self.id, round = %turn.round, chars = text.len(), "Speaking");
                self.room.broadcast(&DebateMessage::Transcript { text }).await?;
            }
            None => debug!(debater = %self.id, "Nothing to say"),
        }
        Ok(())
    }
}

#[async_trait]
impl AgentBehavior for DebaterAgent {
    async fn on_message(&mut self, from: &str, message: DebateMessage) -> Result<ControlFlow<()>, DebateError> {
        match message {
            DebateMessage::SetSpeaking { can_speak } => {
                debug!(debater = %self.id, can_speak, "Speaking permission changed");
                if can_speak {
                    self.take_turn().await?;
                }
            }
            DebateMessage::State {
                round,
                round_index,
                speakers,
                time_remaining,
            } => {
                if !self.view.apply(round_index, &round, &speakers, time_remaining) {
                    trace!(debater = %self.id, round_index, "Discarding stale state update");
                }
            }
            DebateMessage::Announcement { message } => {
                debug!(debater = %self.id, from, announcement = %message, "Heard announcement");
            }
            _ => {}
        }
        Ok(ControlFlow::Continue(()))
    }
}

/// Builds the behavior for each role.
///
/// Holds the single writer of each state field group and gives each one
/// out once, so a second moderator, judge or scribe cannot be built.
pub struct AgentFactory {
    reader: StateReader,
    progress: Option<ProgressWriter>,
    scores: Option<ScoreWriter>,
    transcripts: Option<TranscriptWriter>,
    room_id: String,
    topics: Vec<String>,
    prep_budget_secs: u64,
    seed: Option<u64>,
    artifacts: ArtifactStore,
    evaluator: Arc<dyn StructuredEvaluator>,
    speaker: Arc<dyn Speaker>,
    results: Option<oneshot::Sender<FinalResults>>,
}

/// Everything the factory needs besides the state handles.
pub struct AgentResources {
    pub room_id: String,
    pub topics: Vec<String>,
    pub prep_budget_secs: u64,
    pub seed: Option<u64>,
    pub artifacts: ArtifactStore,
    pub evaluator: Arc<dyn StructuredEvaluator>,
    pub speaker: Arc<dyn Speaker>,
}

impl AgentFactory {
    pub fn new(
        handles: StateHandles,
        resources: AgentResources,
        results: oneshot::Sender<FinalResults>,
    ) -> Self {
        Self {
            reader: handles.reader,
            progress: Some(handles.progress),
            scores: Some(handles.scores),
            transcripts: Some(handles.transcripts),
            room_id: resources.room_id,
            topics: resources.topics,
            prep_budget_secs: resources.prep_budget_secs,
            seed: resources.seed,
            artifacts: resources.artifacts,
            evaluator: resources.evaluator,
            speaker: resources.speaker,
            results: Some(results),
        }
    }

    pub fn build(&mut self, role: AgentRole, connection: RoomConnection) -> Result<Box<dyn AgentBehavior>, DebateError> {
        let room: Arc<dyn RoomTransport> = Arc::new(connection);
        let taken = || DebateError::InvalidState(format!("{} already created", role));

        let behavior: Box<dyn AgentBehavior> = match role {
            AgentRole::Moderator => {
                let progress = self.progress.take().ok_or_else(taken)?;
                let scheduler = RoundScheduler::new(
                    room,
                    self.reader.clone(),
                    progress,
                    self.topics.clone(),
                    self.prep_budget_secs,
                );
                Box::new(match self.seed {
                    Some(seed) => scheduler.with_seed(seed),
                    None => scheduler,
                })
            }
            AgentRole::Judge => {
                let scores = self.scores.take().ok_or_else(taken)?;
                let results = self.results.take().ok_or_else(taken)?;
                let engine = ScoringEngine::new(
                    room,
                    self.reader.clone(),
                    scores,
                    Arc::clone(&self.evaluator),
                    self.artifacts.clone(),
                );
                Box::new(JudgeAgent::new(engine, results))
            }
            AgentRole::Scribe => {
                let writer = self.transcripts.take().ok_or_else(taken)?;
                let collector = TranscriptCollector::new(self.room_id.clone(), writer, self.artifacts.clone());
                Box::new(ScribeAgent::new(collector))
            }
            AgentRole::Debater(id) => Box::new(DebaterAgent::new(
                id,
                room,
                self.reader.clone(),
                Arc::clone(&self.speaker),
            )),
        };
        Ok(behavior)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use crate::debate_format::RoundDescriptor;
    use crate::participant::{Side, Team};
    use crate::room::LocalRoom;
    use crate::state::DebateState;
    use crate::store::StateStore;

    struct EchoSpeaker {
        turns: Mutex<Vec<SpeakingTurn>>,
    }

    #[async_trait]
    impl Speaker for EchoSpeaker {
        async fn speak(&self, turn: &SpeakingTurn) -> Result<Option<String>, DebateError> {
            self.turns.lock().unwrap().push(turn.clone());
            Ok(Some(format!("{} speaking in {}", turn.debater.id, turn.round)))
        }
    }

    #[test]
    fn test_identity_round_trip() {
        for role in AgentRole::roster(Mode::Single) {
            assert_eq!(AgentRole::from_identity(&role.identity()).unwrap(), role);
        }
        assert_eq!(
            AgentRole::from_identity("debater_a").unwrap(),
            AgentRole::Debater(DebaterId::A)
        );
    }

    #[test]
    fn test_unknown_identity() {
        for bad in ["referee", "debater_e", "debater_", "debater_ab"] {
            assert!(matches!(
                AgentRole::from_identity(bad),
                Err(DebateError::UnknownAgent(_))
            ));
        }
    }

    #[test]
    fn test_roster_by_mode() {
        let multi = AgentRole::roster(Mode::Multi);
        assert!(multi.contains(&AgentRole::Debater(DebaterId::C)));
        assert!(multi.contains(&AgentRole::Debater(DebaterId::D)));
        assert!(!multi.contains(&AgentRole::Debater(DebaterId::B)));
        assert!(!multi.contains(&AgentRole::Debater(DebaterId::A)));

        let single = AgentRole::roster(Mode::Single);
        assert!(single.contains(&AgentRole::Debater(DebaterId::B)));
        assert_eq!(single.len(), multi.len() + 1);
    }

    #[test]
    fn test_round_view_discards_stale_rounds() {
        let mut view = RoundView::default();
        let speakers = Speakers::Single(DebaterId::C);
        assert!(view.apply(2, "crossfire_ac", &speakers, 100.0));
        assert!(view.apply(2, "crossfire_ac", &speakers, 99.9));
        assert!(!view.apply(1, "constructive_c", &speakers, 12.0));
        assert_eq!(view.round, "crossfire_ac");
        assert_eq!(view.time_remaining, 99.9);
        assert!(view.apply(3, "rebuttal_b", &speakers, 240.0));
        assert_eq!(view.round_index, Some(3));
    }

    #[tokio::test]
    async fn test_debater_speaks_when_enabled() {
        let handles = StateStore::spawn(
            DebateState::new("room-agent", Mode::Multi)
                .with_rounds(vec![RoundDescriptor::single("constructive_c", 240, DebaterId::C)]),
        );
        handles
            .progress
            .assign(
                BTreeMap::from([(Team::T1, Side::Pro), (Team::T2, Side::Con)]),
                "Is universal basic income a viable economic policy?".to_string(),
                120,
            )
            .await
            .unwrap();

        let room = LocalRoom::new("room-agent");
        let (connection, _) = room.join("debater_c");
        let (_, mut scribe) = room.join("scribe");
        let speaker = Arc::new(EchoSpeaker {
            turns: Mutex::new(Vec::new()),
        });
        let mut agent = DebaterAgent::new(DebaterId::C, Arc::new(connection), handles.reader.clone(), speaker.clone());

        agent
            .on_message(
                "moderator",
                DebateMessage::State {
                    round: "constructive_c".to_string(),
                    round_index: 0,
                    speakers: Speakers::Single(DebaterId::C),
                    time_remaining: 240.0,
                },
            )
            .await
            .unwrap();
        agent
            .on_message("moderator", DebateMessage::SetSpeaking { can_speak: false })
            .await
            .unwrap();
        assert!(scribe.try_recv().is_err());
        agent
            .on_message("moderator", DebateMessage::SetSpeaking { can_speak: true })
            .await
            .unwrap();

        let envelope = scribe.recv().await.unwrap();
        assert_eq!(envelope.from, "debater_c");
        assert_eq!(
            envelope.decode().unwrap(),
            DebateMessage::Transcript {
                text: "C speaking in constructive_c".to_string()
            }
        );

        let turns = speaker.turns.lock().unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].debater.side, Side::Con);
        assert_eq!(turns[0].time_remaining, 240.0);
        assert!(!turns[0].crossfire);
    }

    #[tokio::test]
    async fn test_factory_builds_each_writer_role_once() {
        let handles = StateStore::spawn(DebateState::new("room-factory", Mode::Multi));
        let (tx, _rx) = oneshot::channel();
        let dir = tempfile::tempdir().unwrap();
        let mut factory = AgentFactory::new(
            handles,
            AgentResources {
                room_id: "room-factory".to_string(),
                topics: vec!["Topic".to_string()],
                prep_budget_secs: 120,
                seed: Some(1),
                artifacts: ArtifactStore::new(dir.path()),
                evaluator: Arc::new(NeverEvaluator),
                speaker: Arc::new(crate::participant::SilentSpeaker),
            },
            tx,
        );
        let room = LocalRoom::new("room-factory");

        for role in [AgentRole::Moderator, AgentRole::Judge, AgentRole::Scribe] {
            assert!(factory.build(role, room.join(role.identity()).0).is_ok());
            assert!(matches!(
                factory.build(role, room.join(role.identity()).0),
                Err(DebateError::InvalidState(_))
            ));
        }
        // Debater seats share the read-only handle.
        let seat = AgentRole::Debater(DebaterId::D);
        assert!(factory.build(seat, room.join(seat.identity()).0).is_ok());
        assert!(factory.build(seat, room.join(seat.identity()).0).is_ok());
    }

    #[tokio::test]
    async fn test_scribe_keeps_only_debater_speech() {
        let handles = StateStore::spawn(
            DebateState::new("room-scribe", Mode::Multi)
                .with_rounds(vec![RoundDescriptor::single("constructive_c", 240, DebaterId::C)]),
        );
        let reader = handles.reader.clone();
        let dir = tempfile::tempdir().unwrap();
        let collector = TranscriptCollector::new("room-scribe", handles.transcripts, ArtifactStore::new(dir.path()));
        let mut scribe = ScribeAgent::new(collector);

        for from in ["audience", "moderator", "debater_e", "debater_c"] {
            let text = format!("{from} has the floor");
            scribe
                .on_message(from, DebateMessage::Transcript { text })
                .await
                .unwrap();
        }

        let said = reader.snapshot().await.unwrap().round_transcript("constructive_c");
        assert_eq!(said.len(), 1);
        assert_eq!(said["debater_c"], vec!["debater_c has the floor"]);
    }

    /// Records the kind of every message it is handed.
    struct Recorder {
        kinds: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl AgentBehavior for Recorder {
        async fn on_message(&mut self, _from: &str, message: DebateMessage) -> Result<ControlFlow<()>, DebateError> {
            self.kinds.lock().unwrap().push(message.kind());
            if message == DebateMessage::FinalizeScores {
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        }
    }

    #[tokio::test]
    async fn test_unknown_payloads_do_not_stop_the_agent() {
        let room = LocalRoom::new("room-loop");
        let (_, inbox) = room.join("recorder");
        let kinds = Arc::new(Mutex::new(Vec::new()));

        room.deliver("debater_a", Some("recorder"), br#"{"type":"metrics"}"#.to_vec())
            .unwrap();
        room.deliver("debater_a", Some("recorder"), b"\x00not json".to_vec())
            .unwrap();
        room.deliver(
            "debater_a",
            Some("recorder"),
            DebateMessage::Transcript {
                text: "Still here".to_string(),
            }
            .encode()
            .unwrap(),
        )
        .unwrap();
        room.deliver("moderator", Some("recorder"), DebateMessage::FinalizeScores.encode().unwrap())
            .unwrap();

        let recorder = Recorder {
            kinds: Arc::clone(&kinds),
        };
        run_agent(AgentRole::Scribe, Box::new(recorder), inbox).await.unwrap();
        assert_eq!(*kinds.lock().unwrap(), ["transcript", "finalize_scores"]);
    }

    struct NeverEvaluator;

    #[async_trait]
    impl StructuredEvaluator for NeverEvaluator {
        async fn ask_structured(&self, _prompt: &str) -> Result<crate::evaluator::Judgment, DebateError> {
            Err(DebateError::EmptyResponse)
        }
    }
}
