//! Session wiring.
//!
//! [`DebateSession`] creates the room and the state owner, seats one agent
//! per role of the roster and runs them until the judge publishes the
//! final results.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentBehavior, AgentFactory, AgentResources, AgentRole, run_agent};
use crate::config::Config;
use crate::debate_format::{DEFAULT_TOPICS, RoundDescriptor};
use crate::error::DebateError;
use crate::evaluator::StructuredEvaluator;
use crate::participant::Speaker;
use crate::persist::ArtifactStore;
use crate::room::{Inbox, LocalRoom, RoomConnection};
use crate::scoring::FinalResults;
use crate::state::{DEFAULT_PREP_BUDGET_SECS, DebateState, Mode};
use crate::store::StateStore;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room_id: String,
    pub mode: Mode,
    pub topics: Vec<String>,
    pub prep_budget_secs: u64,
    /// Replaces the public forum sequence when set.
    pub rounds: Option<Vec<RoundDescriptor>>,
    pub artifacts_dir: PathBuf,
    /// Fixes the side and topic draw.
    pub seed: Option<u64>,
}

impl SessionConfig {
    pub fn new(room_id: impl Into<String>, mode: Mode) -> Self {
        Self {
            room_id: room_id.into(),
            mode,
            topics: DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
            prep_budget_secs: DEFAULT_PREP_BUDGET_SECS,
            rounds: None,
            artifacts_dir: PathBuf::from("."),
            seed: None,
        }
    }

    pub fn from_config(room_id: impl Into<String>, config: &Config, time_scale: f64) -> Result<Self, DebateError> {
        Ok(Self {
            room_id: room_id.into(),
            mode: config.debate.mode,
            topics: config.debate.topics.clone(),
            prep_budget_secs: config.debate.prep_budget_secs,
            rounds: config.session_rounds(time_scale)?,
            artifacts_dir: config.output.dir.clone(),
            seed: None,
        })
    }
}

/// A debate whose agents have joined the room but not started.
pub struct DebateSession {
    room: Arc<LocalRoom>,
    mode: Mode,
    agents: Vec<(AgentRole, Box<dyn AgentBehavior>, Inbox)>,
    results: oneshot::Receiver<FinalResults>,
}

impl DebateSession {
    pub fn prepare(
        config: SessionConfig,
        evaluator: Arc<dyn StructuredEvaluator>,
        speaker: Arc<dyn Speaker>,
    ) -> Result<Self, DebateError> {
        let mut state = DebateState::new(config.room_id.clone(), config.mode);
        if let Some(rounds) = config.rounds {
            if rounds.is_empty() {
                return Err(DebateError::ConfigError("Round list is empty".to_string()));
            }
            state = state.with_rounds(rounds);
        }

        let room = LocalRoom::new(config.room_id.clone());
        let handles = StateStore::spawn(state);
        let (tx, results) = oneshot::channel();
        let mut factory = AgentFactory::new(
            handles,
            AgentResources {
                room_id: config.room_id.clone(),
                topics: config.topics,
                prep_budget_secs: config.prep_budget_secs,
                seed: config.seed,
                artifacts: ArtifactStore::new(config.artifacts_dir),
                evaluator,
                speaker,
            },
            tx,
        );

        let mut agents = Vec::new();
        for role in AgentRole::roster(config.mode) {
            let (connection, inbox) = room.join(role.identity());
            let behavior = factory.build(role, connection)?;
            agents.push((role, behavior, inbox));
        }
        info!(room = %config.room_id, mode = %config.mode, agents = agents.len(), "Debate session prepared");

        Ok(Self {
            room,
            mode: config.mode,
            agents,
            results,
        })
    }

    /// The session's room, for people and observers to join before start.
    pub fn room(&self) -> &Arc<LocalRoom> {
        &self.room
    }

    /// Take a debater seat for a person, by room identity.
    ///
    /// Seats played by an agent in this session's mode are refused.
    pub fn join_seat(&self, identity: &str) -> Result<(RoomConnection, Inbox), DebateError> {
        let AgentRole::Debater(id) = AgentRole::from_identity(identity)? else {
            return Err(DebateError::UnknownAgent(format!("{} is not a debater seat", identity)));
        };
        if id.is_agent_seat(self.mode) {
            return Err(DebateError::InvalidState(format!(
                "{} is played by an agent in {} mode",
                identity, self.mode
            )));
        }
        Ok(self.room.join(identity))
    }

    /// Spawn every agent and wait for the final results.
    ///
    /// Fails if the moderator or judge stops with an error before the
    /// results are published.
    pub async fn run(self) -> Result<FinalResults, DebateError> {
        let mut tasks = JoinSet::new();
        for (role, behavior, inbox) in self.agents {
            tasks.spawn(async move { (role, run_agent(role, behavior, inbox).await) });
        }

        let mut results = self.results;
        loop {
            tokio::select! {
                outcome = &mut results => {
                    tasks.shutdown().await;
                    return outcome.map_err(|_| {
                        DebateError::InvalidState("judge stopped without publishing results".to_string())
                    });
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok((role, Ok(()))) => debug!(agent = %role, "Agent task finished"),
                    Ok((role, Err(e))) => {
                        error!(agent = %role, error = %e, "Agent stopped");
                        if matches!(role, AgentRole::Moderator | AgentRole::Judge) {
                            tasks.shutdown().await;
                            self.room.close();
                            return Err(e);
                        }
                    }
                    Err(e) => warn!(error = %e, "Agent task panicked or was cancelled"),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::evaluator::Judgment;
    use crate::message::DebateMessage;
    use crate::participant::{DebaterId, SpeakingTurn};
    use crate::room::RoomTransport;
    use crate::scoring::Winner;

    struct FixedEvaluator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StructuredEvaluator for FixedEvaluator {
        async fn ask_structured(&self, prompt: &str) -> Result<Judgment, DebateError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(Judgment {
                t1: 24,
                t2: 28,
                explanation: "T2 brought evidence".to_string(),
            })
        }
    }

    struct ScriptedSpeaker;

    #[async_trait]
    impl Speaker for ScriptedSpeaker {
        async fn speak(&self, turn: &SpeakingTurn) -> Result<Option<String>, DebateError> {
            Ok(Some(format!("{} argues {}", turn.debater.id, turn.debater.side.display_name())))
        }
    }

    fn short_rounds() -> Vec<RoundDescriptor> {
        vec![
            RoundDescriptor::single("constructive_a", 2, DebaterId::A),
            RoundDescriptor::single("constructive_c", 3, DebaterId::C),
            RoundDescriptor::crossfire("crossfire_bd", 2, &[DebaterId::B, DebaterId::D]),
        ]
    }

    fn announcements(inbox: &mut Inbox) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(envelope) = inbox.try_recv() {
            if let Ok(DebateMessage::Announcement { message }) = envelope.decode() {
                seen.push(message);
            }
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_debate_produces_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SessionConfig::new("room-e2e", Mode::Multi);
        config.rounds = Some(short_rounds());
        config.artifacts_dir = dir.path().to_path_buf();
        config.seed = Some(7);

        let evaluator = Arc::new(FixedEvaluator {
            prompts: Mutex::new(Vec::new()),
        });
        let session = DebateSession::prepare(config, evaluator.clone(), Arc::new(ScriptedSpeaker)).unwrap();
        let (_, mut audience) = session.room().join("audience");
        let room = Arc::clone(session.room());

        let results = session.run().await.unwrap();

        assert_eq!(results.winner, Winner::T2);
        assert_eq!(results.t1_avg_score, 24.0);
        assert_eq!(results.t2_avg_score, 28.0);
        let rounds: Vec<_> = results.score_history.iter().map(|r| r.round.as_str()).collect();
        assert_eq!(rounds, ["constructive_a", "constructive_c", "crossfire_bd"]);
        assert!(room.is_closed());

        // Agent seats spoke; the human seats A and B stayed silent.
        let prompts = evaluator.prompts.lock().unwrap();
        assert!(prompts[1].contains("debater_c: C argues"));
        assert!(prompts[2].contains("debater_d: D argues"));
        assert!(!prompts[2].contains("debater_b"));

        assert!(ArtifactStore::new(dir.path()).results_path("room-e2e").exists());
        let heard = announcements(&mut audience);
        assert!(heard.iter().any(|m| m == "Starting round: Crossfire Bd"));
        assert_eq!(heard.last().map(String::as_str), Some("Debate concluded. Awaiting final scores from the Judge."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prep_request_pauses_between_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SessionConfig::new("room-prep", Mode::Single);
        config.rounds = Some(short_rounds());
        config.artifacts_dir = dir.path().to_path_buf();
        config.prep_budget_secs = 30;

        let session = DebateSession::prepare(
            config,
            Arc::new(FixedEvaluator {
                prompts: Mutex::new(Vec::new()),
            }),
            Arc::new(ScriptedSpeaker),
        )
        .unwrap();
        let (console, _) = session.join_seat("debater_a").unwrap();
        let (_, mut audience) = session.room().join("audience");
        console
            .send(
                &DebateMessage::RequestPrepTime {
                    team: "T1".to_string(),
                },
                AgentRole::Moderator,
            )
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let results = session.run().await.unwrap();
        assert_eq!(results.score_history.len(), 3);
        // 7s of rounds plus the whole 30s budget.
        assert!(started.elapsed() >= std::time::Duration::from_secs(37));

        let heard = announcements(&mut audience);
        let prep = heard
            .iter()
            .position(|m| m == "Team T1 using 0.5 min of prep time.")
            .unwrap();
        let over = heard.iter().position(|m| m == "Prep time for Team T1 is over.").unwrap();
        let second = heard
            .iter()
            .position(|m| m == "Starting round: Constructive C")
            .unwrap();
        assert!(prep < over && over < second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_topics_fail_the_session() {
        let mut config = SessionConfig::new("room-empty", Mode::Multi);
        config.topics.clear();
        config.rounds = Some(short_rounds());

        let session = DebateSession::prepare(
            config,
            Arc::new(FixedEvaluator {
                prompts: Mutex::new(Vec::new()),
            }),
            Arc::new(ScriptedSpeaker),
        )
        .unwrap();
        assert!(matches!(session.run().await, Err(DebateError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_people_take_only_free_seats() {
        let prepare = |mode| {
            DebateSession::prepare(
                SessionConfig::new("room-seats", mode),
                Arc::new(FixedEvaluator {
                    prompts: Mutex::new(Vec::new()),
                }),
                Arc::new(ScriptedSpeaker),
            )
            .unwrap()
        };

        let multi = prepare(Mode::Multi);
        assert!(multi.join_seat("debater_a").is_ok());
        assert!(multi.join_seat("debater_b").is_ok());
        assert!(matches!(multi.join_seat("debater_c"), Err(DebateError::InvalidState(_))));
        assert!(matches!(multi.join_seat("judge"), Err(DebateError::UnknownAgent(_))));
        assert!(matches!(multi.join_seat("audience"), Err(DebateError::UnknownAgent(_))));

        let single = prepare(Mode::Single);
        assert!(single.join_seat("debater_a").is_ok());
        assert!(matches!(single.join_seat("debater_b"), Err(DebateError::InvalidState(_))));
    }

    #[test]
    fn test_empty_round_list_rejected() {
        let mut config = SessionConfig::new("room-none", Mode::Multi);
        config.rounds = Some(Vec::new());
        let prepared = DebateSession::prepare(
            config,
            Arc::new(FixedEvaluator {
                prompts: Mutex::new(Vec::new()),
            }),
            Arc::new(ScriptedSpeaker),
        );
        assert!(matches!(prepared, Err(DebateError::ConfigError(_))));
    }
}
