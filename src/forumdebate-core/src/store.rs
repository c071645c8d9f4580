//! Single owner of [`DebateState`].
//!
//! The state lives inside one task. Everyone else talks to it through a
//! handle that sends commands over a channel. Write access is split into
//! three non-clonable writers so each field group has exactly one writer:
//!
//! - [`ProgressWriter`] (round scheduler): round index, clock, roles, topic, prep.
//! - [`ScoreWriter`] (scoring engine): per-team score lists.
//! - [`TranscriptWriter`] (transcript collector): transcripts.
//!
//! [`StateReader`] is clonable and only takes snapshots.

use std::collections::BTreeMap;
use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::DebateError;
use crate::participant::{Side, Team};
use crate::state::DebateState;

const COMMAND_BUFFER: usize = 256;

/// Why a prep request was turned down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepRejection {
    UnknownTeam(String),
    Exhausted(Team),
}

impl fmt::Display for PrepRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepRejection::UnknownTeam(team) => write!(f, "Invalid team: {}", team),
            PrepRejection::Exhausted(team) => write!(f, "Team {} has no prep time remaining.", team),
        }
    }
}

enum StateCommand {
    Snapshot(oneshot::Sender<DebateState>),
    Assign {
        roles: BTreeMap<Team, Side>,
        topic: String,
        prep_budget_secs: u64,
        reply: oneshot::Sender<()>,
    },
    SetTimeRemaining(f64),
    AdvanceRound(oneshot::Sender<usize>),
    ConsumePrep {
        team: String,
        cap_secs: u64,
        reply: oneshot::Sender<Result<u64, PrepRejection>>,
    },
    AppendScores {
        t1: u32,
        t2: u32,
        reply: oneshot::Sender<Result<(), DebateError>>,
    },
    AppendUtterance {
        speaker: String,
        text: String,
        reply: oneshot::Sender<Option<String>>,
    },
}

/// Handles returned by [`StateStore::spawn`].
pub struct StateHandles {
    pub reader: StateReader,
    pub progress: ProgressWriter,
    pub scores: ScoreWriter,
    pub transcripts: TranscriptWriter,
}

pub struct StateStore {
    state: DebateState,
    commands: mpsc::Receiver<StateCommand>,
}

impl StateStore {
    /// Move `state` into its owner task.
    ///
    /// The task ends once every handle has been dropped.
    pub fn spawn(state: DebateState) -> StateHandles {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let store = StateStore {
            state,
            commands: rx,
        };
        tokio::spawn(store.run());

        StateHandles {
            reader: StateReader { tx: tx.clone() },
            progress: ProgressWriter { tx: tx.clone() },
            scores: ScoreWriter { tx: tx.clone() },
            transcripts: TranscriptWriter { tx },
        }
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.apply(command);
        }
        debug!(room = %self.state.room_id, "State owner stopped");
    }

    fn apply(&mut self, command: StateCommand) {
        let state = &mut self.state;
        // A dropped reply receiver only means the requester went away.
        match command {
            StateCommand::Snapshot(reply) => {
                let _ = reply.send(state.clone());
            }
            StateCommand::Assign {
                roles,
                topic,
                prep_budget_secs,
                reply,
            } => {
                state.roles = roles;
                state.topic = topic;
                state.prep_time = Team::ALL.iter().map(|t| (*t, prep_budget_secs)).collect();
                state.round_index = 0;
                state.transcripts.clear();
                let _ = reply.send(());
            }
            StateCommand::SetTimeRemaining(secs) => {
                state.time_remaining = secs;
            }
            StateCommand::AdvanceRound(reply) => {
                if state.round_index < state.rounds().len() {
                    state.round_index += 1;
                } else {
                    warn!(round_index = state.round_index, "Round index already at end of sequence");
                }
                let _ = reply.send(state.round_index);
            }
            StateCommand::ConsumePrep {
                team,
                cap_secs,
                reply,
            } => {
                let result = match Team::parse(&team) {
                    Some(t) => match state.prep_time.get_mut(&t) {
                        Some(remaining) if *remaining > 0 => {
                            let used = (*remaining).min(cap_secs);
                            *remaining -= used;
                            Ok(used)
                        }
                        Some(_) => Err(PrepRejection::Exhausted(t)),
                        None => Err(PrepRejection::UnknownTeam(team)),
                    },
                    None => Err(PrepRejection::UnknownTeam(team)),
                };
                let _ = reply.send(result);
            }
            StateCommand::AppendScores { t1, t2, reply } => {
                let judged = state.team_scores(Team::T1).len();
                let result = if judged >= state.round_index {
                    Err(DebateError::InvalidState(format!(
                        "{} rounds already scored but only {} completed",
                        judged, state.round_index
                    )))
                } else {
                    state.scores.entry(Team::T1).or_default().push(t1);
                    state.scores.entry(Team::T2).or_default().push(t2);
                    Ok(())
                };
                let _ = reply.send(result);
            }
            StateCommand::AppendUtterance {
                speaker,
                text,
                reply,
            } => {
                let round = state.current_round().map(|r| r.name.clone());
                if let Some(name) = &round {
                    state
                        .transcripts
                        .entry(name.clone())
                        .or_default()
                        .entry(speaker)
                        .or_default()
                        .push(text);
                }
                let _ = reply.send(round);
            }
        }
    }
}

async fn request<T>(
    tx: &mpsc::Sender<StateCommand>,
    build: impl FnOnce(oneshot::Sender<T>) -> StateCommand,
) -> Result<T, DebateError> {
    let (reply, rx) = oneshot::channel();
    tx.send(build(reply))
        .await
        .map_err(|_| DebateError::StateUnavailable)?;
    rx.await.map_err(|_| DebateError::StateUnavailable)
}

#[derive(Clone)]
pub struct StateReader {
    tx: mpsc::Sender<StateCommand>,
}

impl StateReader {
    pub async fn snapshot(&self) -> Result<DebateState, DebateError> {
        request(&self.tx, StateCommand::Snapshot).await
    }
}

/// Round scheduler's write access.
pub struct ProgressWriter {
    tx: mpsc::Sender<StateCommand>,
}

impl ProgressWriter {
    /// Record the side assignment and topic, reset prep budgets, rewind to
    /// the first round and clear transcripts.
    pub async fn assign(
        &self,
        roles: BTreeMap<Team, Side>,
        topic: String,
        prep_budget_secs: u64,
    ) -> Result<(), DebateError> {
        request(&self.tx, |reply| StateCommand::Assign {
            roles,
            topic,
            prep_budget_secs,
            reply,
        })
        .await
    }

    pub async fn set_time_remaining(&self, secs: f64) -> Result<(), DebateError> {
        self.tx
            .send(StateCommand::SetTimeRemaining(secs))
            .await
            .map_err(|_| DebateError::StateUnavailable)
    }

    /// Move to the next round; returns the new round index.
    pub async fn advance_round(&self) -> Result<usize, DebateError> {
        request(&self.tx, StateCommand::AdvanceRound).await
    }

    /// Take up to `cap_secs` from `team`'s budget; returns the seconds taken.
    pub async fn consume_prep(
        &self,
        team: &str,
        cap_secs: u64,
    ) -> Result<Result<u64, PrepRejection>, DebateError> {
        let team = team.to_string();
        request(&self.tx, |reply| StateCommand::ConsumePrep {
            team,
            cap_secs,
            reply,
        })
        .await
    }
}

/// Scoring engine's write access.
pub struct ScoreWriter {
    tx: mpsc::Sender<StateCommand>,
}

impl ScoreWriter {
    /// Append one score per team. Fails if every completed round is
    /// already scored.
    pub async fn append(&self, t1: u32, t2: u32) -> Result<(), DebateError> {
        request(&self.tx, |reply| StateCommand::AppendScores { t1, t2, reply }).await?
    }
}

/// Transcript collector's write access.
pub struct TranscriptWriter {
    tx: mpsc::Sender<StateCommand>,
}

impl TranscriptWriter {
    /// Append to the current round's transcript for `speaker`.
    ///
    /// Returns the round name, or `None` once the debate has run past its
    /// last round.
    pub async fn append(&self, speaker: &str, text: String) -> Result<Option<String>, DebateError> {
        let speaker = speaker.to_string();
        request(&self.tx, |reply| StateCommand::AppendUtterance {
            speaker,
            text,
            reply,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate_format::RoundDescriptor;
    use crate::participant::DebaterId;
    use crate::state::Mode;

    fn two_round_state() -> DebateState {
        DebateState::new("room-store", Mode::Multi).with_rounds(vec![
            RoundDescriptor::single("constructive_c", 10, DebaterId::C),
            RoundDescriptor::single("constructive_d", 10, DebaterId::D),
        ])
    }

    fn roles() -> BTreeMap<Team, Side> {
        BTreeMap::from([(Team::T1, Side::Pro), (Team::T2, Side::Con)])
    }

    #[tokio::test]
    async fn test_assign_resets_progress() {
        let handles = StateStore::spawn(two_round_state());
        handles.transcripts.append("debater_c", "early".to_string()).await.unwrap();
        handles.progress.advance_round().await.unwrap();

        handles.progress.assign(roles(), "Topic".to_string(), 120).await.unwrap();

        let state = handles.reader.snapshot().await.unwrap();
        assert_eq!(state.round_index, 0);
        assert!(state.transcripts.is_empty());
        assert_eq!(state.prep_time.get(&Team::T1), Some(&120));
        assert_eq!(state.prep_time.get(&Team::T2), Some(&120));
        assert_eq!(state.topic, "Topic");
    }

    #[tokio::test]
    async fn test_advance_never_exceeds_sequence() {
        let handles = StateStore::spawn(two_round_state());
        assert_eq!(handles.progress.advance_round().await.unwrap(), 1);
        assert_eq!(handles.progress.advance_round().await.unwrap(), 2);
        assert_eq!(handles.progress.advance_round().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_prep_consumed_once() {
        let handles = StateStore::spawn(two_round_state());
        handles.progress.assign(roles(), "Topic".to_string(), 120).await.unwrap();

        assert_eq!(handles.progress.consume_prep("T1", 120).await.unwrap(), Ok(120));
        assert_eq!(
            handles.progress.consume_prep("T1", 120).await.unwrap(),
            Err(PrepRejection::Exhausted(Team::T1))
        );

        let state = handles.reader.snapshot().await.unwrap();
        assert_eq!(state.prep_time.get(&Team::T1), Some(&0));
        assert_eq!(state.prep_time.get(&Team::T2), Some(&120));
    }

    #[tokio::test]
    async fn test_prep_rejects_unknown_team_without_mutation() {
        let handles = StateStore::spawn(two_round_state());
        handles.progress.assign(roles(), "Topic".to_string(), 120).await.unwrap();

        assert_eq!(
            handles.progress.consume_prep("T9", 120).await.unwrap(),
            Err(PrepRejection::UnknownTeam("T9".to_string()))
        );
        let state = handles.reader.snapshot().await.unwrap();
        assert_eq!(state.prep_time.values().sum::<u64>(), 240);
    }

    #[tokio::test]
    async fn test_prep_before_assignment_is_unknown() {
        let handles = StateStore::spawn(two_round_state());
        assert!(matches!(
            handles.progress.consume_prep("T1", 120).await.unwrap(),
            Err(PrepRejection::UnknownTeam(_))
        ));
    }

    #[tokio::test]
    async fn test_scores_bounded_by_completed_rounds() {
        let handles = StateStore::spawn(two_round_state());
        assert!(handles.scores.append(25, 25).await.is_err());

        handles.progress.advance_round().await.unwrap();
        handles.scores.append(26, 27).await.unwrap();
        assert!(handles.scores.append(28, 28).await.is_err());

        let state = handles.reader.snapshot().await.unwrap();
        assert_eq!(state.team_scores(Team::T1), &[26]);
        assert_eq!(state.team_scores(Team::T2), &[27]);
    }

    #[tokio::test]
    async fn test_utterances_follow_round_index() {
        let handles = StateStore::spawn(two_round_state());
        let first = handles.transcripts.append("debater_c", "one".to_string()).await.unwrap();
        assert_eq!(first.as_deref(), Some("constructive_c"));

        handles.progress.advance_round().await.unwrap();
        handles.transcripts.append("debater_d", "two".to_string()).await.unwrap();
        handles.transcripts.append("debater_d", "three".to_string()).await.unwrap();

        handles.progress.advance_round().await.unwrap();
        let late = handles.transcripts.append("debater_d", "late".to_string()).await.unwrap();
        assert!(late.is_none());

        let state = handles.reader.snapshot().await.unwrap();
        assert_eq!(state.round_transcript("constructive_c")["debater_c"], vec!["one"]);
        assert_eq!(state.round_transcript("constructive_d")["debater_d"], vec!["two", "three"]);
    }
}
