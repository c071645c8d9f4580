//! Round sequencing for the moderator.
//!
//! [`RoundScheduler`] assigns sides and topic, runs each round's clock,
//! grants and revokes the floor, hands finished rounds to the judge and
//! serves prep-time requests. It is the only writer of the round index,
//! the clock, the side assignment, the topic and the prep budgets.
//!
//! Phases: `Idle -> AssigningRoles -> AwaitingPrep -> RoundActive(i) ->
//! Scoring(i) -> RoundActive(i + 1) ... -> Finalizing -> Ended`.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::agent::{AgentBehavior, AgentRole};
use crate::debate_format::RoundDescriptor;
use crate::error::DebateError;
use crate::message::DebateMessage;
use crate::participant::{DebaterId, Side, Team};
use crate::room::RoomTransport;
use crate::store::{ProgressWriter, StateReader};

/// Clock resolution of a running round.
pub const TICK: Duration = Duration::from_millis(100);

/// Most prep a team can take with one request, in seconds.
pub const PREP_REQUEST_CAP_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AssigningRoles,
    AwaitingPrep,
    RoundActive(usize),
    Scoring(usize),
    Finalizing,
    Ended,
}

pub struct RoundScheduler {
    room: Arc<dyn RoomTransport>,
    state: StateReader,
    progress: ProgressWriter,
    topics: Vec<String>,
    prep_budget_secs: u64,
    rng: StdRng,
    phase: Phase,
    /// Set between handing a round to the judge and hearing back.
    awaiting_scores: bool,
}

impl RoundScheduler {
    pub fn new(
        room: Arc<dyn RoomTransport>,
        state: StateReader,
        progress: ProgressWriter,
        topics: Vec<String>,
        prep_budget_secs: u64,
    ) -> Self {
        Self {
            room,
            state,
            progress,
            topics,
            prep_budget_secs,
            rng: StdRng::from_os_rng(),
            phase: Phase::Idle,
            awaiting_scores: false,
        }
    }

    /// Use a deterministic side/topic draw.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Draw sides and topic, reset budgets and progress, announce, then
    /// move on to the prep offer.
    pub async fn initialize(&mut self) -> Result<(), DebateError> {
        self.phase = Phase::AssigningRoles;

        let mut sides = [Side::Pro, Side::Con];
        sides.shuffle(&mut self.rng);
        let roles = BTreeMap::from([(Team::T1, sides[0]), (Team::T2, sides[1])]);

        let topic = self
            .topics
            .choose(&mut self.rng)
            .cloned()
            .ok_or_else(|| DebateError::ConfigError("no debate topics configured".to_string()))?;

        self.progress
            .assign(roles, topic.clone(), self.prep_budget_secs)
            .await?;

        self.announce(format!(
            "Team T1 (A, B) is {}, Team T2 (C, D) is {}. Topic: {}",
            sides[0].display_name(),
            sides[1].display_name(),
            topic
        ))
        .await?;

        self.offer_prep().await
    }

    /// Invite prep requests. Does not wait for any; requests arrive as
    /// separate messages.
    pub async fn offer_prep(&mut self) -> Result<(), DebateError> {
        self.phase = Phase::AwaitingPrep;
        self.announce("Do teams need prep time? Request it with your team ID (T1/T2).")
            .await?;
        self.start_round().await
    }

    /// Run the round at the current index to completion and hand it to the
    /// judge, or finalize if the sequence is exhausted.
    pub async fn start_round(&mut self) -> Result<(), DebateError> {
        if matches!(self.phase, Phase::Finalizing | Phase::Ended) {
            debug!(phase = ?self.phase, "Debate over, not starting a round");
            return Ok(());
        }
        if self.awaiting_scores {
            info!("Round start deferred until the judge reports scores");
            return Ok(());
        }

        let state = self.state.snapshot().await?;
        let index = state.round_index;
        let Some(round) = state.current_round().cloned() else {
            return self.finalize_debate().await;
        };

        self.phase = Phase::RoundActive(index);
        let duration = round.duration_secs as f64;
        self.progress.set_time_remaining(duration).await?;

        info!(round = %round.name, index, duration_secs = round.duration_secs, "Round starting");
        self.announce(format!("Starting round: {}", round.display_name()))
            .await?;
        self.room
            .broadcast(&state_message(&round, index, duration))
            .await?;

        let eligible: Vec<DebaterId> = round
            .speakers
            .ids()
            .into_iter()
            .filter(|id| id.is_agent_seat(state.mode))
            .collect();
        self.set_speaking(&eligible, true).await?;

        let remaining = self.run_countdown(&round, index).await?;

        self.announce("Time's up! Please stop speaking.").await?;
        self.set_speaking(&eligible, false).await?;

        if round.is_penalized() && remaining < 0.0 {
            self.announce(format!(
                "Warning: Round ended {:.1}s early. Points may be deducted.",
                remaining.abs()
            ))
            .await?;
        }

        let next_index = self.progress.advance_round().await?;
        self.phase = Phase::Scoring(index);
        self.awaiting_scores = true;
        info!(round = %round.name, next_index, "Round complete, requesting scores");

        self.room
            .send(&DebateMessage::ScoreRound, AgentRole::Judge)
            .await
    }

    /// Recompute the remaining time from a fixed deadline every tick and
    /// broadcast it. Returns the measured remaining time at expiry.
    async fn run_countdown(&mut self, round: &RoundDescriptor, index: usize) -> Result<f64, DebateError> {
        let deadline = Instant::now()
            .checked_add(Duration::from_secs(round.duration_secs))
            .ok_or_else(|| {
                DebateError::InvalidState(format!(
                    "round '{}' is too long to time ({}s)",
                    round.name, round.duration_secs
                ))
            })?;
        loop {
            tokio::time::sleep(TICK).await;
            let remaining = seconds_until(deadline);
            self.progress.set_time_remaining(remaining).await?;
            self.room
                .broadcast(&state_message(round, index, remaining))
                .await?;
            trace!(round = %round.name, remaining, "Tick");
            if remaining <= 0.0 {
                return Ok(remaining);
            }
        }
    }

    /// Spend prep time for `team`, then resume the debate.
    ///
    /// Rejections are announced and leave all budgets untouched.
    pub async fn request_prep(&mut self, team: &str) -> Result<(), DebateError> {
        let used = match self.progress.consume_prep(team, PREP_REQUEST_CAP_SECS).await? {
            Ok(secs) => secs,
            Err(rejection) => {
                info!(team, reason = %rejection, "Prep request rejected");
                return self.announce(rejection.to_string()).await;
            }
        };
        let team = team.trim();

        self.announce(format!(
            "Team {} using {:.1} min of prep time.",
            team,
            used as f64 / 60.0
        ))
        .await?;
        tokio::time::sleep(Duration::from_secs(used)).await;
        self.announce(format!("Prep time for Team {} is over.", team))
            .await?;

        self.start_round().await
    }

    /// Resume once the judge has scored every completed round.
    ///
    /// Handoffs from anyone but the judge, and repeats for a round that
    /// already resumed, are ignored.
    pub async fn continue_debate(&mut self, from: &str) -> Result<(), DebateError> {
        if from != AgentRole::Judge.identity() {
            trace!(from, "Ignoring continue_debate from a non-judge member");
            return Ok(());
        }
        if !self.awaiting_scores {
            trace!(phase = ?self.phase, "Ignoring continue_debate with no round handed off");
            return Ok(());
        }
        let state = self.state.snapshot().await?;
        let scored = state.team_scores(Team::T1).len();
        if scored != state.round_index {
            trace!(scored, completed = state.round_index, "Ignoring continue_debate before the round is scored");
            return Ok(());
        }

        self.awaiting_scores = false;
        self.start_round().await
    }

    /// Close the debate and ask the judge for the final results.
    pub async fn finalize_debate(&mut self) -> Result<(), DebateError> {
        self.phase = Phase::Finalizing;
        self.announce("Debate concluded. Awaiting final scores from the Judge.")
            .await?;
        self.room
            .send(&DebateMessage::FinalizeScores, AgentRole::Judge)
            .await?;
        self.phase = Phase::Ended;
        Ok(())
    }

    async fn set_speaking(&self, debaters: &[DebaterId], can_speak: bool) -> Result<(), DebateError> {
        for id in debaters {
            self.room
                .send(&DebateMessage::SetSpeaking { can_speak }, AgentRole::Debater(*id))
                .await?;
        }
        Ok(())
    }

    async fn announce(&self, message: impl Into<String>) -> Result<(), DebateError> {
        let message = message.into();
        info!(announcement = %message, "Moderator");
        self.room
            .broadcast(&DebateMessage::announcement(message))
            .await
    }

    fn flow(&self) -> ControlFlow<()> {
        if self.phase == Phase::Ended {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

#[async_trait]
impl AgentBehavior for RoundScheduler {
    async fn on_start(&mut self) -> Result<ControlFlow<()>, DebateError> {
        self.initialize().await?;
        Ok(self.flow())
    }

    async fn on_message(&mut self, from: &str, message: DebateMessage) -> Result<ControlFlow<()>, DebateError> {
        match message {
            DebateMessage::ContinueDebate => {
                self.continue_debate(from).await?;
            }
            DebateMessage::RequestPrepTime { team } => {
                self.request_prep(&team).await?;
            }
            other => trace!(kind = other.kind(), from, "Moderator ignoring message"),
        }
        Ok(self.flow())
    }
}

fn state_message(round: &RoundDescriptor, index: usize, remaining: f64) -> DebateMessage {
    DebateMessage::State {
        round: round.name.clone(),
        round_index: index,
        speakers: round.speakers.clone(),
        time_remaining: remaining.max(0.0),
    }
}

/// Signed seconds from now until `deadline`; negative once it has passed.
fn seconds_until(deadline: Instant) -> f64 {
    let now = Instant::now();
    if now >= deadline {
        -(now - deadline).as_secs_f64()
    } else {
        (deadline - now).as_secs_f64()
    }
}
