//! Round scoring and the final verdict.
//!
//! [`ScoringEngine`] is the judge's brain. It is the only writer of the
//! per-team score lists and it keeps the ordered [`ScoreRecord`] history
//! that ends up in the final results.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::agent::AgentRole;
use crate::debate_format::RoundDescriptor;
use crate::error::DebateError;
use crate::evaluator::{DEFAULT_SCORE, Judgment, StructuredEvaluator, round_prompt};
use crate::message::DebateMessage;
use crate::participant::Team;
use crate::persist::ArtifactStore;
use crate::room::RoomTransport;
use crate::state::{DebateState, RoundTranscript, ScoreRecord};
use crate::store::{ScoreWriter, StateReader};

pub const MIN_SCORE: u32 = 21;
pub const MAX_SCORE: u32 = 30;
pub const MAX_EVALUATION_ATTEMPTS: u32 = 3;

/// Averages at or above this earn the "strong" framing in feedback.
pub const STRONG_AVERAGE: f64 = 27.0;

/// Seconds of overrun that cost one point.
const SECONDS_PER_PENALTY_POINT: f64 = 30.0;

const FAILED_EVALUATION: &str = "Failed to evaluate round";

pub fn clamp_score(raw: i64) -> u32 {
    raw.clamp(MIN_SCORE as i64, MAX_SCORE as i64) as u32
}

/// Whole points deducted from each team for a round that ended
/// `time_remaining` seconds past zero. Only three-minute rounds count.
pub fn shortfall_penalty(round: &RoundDescriptor, time_remaining: f64) -> u32 {
    if !round.is_penalized() || time_remaining >= 0.0 {
        return 0;
    }
    (time_remaining.abs() / SECONDS_PER_PENALTY_POINT).floor() as u32
}

/// Outcome of asking the backend for a verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Judged { judgment: Judgment, attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
}

/// Ask up to [`MAX_EVALUATION_ATTEMPTS`] times, one attempt at a time,
/// backing off 1s then 2s between attempts.
pub async fn request_judgment(evaluator: &dyn StructuredEvaluator, prompt: &str) -> Evaluation {
    let mut last_error = String::new();
    for attempt in 1..=MAX_EVALUATION_ATTEMPTS {
        match evaluator.ask_structured(prompt).await {
            Ok(judgment) => {
                return Evaluation::Judged {
                    judgment,
                    attempts: attempt,
                };
            }
            Err(e) => {
                warn!(attempt, max = MAX_EVALUATION_ATTEMPTS, error = %e, "Round evaluation attempt failed");
                last_error = e.to_string();
                if attempt < MAX_EVALUATION_ATTEMPTS {
                    tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
                }
            }
        }
    }
    Evaluation::Exhausted {
        attempts: MAX_EVALUATION_ATTEMPTS,
        last_error,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Winner {
    T1,
    T2,
    Tie,
}

impl Winner {
    pub fn from_averages(t1_avg: f64, t2_avg: f64) -> Self {
        if t1_avg > t2_avg {
            Winner::T1
        } else if t2_avg > t1_avg {
            Winner::T2
        } else {
            Winner::Tie
        }
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Winner::T1 => write!(f, "T1"),
            Winner::T2 => write!(f, "T2"),
            Winner::Tie => write!(f, "Tie"),
        }
    }
}

/// Feedback record persisted and broadcast when the debate ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalResults {
    pub winner: Winner,
    #[serde(rename = "T1_avg_score")]
    pub t1_avg_score: f64,
    #[serde(rename = "T2_avg_score")]
    pub t2_avg_score: f64,
    #[serde(rename = "T1_strengths")]
    pub t1_strengths: String,
    #[serde(rename = "T1_improvements")]
    pub t1_improvements: String,
    #[serde(rename = "T2_strengths")]
    pub t2_strengths: String,
    #[serde(rename = "T2_improvements")]
    pub t2_improvements: String,
    pub score_history: Vec<ScoreRecord>,
}

impl FinalResults {
    pub fn from_history(t1_avg: f64, t2_avg: f64, score_history: Vec<ScoreRecord>) -> Self {
        let winner = Winner::from_averages(t1_avg, t2_avg);
        let t1_strengths = if t1_avg >= STRONG_AVERAGE {
            "Strong logic and delivery"
        } else {
            "Consistent arguments"
        };
        let t2_strengths = if t2_avg >= STRONG_AVERAGE {
            "Effective refutation"
        } else {
            "Good engagement"
        };
        let t1_improvements = if winner == Winner::T2 {
            "Improve evidence"
        } else {
            "Maintain clarity"
        };
        let t2_improvements = if winner == Winner::T1 {
            "Enhance factual accuracy"
        } else {
            "Sustain persuasiveness"
        };

        Self {
            winner,
            t1_avg_score: round2(t1_avg),
            t2_avg_score: round2(t2_avg),
            t1_strengths: t1_strengths.to_string(),
            t1_improvements: t1_improvements.to_string(),
            t2_strengths: t2_strengths.to_string(),
            t2_improvements: t2_improvements.to_string(),
            score_history,
        }
    }

    pub fn to_message(&self) -> DebateMessage {
        DebateMessage::FinalResults {
            winner: self.winner,
            t1_avg_score: self.t1_avg_score,
            t2_avg_score: self.t2_avg_score,
            feedback: self.clone(),
        }
    }
}

fn mean(scores: &[u32]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().map(|s| *s as f64).sum::<f64>() / scores.len() as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct ScoringEngine {
    room: Arc<dyn RoomTransport>,
    state: StateReader,
    scores: ScoreWriter,
    evaluator: Arc<dyn StructuredEvaluator>,
    artifacts: ArtifactStore,
    history: Vec<ScoreRecord>,
}

impl ScoringEngine {
    pub fn new(
        room: Arc<dyn RoomTransport>,
        state: StateReader,
        scores: ScoreWriter,
        evaluator: Arc<dyn StructuredEvaluator>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            room,
            state,
            scores,
            evaluator,
            artifacts,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ScoreRecord] {
        &self.history
    }

    /// Judge one round and record the result in the score history.
    ///
    /// Never fails: a backend that cannot be reached or never returns a
    /// usable verdict yields the default scores.
    pub async fn evaluate_round(
        &mut self,
        round: &RoundDescriptor,
        transcripts: &RoundTranscript,
        state: &DebateState,
    ) -> ScoreRecord {
        let prompt = round_prompt(&round.name, transcripts);

        let (mut t1, mut t2, mut explanation) =
            match request_judgment(self.evaluator.as_ref(), &prompt).await {
                Evaluation::Judged { judgment, attempts } => {
                    info!(round = %round.name, attempts, raw_t1 = judgment.t1, raw_t2 = judgment.t2, "Round judged");
                    (clamp_score(judgment.t1), clamp_score(judgment.t2), judgment.explanation)
                }
                Evaluation::Exhausted {
                    attempts,
                    last_error,
                } => {
                    error!(round = %round.name, attempts, error = %last_error, "Falling back to default scores");
                    (
                        clamp_score(DEFAULT_SCORE),
                        clamp_score(DEFAULT_SCORE),
                        FAILED_EVALUATION.to_string(),
                    )
                }
            };

        if round.is_penalized() && state.time_remaining < 0.0 {
            let penalty = shortfall_penalty(round, state.time_remaining);
            t1 = t1.saturating_sub(penalty).max(MIN_SCORE);
            t2 = t2.saturating_sub(penalty).max(MIN_SCORE);
            explanation.push_str(&format!(
                " Deducted {} point(s) per team for early round end ({:.1}s).",
                penalty,
                state.time_remaining.abs()
            ));
        }

        let record = ScoreRecord {
            round: round.name.clone(),
            t1_score: t1,
            t2_score: t2,
            explanation,
        };
        self.history.push(record.clone());
        record
    }

    /// Score the round that just ended, publish the result and hand control
    /// back to the moderator.
    pub async fn score_round(&mut self) -> Result<Option<ScoreRecord>, DebateError> {
        let state = self.state.snapshot().await?;
        let Some(round) = state.last_completed_round().cloned() else {
            warn!("Score requested before any round completed");
            return Ok(None);
        };
        if self.history.len() >= state.round_index {
            warn!(round = %round.name, "Round already scored, ignoring request");
            return Ok(None);
        }

        let transcripts = state.round_transcript(&round.name);
        let record = self.evaluate_round(&round, &transcripts, &state).await;
        self.scores.append(record.t1_score, record.t2_score).await?;

        self.room
            .broadcast(&DebateMessage::Scores {
                round: record.round.clone(),
                t1_score: record.t1_score,
                t2_score: record.t2_score,
                explanation: record.explanation.clone(),
            })
            .await?;
        self.room
            .send(&DebateMessage::ContinueDebate, AgentRole::Moderator)
            .await?;
        Ok(Some(record))
    }

    /// Average the scores, persist and broadcast the results, then tear
    /// the room down.
    pub async fn finalize(&mut self) -> Result<FinalResults, DebateError> {
        let state = self.state.snapshot().await?;
        let t1_avg = mean(state.team_scores(Team::T1));
        let t2_avg = mean(state.team_scores(Team::T2));
        let results = FinalResults::from_history(t1_avg, t2_avg, self.history.clone());

        info!(
            winner = %results.winner,
            t1_avg = results.t1_avg_score,
            t2_avg = results.t2_avg_score,
            rounds = self.history.len(),
            "Debate finalized"
        );

        // Results still go out if they cannot be written.
        match self.artifacts.write_results(&state.room_id, &results).await {
            Ok(path) => info!(path = %path.display(), "Results saved"),
            Err(e) => error!(error = %e, "Failed to save results"),
        }

        self.room.broadcast(&results.to_message()).await?;
        self.room.delete_room().await?;
        Ok(results)
    }
}
