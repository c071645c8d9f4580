//! The debate's progress record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::debate_format::{RoundDescriptor, public_forum_rounds};
use crate::error::DebateError;
use crate::participant::{Side, Team};

/// Utterances longer than this many characters are cut.
pub const MAX_UTTERANCE_CHARS: usize = 1000;

/// Per-team prep budget at the start of a debate, in seconds.
pub const DEFAULT_PREP_BUDGET_SECS: u64 = 120;

/// Who is sitting at team T1's second seat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One person on team T1; debater B is an agent.
    Single,
    /// Both team T1 seats are people.
    #[default]
    Multi,
}

impl FromStr for Mode {
    type Err = DebateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(Mode::Single),
            "multi" => Ok(Mode::Multi),
            other => Err(DebateError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Single => write!(f, "single"),
            Mode::Multi => write!(f, "multi"),
        }
    }
}

/// Utterances of one round, keyed by speaker identity.
pub type RoundTranscript = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateState {
    pub room_id: String,
    pub mode: Mode,
    /// Index of the round about to run (or running); equals the number of
    /// completed rounds between rounds.
    pub round_index: usize,
    /// Measured seconds left in the current round. Can be slightly negative
    /// once a round overruns.
    pub time_remaining: f64,
    pub roles: BTreeMap<Team, Side>,
    pub topic: String,
    pub scores: BTreeMap<Team, Vec<u32>>,
    pub prep_time: BTreeMap<Team, u64>,
    pub transcripts: BTreeMap<String, RoundTranscript>,
    pub custom_rounds: Option<Vec<RoundDescriptor>>,
}

impl DebateState {
    pub fn new(room_id: impl Into<String>, mode: Mode) -> Self {
        Self {
            room_id: room_id.into(),
            mode,
            round_index: 0,
            time_remaining: 0.0,
            roles: BTreeMap::new(),
            topic: String::new(),
            scores: Team::ALL.iter().map(|t| (*t, Vec::new())).collect(),
            prep_time: BTreeMap::new(),
            transcripts: BTreeMap::new(),
            custom_rounds: None,
        }
    }

    pub fn with_rounds(mut self, rounds: Vec<RoundDescriptor>) -> Self {
        self.custom_rounds = Some(rounds);
        self
    }

    /// The active round sequence: the custom one if set, else the default.
    pub fn rounds(&self) -> &[RoundDescriptor] {
        self.custom_rounds.as_deref().unwrap_or(public_forum_rounds())
    }

    pub fn current_round(&self) -> Option<&RoundDescriptor> {
        self.rounds().get(self.round_index)
    }

    /// The most recently completed round.
    pub fn last_completed_round(&self) -> Option<&RoundDescriptor> {
        self.round_index
            .checked_sub(1)
            .and_then(|i| self.rounds().get(i))
    }

    pub fn team_scores(&self, team: Team) -> &[u32] {
        self.scores.get(&team).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn round_transcript(&self, round: &str) -> RoundTranscript {
        self.transcripts.get(round).cloned().unwrap_or_default()
    }
}

/// Cut text to at most [`MAX_UTTERANCE_CHARS`] characters.
pub fn truncate_utterance(text: &str) -> String {
    match text.char_indices().nth(MAX_UTTERANCE_CHARS) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// A judged round. Never modified once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRecord {
    pub round: String,
    #[serde(rename = "T1_score")]
    pub t1_score: u32,
    #[serde(rename = "T2_score")]
    pub t2_score: u32,
    pub explanation: String,
}
