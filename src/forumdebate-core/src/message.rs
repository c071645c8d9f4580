//! Messages exchanged over the debate room.
//!
//! Everything on the wire is a JSON object with a `type` tag. Receivers
//! decode with [`DebateMessage::decode`] and drop anything they cannot
//! recognize.

use serde::{Deserialize, Serialize};

use crate::debate_format::Speakers;
use crate::error::DebateError;
use crate::scoring::{FinalResults, Winner};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebateMessage {
    /// Moderator or judge speaking to the whole room.
    Announcement { message: String },
    /// Round clock, sent at round start and on every tick.
    State {
        round: String,
        round_index: usize,
        speakers: Speakers,
        time_remaining: f64,
    },
    /// Grants or revokes a debater's floor.
    SetSpeaking { can_speak: bool },
    Scores {
        round: String,
        #[serde(rename = "T1_score")]
        t1_score: u32,
        #[serde(rename = "T2_score")]
        t2_score: u32,
        explanation: String,
    },
    ScoreRound,
    ContinueDebate,
    FinalizeScores,
    FinalResults {
        winner: Winner,
        #[serde(rename = "T1_avg_score")]
        t1_avg_score: f64,
        #[serde(rename = "T2_avg_score")]
        t2_avg_score: f64,
        feedback: FinalResults,
    },
    /// Recognized speech from a debater.
    Transcript { text: String },
    RequestPrepTime { team: String },
}

impl DebateMessage {
    pub fn announcement(message: impl Into<String>) -> Self {
        DebateMessage::Announcement {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DebateMessage::Announcement { .. } => "announcement",
            DebateMessage::State { .. } => "state",
            DebateMessage::SetSpeaking { .. } => "set_speaking",
            DebateMessage::Scores { .. } => "scores",
            DebateMessage::ScoreRound => "score_round",
            DebateMessage::ContinueDebate => "continue_debate",
            DebateMessage::FinalizeScores => "finalize_scores",
            DebateMessage::FinalResults { .. } => "final_results",
            DebateMessage::Transcript { .. } => "transcript",
            DebateMessage::RequestPrepTime { .. } => "request_prep_time",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, DebateError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a payload, mapping unknown types and bad JSON to
    /// [`DebateError::UnknownMessage`].
    pub fn decode(payload: &[u8]) -> Result<Self, DebateError> {
        serde_json::from_slice(payload).map_err(|e| {
            let preview: String = String::from_utf8_lossy(payload).chars().take(80).collect();
            DebateError::UnknownMessage(format!("{} ({})", preview, e))
        })
    }
}
