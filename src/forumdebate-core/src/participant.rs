//! Teams, sides and debaters.
//!
//! Team T1 seats debaters A and B, team T2 seats C and D. Speech itself is
//! produced outside the core; a [`Speaker`] only hands back the words a
//! debater says when given the floor.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DebateError;
use crate::llm::{CompletionRequest, LlmClient, sanitize_response};
use crate::state::Mode;

/// One of the two competing teams.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Team {
    T1,
    T2,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::T1, Team::T2];

    /// Parse a team identifier as sent in prep requests.
    pub fn parse(id: &str) -> Option<Team> {
        match id.trim() {
            "T1" => Some(Team::T1),
            "T2" => Some(Team::T2),
            _ => None,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::T1 => write!(f, "T1"),
            Team::T2 => write!(f, "T2"),
        }
    }
}

/// The side of the resolution a team argues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Pro,
    Con,
}

impl Side {
    pub fn display_name(&self) -> &str {
        match self {
            Side::Pro => "Pro",
            Side::Con => "Con",
        }
    }
}

/// Seat identifier of one of the four debaters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DebaterId {
    A,
    B,
    C,
    D,
}

impl DebaterId {
    pub const ALL: [DebaterId; 4] = [DebaterId::A, DebaterId::B, DebaterId::C, DebaterId::D];

    pub fn team(&self) -> Team {
        match self {
            DebaterId::A | DebaterId::B => Team::T1,
            DebaterId::C | DebaterId::D => Team::T2,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            DebaterId::A => 'a',
            DebaterId::B => 'b',
            DebaterId::C => 'c',
            DebaterId::D => 'd',
        }
    }

    pub fn from_letter(letter: char) -> Option<DebaterId> {
        match letter.to_ascii_lowercase() {
            'a' => Some(DebaterId::A),
            'b' => Some(DebaterId::B),
            'c' => Some(DebaterId::C),
            'd' => Some(DebaterId::D),
            _ => None,
        }
    }

    /// Whether the moderator drives this seat's microphone.
    ///
    /// Team T2 is always seated by agents. On team T1 only B is, and only in
    /// single mode; A is always a person.
    pub fn is_agent_seat(&self, mode: Mode) -> bool {
        match self {
            DebaterId::C | DebaterId::D => true,
            DebaterId::B => mode == Mode::Single,
            DebaterId::A => false,
        }
    }
}

impl fmt::Display for DebaterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter().to_ascii_uppercase())
    }
}

const DEBATER_INSTRUCTIONS: &str = "You are a debater in a public forum debate. Your goal is to \
present compelling, logical, and evidence-based arguments based on your assigned side (Pro or \
Con) and the debate topic. During crossfire, engage directly with your opponent's points, asking \
questions or countering arguments. In rebuttals, counter weak or incorrect points, but remain \
respectful. Always end your turn with a question or prompt to keep the conversation interactive.";

/// A seated debater with its assignment for this debate.
#[derive(Debug, Clone)]
pub struct Debater {
    pub id: DebaterId,
    pub side: Side,
    pub topic: String,
}

impl Debater {
    pub fn new(id: DebaterId, side: Side, topic: impl Into<String>) -> Self {
        Self {
            id,
            side,
            topic: topic.into(),
        }
    }

    pub fn team(&self) -> Team {
        self.id.team()
    }

    pub fn system_prompt(&self) -> String {
        format!(
            "{} Your ID is {}, representing team {} arguing {}. The debate topic is: {}. \
Adapt your arguments to the current round (constructive, rebuttal, crossfire, summary, final \
focus) and respond to your opponents' points.

CRITICAL OUTPUT RULES:
- Output ONLY your spoken words, no stage directions
- Do NOT use markdown or asterisks
- Do NOT acknowledge being an AI",
            DEBATER_INSTRUCTIONS,
            self.id,
            self.team(),
            self.side.display_name(),
            self.topic
        )
    }
}

/// What a debater knows when handed the floor.
#[derive(Debug, Clone)]
pub struct SpeakingTurn {
    pub debater: Debater,
    pub round: String,
    pub crossfire: bool,
    pub time_remaining: f64,
}

impl SpeakingTurn {
    pub fn prompt(&self) -> String {
        let style = if self.crossfire {
            "This is a crossfire: address your opponents directly and keep it short."
        } else {
            "You have the floor alone: deliver a focused speech."
        };
        format!(
            "[Round: {}] About {:.0} seconds remain. {}",
            self.round.replace('_', " "),
            self.time_remaining.max(0.0),
            style
        )
    }
}

/// Produces a debater's words for a speaking turn.
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Returns `None` when the debater stays quiet.
    async fn speak(&self, turn: &SpeakingTurn) -> Result<Option<String>, DebateError>;
}

/// A speaker that never says anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeaker;

#[async_trait]
impl Speaker for SilentSpeaker {
    async fn speak(&self, _turn: &SpeakingTurn) -> Result<Option<String>, DebateError> {
        Ok(None)
    }
}

/// Speaker backed by an OpenAI-compatible chat model.
pub struct OpenAISpeaker {
    client: LlmClient,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAISpeaker {
    pub fn new(client: LlmClient, model: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
            temperature,
        }
    }
}

#[async_trait]
impl Speaker for OpenAISpeaker {
    async fn speak(&self, turn: &SpeakingTurn) -> Result<Option<String>, DebateError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            system: turn.debater.system_prompt(),
            user: turn.prompt(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let text = sanitize_response(&self.client.complete(&request).await?);
        Ok(if text.is_empty() { None } else { Some(text) })
    }
}
