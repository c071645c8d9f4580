//! Public forum round sequence.
//!
//! A debate is an ordered list of [`RoundDescriptor`]s. The built-in
//! sequence is the eleven-round public forum format; a configuration file
//! may replace it wholesale.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::participant::DebaterId;

/// Nominal length of the rounds that are checked for early endings.
pub const PENALIZED_ROUND_SECS: u64 = 180;

/// Longest round the clock will run.
pub const MAX_ROUND_SECS: u64 = 24 * 60 * 60;

/// Topics the moderator draws from when none are configured.
pub const DEFAULT_TOPICS: [&str; 3] = [
    "Should social media platforms regulate misinformation?",
    "Is universal basic income a viable economic policy?",
    "Should space exploration be prioritized over climate change solutions?",
];

/// Who holds the floor during a round.
///
/// Serializes as a bare id (`"A"`) for a single speaker and as a list
/// (`["A", "C"]`) for crossfire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Speakers {
    Single(DebaterId),
    Crossfire(Vec<DebaterId>),
}

impl Speakers {
    pub fn ids(&self) -> Vec<DebaterId> {
        match self {
            Speakers::Single(id) => vec![*id],
            Speakers::Crossfire(ids) => ids.clone(),
        }
    }

    pub fn is_crossfire(&self) -> bool {
        matches!(self, Speakers::Crossfire(_))
    }
}

/// One timed round of the debate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundDescriptor {
    pub name: String,
    pub duration_secs: u64,
    pub speakers: Speakers,
    /// Length before time scaling, when it differs from `duration_secs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominal_secs: Option<u64>,
}

impl RoundDescriptor {
    pub fn single(name: impl Into<String>, duration_secs: u64, speaker: DebaterId) -> Self {
        Self {
            name: name.into(),
            duration_secs,
            speakers: Speakers::Single(speaker),
            nominal_secs: None,
        }
    }

    pub fn crossfire(name: impl Into<String>, duration_secs: u64, speakers: &[DebaterId]) -> Self {
        Self {
            name: name.into(),
            duration_secs,
            speakers: Speakers::Crossfire(speakers.to_vec()),
            nominal_secs: None,
        }
    }

    /// "crossfire_ac" -> "Crossfire Ac", as read out by the moderator.
    pub fn display_name(&self) -> String {
        self.name
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Length the round was defined with, ignoring time scaling.
    pub fn nominal_duration_secs(&self) -> u64 {
        self.nominal_secs.unwrap_or(self.duration_secs)
    }

    /// Whether an overrun of this round costs points. Decided on the
    /// nominal length, so scaled three-minute rounds still count.
    pub fn is_penalized(&self) -> bool {
        self.nominal_duration_secs() == PENALIZED_ROUND_SECS
    }

    /// Same round with its duration multiplied, kept between one second
    /// and [`MAX_ROUND_SECS`].
    pub fn scaled(&self, factor: f64) -> Self {
        let scaled = (self.duration_secs as f64 * factor)
            .round()
            .clamp(1.0, MAX_ROUND_SECS as f64) as u64;
        Self {
            duration_secs: scaled,
            nominal_secs: Some(self.nominal_duration_secs()),
            ..self.clone()
        }
    }
}

static PUBLIC_FORUM_ROUNDS: LazyLock<Vec<RoundDescriptor>> = LazyLock::new(|| {
    use DebaterId::{A, B, C, D};
    vec![
        RoundDescriptor::single("constructive_a", 4 * 60, A),
        RoundDescriptor::single("constructive_c", 4 * 60, C),
        RoundDescriptor::crossfire("crossfire_ac", 3 * 60, &[A, C]),
        RoundDescriptor::single("rebuttal_b", 4 * 60, B),
        RoundDescriptor::single("rebuttal_d", 4 * 60, D),
        RoundDescriptor::crossfire("crossfire_bd", 3 * 60, &[B, D]),
        RoundDescriptor::single("summary_a", 3 * 60, A),
        RoundDescriptor::single("summary_c", 3 * 60, C),
        RoundDescriptor::crossfire("grand_crossfire", 3 * 60, &[A, B, C, D]),
        RoundDescriptor::single("final_focus_b", 2 * 60, B),
        RoundDescriptor::single("final_focus_d", 2 * 60, D),
    ]
});

/// The fixed eleven-round public forum sequence.
pub fn public_forum_rounds() -> &'static [RoundDescriptor] {
    &PUBLIC_FORUM_ROUNDS
}
