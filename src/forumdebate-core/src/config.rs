//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::debate_format::{DEFAULT_TOPICS, MAX_ROUND_SECS, RoundDescriptor, Speakers, public_forum_rounds};
use crate::error::DebateError;
use crate::participant::DebaterId;
use crate::state::{DEFAULT_PREP_BUDGET_SECS, Mode};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debate: DebateConfig,
    #[serde(default = "ModelConfig::judge")]
    pub judge: ModelConfig,
    #[serde(default = "ModelConfig::debaters")]
    pub debaters: ModelConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// How the debate itself runs.
#[derive(Debug, Clone, Deserialize)]
pub struct DebateConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    #[serde(default = "default_prep_budget")]
    pub prep_budget_secs: u64,
    /// Replaces the public forum sequence when present.
    #[serde(default)]
    pub rounds: Option<Vec<RoundConfig>>,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            topics: default_topics(),
            prep_budget_secs: DEFAULT_PREP_BUDGET_SECS,
            rounds: None,
        }
    }
}

/// One `[[debate.rounds]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RoundConfig {
    pub name: String,
    pub duration_secs: u64,
    pub speakers: Vec<DebaterId>,
}

impl RoundConfig {
    fn to_descriptor(&self) -> Result<RoundDescriptor, DebateError> {
        if self.duration_secs == 0 || self.duration_secs > MAX_ROUND_SECS {
            return Err(DebateError::ConfigError(format!(
                "Round '{}' must last between 1 and {} seconds, got {}",
                self.name, MAX_ROUND_SECS, self.duration_secs
            )));
        }
        let speakers = match self.speakers.as_slice() {
            [] => {
                return Err(DebateError::ConfigError(format!(
                    "Round '{}' has no speakers",
                    self.name
                )));
            }
            [only] => Speakers::Single(*only),
            many => Speakers::Crossfire(many.to_vec()),
        };
        Ok(RoundDescriptor {
            name: self.name.clone(),
            duration_secs: self.duration_secs,
            speakers,
            nominal_secs: None,
        })
    }
}

/// Backend settings for one kind of participant.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ModelConfig {
    fn judge() -> Self {
        Self {
            model: default_model(),
            max_tokens: 500,
            temperature: 0.5,
        }
    }

    fn debaters() -> Self {
        Self {
            model: default_model(),
            max_tokens: 400,
            temperature: 0.8,
        }
    }
}

/// Where transcripts and results are written.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_topics() -> Vec<String> {
    DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect()
}

fn default_prep_budget() -> u64 {
    DEFAULT_PREP_BUDGET_SECS
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, DebateError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DebateError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DebateError> {
        if self.debate.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(DebateError::ConfigError("At least one topic is required".to_string()));
        }
        if let Some(rounds) = &self.debate.rounds {
            if rounds.is_empty() {
                return Err(DebateError::ConfigError("Round list is empty".to_string()));
            }
            for round in rounds {
                round.to_descriptor()?;
            }
        }
        Ok(())
    }

    /// Round sequence to hand the session, if it differs from the default.
    ///
    /// Configured rounds replace the public forum sequence. Either one is
    /// scaled by `time_scale` when it is not 1.
    pub fn session_rounds(&self, time_scale: f64) -> Result<Option<Vec<RoundDescriptor>>, DebateError> {
        if !(time_scale.is_finite() && time_scale > 0.0) {
            return Err(DebateError::ConfigError(format!(
                "Time scale must be a positive number, got {}",
                time_scale
            )));
        }
        let rounds = match &self.debate.rounds {
            Some(rounds) => rounds
                .iter()
                .map(RoundConfig::to_descriptor)
                .collect::<Result<Vec<_>, _>>()?,
            None if time_scale == 1.0 => return Ok(None),
            None => public_forum_rounds().to_vec(),
        };
        if time_scale == 1.0 {
            return Ok(Some(rounds));
        }
        Ok(Some(rounds.iter().map(|r| r.scaled(time_scale)).collect()))
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config {
        debate: DebateConfig::default(),
        judge: ModelConfig::judge(),
        debaters: ModelConfig::debaters(),
        output: OutputConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.debate.mode, Mode::Multi);
        assert_eq!(config.debate.topics.len(), 3);
        assert_eq!(config.debate.prep_budget_secs, 120);
        assert_eq!(config.judge.model, DEFAULT_MODEL);
        assert_eq!(config.judge.temperature, 0.5);
        assert_eq!(config.debaters.temperature, 0.8);
        assert_eq!(config.output.dir, PathBuf::from("."));
        assert_eq!(config.session_rounds(1.0).unwrap(), None);
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_str(
            r#"
[debate]
mode = "single"
topics = ["Should homework be banned?"]
prep_budget_secs = 60

[[debate.rounds]]
name = "opening_a"
duration_secs = 90
speakers = ["A"]

[[debate.rounds]]
name = "crossfire_ac"
duration_secs = 180
speakers = ["A", "C"]

[judge]
model = "judge-model"
max_tokens = 300
temperature = 0.2

[debaters]
max_tokens = 200
temperature = 1.0

[output]
dir = "out"
"#,
        )
        .unwrap();

        assert_eq!(config.debate.mode, Mode::Single);
        assert_eq!(config.debate.prep_budget_secs, 60);
        assert_eq!(config.judge.model, "judge-model");
        assert_eq!(config.debaters.model, DEFAULT_MODEL);
        assert_eq!(config.output.dir, PathBuf::from("out"));

        let rounds = config.session_rounds(1.0).unwrap().unwrap();
        assert_eq!(rounds[0], RoundDescriptor::single("opening_a", 90, DebaterId::A));
        assert_eq!(
            rounds[1],
            RoundDescriptor::crossfire("crossfire_ac", 180, &[DebaterId::A, DebaterId::C])
        );
    }

    #[test]
    fn test_time_scale_shortens_default_rounds() {
        let rounds = default_config().session_rounds(0.05).unwrap().unwrap();
        assert_eq!(rounds.len(), public_forum_rounds().len());
        assert_eq!(rounds[0].duration_secs, 12);
        assert_eq!(rounds[2].duration_secs, 9);
        assert!(default_config().session_rounds(0.0).is_err());
        assert!(default_config().session_rounds(f64::NAN).is_err());

        // Scaled three-minute rounds still carry the shortfall penalty.
        assert!(rounds[2].is_penalized());
        let huge = default_config().session_rounds(1e12).unwrap().unwrap();
        assert!(huge.iter().all(|r| r.duration_secs == MAX_ROUND_SECS));
    }

    #[test]
    fn test_invalid_files_rejected() {
        for content in [
            "[debate]\nmode = \"solo\"",
            "[debate]\ntopics = []",
            "[[debate.rounds]]\nname = \"x\"\nduration_secs = 10\nspeakers = []",
            "[[debate.rounds]]\nname = \"x\"\nduration_secs = 0\nspeakers = [\"A\"]",
            "[[debate.rounds]]\nname = \"x\"\nduration_secs = 86401\nspeakers = [\"A\"]",
            "[[debate.rounds]]\nname = \"x\"\nduration_secs = 18446744073709551615\nspeakers = [\"A\"]",
            "[[debate.rounds]]\nname = \"x\"\nduration_secs = 10\nspeakers = [\"E\"]",
            "[judge]\nmodel = \"m\"",
        ] {
            assert!(
                matches!(Config::from_str(content), Err(DebateError::ConfigError(_))),
                "accepted: {content}"
            );
        }
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
