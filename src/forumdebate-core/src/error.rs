//! Error types for the debate system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebateError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid debate mode: {0} (expected 'single' or 'multi')")]
    InvalidMode(String),

    #[error("Unknown agent identity: {0}")]
    UnknownAgent(String),

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("Backend returned an empty response")]
    EmptyResponse,

    #[error("Malformed structured output: {0}")]
    MalformedJudgment(String),

    #[error("Unrecognized message: {0}")]
    UnknownMessage(String),

    #[error("Room '{0}' is closed")]
    RoomClosed(String),

    #[error("Debate state owner is no longer running")]
    StateUnavailable,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
