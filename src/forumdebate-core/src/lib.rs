//! ForumDebate Core Library
//!
//! Provides the public forum debate room logic: round scheduling,
//! transcript collection, scoring and the agents that run them.

pub mod agent;
pub mod config;
pub mod debate_format;
pub mod error;
pub mod evaluator;
pub mod llm;
pub mod message;
pub mod participant;
pub mod persist;
pub mod room;
pub mod scheduler;
pub mod scoring;
pub mod session;
pub mod state;
pub mod store;
pub mod transcript;

pub use agent::{AgentRole, RoundView};
pub use config::{Config, default_config};
pub use debate_format::{RoundDescriptor, Speakers};
pub use error::DebateError;
pub use evaluator::{OpenAIEvaluator, StructuredEvaluator};
pub use llm::{BackendConfig, LlmClient};
pub use message::DebateMessage;
pub use participant::{DebaterId, OpenAISpeaker, Side, SilentSpeaker, Speaker, Team};
pub use room::{LocalRoom, RoomConnection, RoomTransport};
pub use scoring::{FinalResults, Winner};
pub use session::{DebateSession, SessionConfig};
pub use state::Mode;
