//! Thin client for OpenAI-compatible chat completion backends.
//!
//! Both the judge and the AI debaters talk to the backend through
//! [`LlmClient`]. Each call is a single request; callers own their retry
//! policy.

use std::sync::LazyLock;
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
};
use regex::Regex;
use tracing::debug;

use crate::error::DebateError;

/// Reasoning/scratchpad tags some models wrap around their answers.
const REASONING_TAGS: &[&str] = &[
    "thinking",
    "think",
    "reflection",
    "reasoning",
    "thought",
    "scratchpad",
    "analysis",
];

static ORPHAN_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?\w+[^>]*>").expect("valid orphan tag regex")
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// API base URL, e.g. `https://api.openai.com/v1`.
    pub api_base: String,
    /// API key for authentication.
    pub api_key: String,
}

impl BackendConfig {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }
}

/// Per-request generation parameters.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client<OpenAIConfig>,
}

impl LlmClient {
    /// Build a client with request and connect timeouts applied.
    pub fn new(backend: &BackendConfig) -> Result<Self, DebateError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                DebateError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        let config = OpenAIConfig::new()
            .with_api_key(&backend.api_key)
            .with_api_base(&backend.api_base);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
        })
    }

    /// Send one chat completion and return the raw text of the first choice.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, DebateError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: request.system.clone().into(),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: request.user.clone().into(),
                name: None,
            }),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&request.model)
            .max_completion_tokens(request.max_tokens)
            .temperature(request.temperature)
            .messages(messages)
            .build()?;

        let response = self.client.chat().create(chat_request).await?;
        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        debug!(model = %request.model, chars = content.len(), "Completion received");

        if content.trim().is_empty() {
            return Err(DebateError::EmptyResponse);
        }
        Ok(content)
    }
}

/// Strip reasoning tags, stray markup and emphasis markers from a reply,
/// collapsing whitespace.
pub fn sanitize_response(response: &str) -> String {
    let mut result = response.to_string();

    for tag in REASONING_TAGS {
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag);
        if let Ok(re) = Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    result = ORPHAN_TAG_RE.replace_all(&result, "").to_string();
    result = result.replace('*', "");
    result = WHITESPACE_RE.replace_all(&result, " ").to_string();

    result.trim().to_string()
}
