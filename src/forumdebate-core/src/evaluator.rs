//! Structured round judgments.
//!
//! The judge asks a reasoning backend for a JSON verdict of the form
//! `{"T1": 27, "T2": 25, "explanation": "..."}`. [`StructuredEvaluator`] is
//! the seam; [`OpenAIEvaluator`] is the production implementation.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::DebateError;
use crate::llm::{CompletionRequest, LlmClient};

/// Score used for a team the backend did not score.
pub const DEFAULT_SCORE: i64 = 25;

pub const JUDGE_INSTRUCTIONS: &str = "You are a judge in a public forum debate. Evaluate \
arguments based on logic, evidence, delivery, and refutation. Assign scores from 21-30 per round: \
29-30 (Outstanding), 27-28 (Excellent), 25-26 (Good), 23-24 (Fair), 21-22 (Poor). Verify factual \
claims using your knowledge or reasoning. Add 1-2 points for verified facts, deduct 1-2 points for \
incorrect facts. Provide constructive feedback.";

/// A raw verdict as returned by the backend, before clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub t1: i64,
    pub t2: i64,
    pub explanation: String,
}

impl Judgment {
    /// Parse a backend reply.
    ///
    /// The first complete JSON object is taken, so code fences and
    /// surrounding prose are fine. No object or invalid JSON is an error; missing or
    /// non-numeric scores fall back to [`DEFAULT_SCORE`].
    pub fn parse(reply: &str) -> Result<Self, DebateError> {
        if reply.trim().is_empty() {
            return Err(DebateError::EmptyResponse);
        }
        let map = first_object(reply)?;

        Ok(Self {
            t1: score_field(map.get("T1")).unwrap_or(DEFAULT_SCORE),
            t2: score_field(map.get("T2")).unwrap_or(DEFAULT_SCORE),
            explanation: map
                .get("explanation")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| "No explanation provided".to_string()),
        })
    }
}

/// Try each `{` in turn and stop at the end of the first object that parses.
fn first_object(reply: &str) -> Result<Map<String, Value>, DebateError> {
    let mut last_error = None;
    for (start, _) in reply.match_indices('{') {
        match serde_json::Deserializer::from_str(&reply[start..])
            .into_iter::<Value>()
            .next()
        {
            Some(Ok(Value::Object(map))) => return Ok(map),
            Some(Err(e)) => last_error = Some(e.to_string()),
            _ => {}
        }
    }
    Err(DebateError::MalformedJudgment(
        last_error.unwrap_or_else(|| "no JSON object in reply".to_string()),
    ))
}

fn score_field(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

/// Build the judging prompt for one round.
///
/// Every speaker's utterances are joined into one line, in speaker order.
pub fn round_prompt<'a>(
    round_name: &str,
    transcripts: impl IntoIterator<Item = (&'a String, &'a Vec<String>)>,
) -> String {
    let mut prompt = format!(
        "Evaluate the following debate round ({}) based on logic, evidence, delivery, and \
refutation. Assign scores from 21-30 for each team (T1: A, B; T2: C, D). Verify factual claims \
and adjust scores: +1-2 for verified facts, -1-2 for incorrect facts. Provide a brief \
explanation.\n\nRespond with only a JSON object: {{\"T1\": <score>, \"T2\": <score>, \
\"explanation\": \"<text>\"}}\n\nTranscripts:\n",
        round_name
    );
    for (speaker, texts) in transcripts {
        prompt.push_str(&format!("{}: {}\n", speaker, texts.join(" ")));
    }
    prompt
}

/// Asks a backend for a structured verdict.
#[async_trait]
pub trait StructuredEvaluator: Send + Sync {
    async fn ask_structured(&self, prompt: &str) -> Result<Judgment, DebateError>;
}

pub struct OpenAIEvaluator {
    client: LlmClient,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIEvaluator {
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
impl StructuredEvaluator for OpenAIEvaluator {
    async fn ask_structured(&self, prompt: &str) -> Result<Judgment, DebateError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            system: JUDGE_INSTRUCTIONS.to_string(),
            user: prompt.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let reply = self.client.complete(&request).await?;
        Judgment::parse(&reply)
    }
}
