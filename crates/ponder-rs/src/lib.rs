//! Generation and value-scoring backend dispatch for LLM tree-search
//! reasoning.
//!
//! `ponder-rs` puts one contract in front of structurally different text
//! backends: "continue this prompt" ([`Dispatcher::generate`]) and "score
//! this reasoning trace" ([`Dispatcher::evaluate`]). A dispatcher is built
//! once from a [`BackendConfig`] and keeps its selection for its lifetime.
//!
//! Supported backends:
//!
//! | Kind | Transport | Retry |
//! |------|-----------|-------|
//! | `openai` | OpenAI-compatible chat completions | exponential backoff inside 5 ask attempts |
//! | `glm` | GLM HTTP gateway (`ChatGLM2`, `GLM4`, `GLM3` payloads) | 3 immediate attempts |
//! | `local` | a model loaded once through a [`ModelLoader`] | none, failures yield empty |
//!
//! Faults inside a call never escape: they are retried according to the
//! backend's policy and then downgraded to an empty result. Only
//! configuration faults surface, and only while building the dispatcher.
//!
//! # Getting started
//!
//! ```ignore
//! use ponder_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), DispatchError> {
//!     let config = BackendConfig::from_file("backends.json")?;
//!     let dispatcher = Dispatcher::from_config(&config)?;
//!
//!     let result = dispatcher
//!         .generate(&GenerationRequest::new("Solve 2x + 3 = 7 step by step."))
//!         .await;
//!     for line in &result.segments {
//!         println!("{line}");
//!     }
//!
//!     let value = dispatcher
//!         .evaluate(&ValueRequest::new("Q: 2x + 3 = 7\nA: x = 2"))
//!         .await;
//!     println!("score: {:?}", value.score());
//!     eprintln!("{}", dispatcher.usage_report().summary());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`dispatcher`] | [`Dispatcher`] and the [`TextGenerator`](dispatcher::TextGenerator) batch trait |
//! | [`backend`] | hosted chat, GLM gateway and local model backends |
//! | [`config`] | JSON backend configuration |
//! | [`api`] | retry policies, response decoders, usage accounting |
//! | [`error`] | [`DispatchError`] |

pub mod api;
pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod prelude;

pub use backend::local::{ModelLoader, ServedModelLoader};
pub use config::BackendConfig;
pub use dispatcher::Dispatcher;
pub use error::DispatchError;

use serde::{Deserialize, Serialize};

// ── Constants ──────────────────────────────────────────────────────

/// Default hosted model.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Default sampling temperature for every backend.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default completion length for hosted and gateway backends.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Largest sample count a hosted provider accepts in one call.
pub const MAX_SAMPLES_PER_CALL: u32 = 20;

// ── Requests ───────────────────────────────────────────────────────

/// Sampling parameters shared by every generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Model override. `None` uses the backend's configured model.
    pub model: Option<String>,
    /// `None` uses the backend's own default: [`DEFAULT_TEMPERATURE`] for
    /// remote backends, the configured sampling for local models.
    pub temperature: Option<f32>,
    /// `None` uses [`DEFAULT_MAX_TOKENS`] remotely and the configured
    /// `max_new_tokens` locally.
    pub max_tokens: Option<u32>,
    /// Number of independent samples to draw.
    pub samples: u32,
    pub stop: Vec<String>,
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: None,
            temperature: None,
            max_tokens: None,
            samples: 1,
            stop: Vec::new(),
            seed: None,
        }
    }
}

impl GenerationParams {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Temperature sent to remote backends.
    pub fn remote_temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    /// Completion length sent to remote backends.
    pub fn remote_max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// A prompt to continue.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// Output of a generation call.
///
/// With one sample the segments are the lines of that sample; with several
/// samples each segment is a whole sample, in request order. An empty list
/// means the backend produced nothing usable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResult {
    pub segments: Vec<String>,
}

impl GenerationResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments joined back with newlines.
    pub fn text(&self) -> String {
        self.segments.join("\n")
    }
}

impl From<Vec<String>> for GenerationResult {
    fn from(segments: Vec<String>) -> Self {
        Self { segments }
    }
}

/// Inclusive range a value score is clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBounds {
    pub low: f64,
    pub high: f64,
}

impl Default for ScoreBounds {
    fn default() -> Self {
        Self { low: 0.0, high: 1.0 }
    }
}

impl ScoreBounds {
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.low).min(self.high)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueParams {
    /// Length budget handed to the value backend.
    pub max_length: u32,
    pub bounds: ScoreBounds,
}

impl Default for ValueParams {
    fn default() -> Self {
        Self {
            max_length: 2048,
            bounds: ScoreBounds::default(),
        }
    }
}

/// A prompt plus candidate answer to score.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRequest {
    pub prompt_answer: String,
    pub params: ValueParams,
}

impl ValueRequest {
    pub fn new(prompt_answer: impl Into<String>) -> Self {
        Self {
            prompt_answer: prompt_answer.into(),
            params: ValueParams::default(),
        }
    }

    pub fn with_bounds(mut self, low: f64, high: f64) -> Self {
        self.params.bounds = ScoreBounds { low, high };
        self
    }
}

/// Output of a value call.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueResult {
    /// A score already clamped to the request bounds.
    Score(f64),
    /// Text lines the caller derives a score from. Empty means no output.
    Text(Vec<String>),
}

impl ValueResult {
    /// Interpret raw model text. A bare number or an explicit `score:`
    /// label becomes a clamped score; anything else stays text.
    pub fn from_text(text: &str, bounds: ScoreBounds) -> Self {
        match parse_score(text) {
            Some(v) => ValueResult::Score(bounds.clamp(v)),
            None => ValueResult::Text(api::decode::split_lines(text)),
        }
    }

    /// The numeric score, parsing text if necessary. The last scored line
    /// wins.
    pub fn score(&self) -> Option<f64> {
        match self {
            ValueResult::Score(v) => Some(*v),
            ValueResult::Text(lines) => lines.iter().rev().find_map(|l| parse_score(l)),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ValueResult::Text(lines) if lines.is_empty())
    }
}

/// Score stated by `text`: the whole text if it is a number, otherwise the
/// number after the last `score` label. Incidental numbers (step counts,
/// equation terms) are never taken as a score.
fn parse_score(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if let Some(v) = parse_number(trimmed) {
        return Some(v);
    }
    let lower = trimmed.to_ascii_lowercase();
    let (_, after) = lower.rsplit_once("score")?;
    let after = after.trim_start_matches(|c: char| c == ':' || c == '=' || c.is_whitespace());
    let token = after
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .next()?;
    parse_number(token)
}

fn parse_number(token: &str) -> Option<f64> {
    token
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

// ── Chat wire types ────────────────────────────────────────────────

/// Role of a message in a chat request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// OpenAI-compatible chat completion request body. Unset optional fields
/// are omitted from serialization.
#[derive(Serialize, Debug, Default, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// Token usage statistics reported by a provider.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}
