//! GLM HTTP gateway backend.
//!
//! The gateway accepts three payload variants, selected by model family:
//!
//! | Variant | Payload | Response envelope |
//! |---------|---------|-------------------|
//! | `ChatGLM2` | `{id, prompt, seed, max_tokens (string), temperature}` | event stream |
//! | `GLM4` | chat messages, `stream: false` | delimited JSON (A) |
//! | `GLM3` | chat messages, `stream: false` | delimited JSON (B) |
//!
//! Each POST gets [`GATEWAY_ATTEMPTS`] immediate attempts. When all of them
//! fail the reply is empty.

use crate::api::decode::Envelope;
use crate::api::retry::{GATEWAY_ATTEMPTS, with_attempts};
use crate::error::{DispatchError, Result};
use crate::{GenerationParams, Message};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, warn};

/// Default gateway endpoint.
pub const GLM_URL: &str = "https://api.chatglm.cn/v1/chat/completions";

/// Content type the gateway expects.
pub const GLM_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Seed sent with `ChatGLM2` payloads when the request has none.
pub const DEFAULT_GLM_SEED: u64 = 170;

/// Nucleus sampling value sent with chat-style payloads.
pub const GLM_TOP_P: f32 = 0.7;

/// Gateway payload variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GlmVariant {
    #[serde(rename = "ChatGLM2", alias = "chatglm2")]
    ChatGlm2,
    #[default]
    #[serde(rename = "GLM4", alias = "glm4")]
    Glm4,
    #[serde(rename = "GLM3", alias = "glm3")]
    Glm3,
}

impl GlmVariant {
    pub fn envelope(self) -> Envelope {
        match self {
            GlmVariant::ChatGlm2 => Envelope::EventStream,
            GlmVariant::Glm4 => Envelope::DelimitedA,
            GlmVariant::Glm3 => Envelope::DelimitedB,
        }
    }

    /// Model identifier placed in chat-style payloads.
    pub fn default_model(self) -> Option<&'static str> {
        match self {
            GlmVariant::ChatGlm2 => None,
            GlmVariant::Glm4 => Some("glm4-alltools-130b-awq"),
            GlmVariant::Glm3 => Some("chatglm3-32b-v0.8"),
        }
    }
}

impl fmt::Display for GlmVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlmVariant::ChatGlm2 => write!(f, "ChatGLM2"),
            GlmVariant::Glm4 => write!(f, "GLM4"),
            GlmVariant::Glm3 => write!(f, "GLM3"),
        }
    }
}

impl FromStr for GlmVariant {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chatglm2" => Ok(GlmVariant::ChatGlm2),
            "glm4" => Ok(GlmVariant::Glm4),
            "glm3" => Ok(GlmVariant::Glm3),
            other => Err(DispatchError::config(format!(
                "unsupported glm model '{other}' (expected ChatGLM2, GLM4 or GLM3)"
            ))),
        }
    }
}

/// Client for one gateway variant.
pub struct GlmGateway {
    client: reqwest::Client,
    url: String,
    auth: String,
    variant: GlmVariant,
    /// Account id for `ChatGLM2`, model identifier for chat-style variants.
    target: String,
}

impl GlmGateway {
    /// Build a gateway client. `ChatGLM2` needs an account `id`; chat-style
    /// variants use `model`, falling back to the variant's default.
    pub fn new(
        url: impl Into<String>,
        auth: impl Into<String>,
        variant: GlmVariant,
        id: Option<String>,
        model: Option<String>,
    ) -> Result<Self> {
        let target = match variant {
            GlmVariant::ChatGlm2 => id.ok_or_else(|| {
                DispatchError::config("glm variant ChatGLM2 requires an account `id`")
            })?,
            _ => model
                .or_else(|| variant.default_model().map(str::to_string))
                .ok_or_else(|| DispatchError::config(format!("no model for glm variant {variant}")))?,
        };
        Ok(Self {
            client: super::http_client()?,
            url: url.into(),
            auth: auth.into(),
            variant,
            target,
        })
    }

    pub fn variant(&self) -> GlmVariant {
        self.variant
    }

    /// JSON payload for `prompt` in this gateway's variant. A request model
    /// override replaces the configured model for chat-style variants;
    /// `ChatGLM2` payloads carry an account id instead and ignore it.
    pub fn payload(&self, prompt: &str, params: &GenerationParams) -> serde_json::Value {
        match self.variant {
            GlmVariant::ChatGlm2 => serde_json::json!({
                "id": self.target,
                "prompt": prompt,
                "seed": params.seed.unwrap_or(DEFAULT_GLM_SEED),
                "max_tokens": params.remote_max_tokens().to_string(),
                "temperature": params.remote_temperature(),
            }),
            GlmVariant::Glm4 | GlmVariant::Glm3 => serde_json::json!({
                "model": params.model.as_deref().unwrap_or(self.target.as_str()),
                "messages": [Message::user(prompt)],
                "temperature": params.remote_temperature(),
                "top_p": GLM_TOP_P,
                "stream": false,
                "max_tokens": params.remote_max_tokens(),
            }),
        }
    }

    async fn post_once(&self, body: &str) -> Result<String> {
        let start = Instant::now();
        let resp = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, &self.auth)
            .header(CONTENT_TYPE, GLM_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        debug!(
            "glm {} response: HTTP {} in {:.1}s ({} bytes)",
            self.variant,
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(DispatchError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    /// POST the payload, returning the raw body or `None` once every
    /// attempt has failed.
    pub async fn post(&self, payload: &serde_json::Value) -> Option<String> {
        let body = payload.to_string();
        let body = body.as_str();
        with_attempts(GATEWAY_ATTEMPTS, "glm gateway", || self.post_once(body)).await
    }

    /// Ask the gateway about `prompt` and decode the reply into lines.
    pub async fn generate(&self, prompt: &str, params: &GenerationParams) -> Vec<String> {
        let payload = self.payload(prompt, params);
        match self.post(&payload).await {
            Some(raw) => self.variant.envelope().decode(&raw),
            None => {
                warn!("no reply from glm gateway ({}) for prompt", self.variant);
                Vec::new()
            }
        }
    }
}
