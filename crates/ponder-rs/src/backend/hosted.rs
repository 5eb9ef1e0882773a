//! Hosted chat-completion backend (OpenAI-compatible API).
//!
//! [`ChatEndpoint`] is the bare HTTP exchange and is also used by locally
//! served models. [`HostedChat`] adds what the hosted path needs on top:
//! sample splitting, exponential backoff, usage accounting and the
//! five-attempt "ask and split into lines" loop.

use crate::api::decode::{ChatCompletion, decode_chat_completion, split_lines};
use crate::api::retry::{ASK_ATTEMPTS, BackoffPolicy, with_attempts, with_backoff};
use crate::api::usage::UsageCounters;
use crate::error::{DispatchError, Result};
use crate::{ChatRequest, GenerationParams, MAX_SAMPLES_PER_CALL, Message};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// One OpenAI-compatible `chat/completions` URL plus credentials.
pub struct ChatEndpoint {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl ChatEndpoint {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: super::http_client()?,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion> {
        debug!(
            "chat request: model={}, messages={}, n={}, max_tokens={}, temp={}",
            body.model,
            body.messages.len(),
            body.n.unwrap_or(1),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let mut request = self.client.post(&self.url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        debug!(
            "chat response: HTTP {} in {:.1}s ({} bytes)",
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
        decode_chat_completion(&text)
    }
}

/// Hosted chat backend with usage accounting.
pub struct HostedChat {
    endpoint: ChatEndpoint,
    model: String,
    backoff: BackoffPolicy,
    usage: Arc<UsageCounters>,
}

impl HostedChat {
    pub fn new(
        endpoint: ChatEndpoint,
        model: impl Into<String>,
        backoff: BackoffPolicy,
        usage: Arc<UsageCounters>,
    ) -> Self {
        Self {
            endpoint,
            model: model.into(),
            backoff,
            usage,
        }
    }

    /// Configured model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Draw `params.samples` completions, split into provider-sized calls.
    ///
    /// Each call is retried with backoff on transient faults. Usage is
    /// recorded after every successful call, so a later failure does not
    /// lose the tokens already spent.
    pub async fn chat(&self, messages: &[Message], params: &GenerationParams) -> Result<Vec<String>> {
        let model = params.model.as_deref().unwrap_or(&self.model);
        let stop = (!params.stop.is_empty()).then(|| params.stop.clone());
        let mut remaining = params.samples;
        let mut outputs = Vec::with_capacity(params.samples as usize);

        while remaining > 0 {
            let n = remaining.min(MAX_SAMPLES_PER_CALL);
            remaining -= n;
            let body = ChatRequest {
                model: model.to_string(),
                messages: messages.to_vec(),
                max_tokens: params.remote_max_tokens(),
                temperature: params.remote_temperature(),
                n: Some(n),
                seed: params.seed,
                stop: stop.clone(),
                ..Default::default()
            };

            let endpoint = &self.endpoint;
            let body = &body;
            let completion = with_backoff(&self.backoff, "hosted chat", || endpoint.chat(body)).await?;
            if let Some(usage) = &completion.usage {
                self.usage.record(usage);
            }
            outputs.extend(completion.contents);
        }
        Ok(outputs)
    }

    /// Ask the model about `prompt`, making up to [`ASK_ATTEMPTS`] attempts.
    ///
    /// One sample comes back as its lines; several samples come back one
    /// segment each. Exhausted attempts give an empty list.
    pub async fn generate(&self, prompt: &str, params: &GenerationParams) -> Vec<String> {
        if params.samples == 0 {
            return Vec::new();
        }
        let messages = [Message::user(prompt)];
        let messages = &messages;
        with_attempts(ASK_ATTEMPTS, "hosted ask", || async move {
            let samples = self.chat(messages, params).await?;
            if params.samples > 1 {
                return Ok(samples);
            }
            let first = samples
                .into_iter()
                .next()
                .ok_or_else(|| DispatchError::decode("provider returned no samples"))?;
            Ok(split_lines(&first))
        })
        .await
        .unwrap_or_default()
    }
}
