//! Concrete backends and the closed sets they are selected from.
//!
//! - [`hosted`]: OpenAI-compatible hosted chat with usage accounting.
//! - [`gateway`]: the GLM HTTP gateway and its three payload variants.
//! - [`local`]: models loaded once through a [`ModelLoader`](local::ModelLoader).
//!
//! [`InferenceBackend`] and [`ValueBackend`] are chosen once when the
//! [`Dispatcher`](crate::Dispatcher) is built; calls dispatch on the
//! variant without consulting configuration again.

pub mod gateway;
pub mod hosted;
pub mod local;

use crate::error::{DispatchError, Result};
use crate::{GenerationParams, GenerationRequest, ValueRequest, ValueResult};
use gateway::GlmGateway;
use hosted::HostedChat;
use local::{LocalInference, LocalValue};
use std::time::Duration;
use tracing::info;

/// Timeout for a single backend HTTP exchange.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("ponder-rs/", env!("CARGO_PKG_VERSION")))
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| DispatchError::config(format!("failed to build HTTP client: {e}")))
}

/// Backend that extends reasoning traces.
pub enum InferenceBackend {
    Hosted(HostedChat),
    Gateway(GlmGateway),
    Local(LocalInference),
}

impl InferenceBackend {
    /// Name used for logging and cost lookup.
    pub fn name(&self) -> String {
        match self {
            InferenceBackend::Hosted(chat) => chat.model().to_string(),
            InferenceBackend::Gateway(gw) => gw.variant().to_string(),
            InferenceBackend::Local(local) => format!("local-{}", local.family()),
        }
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Vec<String> {
        let params = &request.params;
        match self {
            InferenceBackend::Hosted(chat) => chat.generate(&request.prompt, params).await,
            InferenceBackend::Gateway(gw) => gw.generate(&request.prompt, params).await,
            InferenceBackend::Local(local) => local.generate(&request.prompt, params).await,
        }
    }

    /// Generate for each prompt in order. Each entry is that prompt's
    /// segments joined by newlines, or `""` when nothing came back.
    pub async fn generate_batch(&self, prompts: &[String], params: &GenerationParams) -> Vec<String> {
        let total = prompts.len();
        let mut outputs = Vec::with_capacity(total);
        for (i, prompt) in prompts.iter().enumerate() {
            let request = GenerationRequest::new(prompt.as_str()).with_params(params.clone());
            outputs.push(self.generate(&request).await.join("\n"));
            info!("{}: generated {}/{total}", self.name(), i + 1);
        }
        outputs
    }
}

/// Backend that scores reasoning traces.
pub enum ValueBackend {
    Hosted(HostedChat),
    Gateway(GlmGateway),
    Local(LocalValue),
}

impl ValueBackend {
    pub fn name(&self) -> String {
        match self {
            ValueBackend::Hosted(chat) => chat.model().to_string(),
            ValueBackend::Gateway(gw) => gw.variant().to_string(),
            ValueBackend::Local(local) => format!("local-{}", local.family()),
        }
    }

    /// Score a trace. Text backends return their lines for the caller to
    /// interpret; local value models return a clamped score.
    pub async fn evaluate(&self, request: &ValueRequest) -> ValueResult {
        let params = crate::GenerationParams::default().with_max_tokens(request.params.max_length);
        match self {
            ValueBackend::Hosted(chat) => {
                ValueResult::Text(chat.generate(&request.prompt_answer, &params).await)
            }
            ValueBackend::Gateway(gw) => {
                ValueResult::Text(gw.generate(&request.prompt_answer, &params).await)
            }
            ValueBackend::Local(local) => {
                local
                    .evaluate(
                        &request.prompt_answer,
                        request.params.max_length,
                        request.params.bounds,
                    )
                    .await
            }
        }
    }
}
