//! The dispatcher: one inference backend, one value backend, shared usage.

use crate::api::usage::{UsageCounters, UsageReport};
use crate::backend::local::{ModelLoader, ServedModelLoader};
use crate::backend::{InferenceBackend, ValueBackend};
use crate::config::BackendConfig;
use crate::error::Result;
use crate::{GenerationParams, GenerationRequest, GenerationResult, ValueRequest, ValueResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

/// Boxed future returned by [`TextGenerator::generate_batch`].
pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Vec<String>> + Send + 'a>>;

/// Anything that can turn a batch of prompts into one text per prompt.
///
/// Output has the same length and order as `prompts`. A prompt that
/// produced nothing maps to an empty string.
pub trait TextGenerator: Send + Sync {
    fn generate_batch<'a>(
        &'a self,
        prompts: &'a [String],
        params: &'a GenerationParams,
    ) -> GenerateFuture<'a>;
}

/// Routes generation and value calls to the backends chosen at construction.
pub struct Dispatcher {
    inference: InferenceBackend,
    value: ValueBackend,
    usage: Arc<UsageCounters>,
}

impl Dispatcher {
    /// Build from configuration, loading local models through
    /// [`ServedModelLoader`].
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::with_loader(config, &ServedModelLoader)
    }

    /// Build from configuration with a caller-supplied model loader.
    pub fn with_loader(config: &BackendConfig, loader: &dyn ModelLoader) -> Result<Self> {
        Self::with_usage(config, loader, Arc::new(UsageCounters::new()))
    }

    /// Build with an existing usage handle, so several dispatchers can
    /// account into the same counters.
    pub fn with_usage(
        config: &BackendConfig,
        loader: &dyn ModelLoader,
        usage: Arc<UsageCounters>,
    ) -> Result<Self> {
        let inference = config.inference.build(loader, usage.clone())?;
        let value = config.value.build(loader, usage.clone())?;
        info!(
            "dispatcher ready: inference={}, value={}",
            inference.name(),
            value.name()
        );
        Ok(Self {
            inference,
            value,
            usage,
        })
    }

    pub fn inference_name(&self) -> String {
        self.inference.name()
    }

    pub fn value_name(&self) -> String {
        self.value.name()
    }

    /// Continue a prompt. Never fails; exhausted retries give an empty result.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let segments = self.inference.generate(request).await;
        debug!(
            "{} produced {} segment(s)",
            self.inference.name(),
            segments.len()
        );
        GenerationResult::from(segments)
    }

    /// Score a prompt plus candidate answer.
    pub async fn evaluate(&self, request: &ValueRequest) -> ValueResult {
        self.value.evaluate(request).await
    }

    /// One joined text per prompt, same order and length as `prompts`.
    pub async fn generate_batch(&self, prompts: &[String], params: &GenerationParams) -> Vec<String> {
        self.inference.generate_batch(prompts, params).await
    }

    pub fn usage(&self) -> Arc<UsageCounters> {
        self.usage.clone()
    }

    /// Token totals with cost priced against the inference backend.
    pub fn usage_report(&self) -> UsageReport {
        self.usage.report(&self.inference.name())
    }
}

impl TextGenerator for Dispatcher {
    fn generate_batch<'a>(
        &'a self,
        prompts: &'a [String],
        params: &'a GenerationParams,
    ) -> GenerateFuture<'a> {
        Box::pin(Dispatcher::generate_batch(self, prompts, params))
    }
}

/// A bare inference backend is enough for callers that never score.
impl TextGenerator for InferenceBackend {
    fn generate_batch<'a>(
        &'a self,
        prompts: &'a [String],
        params: &'a GenerationParams,
    ) -> GenerateFuture<'a> {
        Box::pin(InferenceBackend::generate_batch(self, prompts, params))
    }
}
