//! Local inference and value models.
//!
//! Loading weights and tokenizers is an opaque capability behind
//! [`ModelLoader`]. A dispatcher calls its loader once per selection at
//! construction and owns the returned model for its whole lifetime; calls
//! never reload.
//!
//! [`ServedModelLoader`] is the shipped loader. It binds to a model served
//! locally behind an OpenAI-compatible endpoint (vLLM and friends) and
//! refuses configurations that would need in-process weights.

use crate::api::decode::split_lines;
use crate::backend::hosted::ChatEndpoint;
use crate::error::{DispatchError, Result};
use crate::{ChatRequest, GenerationParams, Message, ScoreBounds, ValueResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;
use tracing::{info, warn};

/// Boxed future returned by local model calls.
pub type ModelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Model family. Decides tokenizer and prompt conventions on the loader
/// side; value heads exist for `glm` and `mistral` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalFamily {
    Glm,
    Llama,
    Mistral,
}

impl LocalFamily {
    pub fn has_value_head(self) -> bool {
        matches!(self, LocalFamily::Glm | LocalFamily::Mistral)
    }
}

impl fmt::Display for LocalFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalFamily::Glm => write!(f, "glm"),
            LocalFamily::Llama => write!(f, "llama"),
            LocalFamily::Mistral => write!(f, "mistral"),
        }
    }
}

impl FromStr for LocalFamily {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "glm" => Ok(LocalFamily::Glm),
            "llama" => Ok(LocalFamily::Llama),
            "mistral" => Ok(LocalFamily::Mistral),
            other => Err(DispatchError::config(format!(
                "unsupported local model family '{other}'"
            ))),
        }
    }
}

/// Sampling knobs handed to a local model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSampling {
    pub max_length: u32,
    pub truncation: bool,
    pub do_sample: bool,
    pub max_new_tokens: u32,
    pub temperature: f32,
}

impl LocalSampling {
    /// These settings with the request's explicit temperature and length
    /// applied on top. Unset request fields keep the configured values.
    pub fn for_request(&self, params: &GenerationParams) -> LocalSampling {
        LocalSampling {
            temperature: params.temperature.unwrap_or(self.temperature),
            max_new_tokens: params.max_tokens.unwrap_or(self.max_new_tokens),
            ..self.clone()
        }
    }
}

impl Default for LocalSampling {
    fn default() -> Self {
        Self {
            max_length: 2048,
            truncation: true,
            do_sample: false,
            max_new_tokens: 2048,
            temperature: 0.7,
        }
    }
}

/// A locally served OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServedEndpoint {
    /// API root, e.g. `http://localhost:8000/v1`.
    pub base_url: String,
    /// Name the server registered the model under.
    pub served_model_name: String,
    /// Environment variable holding a bearer token, if the server wants one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// What to load for text generation.
#[derive(Debug, Clone)]
pub struct InferenceModelSpec {
    pub family: LocalFamily,
    pub model_dir: PathBuf,
    pub served: Option<ServedEndpoint>,
}

/// What to load for value estimation.
#[derive(Debug, Clone)]
pub struct ValueModelSpec {
    pub family: LocalFamily,
    pub model_dir: PathBuf,
    /// Fine-tuned value head weights to apply over the base model.
    pub state_dict: Option<PathBuf>,
    /// Load the process-reward (per-step) head instead of the outcome head.
    pub use_prm: bool,
    pub served: Option<ServedEndpoint>,
}

/// A loaded text-generation model.
pub trait LocalModel: Send + Sync {
    /// Continue `prompt` and return the decoded text.
    fn complete<'a>(&'a self, prompt: &'a str, sampling: &'a LocalSampling) -> ModelFuture<'a, String>;
}

/// A loaded value model.
pub trait ValueModel: Send + Sync {
    /// Score a prompt plus candidate answer within `bounds`.
    fn value<'a>(
        &'a self,
        prompt_answer: &'a str,
        sampling: &'a LocalSampling,
        bounds: ScoreBounds,
    ) -> ModelFuture<'a, ValueResult>;
}

/// Loads local models. Called once per selection when a dispatcher is built.
pub trait ModelLoader {
    fn load_inference(&self, spec: &InferenceModelSpec) -> Result<Box<dyn LocalModel>>;
    fn load_value(&self, spec: &ValueModelSpec) -> Result<Box<dyn ValueModel>>;
}

/// Loader for models served behind an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServedModelLoader;

impl ServedModelLoader {
    fn connect(
        family: LocalFamily,
        model_dir: &Path,
        served: Option<&ServedEndpoint>,
    ) -> Result<ServedModel> {
        let served = served.ok_or_else(|| {
            DispatchError::config(format!(
                "local {family} model at {} needs in-process weights; \
                 configure `served` or supply a ModelLoader",
                model_dir.display()
            ))
        })?;
        let api_key = match &served.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                DispatchError::config(format!("{var} environment variable is not set"))
            })?),
            None => None,
        };
        Ok(ServedModel {
            endpoint: ChatEndpoint::new(&served.base_url, api_key)?,
            served_model_name: served.served_model_name.clone(),
        })
    }
}

impl ModelLoader for ServedModelLoader {
    fn load_inference(&self, spec: &InferenceModelSpec) -> Result<Box<dyn LocalModel>> {
        let model = Self::connect(spec.family, &spec.model_dir, spec.served.as_ref())?;
        info!(
            "bound local {} inference model '{}' at {}",
            spec.family,
            model.served_model_name,
            model.endpoint.url()
        );
        Ok(Box::new(model))
    }

    fn load_value(&self, spec: &ValueModelSpec) -> Result<Box<dyn ValueModel>> {
        let model = Self::connect(spec.family, &spec.model_dir, spec.served.as_ref())?;
        if spec.state_dict.is_some() {
            warn!("served value model ignores state_dict; the server owns its weights");
        }
        info!(
            "bound local {} value model '{}' (prm={}) at {}",
            spec.family,
            model.served_model_name,
            spec.use_prm,
            model.endpoint.url()
        );
        Ok(Box::new(model))
    }
}

/// A model reached through a local OpenAI-compatible server.
pub struct ServedModel {
    endpoint: ChatEndpoint,
    served_model_name: String,
}

impl ServedModel {
    async fn ask(&self, prompt: &str, max_new_tokens: u32, sampling: &LocalSampling) -> Result<String> {
        let body = ChatRequest {
            model: self.served_model_name.clone(),
            messages: vec![Message::user(prompt)],
            max_tokens: max_new_tokens,
            // Greedy decoding unless sampling is requested.
            temperature: if sampling.do_sample { sampling.temperature } else { 0.0 },
            ..Default::default()
        };
        let completion = self.endpoint.chat(&body).await?;
        Ok(completion.contents.into_iter().next().unwrap_or_default())
    }
}

impl LocalModel for ServedModel {
    fn complete<'a>(&'a self, prompt: &'a str, sampling: &'a LocalSampling) -> ModelFuture<'a, String> {
        Box::pin(self.ask(prompt, sampling.max_new_tokens, sampling))
    }
}

impl ValueModel for ServedModel {
    fn value<'a>(
        &'a self,
        prompt_answer: &'a str,
        sampling: &'a LocalSampling,
        bounds: ScoreBounds,
    ) -> ModelFuture<'a, ValueResult> {
        Box::pin(async move {
            let text = self.ask(prompt_answer, sampling.max_length, sampling).await?;
            Ok(ValueResult::from_text(&text, bounds))
        })
    }
}

/// Loaded inference model plus its sampling settings.
pub struct LocalInference {
    family: LocalFamily,
    model: Box<dyn LocalModel>,
    sampling: LocalSampling,
}

impl LocalInference {
    pub fn new(family: LocalFamily, model: Box<dyn LocalModel>, sampling: LocalSampling) -> Self {
        Self {
            family,
            model,
            sampling,
        }
    }

    pub fn family(&self) -> LocalFamily {
        self.family
    }

    /// Run the model. Temperature and length set on the request override
    /// the configured sampling; failures are logged and yield no lines.
    pub async fn generate(&self, prompt: &str, params: &GenerationParams) -> Vec<String> {
        let sampling = self.sampling.for_request(params);
        match self.model.complete(prompt, &sampling).await {
            Ok(text) => split_lines(text.trim()),
            Err(e) => {
                warn!("local {} inference failed: {e}", self.family);
                Vec::new()
            }
        }
    }
}

/// Loaded value model plus its sampling settings.
pub struct LocalValue {
    family: LocalFamily,
    model: Box<dyn ValueModel>,
    sampling: LocalSampling,
}

impl LocalValue {
    pub fn new(family: LocalFamily, model: Box<dyn ValueModel>, sampling: LocalSampling) -> Self {
        Self {
            family,
            model,
            sampling,
        }
    }

    pub fn family(&self) -> LocalFamily {
        self.family
    }

    pub async fn evaluate(&self, prompt_answer: &str, max_length: u32, bounds: ScoreBounds) -> ValueResult {
        let sampling = LocalSampling {
            max_length,
            ..self.sampling.clone()
        };
        match self.model.value(prompt_answer, &sampling, bounds).await {
            Ok(ValueResult::Score(v)) => ValueResult::Score(bounds.clamp(v)),
            Ok(text) => text,
            Err(e) => {
                warn!("local {} value model failed: {e}", self.family);
                ValueResult::Text(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl LocalModel for Echo {
        fn complete<'a>(&'a self, prompt: &'a str, sampling: &'a LocalSampling) -> ModelFuture<'a, String> {
            let text = format!("  {prompt}\nmax={}\n", sampling.max_new_tokens);
            Box::pin(async move { Ok(text) })
        }
    }

    struct Broken;

    impl LocalModel for Broken {
        fn complete<'a>(&'a self, _: &'a str, _: &'a LocalSampling) -> ModelFuture<'a, String> {
            Box::pin(async { Err(DispatchError::Local("CUDA out of memory".into())) })
        }
    }

    impl ValueModel for Broken {
        fn value<'a>(&'a self, _: &'a str, _: &'a LocalSampling, _: ScoreBounds) -> ModelFuture<'a, ValueResult> {
            Box::pin(async { Err(DispatchError::Local("CUDA out of memory".into())) })
        }
    }

    struct Fixed(f64);

    impl ValueModel for Fixed {
        fn value<'a>(&'a self, _: &'a str, _: &'a LocalSampling, _: ScoreBounds) -> ModelFuture<'a, ValueResult> {
            let v = self.0;
            Box::pin(async move { Ok(ValueResult::Score(v)) })
        }
    }

    #[test]
    fn family_parsing_and_value_heads() {
        assert_eq!("Mistral".parse::<LocalFamily>().unwrap(), LocalFamily::Mistral);
        assert!("qwen".parse::<LocalFamily>().is_err());
        assert!(LocalFamily::Glm.has_value_head());
        assert!(!LocalFamily::Llama.has_value_head());
    }

    #[test]
    fn sampling_defaults() {
        let s = LocalSampling::default();
        assert_eq!(s.max_length, 2048);
        assert!(s.truncation);
        assert!(!s.do_sample);
        assert_eq!(s.max_new_tokens, 2048);
    }

    #[test]
    fn request_overrides_only_fields_it_sets() {
        let configured = LocalSampling {
            max_new_tokens: 4096,
            temperature: 0.1,
            ..Default::default()
        };
        let kept = configured.for_request(&GenerationParams::default());
        assert_eq!(kept, configured);

        let overridden = configured.for_request(&GenerationParams::default().with_temperature(0.9));
        assert_eq!(overridden.max_new_tokens, 4096);
        assert!((overridden.temperature - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn served_loader_requires_endpoint() {
        let spec = InferenceModelSpec {
            family: LocalFamily::Mistral,
            model_dir: PathBuf::from("/models/mistral-7b"),
            served: None,
        };
        let err = ServedModelLoader.load_inference(&spec).err().unwrap();
        assert!(matches!(err, DispatchError::Config(_)));
        assert!(err.to_string().contains("/models/mistral-7b"));
    }

    #[tokio::test]
    async fn inference_trims_and_splits() {
        let local = LocalInference::new(LocalFamily::Glm, Box::new(Echo), LocalSampling::default());
        let params = GenerationParams::default().with_max_tokens(64);
        let lines = local.generate("step one", &params).await;
        assert_eq!(lines, vec!["step one", "max=64"]);
    }

    #[tokio::test]
    async fn inference_failure_is_empty() {
        let local = LocalInference::new(LocalFamily::Glm, Box::new(Broken), LocalSampling::default());
        assert!(local.generate("q", &GenerationParams::default()).await.is_empty());
    }

    #[tokio::test]
    async fn value_is_clamped_and_failures_are_empty() {
        let bounds = ScoreBounds { low: -1.0, high: 1.0 };
        let fixed = LocalValue::new(LocalFamily::Mistral, Box::new(Fixed(4.2)), LocalSampling::default());
        assert_eq!(fixed.evaluate("qa", 2048, bounds).await, ValueResult::Score(1.0));

        let broken = LocalValue::new(LocalFamily::Mistral, Box::new(Broken), LocalSampling::default());
        assert!(broken.evaluate("qa", 2048, bounds).await.is_empty());
    }
}
