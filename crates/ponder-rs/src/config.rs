//! Backend selection from JSON configuration.
//!
//! A [`BackendConfig`] names one inference backend and one value backend.
//! Both are tagged by `kind`; an unknown kind, an unknown model family or
//! missing credentials fail here, before any call is attempted.
//!
//! # Example
//!
//! ```json
//! {
//!   "inference": {
//!     "kind": "local",
//!     "family": "llama",
//!     "model_dir": "/models/llava-onevision",
//!     "served": { "base_url": "http://localhost:8000/v1", "served_model_name": "policy" }
//!   },
//!   "value": {
//!     "kind": "glm",
//!     "variant": "GLM4",
//!     "auth_env": "GLM_AUTH"
//!   }
//! }
//! ```

use crate::api::retry::BackoffPolicy;
use crate::api::usage::UsageCounters;
use crate::backend::gateway::{GLM_URL, GlmGateway, GlmVariant};
use crate::backend::hosted::{ChatEndpoint, HostedChat};
use crate::backend::local::{
    InferenceModelSpec, LocalFamily, LocalInference, LocalSampling, LocalValue, ModelLoader,
    ServedEndpoint, ValueModelSpec,
};
use crate::backend::{InferenceBackend, ValueBackend};
use crate::error::{DispatchError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Default hosted API root.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Hosted chat-completion settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostedConfig {
    pub model: String,
    pub api_base: String,
    /// Inline key. Takes precedence over `api_key_env`.
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub backoff: BackoffPolicy,
}

impl Default for HostedConfig {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_MODEL.to_string(),
            api_base: OPENAI_API_BASE.to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl HostedConfig {
    fn build(&self, usage: Arc<UsageCounters>) -> Result<HostedChat> {
        self.backoff.validate()?;
        let key = resolve_secret(self.api_key.as_deref(), &self.api_key_env)?;
        let endpoint = ChatEndpoint::new(&self.api_base, Some(key))?;
        Ok(HostedChat::new(endpoint, &self.model, self.backoff.clone(), usage))
    }
}

/// GLM gateway settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlmConfig {
    pub variant: GlmVariant,
    pub url: String,
    /// Inline `Authorization` value. Takes precedence over `auth_env`.
    pub auth: Option<String>,
    pub auth_env: String,
    /// Account id, required by `ChatGLM2`.
    pub id: Option<String>,
    /// Model identifier override for `GLM4`/`GLM3`.
    pub model: Option<String>,
}

impl Default for GlmConfig {
    fn default() -> Self {
        Self {
            variant: GlmVariant::default(),
            url: GLM_URL.to_string(),
            auth: None,
            auth_env: "GLM_AUTH".to_string(),
            id: None,
            model: None,
        }
    }
}

impl GlmConfig {
    fn build(&self) -> Result<GlmGateway> {
        let auth = resolve_secret(self.auth.as_deref(), &self.auth_env)?;
        GlmGateway::new(
            &self.url,
            auth,
            self.variant,
            self.id.clone(),
            self.model.clone(),
        )
    }
}

/// Local inference model settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalInferenceConfig {
    pub family: LocalFamily,
    pub model_dir: PathBuf,
    #[serde(default)]
    pub served: Option<ServedEndpoint>,
    #[serde(default)]
    pub sampling: LocalSampling,
}

/// Local value model settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalValueConfig {
    pub family: LocalFamily,
    pub model_dir: PathBuf,
    #[serde(default)]
    pub state_dict: Option<PathBuf>,
    #[serde(default)]
    pub use_prm: bool,
    #[serde(default)]
    pub served: Option<ServedEndpoint>,
    #[serde(default)]
    pub sampling: LocalSampling,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InferenceBackendConfig {
    Openai(HostedConfig),
    Glm(GlmConfig),
    Local(LocalInferenceConfig),
}

impl Default for InferenceBackendConfig {
    fn default() -> Self {
        InferenceBackendConfig::Openai(HostedConfig::default())
    }
}

impl InferenceBackendConfig {
    /// Resolve credentials and load models. Local models are loaded here,
    /// exactly once.
    pub fn build(&self, loader: &dyn ModelLoader, usage: Arc<UsageCounters>) -> Result<InferenceBackend> {
        match self {
            InferenceBackendConfig::Openai(cfg) => Ok(InferenceBackend::Hosted(cfg.build(usage)?)),
            InferenceBackendConfig::Glm(cfg) => Ok(InferenceBackend::Gateway(cfg.build()?)),
            InferenceBackendConfig::Local(cfg) => {
                require_model_dir(&cfg.model_dir)?;
                info!("loading local {} inference model from {}", cfg.family, cfg.model_dir.display());
                let model = loader.load_inference(&InferenceModelSpec {
                    family: cfg.family,
                    model_dir: cfg.model_dir.clone(),
                    served: cfg.served.clone(),
                })?;
                Ok(InferenceBackend::Local(LocalInference::new(
                    cfg.family,
                    model,
                    cfg.sampling.clone(),
                )))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ValueBackendConfig {
    Openai(HostedConfig),
    Glm(GlmConfig),
    Local(LocalValueConfig),
}

impl Default for ValueBackendConfig {
    fn default() -> Self {
        ValueBackendConfig::Openai(HostedConfig::default())
    }
}

impl ValueBackendConfig {
    pub fn build(&self, loader: &dyn ModelLoader, usage: Arc<UsageCounters>) -> Result<ValueBackend> {
        match self {
            ValueBackendConfig::Openai(cfg) => Ok(ValueBackend::Hosted(cfg.build(usage)?)),
            ValueBackendConfig::Glm(cfg) => Ok(ValueBackend::Gateway(cfg.build()?)),
            ValueBackendConfig::Local(cfg) => {
                if !cfg.family.has_value_head() {
                    return Err(DispatchError::config(format!(
                        "local family '{}' has no value model (expected glm or mistral)",
                        cfg.family
                    )));
                }
                require_model_dir(&cfg.model_dir)?;
                info!(
                    "loading local {} value model from {} (prm={})",
                    cfg.family,
                    cfg.model_dir.display(),
                    cfg.use_prm
                );
                let model = loader.load_value(&ValueModelSpec {
                    family: cfg.family,
                    model_dir: cfg.model_dir.clone(),
                    state_dict: cfg.state_dict.clone(),
                    use_prm: cfg.use_prm,
                    served: cfg.served.clone(),
                })?;
                Ok(ValueBackend::Local(LocalValue::new(
                    cfg.family,
                    model,
                    cfg.sampling.clone(),
                )))
            }
        }
    }
}

/// Inference and value backend selection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub inference: InferenceBackendConfig,
    pub value: ValueBackendConfig,
}

impl BackendConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DispatchError::config(format!("invalid backend config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::config(format!("failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_json(&content)
    }
}

fn resolve_secret(inline: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(value) = inline.filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }
    match std::env::var(env_var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(DispatchError::config(format!(
            "{env_var} environment variable is not set"
        ))),
    }
}

fn require_model_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(DispatchError::config("local backend needs a model_dir"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::ServedModelLoader;

    const UNSET_ENV: &str = "PONDER_TEST_UNSET_SECRET_7Q2";

    #[test]
    fn empty_object_defaults_to_hosted() {
        let config = BackendConfig::from_json("{}").unwrap();
        assert!(matches!(config.inference, InferenceBackendConfig::Openai(_)));
        assert!(matches!(config.value, ValueBackendConfig::Openai(_)));
    }

    #[test]
    fn parses_every_kind() {
        let config = BackendConfig::from_json(
            r#"{
                "inference": {"kind": "glm", "variant": "ChatGLM2", "id": "acct"},
                "value": {
                    "kind": "local", "family": "mistral", "model_dir": "/m/prm",
                    "use_prm": true, "sampling": {"max_length": 1024}
                }
            }"#,
        )
        .unwrap();
        match config.inference {
            InferenceBackendConfig::Glm(glm) => {
                assert_eq!(glm.variant, GlmVariant::ChatGlm2);
                assert_eq!(glm.url, GLM_URL);
                assert_eq!(glm.id.as_deref(), Some("acct"));
            }
            other => panic!("expected glm, got {other:?}"),
        }
        match config.value {
            ValueBackendConfig::Local(local) => {
                assert_eq!(local.family, LocalFamily::Mistral);
                assert!(local.use_prm);
                assert_eq!(local.sampling.max_length, 1024);
                assert!(local.sampling.truncation);
            }
            other => panic!("expected local, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_config_error() {
        let err = BackendConfig::from_json(r#"{"inference": {"kind": "bard"}}"#).unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn unknown_family_is_config_error() {
        let err = BackendConfig::from_json(
            r#"{"inference": {"kind": "local", "family": "qwen", "model_dir": "/m"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn hosted_backoff_cap_is_configurable() {
        let config = BackendConfig::from_json(
            r#"{"inference": {"kind": "openai", "model": "gpt-4",
                "backoff": {"max_retries": 6, "initial_delay_ms": 100}}}"#,
        )
        .unwrap();
        let InferenceBackendConfig::Openai(hosted) = config.inference else {
            panic!("expected openai");
        };
        assert_eq!(hosted.model, "gpt-4");
        assert_eq!(hosted.backoff.max_retries, Some(6));
    }

    #[test]
    fn invalid_backoff_fails_construction() {
        let usage = Arc::new(UsageCounters::new());
        for backoff in [
            r#"{"multiplier": -2.0}"#,
            r#"{"multiplier": 0.5}"#,
            r#"{"initial_delay_ms": 5000, "max_delay_ms": 1000}"#,
        ] {
            let config = BackendConfig::from_json(&format!(
                r#"{{"inference": {{"kind": "openai", "api_key": "sk-test", "backoff": {backoff}}}}}"#
            ))
            .unwrap();
            let err = config
                .inference
                .build(&ServedModelLoader, usage.clone())
                .err()
                .unwrap();
            assert!(matches!(err, DispatchError::Config(_)), "{backoff}: {err}");
        }

        let config = BackendConfig::from_json(
            r#"{"inference": {"kind": "openai", "api_key": "sk-test", "backoff": {"multiplier": 1.0}}}"#,
        )
        .unwrap();
        assert!(config.inference.build(&ServedModelLoader, usage).is_ok());
    }

    #[test]
    fn each_role_builds_without_the_other_roles_credentials() {
        let config = BackendConfig::from_json(&format!(
            r#"{{
                "inference": {{"kind": "openai", "api_key": "sk-test"}},
                "value": {{"kind": "glm", "auth_env": "{UNSET_ENV}"}}
            }}"#
        ))
        .unwrap();
        let usage = Arc::new(UsageCounters::new());
        let inference = config.inference.build(&ServedModelLoader, usage.clone()).unwrap();
        assert_eq!(inference.name(), crate::DEFAULT_MODEL);
        assert!(crate::Dispatcher::with_usage(&config, &ServedModelLoader, usage).is_err());
    }

    #[test]
    fn missing_credentials_fail_construction() {
        let cfg = InferenceBackendConfig::Openai(HostedConfig {
            api_key_env: UNSET_ENV.into(),
            ..Default::default()
        });
        let err = cfg
            .build(&ServedModelLoader, Arc::new(UsageCounters::new()))
            .err()
            .unwrap();
        assert!(err.to_string().contains(UNSET_ENV));

        let glm = ValueBackendConfig::Glm(GlmConfig {
            auth_env: UNSET_ENV.into(),
            ..Default::default()
        });
        assert!(glm.build(&ServedModelLoader, Arc::new(UsageCounters::new())).is_err());
    }

    #[test]
    fn llama_value_model_is_rejected() {
        let cfg = ValueBackendConfig::Local(LocalValueConfig {
            family: LocalFamily::Llama,
            model_dir: PathBuf::from("/m/llama"),
            state_dict: None,
            use_prm: false,
            served: None,
            sampling: LocalSampling::default(),
        });
        let err = cfg
            .build(&ServedModelLoader, Arc::new(UsageCounters::new()))
            .err()
            .unwrap();
        assert!(err.to_string().contains("no value model"));
    }

    #[test]
    fn empty_model_dir_is_rejected() {
        let cfg = InferenceBackendConfig::Local(LocalInferenceConfig {
            family: LocalFamily::Glm,
            model_dir: PathBuf::new(),
            served: None,
            sampling: LocalSampling::default(),
        });
        assert!(cfg.build(&ServedModelLoader, Arc::new(UsageCounters::new())).is_err());
    }

    #[test]
    fn missing_config_file_is_config_error() {
        let err = BackendConfig::from_file("/nonexistent/ponder.json").unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }
}
