//! Classification run configuration.

use crate::error::{ClassifyError, Result};
use ponder_rs::GenerationParams;
use ponder_rs::config::InferenceBackendConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings for one classification run.
///
/// ```json
/// {
///   "input_file": "data/questions.jsonl",
///   "output_file": "out/classified.jsonl",
///   "input_key": "question",
///   "backend": {"kind": "glm", "variant": "GLM4", "auth_env": "GLM_AUTH"},
///   "generation": {"temperature": 0.2}
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// JSONL file with one record per question.
    pub input_file: PathBuf,
    /// JSONL file written with the classified records.
    pub output_file: PathBuf,
    /// Field holding the question text. Default: `"question"`.
    pub input_key: String,
    /// Field the raw model reply is stored under. Must not already exist.
    /// Default: `"classification_result"`.
    pub output_key: String,
    pub backend: InferenceBackendConfig,
    pub generation: GenerationParams,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            input_file: PathBuf::new(),
            output_file: PathBuf::new(),
            input_key: "question".to_string(),
            output_key: "classification_result".to_string(),
            backend: InferenceBackendConfig::default(),
            generation: GenerationParams::default(),
        }
    }
}

impl ClassifyConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ClassifyError::Config(format!("invalid classifier config: {e}")))?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClassifyError::io(format!("failed to read config '{}'", path.display()), e))?;
        Self::from_json(&content)
    }

    /// Check that the run has somewhere to read from and write to.
    pub fn validate(&self) -> Result<()> {
        if self.input_file.as_os_str().is_empty() || self.output_file.as_os_str().is_empty() {
            return Err(ClassifyError::Config(
                "both input_file and output_file must be specified".into(),
            ));
        }
        if self.input_key.is_empty() || self.output_key.is_empty() {
            return Err(ClassifyError::Config(
                "input_key and output_key must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_keys_and_backend() {
        let config =
            ClassifyConfig::from_json(r#"{"input_file": "in.jsonl", "output_file": "out.jsonl"}"#)
                .unwrap();
        assert_eq!(config.input_key, "question");
        assert_eq!(config.output_key, "classification_result");
        assert!(matches!(config.backend, InferenceBackendConfig::Openai(_)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_files_fail_validation() {
        let config = ClassifyConfig::from_json(r#"{"input_file": "in.jsonl"}"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ClassifyError::Config(_)));
    }

    #[test]
    fn backend_and_generation_are_parsed() {
        let config = ClassifyConfig::from_json(
            r#"{
                "input_file": "a", "output_file": "b", "input_key": "prompt",
                "backend": {"kind": "glm", "variant": "GLM3"},
                "generation": {"temperature": 0.1, "max_tokens": 256}
            }"#,
        )
        .unwrap();
        assert_eq!(config.input_key, "prompt");
        assert!(matches!(config.backend, InferenceBackendConfig::Glm(_)));
        assert_eq!(config.generation.max_tokens, Some(256));
    }

    #[test]
    fn unknown_backend_kind_is_config_error() {
        let err = ClassifyConfig::from_json(r#"{"backend": {"kind": "aisuite"}}"#).unwrap_err();
        assert!(matches!(err, ClassifyError::Config(_)));
    }
}
