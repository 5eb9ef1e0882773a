use ponder_rs::DispatchError;
use thiserror::Error;

/// Faults that abort a classification run.
///
/// Per-row problems (an unreadable model reply) are not errors: the row
/// keeps empty categories and the run continues.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("configuration error: {0}")]
    Config(String),

    /// The input batch cannot be classified as configured.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ClassifyError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ClassifyError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClassifyError>;
