//! Error taxonomy for backend dispatch.
//!
//! Only [`DispatchError::Config`] ever reaches a caller of the
//! [`Dispatcher`](crate::dispatcher::Dispatcher) call surface: it is raised
//! while building backends. Every other variant is absorbed by the retry
//! layer and downgraded to an empty result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Unsupported backend kind, missing credentials or model paths.
    #[error("configuration error: {0}")]
    Config(String),

    /// The provider answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection, timeout or body-read failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response did not match the expected envelope.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The local model capability reported a failure.
    #[error("local model error: {0}")]
    Local(String),
}

impl DispatchError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether the failure is expected to clear on its own (rate limits,
    /// gateway hiccups, dropped connections).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || (500..=504).contains(status),
            Self::Request(_) => true,
            Self::Config(_) | Self::Decode(_) | Self::Local(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        for status in [429, 500, 502, 503, 504] {
            let err = DispatchError::Http {
                status,
                body: String::new(),
            };
            assert!(err.is_transient(), "{status} should be transient");
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for status in [400, 401, 403, 404, 422] {
            let err = DispatchError::Http {
                status,
                body: "bad request".into(),
            };
            assert!(!err.is_transient(), "{status} should not be retried");
        }
    }

    #[test]
    fn config_and_decode_errors_never_transient() {
        assert!(!DispatchError::config("missing key").is_transient());
        assert!(!DispatchError::decode("no choices").is_transient());
        assert!(!DispatchError::Local("oom".into()).is_transient());
    }

    #[test]
    fn display_includes_status() {
        let err = DispatchError::Http {
            status: 503,
            body: "overloaded".into(),
        };
        assert_eq!(err.to_string(), "HTTP 503: overloaded");
    }
}
