//! Retry policies for backend calls.
//!
//! Two shapes coexist:
//!
//! - [`with_backoff`] retries transient provider faults (429, 5xx, network)
//!   with exponential backoff and jitter. The retry cap is a knob:
//!   `max_retries: None` keeps retrying until the provider recovers.
//! - [`with_attempts`] makes a fixed number of immediate attempts and
//!   swallows every failure, returning `None` once the attempts run out.
//!   The gateway transport uses [`GATEWAY_ATTEMPTS`]; the hosted
//!   "ask and split into lines" flow uses [`ASK_ATTEMPTS`].

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Deserializer};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempts made for one HTTP gateway POST.
pub const GATEWAY_ATTEMPTS: u32 = 3;

/// Attempts made for one hosted "ask the model, parse its lines" round.
pub const ASK_ATTEMPTS: u32 = 5;

/// Exponential backoff configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Maximum number of retries after the first attempt. `None` retries
    /// forever.
    pub max_retries: Option<u32>,
    /// Delay before the first retry.
    #[serde(rename = "initial_delay_ms", deserialize_with = "duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound on a single delay.
    #[serde(rename = "max_delay_ms", deserialize_with = "duration_ms")]
    pub max_delay: Duration,
    /// Backoff multiplier (2.0 doubles the delay every retry).
    pub multiplier: f64,
    /// Whether to shave a varying fraction off each delay.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

fn duration_ms<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl BackoffPolicy {
    /// A policy that gives up after `retries` retries.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: Some(retries),
            ..Default::default()
        }
    }

    /// Reject policies whose delays cannot be computed: a multiplier that
    /// is below 1.0 or not finite, or a first delay above the cap.
    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(DispatchError::config(format!(
                "backoff multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(DispatchError::config(format!(
                "backoff initial_delay_ms ({}) exceeds max_delay_ms ({})",
                self.initial_delay.as_millis(),
                self.max_delay.as_millis()
            )));
        }
        Ok(())
    }

    /// Whether another retry is allowed after `retries_done` retries.
    pub fn allows_retry(&self, retries_done: u32) -> bool {
        self.max_retries.is_none_or(|max| retries_done < max)
    }

    /// Calculate the delay for a given retry number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(64) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on the attempt number.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Run `op`, retrying transient failures according to `policy`.
///
/// Permanent failures (bad request, auth, decode) return immediately. When
/// the retry cap is reached the last transient error is returned.
pub async fn with_backoff<T, F, Fut>(policy: &BackoffPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && policy.allows_retry(retries) => {
                let delay = policy.delay_for_attempt(retries);
                warn!(
                    "{label}: transient failure ({e}), retry {} in {:.1}s",
                    retries + 1,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run `op` up to `attempts` times without delay, returning the first
/// success. Every failure is logged and consumes one attempt.
pub async fn with_attempts<T, F, Fut>(attempts: u32, label: &str, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Some(value),
            Err(e) => warn!("{label}: attempt {attempt}/{attempts} failed: {e}"),
        }
    }
    warn!("{label}: giving up after {attempts} attempts");
    None
}
