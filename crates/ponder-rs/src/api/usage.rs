//! Token usage accounting and cost estimation.
//!
//! [`UsageCounters`] is shared through an `Arc` by every backend that can
//! report usage. Counters start at zero and only grow; there is no reset.

use crate::UsageInfo;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-backend pricing for cost estimation (USD per 1K tokens).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub prompt_per_thousand: f64,
    pub completion_per_thousand: f64,
}

impl ModelPricing {
    pub fn estimate_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        completion_tokens as f64 / 1000.0 * self.completion_per_thousand
            + prompt_tokens as f64 / 1000.0 * self.prompt_per_thousand
    }
}

/// Lookup pricing by backend name. Only exact names are priced.
pub fn pricing_for_backend(backend: &str) -> Option<ModelPricing> {
    match backend {
        "gpt-4" => Some(ModelPricing {
            prompt_per_thousand: 0.03,
            completion_per_thousand: 0.06,
        }),
        "gpt-3.5-turbo" => Some(ModelPricing {
            prompt_per_thousand: 0.0015,
            completion_per_thousand: 0.002,
        }),
        _ => None,
    }
}

/// Estimated spend. Unpriced backends report `Unknown` rather than zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cost {
    Known(f64),
    Unknown,
}

impl Cost {
    pub fn usd(&self) -> Option<f64> {
        match self {
            Cost::Known(v) => Some(*v),
            Cost::Unknown => None,
        }
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cost::Known(v) => write!(f, "${v:.4}"),
            Cost::Unknown => write!(f, "unknown"),
        }
    }
}

// Serialized as -1 when unknown, matching the report format downstream
// tooling already reads.
impl Serialize for Cost {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cost::Known(v) => serializer.serialize_f64(*v),
            Cost::Unknown => serializer.serialize_f64(-1.0),
        }
    }
}

/// Snapshot of the counters plus a derived cost.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub completion_tokens: u64,
    pub prompt_tokens: u64,
    pub cost: Cost,
}

impl UsageReport {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!(
            "tokens: {} prompt + {} completion = {} total, est. cost: {}",
            self.prompt_tokens,
            self.completion_tokens,
            self.total_tokens(),
            self.cost,
        )
    }
}

/// Running token totals for hosted-API calls.
#[derive(Debug, Default)]
pub struct UsageCounters {
    completion_tokens: AtomicU64,
    prompt_tokens: AtomicU64,
}

impl UsageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the usage reported by one successful call.
    pub fn record(&self, usage: &UsageInfo) {
        let completion = u64::from(usage.completion_tokens.unwrap_or(0));
        let prompt = u64::from(usage.prompt_tokens.unwrap_or(0));
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens.load(Ordering::Relaxed)
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens.load(Ordering::Relaxed)
    }

    /// Current totals and the cost estimate for `backend`.
    pub fn report(&self, backend: &str) -> UsageReport {
        let completion_tokens = self.completion_tokens();
        let prompt_tokens = self.prompt_tokens();
        let cost = match pricing_for_backend(backend) {
            Some(pricing) => Cost::Known(pricing.estimate_cost(prompt_tokens, completion_tokens)),
            None => Cost::Unknown,
        };
        UsageReport {
            completion_tokens,
            prompt_tokens,
            cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn usage(prompt: u32, completion: u32) -> UsageInfo {
        UsageInfo {
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
            total_tokens: Some(prompt + completion),
        }
    }

    #[test]
    fn counters_accumulate() {
        let counters = UsageCounters::new();
        counters.record(&usage(1000, 500));
        counters.record(&usage(2000, 1000));
        assert_eq!(counters.prompt_tokens(), 3000);
        assert_eq!(counters.completion_tokens(), 1500);
    }

    #[test]
    fn missing_fields_count_as_zero() {
        let counters = UsageCounters::new();
        counters.record(&UsageInfo {
            prompt_tokens: Some(12),
            completion_tokens: None,
            total_tokens: None,
        });
        assert_eq!(counters.prompt_tokens(), 12);
        assert_eq!(counters.completion_tokens(), 0);
    }

    #[test]
    fn gpt4_cost() {
        let counters = UsageCounters::new();
        counters.record(&usage(1000, 1000));
        let report = counters.report("gpt-4");
        let cost = report.cost.usd().unwrap();
        assert!((cost - 0.09).abs() < 1e-9, "cost={cost}");
    }

    #[test]
    fn gpt35_cost() {
        let counters = UsageCounters::new();
        counters.record(&usage(2000, 1000));
        let cost = counters.report("gpt-3.5-turbo").cost.usd().unwrap();
        assert!((cost - 0.005).abs() < 1e-9, "cost={cost}");
    }

    #[test]
    fn unknown_backend_reports_unknown_cost() {
        let counters = UsageCounters::new();
        counters.record(&usage(10, 10));
        let report = counters.report("GLM4");
        assert_eq!(report.cost, Cost::Unknown);
        assert_eq!(report.cost.to_string(), "unknown");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cost"], -1.0);
        assert_eq!(json["prompt_tokens"], 10);
    }

    #[test]
    fn concurrent_records_are_consistent() {
        let counters = Arc::new(UsageCounters::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.record(&usage(1, 2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.prompt_tokens(), 8000);
        assert_eq!(counters.completion_tokens(), 16000);
    }

    #[test]
    fn summary_format() {
        let counters = UsageCounters::new();
        counters.record(&usage(1000, 500));
        let summary = counters.report("gpt-4").summary();
        assert!(summary.contains("tokens:"));
        assert!(summary.contains("1500 total"));
        assert!(summary.contains("cost: $"));
    }
}
