//! Provider plumbing shared by every backend: retry policies, response
//! decoding and usage accounting.
//!
//! - [`retry`]: exponential backoff for transient provider faults, and
//!   fixed-count attempts that degrade to `None` instead of failing.
//! - [`decode`]: event-stream, delimited-field and chat-completion
//!   decoders. Produces ordered text segments.
//! - [`usage`]: shared [`UsageCounters`] and per-backend pricing.

pub mod decode;
pub mod retry;
pub mod usage;

pub use decode::Envelope;
pub use retry::BackoffPolicy;
pub use usage::{Cost, UsageCounters, UsageReport, pricing_for_backend};
