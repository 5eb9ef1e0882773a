//! Convenience re-exports for common `ponder-rs` types.
//!
//! ```ignore
//! use ponder_rs::prelude::*;
//! ```
//!
//! Backend internals (decoders, gateway payloads, served model plumbing)
//! stay out; import those from their modules when needed.

// ── Requests and results ────────────────────────────────────────────
pub use crate::{
    GenerationParams, GenerationRequest, GenerationResult, ScoreBounds, ValueParams, ValueRequest,
    ValueResult,
};

// ── Dispatch ────────────────────────────────────────────────────────
pub use crate::backend::InferenceBackend;
pub use crate::config::{BackendConfig, InferenceBackendConfig, ValueBackendConfig};
pub use crate::dispatcher::{Dispatcher, TextGenerator};
pub use crate::error::DispatchError;

// ── Local models ────────────────────────────────────────────────────
pub use crate::backend::local::{LocalModel, ModelLoader, ServedModelLoader, ValueModel};

// ── Accounting ──────────────────────────────────────────────────────
pub use crate::api::usage::{Cost, UsageCounters, UsageReport};
