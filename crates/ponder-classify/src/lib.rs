//! Batch question category classifier powered by ponder-rs.
//!
//! Reads a JSONL file of questions, asks a text generator to label each one
//! with a primary and secondary category, and writes the records back out
//! with `primary_category`, `secondary_category` and the raw reply added.
//!
//! Any [`TextGenerator`](ponder_rs::dispatcher::TextGenerator) works, so the
//! same run can use a hosted model, the GLM gateway or a local model.
//!
//! ```ignore
//! use ponder_classify::{Classifier, ClassifyConfig};
//! use ponder_rs::{ServedModelLoader, api::UsageCounters};
//! use std::sync::Arc;
//!
//! let config = ClassifyConfig::from_file("classify.json")?;
//! let backend = config.backend.build(&ServedModelLoader, Arc::new(UsageCounters::new()))?;
//! let report = Classifier::new(config)?.run(&backend).await?;
//! println!("{} of {} classified", report.classified, report.rows);
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod prompt;

pub use classifier::{ClassifyReport, Classifier};
pub use config::ClassifyConfig;
pub use error::ClassifyError;
pub use prompt::Classification;
