//! Label a JSONL batch of questions with subject categories.
//!
//! # Examples
//!
//! ```sh
//! # Everything from a config file
//! ponder-classify --config classify.json
//!
//! # Flags override the config file
//! ponder-classify --config classify.json --input data/q.jsonl --output out/q.jsonl
//!
//! # No config file: hosted backend, default keys (reads OPENAI_API_KEY)
//! ponder-classify --input data/q.jsonl --output out/q.jsonl
//! ```

use clap::Parser;
use ponder_classify::{ClassifyConfig, ClassifyError, Classifier};
use ponder_rs::ServedModelLoader;
use ponder_rs::api::UsageCounters;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "ponder-classify", version)]
struct Cli {
    /// JSON classifier configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input JSONL file
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output JSONL file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Field holding the question text
    #[arg(long)]
    input_key: Option<String>,

    /// Field the raw reply is stored under
    #[arg(long)]
    output_key: Option<String>,

    /// Override the backend's model
    #[arg(long)]
    model: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: Cli) -> Result<ClassifyConfig, ClassifyError> {
    let mut config = match &cli.config {
        Some(path) => ClassifyConfig::from_file(path)?,
        None => ClassifyConfig::default(),
    };
    if let Some(input) = cli.input {
        config.input_file = input;
    }
    if let Some(output) = cli.output {
        config.output_file = output;
    }
    if let Some(key) = cli.input_key {
        config.input_key = key;
    }
    if let Some(key) = cli.output_key {
        config.output_key = key;
    }
    if let Some(model) = cli.model {
        config.generation.model = Some(model);
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), ClassifyError> {
    let config = load_config(cli)?;
    let classifier = Classifier::new(config)?;

    let usage = Arc::new(UsageCounters::new());
    let backend = classifier
        .config()
        .backend
        .build(&ServedModelLoader, usage.clone())?;
    let report = classifier.run(&backend).await?;

    eprintln!(
        "  {} row(s): {} classified, {} unparsed",
        report.rows, report.classified, report.unparsed
    );
    eprintln!("  {}", usage.report(&backend.name()).summary());
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
