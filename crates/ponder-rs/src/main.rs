//! Run one generation or value call against a configured backend.
//!
//! Each subcommand builds only the backend it calls, so `generate` never
//! needs value-backend credentials and `evaluate` never needs inference ones.
//!
//! # Examples
//!
//! ```sh
//! # Hosted backend with defaults (reads OPENAI_API_KEY)
//! ponder generate --prompt "Solve 2x + 3 = 7 step by step."
//!
//! # Backends from a config file, five samples
//! ponder --config backends.json generate --prompt "Next step:" --samples 5
//!
//! # Score a trace
//! ponder --config backends.json evaluate --prompt-answer "Q: ...\nA: ..."
//!
//! # Pipe a prompt from stdin
//! cat prompt.txt | ponder generate --stdin
//! ```

use clap::{Parser, Subcommand};
use ponder_rs::api::{UsageCounters, UsageReport};
use ponder_rs::{
    BackendConfig, DispatchError, GenerationParams, GenerationRequest, ServedModelLoader,
    ValueRequest, ValueResult,
};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "ponder", version)]
struct Cli {
    /// JSON backend configuration. Defaults to hosted chat for both roles.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the usage report as JSON instead of a summary line
    #[arg(long, global = true)]
    usage_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Continue a prompt with the inference backend
    Generate {
        #[arg(long)]
        prompt: Option<String>,

        /// Read the prompt from stdin
        #[arg(long)]
        stdin: bool,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Sampling temperature. Unset uses the backend's default.
        #[arg(long)]
        temperature: Option<f32>,

        /// Token budget. Unset uses the backend's default.
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Independent samples to draw
        #[arg(long, default_value_t = 1)]
        samples: u32,

        /// Stop sequence(s)
        #[arg(long)]
        stop: Vec<String>,

        #[arg(long)]
        seed: Option<u64>,
    },
    /// Score a prompt plus candidate answer with the value backend
    Evaluate {
        #[arg(long)]
        prompt_answer: Option<String>,

        /// Read the prompt and answer from stdin
        #[arg(long)]
        stdin: bool,

        #[arg(long, default_value_t = 2048)]
        max_length: u32,

        #[arg(long, default_value_t = 0.0)]
        low: f64,

        #[arg(long, default_value_t = 1.0)]
        high: f64,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn read_input(inline: Option<String>, stdin: bool, flag: &str) -> Result<String, DispatchError> {
    if stdin {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| DispatchError::config(format!("failed to read stdin: {e}")))?;
        return Ok(buf);
    }
    inline.ok_or_else(|| DispatchError::config(format!("provide --{flag} or --stdin")))
}

async fn run(cli: Cli) -> Result<(), DispatchError> {
    let config = match &cli.config {
        Some(path) => BackendConfig::from_file(path)?,
        None => BackendConfig::default(),
    };

    match cli.command {
        Command::Generate {
            prompt,
            stdin,
            model,
            temperature,
            max_tokens,
            samples,
            stop,
            seed,
        } => {
            let prompt = read_input(prompt, stdin, "prompt")?;
            let usage = Arc::new(UsageCounters::new());
            let backend = config.inference.build(&ServedModelLoader, usage.clone())?;
            let params = GenerationParams {
                model,
                temperature,
                max_tokens,
                samples,
                stop,
                seed,
            };
            let segments = backend
                .generate(&GenerationRequest::new(prompt).with_params(params))
                .await;
            if segments.is_empty() {
                eprintln!("  Warning: {} returned no output", backend.name());
            }
            for segment in &segments {
                println!("{segment}");
            }
            report_usage(&usage.report(&backend.name()), cli.usage_json);
        }
        Command::Evaluate {
            prompt_answer,
            stdin,
            max_length,
            low,
            high,
        } => {
            let prompt_answer = read_input(prompt_answer, stdin, "prompt-answer")?;
            let usage = Arc::new(UsageCounters::new());
            let backend = config.value.build(&ServedModelLoader, usage.clone())?;
            let mut request = ValueRequest::new(prompt_answer).with_bounds(low, high);
            request.params.max_length = max_length;
            match backend.evaluate(&request).await {
                ValueResult::Score(v) => println!("{v}"),
                ValueResult::Text(lines) if lines.is_empty() => {
                    eprintln!("  Warning: {} returned no output", backend.name());
                }
                ValueResult::Text(lines) => {
                    for line in lines {
                        println!("{line}");
                    }
                }
            }
            report_usage(&usage.report(&backend.name()), cli.usage_json);
        }
    }
    Ok(())
}

fn report_usage(report: &UsageReport, as_json: bool) {
    if as_json {
        match serde_json::to_string(report) {
            Ok(json) => eprintln!("{json}"),
            Err(e) => eprintln!("  Warning: failed to serialize usage: {e}"),
        }
    } else {
        eprintln!("  {}", report.summary());
    }
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
