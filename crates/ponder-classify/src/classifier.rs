//! The classification run: read, check, prompt, generate, parse, write.

use crate::config::ClassifyConfig;
use crate::error::{ClassifyError, Result};
use crate::prompt::{Classification, question_category_prompt};
use ponder_rs::dispatcher::TextGenerator;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// Column names the parsed labels are written to.
pub const PRIMARY_KEY: &str = "primary_category";
pub const SECONDARY_KEY: &str = "secondary_category";

pub type Record = Map<String, Value>;

/// Outcome counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassifyReport {
    pub rows: usize,
    pub classified: usize,
    /// Rows whose reply could not be parsed. Their categories are empty.
    pub unparsed: usize,
}

pub struct Classifier {
    config: ClassifyConfig,
}

impl Classifier {
    pub fn new(config: ClassifyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClassifyConfig {
        &self.config
    }

    /// Classify every record of the input file and write the output file.
    ///
    /// Schema faults abort before any generation and before the output
    /// file is created.
    pub async fn run(&self, generator: &dyn TextGenerator) -> Result<ClassifyReport> {
        let mut records = read_records(&self.config.input_file)?;
        check_schema(&records, &self.config.input_key, &self.config.output_key)?;
        info!(
            "classifying {} record(s) from {}",
            records.len(),
            self.config.input_file.display()
        );

        let prompts: Vec<String> = records
            .iter()
            .map(|record| {
                let question = field_text(record, &self.config.input_key);
                question_category_prompt(&question).trim().to_string()
            })
            .collect();
        let responses = generator.generate_batch(&prompts, &self.config.generation).await;
        if responses.len() != records.len() {
            warn!(
                "generator returned {} response(s) for {} prompt(s)",
                responses.len(),
                records.len()
            );
        }

        let mut report = ClassifyReport {
            rows: records.len(),
            ..Default::default()
        };
        for (idx, record) in records.iter_mut().enumerate() {
            let response = responses.get(idx).map(String::as_str).unwrap_or_default();
            let classification = match parse_classification(response) {
                Ok(c) => {
                    report.classified += 1;
                    c
                }
                Err(e) => {
                    warn!("row {idx}: could not parse classification ({e}); reply: {response}");
                    report.unparsed += 1;
                    Classification::default()
                }
            };
            record.insert(PRIMARY_KEY.into(), Value::String(classification.primary_category));
            record.insert(SECONDARY_KEY.into(), Value::String(classification.secondary_category));
            record.insert(self.config.output_key.clone(), Value::String(response.to_string()));
        }

        write_records(&self.config.output_file, &records)?;
        info!(
            "classification results saved to {} ({} classified, {} unparsed)",
            self.config.output_file.display(),
            report.classified,
            report.unparsed
        );
        Ok(report)
    }
}

/// Read a JSONL file of objects. Blank lines are skipped.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let content = fs::read_to_string(path)
        .map_err(|e| ClassifyError::io(format!("failed to read input '{}'", path.display()), e))?;
    let mut records = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line)? {
            Value::Object(map) => records.push(map),
            other => {
                return Err(ClassifyError::Schema(format!(
                    "line {} of '{}' is not a JSON object: {other}",
                    lineno + 1,
                    path.display()
                )));
            }
        }
    }
    Ok(records)
}

/// Input key must be a column of the batch; output key must not be.
/// Columns are the union of keys over all records.
pub fn check_schema(records: &[Record], input_key: &str, output_key: &str) -> Result<()> {
    let columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.keys().map(String::as_str))
        .collect();
    if !columns.contains(input_key) {
        let available: Vec<&str> = columns.into_iter().collect();
        return Err(ClassifyError::Schema(format!(
            "input_key '{input_key}' not found in the input. Available keys: {available:?}"
        )));
    }
    if columns.contains(output_key) {
        return Err(ClassifyError::Schema(format!(
            "output_key '{output_key}' already exists in the input and would be overwritten; \
             choose a different output_key"
        )));
    }
    Ok(())
}

fn field_text(record: &Record, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Parse a model reply into labels. An empty reply parses as empty
/// labels; a reply wrapped in a Markdown code fence is unwrapped first.
pub fn parse_classification(reply: &str) -> std::result::Result<Classification, serde_json::Error> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Ok(Classification::default());
    }
    serde_json::from_str(strip_code_fence(trimmed))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(body) = text.strip_prefix("```") else {
        return text;
    };
    let body = body.strip_suffix("```").unwrap_or(body);
    // Drop a language tag such as `json` on the opening line.
    match body.split_once('\n') {
        Some((tag, rest)) if !tag.trim_start().starts_with('{') => rest.trim(),
        _ => body.trim(),
    }
}

/// Write records as JSONL, creating the parent directory if needed.
pub fn write_records(path: &Path, records: &[Record]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|e| ClassifyError::io(format!("failed to create '{}'", dir.display()), e))?;
    }
    let file = fs::File::create(path)
        .map_err(|e| ClassifyError::io(format!("failed to create output '{}'", path.display()), e))?;
    let mut out = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")
            .map_err(|e| ClassifyError::io(format!("failed to write '{}'", path.display()), e))?;
    }
    out.flush()
        .map_err(|e| ClassifyError::io(format!("failed to write '{}'", path.display()), e))
}
