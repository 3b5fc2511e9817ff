use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::ErrorClassification;
use crate::engine::ProcessEngine;
use crate::error::EngineFault;
use crate::model::{EngineState, ErrorItem, PathItem, ProcessState, RunSummary, REPORT_VERSION};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    pub report_version: String,
    pub generated_at: String,
    #[serde(default)]
    pub operation: Option<String>,
    pub engine_state: EngineState,
    pub state: ProcessState,
    pub pending: Vec<PathItem>,
    pub errors: Vec<ErrorItem>,
    #[serde(default)]
    pub error_groups: Vec<ErrorGroup>,
    #[serde(default)]
    pub runs: Vec<RunSummary>,
}

/// Error items sharing one classification, in first-failure order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorGroup {
    pub classification: ErrorClassification,
    pub items: u64,
    pub bytes: u64,
}

pub fn build_report(
    engine: &ProcessEngine,
    operation: Option<&str>,
    runs: &[RunSummary],
) -> Result<BatchReport, EngineFault> {
    let state = engine.process_state()?;
    let pending = engine.queue()?.to_vec();
    let errors = engine.error_list()?.to_vec();

    Ok(BatchReport {
        report_version: REPORT_VERSION.to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        operation: operation.map(str::to_string),
        engine_state: engine.state(),
        state,
        pending,
        error_groups: group_errors(&errors),
        errors,
        runs: runs.to_vec(),
    })
}

pub fn group_errors(errors: &[ErrorItem]) -> Vec<ErrorGroup> {
    let mut groups: Vec<ErrorGroup> = Vec::new();
    for entry in errors {
        let size = entry.item().size_or_zero();
        match groups
            .iter_mut()
            .find(|group| &group.classification == entry.classification())
        {
            Some(group) => {
                group.items += 1;
                group.bytes = group.bytes.saturating_add(size);
            }
            None => groups.push(ErrorGroup {
                classification: entry.classification().clone(),
                items: 1,
                bytes: size,
            }),
        }
    }
    groups
}

pub fn write_report(report: &BatchReport, output_path: impl AsRef<Path>) -> Result<()> {
    let path = output_path.as_ref();
    let payload = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    Ok(())
}

pub fn load_report(path: impl AsRef<Path>) -> Result<BatchReport> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read report {}", path.display()))?;
    let report: BatchReport = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(report)
}
