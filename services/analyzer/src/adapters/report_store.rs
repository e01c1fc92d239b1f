//! services/analyzer/src/adapters/report_store.rs
//!
//! Reads and writes `AnalysisReport` JSON documents.

use intent_core::{AnalysisReport, UserResult};
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid report JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Loads a previously written report. A missing file is not an error.
///
/// Besides the array layout this crate writes, an object keyed by user id
/// (`{"<uuid>": {...}}`) is accepted so older result files can be resumed.
pub fn load_report(path: &Path) -> Result<Option<AnalysisReport>, ReportError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(Some(AnalysisReport::default()));
    }

    let report = match serde_json::from_str::<Value>(&raw)? {
        Value::Object(by_user) => AnalysisReport::new(
            by_user
                .into_iter()
                .map(|(_, user)| serde_json::from_value::<UserResult>(user))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        other => serde_json::from_value::<AnalysisReport>(other)?,
    };
    info!("Loaded {} users from {}", report.len(), path.display());
    Ok(Some(report))
}

/// Writes the report as pretty JSON. `-` writes to stdout.
pub fn write_report(path: &Path, report: &AnalysisReport) -> Result<(), ReportError> {
    let json = serde_json::to_string_pretty(report)?;
    if path.as_os_str() == "-" {
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        return Ok(());
    }

    // Write to a sibling file first so a crash never leaves a truncated report.
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)?;
    info!("Wrote {} users to {}", report.len(), path.display());
    Ok(())
}

/// Keeps the report on disk current while a run is in progress. Every
/// finished user is merged into the base report and the file is rewritten.
pub struct ReportCheckpoint {
    path: PathBuf,
    report: AnalysisReport,
}

impl ReportCheckpoint {
    pub fn new(path: impl Into<PathBuf>, base: AnalysisReport) -> Self {
        Self {
            path: path.into(),
            report: base,
        }
    }

    pub fn report(&self) -> &AnalysisReport {
        &self.report
    }

    /// Merges one finished user and saves. Nothing is written for `-`; stdout
    /// only receives the final report.
    pub fn record(&mut self, user: UserResult) -> Result<(), ReportError> {
        debug!("Checkpointing user {}", user.user_uuid);
        self.report.merge(AnalysisReport::new(vec![user]));
        if self.path.as_os_str() == "-" {
            return Ok(());
        }
        write_report(&self.path, &self.report)
    }

    /// Merges the run's final report, writes it and hands it back.
    pub fn finish(mut self, run: AnalysisReport) -> Result<AnalysisReport, ReportError> {
        self.report.merge(run);
        write_report(&self.path, &self.report)?;
        Ok(self.report)
    }
}
