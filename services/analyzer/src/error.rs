//! services/analyzer/src/error.rs
//!
//! Defines the primary error type for the analyzer binary.

use std::path::PathBuf;

use crate::adapters::{ReportError, SourceError};
use crate::config::ConfigError;

/// The primary error type for the `analyzer` service.
///
/// Per-session and per-user failures never surface here; they are logged and
/// reflected in the report. Only failures that prevent a run from starting or
/// its results from being saved end the process.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The behavior log could not be read.
    #[error("Input error: {0}")]
    Source(#[from] SourceError),

    /// An existing report could not be loaded, or the new one could not be written.
    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    /// `--recommend` works on an existing report, and there was none.
    #[error("No report to add recommendations to at {}", .0.display())]
    MissingReport(PathBuf),
}
