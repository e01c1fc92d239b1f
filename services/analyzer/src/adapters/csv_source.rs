//! services/analyzer/src/adapters/csv_source.rs
//!
//! Reads the behavior log CSV into domain `Event`s.

use chrono::{DateTime, NaiveDateTime};
use intent_core::Event;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

const REQUIRED_COLUMNS: [&str; 3] = ["user_uuid", "event_time", "event_name"];
const TIME_FORMATS: [&str; 3] = ["%Y/%m/%d %H:%M", "%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"];

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    user_uuid: String,
    #[serde(default)]
    approved_time: Option<String>,
    #[serde(default)]
    first_payment_time: Option<String>,
    event_time: String,
    event_name: String,
    #[serde(default)]
    extra_info: Option<String>,
}

/// Parses an event timestamp in any of the accepted layouts. RFC 3339 values
/// keep their wall-clock time; the offset is dropped, not applied, so they
/// line up with the offset-free layouts in the same log.
pub fn parse_event_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|parsed| parsed.naive_local())
        })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Loads events from a CSV file on disk.
pub fn load_events(path: &Path) -> Result<Vec<Event>, SourceError> {
    info!("Loading events from {}", path.display());
    let file = File::open(path)?;
    read_events(file)
}

/// Reads events from any CSV source. Rows with an empty user id or an
/// unparseable event time are skipped with a warning.
pub fn read_events<R: Read>(reader: R) -> Result<Vec<Event>, SourceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(SourceError::MissingColumn(column.to_string()));
        }
    }

    let mut events = Vec::new();
    let mut skipped = 0_usize;
    for (row_number, row) in csv_reader.deserialize::<CsvRow>().enumerate() {
        // Header is line 1.
        let line = row_number + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping line {}: {}", line, e);
                skipped += 1;
                continue;
            }
        };

        if row.user_uuid.trim().is_empty() {
            warn!("Skipping line {}: empty user_uuid", line);
            skipped += 1;
            continue;
        }
        let Some(event_time) = parse_event_time(&row.event_time) else {
            warn!("Skipping line {}: unparseable event_time '{}'", line, row.event_time);
            skipped += 1;
            continue;
        };

        events.push(Event {
            user_id: row.user_uuid.trim().to_string(),
            event_time,
            event_name: row.event_name,
            extra_info: non_empty(row.extra_info),
            approved_time: non_empty(row.approved_time),
            first_payment_time: non_empty(row.first_payment_time),
        });
    }

    info!("Loaded {} events ({} rows skipped)", events.len(), skipped);
    Ok(events)
}
