//! Flat per-row result report of the last batch.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::{classify::UploadError, status::NotificationUploadInfo};

const NOT_AVAILABLE: &str = "n/a";
const ERROR_SEPARATOR: &str = " -- ";

/// One report line per row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    pub row_number: u32,
    pub status: String,
    pub upload_timestamp: String,
    pub demis_notification_id: String,
    pub lab_sequence_id: String,
    pub demis_sequence_id: String,
    /// All error texts of the row, in the order they were raised.
    pub errors: String,
}

/// Build report records, matching errors to rows by row number.
pub fn export_records(
    rows: &[NotificationUploadInfo],
    errors: &[UploadError],
) -> Vec<ExportRecord> {
    rows.iter()
        .map(|row| {
            let texts: Vec<&str> = errors
                .iter()
                .filter(|e| e.row_number == row.row_number)
                .flat_map(|e| e.errors.iter().map(|m| m.text.as_str()))
                .collect();
            ExportRecord {
                row_number: row.row_number,
                status: row.status.to_string(),
                upload_timestamp: row
                    .upload_timestamp
                    .clone()
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| NOT_AVAILABLE.into()),
                demis_notification_id: row.demis_notification_id.clone(),
                lab_sequence_id: row.lab_sequence_id.clone(),
                demis_sequence_id: row
                    .demis_sequence_id
                    .clone()
                    .unwrap_or_else(|| NOT_AVAILABLE.into()),
                errors: texts.join(ERROR_SEPARATOR),
            }
        })
        .collect()
}

/// `igs-meldung-report__<finished at>` with colons replaced for file systems.
pub fn report_filename(finished_at: DateTime<Utc>) -> String {
    let ts = finished_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    format!("igs-meldung-report__{}", ts.replace(':', "-"))
}

/// Write the records as pretty JSON into `dir`; returns the file path.
pub fn write_report(
    dir: &Path,
    finished_at: DateTime<Utc>,
    records: &[ExportRecord],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("{}.json", report_filename(finished_at)));
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("wrote report with {} rows to {}", records.len(), path.display());
    Ok(path)
}
