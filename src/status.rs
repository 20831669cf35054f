//! Per-row and per-file upload state records.

use serde::{Deserialize, Serialize};

use crate::metadata::MetadataRow;

/// Upload state shared by rows and files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    /// Seeded at batch start.
    Planned,
    /// Nothing known yet.
    Waiting,
    /// Work on the row or file is in progress.
    Pending,
    /// Server-side sequence validation is running.
    Validating,
    /// Sequence passed validation.
    Valid,
    Success,
    Error,
    Aborted,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Aborted)
    }

    /// Rows still in one of these states when a batch stops never finished.
    pub fn is_unfinished(self) -> bool {
        matches!(self, Self::Planned | Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "PLANNED",
            Self::Waiting => "WAITING",
            Self::Pending => "PENDING",
            Self::Validating => "VALIDATING",
            Self::Valid => "VALID",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer and validation state of one sequence file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadInfo {
    /// Files are tracked and persisted by name only.
    #[serde(rename = "file")]
    pub file_name: String,
    /// Cumulative progress in percent (0..=100).
    pub progress: u8,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileUploadInfo {
    pub fn new(file_name: impl Into<String>, progress: u8, status: UploadStatus) -> Self {
        Self {
            file_name: file_name.into(),
            progress,
            status,
            error: None,
        }
    }

    pub fn failed(file_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(file_name, 100, UploadStatus::Error)
        }
    }

    /// Placeholder for files the current batch has not touched.
    pub fn waiting(file_name: impl Into<String>) -> Self {
        Self::new(file_name, 0, UploadStatus::Waiting)
    }
}

/// Outcome record of one metadata row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationUploadInfo {
    pub row_number: u32,
    pub demis_notification_id: String,
    pub lab_sequence_id: String,
    pub status: UploadStatus,
    /// ISO-8601 time of a successful submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_timestamp: Option<String>,
    /// Identifier assigned by the backend on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demis_sequence_id: Option<String>,
}

impl NotificationUploadInfo {
    pub fn for_row(row: &MetadataRow, status: UploadStatus) -> Self {
        Self {
            row_number: row.row_number,
            demis_notification_id: row.demis_notification_id.clone(),
            lab_sequence_id: row.lab_sequence_id.clone(),
            status,
            upload_timestamp: None,
            demis_sequence_id: None,
        }
    }
}
