//! Parsed metadata batch and its rows.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// One notification's worth of metadata, as returned by the gateway's batch parser.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRow {
    /// Stable key for every derived record.
    pub row_number: u32,
    pub lab_sequence_id: String,
    pub demis_notification_id: String,
    pub file_one_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_one_sha256_sum: Option<String>,
    /// Empty or missing when the row only has one sequence file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_two_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_two_sha256_sum: Option<String>,
    /// Clinical and administrative fields, forwarded verbatim on submission.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Position of a sequence file within its row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileSlot {
    One,
    Two,
}

/// A sequence file the row expects, with its declared hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedFile<'a> {
    pub slot: FileSlot,
    pub name: &'a str,
    pub sha256: Option<&'a str>,
}

impl MetadataRow {
    /// Second file name, treating an empty string as absent.
    pub fn file_two(&self) -> Option<&str> {
        self.file_two_name.as_deref().filter(|n| !n.trim().is_empty())
    }

    /// Files this row needs uploaded, in upload order.
    pub fn expected_files(&self) -> Vec<ExpectedFile<'_>> {
        let mut files = vec![ExpectedFile {
            slot: FileSlot::One,
            name: &self.file_one_name,
            sha256: non_empty(self.file_one_sha256_sum.as_deref()),
        }];
        if let Some(name) = self.file_two() {
            files.push(ExpectedFile {
                slot: FileSlot::Two,
                name,
                sha256: non_empty(self.file_two_sha256_sum.as_deref()),
            });
        }
        files
    }

    /// Whether the given file name belongs to this row.
    pub fn expects_file(&self, name: &str) -> bool {
        self.file_one_name == name || self.file_two() == Some(name)
    }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.filter(|s| !s.trim().is_empty())
}

/// Wrapper matching the parser response shape (`items[].data`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedRow {
    pub data: MetadataRow,
}

/// All rows parsed from one metadata file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataBatch {
    pub items: Vec<ParsedRow>,
}

impl MetadataBatch {
    pub fn from_rows(rows: Vec<MetadataRow>) -> Self {
        Self {
            items: rows.into_iter().map(|data| ParsedRow { data }).collect(),
        }
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read a parser response previously saved as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read metadata batch {}", path.display()))?;
        Self::from_json(&s).with_context(|| format!("invalid metadata batch {}", path.display()))
    }

    pub fn rows(&self) -> impl Iterator<Item = &MetadataRow> {
        self.items.iter().map(|i| &i.data)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Rows that expect a file with this name.
    pub fn rows_expecting<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MetadataRow> {
        self.rows().filter(move |r| r.expects_file(name))
    }
}
