//! Binding user-supplied sequence files to metadata rows.

use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::metadata::MetadataBatch;

/// Where a sequence file's bytes come from.
#[derive(Clone, Debug)]
pub enum FileSource {
    Disk(PathBuf),
    Memory(Arc<[u8]>),
}

/// A sequence file known by name and size; content is read chunk by chunk.
#[derive(Clone, Debug)]
pub struct SequenceFile {
    pub name: String,
    pub size: u64,
    source: FileSource,
}

impl SequenceFile {
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            size: meta.len(),
            source: FileSource::Disk(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            source: FileSource::Memory(bytes),
        }
    }

    /// Bytes `[start, end)`; `end` is clamped to the file size.
    pub async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        let end = end.min(self.size);
        if start >= end {
            return Ok(Vec::new());
        }
        let len = (end - start) as usize;
        match &self.source {
            FileSource::Memory(bytes) => Ok(bytes[start as usize..end as usize].to_vec()),
            FileSource::Disk(path) => {
                let mut f = tokio::fs::File::open(path).await?;
                f.seek(SeekFrom::Start(start)).await?;
                let mut buf = vec![0u8; len];
                f.read_exact(&mut buf).await?;
                Ok(buf)
            }
        }
    }
}

/// Why a file was not attached.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AttachRejection {
    #[error("{0} does not match any sequence file of the metadata")]
    NoMatchingRow(String),
    #[error("{name} is expected by {rows} rows")]
    Ambiguous { name: String, rows: usize },
    #[error("{name} is larger than {limit} bytes")]
    TooLarge { name: String, limit: u64 },
}

/// Files attached to the current batch.
#[derive(Clone, Debug)]
pub struct AttachedFiles {
    files: Vec<SequenceFile>,
    max_file_size: u64,
}

impl AttachedFiles {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            files: Vec::new(),
            max_file_size,
        }
    }

    /// Attach what matches exactly one expected name; returns the rejected files.
    pub fn attach(
        &mut self,
        batch: &MetadataBatch,
        files: impl IntoIterator<Item = SequenceFile>,
    ) -> Vec<AttachRejection> {
        let mut rejected = Vec::new();
        for file in files {
            if self.is_attached(&file.name) {
                tracing::warn!("{} is already attached", file.name);
                continue;
            }
            let rows = batch.rows_expecting(&file.name).count();
            if rows == 0 {
                rejected.push(AttachRejection::NoMatchingRow(file.name));
            } else if rows > 1 {
                rejected.push(AttachRejection::Ambiguous { name: file.name, rows });
            } else if file.size > self.max_file_size {
                rejected.push(AttachRejection::TooLarge {
                    name: file.name,
                    limit: self.max_file_size,
                });
            } else {
                tracing::debug!("attached {} ({} bytes)", file.name, file.size);
                self.files.push(file);
            }
        }
        rejected
    }

    pub fn remove(&mut self, name: &str) {
        self.files.retain(|f| f.name != name);
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn find(&self, name: &str) -> Option<&SequenceFile> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn is_attached(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Whether every file the batch expects is attached.
    pub fn all_attached(&self, batch: &MetadataBatch) -> bool {
        batch
            .rows()
            .flat_map(|r| r.expected_files())
            .all(|f| self.is_attached(f.name))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
