//! Remote upload gateway: the operations the pipeline calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::GatewayError, metadata::MetadataRow};

#[cfg(test)]
pub(crate) mod fake;
/// reqwest implementation.
pub mod http;

pub use http::HttpGateway;

/// Result of creating a document reference for a sequence file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReference {
    pub sequence_upload_url: String,
    /// UUID segment of the upload URL; `None` if the URL carries none.
    pub document_reference_id: Option<String>,
}

/// Multipart plan: one pre-signed URL per chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPlan {
    pub upload_id: String,
    pub presigned_urls: Vec<String>,
    pub part_size_bytes: u64,
}

/// Completion token of one uploaded chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedChunk {
    /// 1-based.
    pub part_number: u32,
    #[serde(rename = "eTag")]
    pub e_tag: Option<String>,
}

/// Body of the finish-upload call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishUpload {
    pub upload_id: String,
    pub completed_chunks: Vec<CompletedChunk>,
}

/// Server-side validation state of an uploaded sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Validating,
    Valid,
    ValidationFailed,
    ValidationNotInitiated,
    #[serde(other)]
    Unknown,
}

impl ValidationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::ValidationFailed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationInfo {
    #[serde(default)]
    pub document_reference_id: Option<String>,
    pub status: ValidationStatus,
    #[serde(default)]
    pub message: String,
}

/// A row plus the references of its uploaded files, as submitted.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSubmission<'a> {
    #[serde(flatten)]
    pub row: &'a MetadataRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_one_document_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_two_document_reference: Option<String>,
}

/// Identifiers returned for an accepted notification.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    /// Sequence id assigned by the backend (`transactionID`).
    pub igs_id: Option<String>,
    /// `submitterGeneratedNotificationID`.
    pub notification_id: Option<String>,
    /// `labSequenceID`.
    pub lab_id: Option<String>,
}

/// Operations of the upload gateway and storage service.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Register a sequence file by its SHA-256 hash.
    async fn create_reference(&self, content_hash: &str) -> Result<DocumentReference, GatewayError>;

    /// Ask for a multipart plan for a file of the given size.
    async fn upload_plan(
        &self,
        reference_id: &str,
        file_size: u64,
    ) -> Result<UploadPlan, GatewayError>;

    /// PUT one chunk; returns the ETag if the transport exposes it.
    async fn upload_chunk(&self, url: &str, bytes: Vec<u8>) -> Result<Option<String>, GatewayError>;

    async fn finish_upload(
        &self,
        reference_id: &str,
        finish: &FinishUpload,
    ) -> Result<(), GatewayError>;

    async fn init_validation(&self, reference_id: &str) -> Result<(), GatewayError>;

    async fn validation_status(&self, reference_id: &str) -> Result<ValidationInfo, GatewayError>;

    async fn submit_notification(
        &self,
        submission: &NotificationSubmission<'_>,
    ) -> Result<SubmitReceipt, GatewayError>;
}
