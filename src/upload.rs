//! Processing of a single metadata row: upload, validate, submit.

use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    attach::{AttachedFiles, SequenceFile},
    classify,
    error::{ContractViolation, UploadFailure},
    gateway::{Gateway, NotificationSubmission, SubmitReceipt, ValidationStatus},
    metadata::{FileSlot, MetadataRow},
    session::BatchSession,
    status::{FileUploadInfo, NotificationUploadInfo, UploadStatus},
    transfer::{self, TransferOutcome},
    validation::{self, PollError, PollOutcome, PollPolicy},
};

/// Where a row's processing stopped without failing.
enum RowEnd {
    Submitted(SubmitReceipt),
    Cancelled,
}

enum FileEnd {
    Valid(String),
    Cancelled,
}

/// Everything a row needs: the gateway, the session and the attached files.
pub struct RowUploader<'a> {
    pub gateway: &'a dyn Gateway,
    pub session: &'a BatchSession,
    pub files: &'a AttachedFiles,
    pub policy: PollPolicy,
    pub cancel: &'a CancellationToken,
}

impl RowUploader<'_> {
    /// Drive `row` to a terminal status and record it in the session.
    ///
    /// Failures are classified into the session's error list; cancellation
    /// yields ABORTED without an error record.
    pub async fn upload_row(&self, row: &MetadataRow) -> UploadStatus {
        tracing::info!("uploading row {} ({})", row.row_number, row.demis_notification_id);
        self.session.set_notification(NotificationUploadInfo::for_row(row, UploadStatus::Pending));

        let result = match self.run(row).await {
            Ok(RowEnd::Submitted(receipt)) => match receipt.igs_id.filter(|id| !id.is_empty()) {
                Some(id) => {
                    tracing::info!("row {} submitted as {id}", row.row_number);
                    self.session.set_notification(NotificationUploadInfo {
                        upload_timestamp: Some(upload_timestamp()),
                        demis_sequence_id: Some(id),
                        ..NotificationUploadInfo::for_row(row, UploadStatus::Success)
                    });
                    return UploadStatus::Success;
                }
                None => Err(UploadFailure::from(ContractViolation::MissingSequenceId)),
            },
            Ok(RowEnd::Cancelled) => Ok(()),
            Err(failure) => Err(failure),
        };

        if let Err(failure) = &result {
            tracing::error!("row {} failed: {failure}", row.row_number);
            self.session.push_error(classify::classify(row.row_number, failure));
        }
        // ABORTED takes precedence over ERROR once cancelled
        let status = if result.is_err() && !self.cancel.is_cancelled() {
            UploadStatus::Error
        } else {
            UploadStatus::Aborted
        };
        self.session.set_notification(NotificationUploadInfo::for_row(row, status));
        status
    }

    async fn run(&self, row: &MetadataRow) -> Result<RowEnd, UploadFailure> {
        let mut file_one_reference = None;
        let mut file_two_reference = None;

        for expected in row.expected_files() {
            if self.cancel.is_cancelled() {
                return Ok(RowEnd::Cancelled);
            }
            let hash = expected
                .sha256.ok_or_else(|| ContractViolation::MissingHash(expected.name.to_string()))?;
            let file = self
                .files
                .find(expected.name)
                .ok_or_else(|| ContractViolation::MissingFile(expected.name.to_string()))?;

            let reference_id = match self.upload_file(file, hash).await {
                Ok(FileEnd::Valid(id)) => id,
                Ok(FileEnd::Cancelled) => {
                    self.session
                        .set_file_upload(FileUploadInfo {
                            status: UploadStatus::Aborted,
                            ..self.session.file_upload(&file.name)
                        });
                    return Ok(RowEnd::Cancelled);
                }
                Err(failure) => {
                    self.session
                        .set_file_upload(FileUploadInfo::failed(&file.name, failure.to_string()));
                    return Err(failure);
                }
            };
            match expected.slot {
                FileSlot::One => file_one_reference = Some(reference_id),
                FileSlot::Two => file_two_reference = Some(reference_id),
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(RowEnd::Cancelled);
        }
        let submission = NotificationSubmission {
            row,
            file_one_document_reference: file_one_reference,
            file_two_document_reference: file_two_reference,
        };
        let receipt = self
            .gateway
            .submit_notification(&submission)
            .await
            .map_err(UploadFailure::Submission)?;
        Ok(RowEnd::Submitted(receipt))
    }

    /// Reference, transfer and validation of one file.
    async fn upload_file(&self, file: &SequenceFile, hash: &str) -> Result<FileEnd, UploadFailure> {
        let name = file.name.as_str();
        self.session.set_file_upload(FileUploadInfo::new(name, 0, UploadStatus::Pending));

        let reference = self
            .gateway
            .create_reference(hash)
            .await
            .map_err(|source| UploadFailure::Reference {
                file: name.to_string(),
                source,
            })?;
        let reference_id = reference
            .document_reference_id
            .ok_or_else(|| ContractViolation::MissingReferenceId(name.to_string()))?;

        let on_progress = |progress| {
            self.session
                .set_file_upload(FileUploadInfo::new(name, progress, UploadStatus::Pending));
        };
        let outcome =
            transfer::transfer_file(self.gateway, file, &reference_id, self.cancel, on_progress)
                .await?;
        if outcome == TransferOutcome::Cancelled || self.cancel.is_cancelled() {
            return Ok(FileEnd::Cancelled);
        }

        self.session.set_file_upload(FileUploadInfo::new(name, 100, UploadStatus::Validating));
        self.gateway
            .init_validation(&reference_id)
            .await
            .map_err(|source| UploadFailure::Validation {
                file: name.to_string(),
                source,
            })?;

        let polled =
            validation::poll_validation(self.gateway, &reference_id, self.policy, self.cancel)
                .await;
        let info = match polled {
            Ok(PollOutcome::Finished(info)) => info,
            Ok(PollOutcome::Cancelled) => return Ok(FileEnd::Cancelled),
            Err(PollError::Gateway(source)) => {
                return Err(UploadFailure::Validation {
                    file: name.to_string(),
                    source,
                });
            }
            Err(PollError::Timeout { attempts }) => {
                return Err(UploadFailure::ValidationTimeout {
                    file: name.to_string(),
                    attempts,
                });
            }
        };

        // only terminal statuses end the poll, so anything but VALID is a rejection
        if info.status != ValidationStatus::Valid {
            return Err(UploadFailure::ValidationRejected {
                file: name.to_string(),
                message: info.message,
            });
        }
        self.session.set_file_upload(FileUploadInfo::new(name, 100, UploadStatus::Valid));
        Ok(FileEnd::Valid(reference_id))
    }
}

/// Submission time as an ISO-8601 UTC string with milliseconds.
fn upload_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
