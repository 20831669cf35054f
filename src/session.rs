//! Per-batch state shared between the orchestrator and its observers.
//!
//! Every collection lives in a `watch` channel so observers always see a whole
//! list, and every mutation is written to the [`StateStore`] while the channel
//! is still locked, which keeps the stored copy in mutation order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    classify::UploadError,
    metadata::MetadataBatch,
    status::{FileUploadInfo, NotificationUploadInfo, UploadStatus},
    store::{self, Slot, StateStore},
};

/// State of the current (or last) batch.
pub struct BatchSession {
    store: Arc<dyn StateStore>,
    file_uploads: watch::Sender<Vec<FileUploadInfo>>,
    notification_uploads: watch::Sender<Vec<NotificationUploadInfo>>,
    upload_errors: watch::Sender<Vec<UploadError>>,
    finished_at: watch::Sender<Option<DateTime<Utc>>>,
    cancel: Mutex<CancellationToken>,
}

impl BatchSession {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            file_uploads: watch::Sender::new(Vec::new()),
            notification_uploads: watch::Sender::new(Vec::new()),
            upload_errors: watch::Sender::new(Vec::new()),
            finished_at: watch::Sender::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Reset errors, file uploads and the finish time, seed every row as PLANNED
    /// and arm a fresh cancellation token, which is returned.
    pub fn initialize(&self, batch: &MetadataBatch) -> CancellationToken {
        self.finished_at.send_replace(None);
        self.upload_errors.send_modify(|errors| {
            errors.clear();
            self.persist(Slot::UploadErrors, errors);
        });
        self.file_uploads.send_modify(|files| {
            files.clear();
            self.persist(Slot::FileUploads, files);
        });
        self.notification_uploads.send_modify(|rows| {
            *rows = batch
                .rows()
                .map(|r| NotificationUploadInfo::for_row(r, UploadStatus::Planned))
                .collect();
            self.persist(Slot::NotificationUploads, rows);
        });

        let token = CancellationToken::new();
        *self.lock_cancel() = token.clone();
        tracing::debug!("session initialized with {} rows", batch.len());
        token
    }

    /// Signal cancellation and mark every unfinished row ABORTED right away.
    pub fn cancel(&self) {
        self.notification_uploads.send_modify(|rows| {
            for row in rows.iter_mut().filter(|r| r.status.is_unfinished()) {
                row.status = UploadStatus::Aborted;
            }
            self.persist(Slot::NotificationUploads, rows);
        });
        self.lock_cancel().cancel();
        tracing::info!("batch upload cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock_cancel().is_cancelled()
    }

    /// Token of the running batch, for waits that must end on cancellation.
    pub fn cancel_token(&self) -> CancellationToken {
        self.lock_cancel().clone()
    }

    /// Replace the entry with the same file name, or append it.
    pub fn set_file_upload(&self, info: FileUploadInfo) {
        self.file_uploads.send_modify(|files| {
            match files.iter_mut().find(|f| f.file_name == info.file_name) {
                Some(existing) => *existing = info,
                None => files.push(info),
            }
            self.persist(Slot::FileUploads, files);
        });
    }

    /// Replace the record with the same row number, or append it.
    pub fn set_notification(&self, info: NotificationUploadInfo) {
        self.notification_uploads.send_modify(|rows| {
            match rows.iter_mut().find(|r| r.row_number == info.row_number) {
                Some(existing) => *existing = info,
                None => rows.push(info),
            }
            self.persist(Slot::NotificationUploads, rows);
        });
    }

    pub fn push_error(&self, error: UploadError) {
        self.upload_errors.send_modify(|errors| {
            errors.push(error);
            self.persist(Slot::UploadErrors, errors);
        });
    }

    /// Current state of a file, WAITING if the batch has not touched it.
    pub fn file_upload(&self, file_name: &str) -> FileUploadInfo {
        self.file_uploads
            .borrow()
            .iter()
            .find(|f| f.file_name == file_name)
            .cloned()
            .unwrap_or_else(|| FileUploadInfo::waiting(file_name))
    }

    /// Current record of a row, looked up by row number.
    pub fn notification(&self, row_number: u32) -> Option<NotificationUploadInfo> {
        self.notification_uploads
            .borrow()
            .iter()
            .find(|r| r.row_number == row_number)
            .cloned()
    }

    /// Status of a row, WAITING if the batch holds no record for it.
    pub fn row_status(&self, row_number: u32) -> UploadStatus {
        self.notification(row_number)
            .map_or(UploadStatus::Waiting, |r| r.status)
    }

    pub fn notifications(&self) -> Vec<NotificationUploadInfo> {
        self.notification_uploads.borrow().clone()
    }

    pub fn file_uploads(&self) -> Vec<FileUploadInfo> {
        self.file_uploads.borrow().clone()
    }

    pub fn upload_errors(&self) -> Vec<UploadError> {
        self.upload_errors.borrow().clone()
    }

    /// All error records of one row, in the order they were raised.
    pub fn errors_for_row(&self, row_number: u32) -> Vec<UploadError> {
        self.upload_errors
            .borrow()
            .iter()
            .filter(|e| e.row_number == row_number)
            .cloned()
            .collect()
    }

    pub fn subscribe_notifications(&self) -> watch::Receiver<Vec<NotificationUploadInfo>> {
        self.notification_uploads.subscribe()
    }

    pub fn subscribe_file_uploads(&self) -> watch::Receiver<Vec<FileUploadInfo>> {
        self.file_uploads.subscribe()
    }

    pub fn subscribe_upload_errors(&self) -> watch::Receiver<Vec<UploadError>> {
        self.upload_errors.subscribe()
    }

    pub fn mark_finished(&self, at: DateTime<Utc>) {
        self.finished_at.send_replace(Some(at));
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.borrow()
    }

    /// Whether durable storage holds a previous batch's rows.
    pub fn last_results_available(&self) -> bool {
        matches!(self.store.load(Slot::NotificationUploads), Ok(Some(s)) if !s.is_empty())
    }

    /// Reload the last batch's rows and errors from storage.
    ///
    /// Rows found PLANNED or PENDING were interrupted (crash or reload) and are
    /// stored back as ABORTED; nothing else is changed.
    pub fn restore(&self) -> anyhow::Result<()> {
        let mut rows: Vec<NotificationUploadInfo> =
            store::load_json(self.store.as_ref(), Slot::NotificationUploads)?.unwrap_or_default();
        if rows.iter().any(|r| r.status.is_unfinished()) {
            for row in rows.iter_mut().filter(|r| r.status.is_unfinished()) {
                row.status = UploadStatus::Aborted;
            }
            store::save_json(self.store.as_ref(), Slot::NotificationUploads, &rows)?;
        }
        let errors: Vec<UploadError> =
            store::load_json(self.store.as_ref(), Slot::UploadErrors)?.unwrap_or_default();
        let files: Vec<FileUploadInfo> =
            store::load_json(self.store.as_ref(), Slot::FileUploads)?.unwrap_or_default();

        tracing::info!(
            "restored {} rows and {} error records from storage",
            rows.len(),
            errors.len()
        );
        self.notification_uploads.send_replace(rows);
        self.upload_errors.send_replace(errors);
        self.file_uploads.send_replace(files);
        Ok(())
    }

    /// Drop in-memory state and stop any running batch. Storage is kept so the
    /// last results stay available.
    pub fn clear(&self) {
        self.lock_cancel().cancel();
        self.file_uploads.send_replace(Vec::new());
        self.notification_uploads.send_replace(Vec::new());
        self.upload_errors.send_replace(Vec::new());
        self.finished_at.send_replace(None);
    }

    fn persist<T: Serialize + ?Sized>(&self, slot: Slot, value: &T) {
        if let Err(e) = store::save_json(self.store.as_ref(), slot, value) {
            tracing::warn!("failed to persist {}: {e:#}", slot.key());
        }
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        // A poisoned lock still holds a usable token.
        self.cancel.lock().unwrap_or_else(|e| e.into_inner())
    }
}
