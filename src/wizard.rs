//! Headless step flow of an upload: metadata, files, upload, result.

use std::sync::Arc;

use crate::{
    attach::{AttachRejection, AttachedFiles, SequenceFile},
    metadata::MetadataBatch,
    session::BatchSession,
    status::UploadStatus,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WizardStep {
    ProvideMetadata,
    SelectSequenceFiles,
    UploadStatus,
    Result,
}

impl WizardStep {
    pub const ALL: [WizardStep; 4] = [
        WizardStep::ProvideMetadata,
        WizardStep::SelectSequenceFiles,
        WizardStep::UploadStatus,
        WizardStep::Result,
    ];

    fn index(self) -> usize {
        match self {
            WizardStep::ProvideMetadata => 0,
            WizardStep::SelectSequenceFiles => 1,
            WizardStep::UploadStatus => 2,
            WizardStep::Result => 3,
        }
    }
}

/// Current step plus the batch and files collected so far.
pub struct WizardState {
    pub current_step: WizardStep,
    batch: Option<MetadataBatch>,
    files: AttachedFiles,
    session: Arc<BatchSession>,
}

impl WizardState {
    pub fn new(session: Arc<BatchSession>, max_file_size: u64) -> Self {
        Self {
            current_step: WizardStep::ProvideMetadata,
            batch: None,
            files: AttachedFiles::new(max_file_size),
            session,
        }
    }

    pub fn use_parsed_batch(&mut self, batch: MetadataBatch) {
        tracing::debug!("using parsed batch with {} rows", batch.len());
        self.batch = Some(batch);
    }

    /// Attach files to the current batch; returns the rejected ones.
    pub fn attach_files(&mut self, files: Vec<SequenceFile>) -> Vec<AttachRejection> {
        let Some(batch) = &self.batch else {
            return files
                .into_iter()
                .map(|f| AttachRejection::NoMatchingRow(f.name))
                .collect();
        };
        let rejected = self.files.attach(batch, files);
        for r in &rejected {
            tracing::warn!("file not attached: {r}");
        }
        rejected
    }

    pub fn batch(&self) -> Option<&MetadataBatch> {
        self.batch.as_ref()
    }

    pub fn files(&self) -> &AttachedFiles {
        &self.files
    }

    pub fn session(&self) -> &Arc<BatchSession> {
        &self.session
    }

    /// Whether the current step's gate is satisfied.
    pub fn can_proceed(&self) -> bool {
        match self.current_step {
            WizardStep::ProvideMetadata => self.batch.as_ref().is_some_and(|b| !b.is_empty()),
            WizardStep::SelectSequenceFiles => self
                .batch
                .as_ref()
                .is_some_and(|b| self.files.all_attached(b)),
            WizardStep::UploadStatus => {
                // every row ended in SUCCESS or ERROR
                let rows = self.session.notifications();
                self.batch.as_ref().is_some_and(|b| b.len() == rows.len())
                    && rows
                        .iter()
                        .all(|r| matches!(r.status, UploadStatus::Success | UploadStatus::Error))
            }
            WizardStep::Result => false,
        }
    }

    /// Move to the next step if allowed; returns whether it moved.
    pub fn proceed(&mut self) -> bool {
        if !self.can_proceed() {
            return false;
        }
        let next = self.current_step.index() + 1;
        if let Some(step) = WizardStep::ALL.get(next) {
            self.current_step = *step;
            return true;
        }
        false
    }

    /// Cancel the upload and jump to the result.
    pub fn cancel(&mut self) {
        self.session.cancel();
        self.current_step = WizardStep::Result;
    }

    /// Restore the last batch from storage and show its result.
    pub fn proceed_to_result_step(&mut self) -> anyhow::Result<()> {
        self.session.restore()?;
        self.current_step = WizardStep::Result;
        Ok(())
    }

    /// Start over. Stored results stay available.
    pub fn back_to_welcome(&mut self) {
        self.session.clear();
        self.batch = None;
        self.files.clear();
        self.current_step = WizardStep::ProvideMetadata;
    }

    /// 1-based.
    pub fn step_number(&self) -> usize {
        self.current_step.index() + 1
    }

    pub fn prompt(&self) -> &'static str {
        match self.current_step {
            WizardStep::ProvideMetadata => "Provide the metadata of the sequences to notify.",
            WizardStep::SelectSequenceFiles => "Select the sequence files named in the metadata.",
            WizardStep::UploadStatus => "Uploading sequences and submitting notifications.",
            WizardStep::Result => "Upload finished. The report lists every row.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::fixtures,
        status::NotificationUploadInfo,
        store::MemoryStore,
    };

    fn wizard() -> WizardState {
        WizardState::new(Arc::new(BatchSession::new(Arc::new(MemoryStore::new()))), 1024)
    }

    fn all_files(batch: &MetadataBatch) -> Vec<SequenceFile> {
        batch
            .rows()
            .flat_map(|r| r.expected_files())
            .map(|f| SequenceFile::from_bytes(f.name, b"ACGT".to_vec()))
            .collect()
    }

    #[test]
    fn test_steps_are_gated() {
        let mut w = wizard();
        assert!(!w.proceed());

        let batch = fixtures::batch(2);
        w.use_parsed_batch(batch.clone());
        assert!(w.proceed());
        assert_eq!(w.current_step, WizardStep::SelectSequenceFiles);

        let mut files = all_files(&batch);
        let last = files.pop().unwrap();
        w.attach_files(files);
        assert!(!w.proceed());
        w.attach_files(vec![last]);
        assert!(w.proceed());
        assert_eq!(w.step_number(), 3);
    }

    #[test]
    fn test_upload_step_waits_for_all_rows() {
        let mut w = wizard();
        let batch = fixtures::batch(2);
        w.use_parsed_batch(batch.clone());
        w.attach_files(all_files(&batch));
        w.proceed();
        w.proceed();
        w.session().initialize(&batch);

        let rows: Vec<_> = batch.rows().collect();
        w.session()
            .set_notification(NotificationUploadInfo::for_row(rows[0], UploadStatus::Success));
        assert!(!w.can_proceed());
        w.session()
            .set_notification(NotificationUploadInfo::for_row(rows[1], UploadStatus::Error));
        assert!(w.proceed());
        assert_eq!(w.current_step, WizardStep::Result);
        assert!(!w.proceed());
    }

    #[test]
    fn test_attach_without_metadata_rejects_everything() {
        let mut w = wizard();
        let rejected = w.attach_files(vec![SequenceFile::from_bytes("a.fastq", b"A".to_vec())]);
        assert_eq!(rejected, vec![AttachRejection::NoMatchingRow("a.fastq".into())]);
    }

    #[test]
    fn test_cancel_jumps_to_result() {
        let mut w = wizard();
        let batch = fixtures::batch(1);
        w.use_parsed_batch(batch.clone());
        w.session().initialize(&batch);

        w.cancel();

        assert_eq!(w.current_step, WizardStep::Result);
        assert!(w.session().is_cancelled());
        assert_eq!(w.session().notifications()[0].status, UploadStatus::Aborted);
    }

    #[test]
    fn test_back_to_welcome_keeps_stored_results() {
        let mut w = wizard();
        let batch = fixtures::batch(1);
        w.use_parsed_batch(batch.clone());
        w.attach_files(all_files(&batch));
        w.session().initialize(&batch);

        w.back_to_welcome();

        assert_eq!(w.current_step, WizardStep::ProvideMetadata);
        assert!(w.batch().is_none());
        assert!(w.files().is_empty());
        assert!(w.session().notifications().is_empty());
        assert!(w.session().last_results_available());

        w.proceed_to_result_step().unwrap();
        assert_eq!(w.current_step, WizardStep::Result);
        assert_eq!(w.session().notifications()[0].status, UploadStatus::Aborted);
    }
}
