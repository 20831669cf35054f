//! Batch orchestrator: uploads every row of a batch, one after the other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::{
    attach::AttachedFiles,
    error::BatchError,
    gateway::Gateway,
    metadata::MetadataBatch,
    session::BatchSession,
    status::{NotificationUploadInfo, UploadStatus},
    upload::RowUploader,
    validation::PollPolicy,
};

/// Row counts of a finished batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub aborted: usize,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchSummary {
    pub fn from_rows(rows: &[NotificationUploadInfo], finished_at: Option<DateTime<Utc>>) -> Self {
        let count = |s: UploadStatus| rows.iter().filter(|r| r.status == s).count();
        Self {
            total: rows.len(),
            succeeded: count(UploadStatus::Success),
            failed: count(UploadStatus::Error),
            aborted: count(UploadStatus::Aborted),
            finished_at,
        }
    }
}

/// Runs batches against one gateway and records them in one session.
pub struct BatchOrchestrator {
    gateway: Arc<dyn Gateway>,
    session: Arc<BatchSession>,
    policy: PollPolicy,
}

impl BatchOrchestrator {
    pub fn new(gateway: Arc<dyn Gateway>, session: Arc<BatchSession>, policy: PollPolicy) -> Self {
        Self {
            gateway,
            session,
            policy,
        }
    }

    pub fn session(&self) -> &Arc<BatchSession> {
        &self.session
    }

    /// Upload all rows in batch order.
    ///
    /// Every required file must already be attached. The loop stops before the
    /// next row once the batch is cancelled; rows already started are not
    /// rolled back. The finish time is recorded either way.
    pub async fn upload_notifications(
        &self,
        batch: &MetadataBatch,
        files: &AttachedFiles,
    ) -> Result<BatchSummary, BatchError> {
        if batch.is_empty() {
            tracing::error!("no notifications to upload");
            return Err(BatchError::Empty);
        }
        tracing::info!("start uploading {} notifications", batch.len());
        let cancel = self.session.initialize(batch);
        let uploader = RowUploader {
            gateway: self.gateway.as_ref(),
            session: &self.session,
            files,
            policy: self.policy,
            cancel: &cancel,
        };

        for row in batch.rows() {
            if cancel.is_cancelled() {
                tracing::info!("batch cancelled before row {}", row.row_number);
                break;
            }
            uploader.upload_row(row).await;
        }

        let finished_at = Utc::now();
        self.session.mark_finished(finished_at);
        let summary = BatchSummary::from_rows(&self.session.notifications(), Some(finished_at));
        tracing::info!(
            "batch finished: {} succeeded, {} failed, {} aborted",
            summary.succeeded,
            summary.failed,
            summary.aborted
        );
        Ok(summary)
    }

    /// Stop the running batch; unfinished rows become ABORTED right away.
    pub fn cancel(&self) {
        self.session.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attach::SequenceFile,
        classify::SearchHint,
        error::GatewayError,
        gateway::{
            ValidationStatus,
            fake::{Call, FakeGateway, Op},
        },
        metadata::fixtures,
        store::{self, MemoryStore, Slot, StateStore},
    };
    use std::{sync::Mutex, time::Duration};

    fn attached(batch: &MetadataBatch) -> AttachedFiles {
        let mut files = AttachedFiles::new(1 << 20);
        let all: Vec<_> = batch
            .rows()
            .flat_map(|r| r.expected_files())
            .map(|f| SequenceFile::from_bytes(f.name, b"ACGT".to_vec()))
            .collect();
        files.attach(batch, all);
        files
    }

    fn setup(
        gw: FakeGateway,
        max_attempts: u32,
    ) -> (Arc<MemoryStore>, Arc<FakeGateway>, BatchOrchestrator) {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(BatchSession::new(store.clone()));
        let gw = Arc::new(gw);
        let policy = PollPolicy {
            max_attempts,
            wait_between: Duration::from_millis(500),
        };
        let orchestrator = BatchOrchestrator::new(gw.clone(), session, policy);
        (store, gw, orchestrator)
    }

    fn persisted_rows(store: &MemoryStore) -> Vec<NotificationUploadInfo> {
        store::load_json(store, Slot::NotificationUploads).unwrap().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_rows_succeed() {
        let batch = fixtures::batch(3);
        let (store, gw, orchestrator) = setup(FakeGateway::new().part_size(1024), 40);

        let summary = orchestrator
            .upload_notifications(&batch, &attached(&batch))
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 3);
        assert!(summary.finished_at.is_some());
        assert_eq!(orchestrator.session().finished_at(), summary.finished_at);
        assert_eq!(gw.count(Op::UploadChunk), 6);

        let rows = persisted_rows(&store);
        let ids: Vec<_> = rows.iter().map(|r| r.demis_sequence_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["IGS-LAB-1", "IGS-LAB-2", "IGS-LAB-3"]);
        assert!(rows.iter().all(|r| r.status == UploadStatus::Success));
        assert!(orchestrator.session().upload_errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_failure_for_every_row() {
        let batch = fixtures::batch(3);
        let error = GatewayError::Http {
            status: 500,
            message: "Internal Server Error".into(),
            detail: None,
        };
        let (store, gw, orchestrator) =
            setup(FakeGateway::new().fail_always(Op::CreateReference, error), 40);

        let summary = orchestrator
            .upload_notifications(&batch, &attached(&batch))
            .await
            .unwrap();

        assert_eq!(summary.failed, 3);
        assert_eq!(gw.count(Op::CreateReference), 3);
        assert!(persisted_rows(&store).iter().all(|r| r.status == UploadStatus::Error));

        let errors = orchestrator.session().upload_errors();
        let rows: Vec<_> = errors.iter().map(|e| e.row_number).collect();
        assert_eq!(rows, vec![1, 2, 3]);
        for e in &errors {
            assert_eq!(e.errors.len(), 1);
            assert_eq!(e.errors[0].text, "500 Internal Server Error");
            assert_eq!(
                e.errors[0].query_string.as_deref(),
                Some(SearchHint::SequenceValidation.query_string())
            );
        }
        let stored: Vec<crate::classify::UploadError> =
            store::load_json(store.as_ref(), Slot::UploadErrors).unwrap().unwrap();
        assert_eq!(stored, errors);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_budget_exhausted() {
        let batch = fixtures::batch(1);
        let (_store, gw, orchestrator) =
            setup(FakeGateway::new().validation(vec![], ValidationStatus::Validating), 3);

        let summary = orchestrator
            .upload_notifications(&batch, &attached(&batch))
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(gw.count(Op::ValidationStatus), 3);
        let errors = orchestrator.session().errors_for_row(1);
        assert!(errors[0].errors[0].text.contains("3 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failing_row_does_not_stop_the_batch() {
        let batch = fixtures::batch(3);
        let error = GatewayError::Http {
            status: 400,
            message: "Bad Request".into(),
            detail: Some("duplicate notification".into()),
        };
        let (_store, _gw, orchestrator) =
            setup(FakeGateway::new().fail_nth(Op::Submit, 2, error), 40);

        orchestrator
            .upload_notifications(&batch, &attached(&batch))
            .await
            .unwrap();

        let statuses: Vec<_> = orchestrator
            .session()
            .notifications()
            .iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(
            statuses,
            vec![UploadStatus::Success, UploadStatus::Error, UploadStatus::Success]
        );
        assert_eq!(
            orchestrator.session().errors_for_row(2)[0].errors[0].text,
            "duplicate notification"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_batch() {
        let batch = fixtures::batch(4);
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(BatchSession::new(store.clone()));
        let trigger = session.clone();
        // cancel while the second row is being submitted
        let gw = Arc::new(FakeGateway::new().on_call(move |c| {
            if let Call::Submit { notification_id, .. } = c
                && notification_id == "notification-2"
            {
                trigger.cancel();
            }
        }));
        let orchestrator = BatchOrchestrator::new(gw.clone(), session, PollPolicy::default());

        let summary = orchestrator
            .upload_notifications(&batch, &attached(&batch))
            .await
            .unwrap();

        let statuses: Vec<_> = persisted_rows(&store).iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                UploadStatus::Success,
                UploadStatus::Success,
                UploadStatus::Aborted,
                UploadStatus::Aborted
            ]
        );
        assert_eq!(gw.count(Op::Submit), 2);
        assert_eq!(gw.count(Op::CreateReference), 4);
        assert!(summary.finished_at.is_some());
        assert!(orchestrator.session().upload_errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_iff_sequence_id_assigned() {
        let batch = fixtures::batch(2);
        let (_store, _gw, orchestrator) = setup(FakeGateway::new().without_sequence_ids(), 40);

        let summary = orchestrator
            .upload_notifications(&batch, &attached(&batch))
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let (store, _gw, orchestrator) = setup(FakeGateway::new(), 40);

        let err = orchestrator
            .upload_notifications(&MetadataBatch::default(), &AttachedFiles::new(1))
            .await
            .unwrap_err();

        assert_eq!(err, BatchError::Empty);
        assert_eq!(store.load(Slot::NotificationUploads).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarting_resets_previous_errors() {
        let batch = fixtures::batch(1);
        let down = GatewayError::Transport("down".into());
        let (_store, _gw, orchestrator) =
            setup(FakeGateway::new().fail_nth(Op::CreateReference, 1, down), 40);
        let files = attached(&batch);

        orchestrator.upload_notifications(&batch, &files).await.unwrap();
        assert_eq!(orchestrator.session().upload_errors().len(), 1);

        let summary = orchestrator.upload_notifications(&batch, &files).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert!(orchestrator.session().upload_errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_batch_runs_without_finish_time() {
        let batch = fixtures::batch(1);
        let session = Arc::new(BatchSession::new(Arc::new(MemoryStore::new())));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gw = {
            let session = session.clone();
            let seen = seen.clone();
            FakeGateway::new().on_call(move |c| {
                if c.op() == Op::Submit {
                    seen.lock().unwrap().push(session.finished_at());
                }
            })
        };
        let orchestrator = BatchOrchestrator::new(Arc::new(gw), session, PollPolicy::default());
        let files = attached(&batch);

        let first = orchestrator.upload_notifications(&batch, &files).await.unwrap();
        let second = orchestrator.upload_notifications(&batch, &files).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![None, None]);
        assert!(first.finished_at.is_some());
        assert_eq!(orchestrator.session().finished_at(), second.finished_at);
    }
}
