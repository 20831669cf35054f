//! Scripted in-memory gateway for pipeline tests.

use async_trait::async_trait;
use std::{collections::VecDeque, sync::Mutex};

use super::{
    DocumentReference, FinishUpload, Gateway, NotificationSubmission, SubmitReceipt, UploadPlan,
    ValidationInfo, ValidationStatus,
};
use crate::error::GatewayError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    CreateReference,
    UploadPlan,
    UploadChunk,
    FinishUpload,
    InitValidation,
    ValidationStatus,
    Submit,
}

/// One recorded gateway call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateReference { hash: String },
    UploadPlan { reference_id: String, size: u64 },
    UploadChunk { url: String, len: usize },
    FinishUpload { reference_id: String, finish: FinishUpload },
    InitValidation { reference_id: String },
    ValidationStatus { reference_id: String },
    Submit { notification_id: String, file_one: Option<String>, file_two: Option<String> },
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::CreateReference { .. } => Op::CreateReference,
            Call::UploadPlan { .. } => Op::UploadPlan,
            Call::UploadChunk { .. } => Op::UploadChunk,
            Call::FinishUpload { .. } => Op::FinishUpload,
            Call::InitValidation { .. } => Op::InitValidation,
            Call::ValidationStatus { .. } => Op::ValidationStatus,
            Call::Submit { .. } => Op::Submit,
        }
    }
}

type Hook = Box<dyn Fn(&Call) + Send + Sync>;

pub struct FakeGateway {
    calls: Mutex<Vec<Call>>,
    part_size: u64,
    with_reference_ids: bool,
    assign_ids: bool,
    /// (op, nth call or every call, error)
    failures: Vec<(Op, Option<usize>, GatewayError)>,
    validation_script: Mutex<VecDeque<ValidationInfo>>,
    validation_default: ValidationStatus,
    hook: Option<Hook>,
}

impl FakeGateway {
    /// Every call succeeds; files are split into 4-byte chunks.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            part_size: 4,
            with_reference_ids: true,
            assign_ids: true,
            failures: Vec::new(),
            validation_script: Mutex::new(VecDeque::new()),
            validation_default: ValidationStatus::Valid,
            hook: None,
        }
    }

    pub fn part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    /// Upload URLs carry no UUID segment.
    pub fn without_reference_ids(mut self) -> Self {
        self.with_reference_ids = false;
        self
    }

    /// Submissions succeed but return no transaction id.
    pub fn without_sequence_ids(mut self) -> Self {
        self.assign_ids = false;
        self
    }

    pub fn fail_always(mut self, op: Op, error: GatewayError) -> Self {
        self.failures.push((op, None, error));
        self
    }

    /// Fail only the `nth` (1-based) call of `op`.
    pub fn fail_nth(mut self, op: Op, nth: usize, error: GatewayError) -> Self {
        self.failures.push((op, Some(nth), error));
        self
    }

    /// Status answers returned in order, then `default` forever.
    pub fn validation(self, script: Vec<ValidationStatus>, default: ValidationStatus) -> Self {
        let script = script
            .into_iter()
            .map(|status| ValidationInfo {
                document_reference_id: None,
                message: message_for(&status),
                status,
            })
            .collect();
        Self {
            validation_script: Mutex::new(script),
            validation_default: default,
            ..self
        }
    }

    /// Run `hook` on every call, after it is recorded.
    pub fn on_call(mut self, hook: impl Fn(&Call) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.op() == op).count()
    }

    fn record(&self, call: Call) -> Result<(), GatewayError> {
        let op = call.op();
        let nth = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call.clone());
            calls.iter().filter(|c| c.op() == op).count()
        };
        if let Some(hook) = &self.hook {
            hook(&call);
        }
        for (fail_op, at, error) in &self.failures {
            if *fail_op == op && at.is_none_or(|n| n == nth) {
                return Err(error.clone());
            }
        }
        Ok(())
    }
}

fn message_for(status: &ValidationStatus) -> String {
    match status {
        ValidationStatus::ValidationFailed => "sequence contains invalid characters".into(),
        _ => String::new(),
    }
}

/// Deterministic UUID for the n-th reference.
pub fn reference_id(n: usize) -> String {
    format!("00000000-0000-4000-8000-{n:012}")
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn create_reference(
        &self,
        content_hash: &str,
    ) -> Result<DocumentReference, GatewayError> {
        self.record(Call::CreateReference {
            hash: content_hash.to_string(),
        })?;
        let n = self.count(Op::CreateReference);
        if self.with_reference_ids {
            let id = reference_id(n);
            Ok(DocumentReference {
                sequence_upload_url: format!("https://storage.test/sequences/{id}"),
                document_reference_id: Some(id),
            })
        } else {
            Ok(DocumentReference {
                sequence_upload_url: "https://storage.test/sequences/pending".into(),
                document_reference_id: None,
            })
        }
    }

    async fn upload_plan(
        &self,
        reference_id: &str,
        file_size: u64,
    ) -> Result<UploadPlan, GatewayError> {
        self.record(Call::UploadPlan {
            reference_id: reference_id.to_string(),
            size: file_size,
        })?;
        let chunks = match self.part_size {
            0 => 1,
            p => file_size.div_ceil(p),
        };
        Ok(UploadPlan {
            upload_id: format!("upload-{reference_id}"),
            presigned_urls: (1..=chunks)
                .map(|i| format!("https://storage.test/{reference_id}/part/{i}"))
                .collect(),
            part_size_bytes: self.part_size,
        })
    }

    async fn upload_chunk(
        &self,
        url: &str,
        bytes: Vec<u8>,
    ) -> Result<Option<String>, GatewayError> {
        self.record(Call::UploadChunk {
            url: url.to_string(),
            len: bytes.len(),
        })?;
        Ok(Some(format!("\"etag-{}\"", self.count(Op::UploadChunk))))
    }

    async fn finish_upload(
        &self,
        reference_id: &str,
        finish: &FinishUpload,
    ) -> Result<(), GatewayError> {
        self.record(Call::FinishUpload {
            reference_id: reference_id.to_string(),
            finish: finish.clone(),
        })
    }

    async fn init_validation(&self, reference_id: &str) -> Result<(), GatewayError> {
        self.record(Call::InitValidation {
            reference_id: reference_id.to_string(),
        })
    }

    async fn validation_status(&self, reference_id: &str) -> Result<ValidationInfo, GatewayError> {
        self.record(Call::ValidationStatus {
            reference_id: reference_id.to_string(),
        })?;
        let scripted = self.validation_script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| ValidationInfo {
            document_reference_id: Some(reference_id.to_string()),
            message: message_for(&self.validation_default),
            status: self.validation_default.clone(),
        }))
    }

    async fn submit_notification(
        &self,
        submission: &NotificationSubmission<'_>,
    ) -> Result<SubmitReceipt, GatewayError> {
        let row = submission.row;
        self.record(Call::Submit {
            notification_id: row.demis_notification_id.clone(),
            file_one: submission.file_one_document_reference.clone(),
            file_two: submission.file_two_document_reference.clone(),
        })?;
        Ok(SubmitReceipt {
            igs_id: self.assign_ids.then(|| format!("IGS-{}", row.lab_sequence_id)),
            notification_id: Some(row.demis_notification_id.clone()),
            lab_id: Some(row.lab_sequence_id.clone()),
        })
    }
}

