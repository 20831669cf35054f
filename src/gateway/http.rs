//! Gateway backed by the IGS HTTP endpoints.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url, header::ETAG};
use serde::Deserialize;

use super::{
    DocumentReference, FinishUpload, Gateway, NotificationSubmission, SubmitReceipt, UploadPlan,
    ValidationInfo,
};
use crate::{config::GatewayCfg, error::GatewayError};

/// Client for the notification gateway and the sequence storage service.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    http: Client,
    gateway_url: String,
    service_url: String,
    bearer_token: Option<String>,
}

impl HttpGateway {
    pub fn new(http: Client, cfg: &GatewayCfg) -> Self {
        Self {
            http,
            gateway_url: cfg.igs_gateway_url.trim_end_matches('/').to_string(),
            service_url: cfg.igs_service_url.trim_end_matches('/').to_string(),
            bearer_token: cfg.bearer_token.clone().filter(|t| !t.is_empty()),
        }
    }

    fn upload_url(&self, reference_id: &str, operation: &str) -> String {
        format!(
            "{}/S3Controller/upload/{}/{}",
            self.service_url,
            urlencoding::encode(reference_id),
            operation
        )
    }

    /// Attach the bearer token to calls of our own backends.
    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn create_reference(
        &self,
        content_hash: &str,
    ) -> Result<DocumentReference, GatewayError> {
        let url = format!(
            "{}/document-reference?hash={}",
            self.gateway_url,
            urlencoding::encode(content_hash)
        );
        let resp = self.authorized(self.http.post(url).json(&serde_json::json!({}))).send().await?;
        let body: ReferenceResp = ensure_success(resp).await?.json().await?;
        Ok(DocumentReference {
            document_reference_id: reference_id_from_url(&body.sequence_upload_url),
            sequence_upload_url: body.sequence_upload_url,
        })
    }

    async fn upload_plan(
        &self,
        reference_id: &str,
        file_size: u64,
    ) -> Result<UploadPlan, GatewayError> {
        let url = format!(
            "{}?fileSize={file_size}",
            self.upload_url(reference_id, "s3-upload-info")
        );
        let resp = self.authorized(self.http.get(url)).send().await?;
        Ok(ensure_success(resp).await?.json().await?)
    }

    async fn upload_chunk(
        &self,
        url: &str,
        bytes: Vec<u8>,
    ) -> Result<Option<String>, GatewayError> {
        // Pre-signed URLs carry their own credentials.
        let resp = self.http.put(url).body(bytes).send().await?;
        let resp = ensure_success(resp).await?;
        Ok(resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }

    async fn finish_upload(
        &self,
        reference_id: &str,
        finish: &FinishUpload,
    ) -> Result<(), GatewayError> {
        let url = self.upload_url(reference_id, "$finish-upload");
        let resp = self.authorized(self.http.post(url).json(finish)).send().await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn init_validation(&self, reference_id: &str) -> Result<(), GatewayError> {
        let url = self.upload_url(reference_id, "$validate");
        let resp = self
            .authorized(self.http.post(url).json(&serde_json::json!({})))
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn validation_status(&self, reference_id: &str) -> Result<ValidationInfo, GatewayError> {
        let url = self.upload_url(reference_id, "$validation-status");
        let resp = self.authorized(self.http.get(url)).send().await?;
        Ok(ensure_success(resp).await?.json().await?)
    }

    async fn submit_notification(
        &self,
        submission: &NotificationSubmission<'_>,
    ) -> Result<SubmitReceipt, GatewayError> {
        tracing::debug!(
            "submitting notification {}",
            submission.row.demis_notification_id
        );
        let url = format!(
            "{}/notification-sequence/$process-notification-sequence",
            self.gateway_url
        );
        let resp = self.authorized(self.http.post(url).json(submission)).send().await?;
        let params: Parameters = ensure_success(resp).await?.json().await?;
        Ok(params.receipt())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceResp {
    sequence_upload_url: String,
}

/// FHIR `Parameters` resource returned for a processed notification.
#[derive(Debug, Default, Deserialize)]
struct Parameters {
    #[serde(default)]
    parameter: Vec<Parameter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Parameter {
    name: String,
    #[serde(default)]
    value_identifier: Option<Identifier>,
}

#[derive(Debug, Deserialize)]
struct Identifier {
    #[serde(default)]
    value: Option<String>,
}

impl Parameters {
    fn receipt(self) -> SubmitReceipt {
        let mut receipt = SubmitReceipt::default();
        for p in self.parameter {
            let value = p.value_identifier.and_then(|i| i.value);
            match p.name.as_str() {
                "transactionID" => receipt.igs_id = value,
                "submitterGeneratedNotificationID" => receipt.notification_id = value,
                "labSequenceID" => receipt.lab_id = value,
                _ => {}
            }
        }
        receipt
    }
}

/// First path segment of the upload URL that is a UUID.
pub fn reference_id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .find(|s| uuid::Uuid::parse_str(s).is_ok())
        .map(str::to_string)
}

/// Problem-JSON body of a failed call.
#[derive(Debug, Deserialize)]
struct Problem {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Turn a non-success response into a `GatewayError::Http` with the body's detail.
async fn ensure_success(resp: Response) -> Result<Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let problem = serde_json::from_str::<Problem>(&body).ok();
    let message = problem
        .as_ref()
        .and_then(|p| p.title.clone())
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_default();
    let detail = match problem {
        Some(p) => p.detail,
        None if body.trim().is_empty() => None,
        None => Some(body),
    };
    tracing::debug!("gateway call failed with {status}: {detail:?}");
    Err(GatewayError::Http {
        status: status.as_u16(),
        message,
        detail,
    })
}
