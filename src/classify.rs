//! Turns row failures into user-facing error records.

use serde::{Deserialize, Serialize};

use crate::{
    error::{GatewayError, UploadFailure},
    outcome,
};

/// Troubleshooting category a message points the user to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchHint {
    /// Metadata rejected by FHIR profile validation.
    ProfileValidation,
    /// Sequence content rejected or not validated in time.
    SequenceValidation,
    Other,
}

impl SearchHint {
    /// Search term of the help portal. `Other` shares the sequence term there.
    pub fn query_string(self) -> &'static str {
        match self {
            SearchHint::ProfileValidation => "Validierungsfehler Metadaten-Upload IGS",
            SearchHint::SequenceValidation | SearchHint::Other => {
                "Validierungsfehler Sequenzdaten-Upload IGS"
            }
        }
    }
}

/// One displayable message with its help search term.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
}

impl ErrorMessage {
    pub fn new(text: impl Into<String>, hint: Option<SearchHint>) -> Self {
        Self {
            text: text.into(),
            query_string: hint.map(|h| h.query_string().to_string()),
        }
    }
}

/// Error record of one failure event of one row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadError {
    pub row_number: u32,
    pub errors: Vec<ErrorMessage>,
    /// Full diagnostic payload for copying into a support request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clipboard_content: Option<String>,
}

/// Build the error record for a failed row.
pub fn classify(row_number: u32, failure: &UploadFailure) -> UploadError {
    match failure {
        UploadFailure::Reference { source, .. }
        | UploadFailure::Transfer { source, .. }
        | UploadFailure::Validation { source, .. } => {
            single(row_number, source.to_string(), SearchHint::Other)
        }

        UploadFailure::ValidationTimeout { .. }
        | UploadFailure::ValidationRejected { .. } => {
            single(row_number, failure.to_string(), SearchHint::SequenceValidation)
        }

        UploadFailure::Submission(e) => classify_submission(row_number, e),

        UploadFailure::Read { .. }
        | UploadFailure::InvalidPlan { .. }
        | UploadFailure::Contract(_) => {
            single(row_number, failure.to_string(), SearchHint::Other)
        }
    }
}

fn classify_submission(row_number: u32, e: &GatewayError) -> UploadError {
    if let Some(detail) = e.detail() {
        if e.status() == 422 && detail.trim_start().starts_with('{') {
            return profile_validation(row_number, detail);
        }
        return single(row_number, detail.to_string(), SearchHint::Other);
    }
    single(row_number, e.to_string(), SearchHint::Other)
}

/// One entry per error issue of the outcome; the outcome goes to the clipboard.
fn profile_validation(row_number: u32, detail: &str) -> UploadError {
    let hint = Some(SearchHint::ProfileValidation);
    match outcome::parse(detail) {
        Ok(parsed) => {
            let mut errors: Vec<_> = outcome::error_diagnostics(&parsed.outcome)
                .into_iter()
                .map(|text| ErrorMessage::new(text, hint))
                .collect();
            if errors.is_empty() {
                errors.push(ErrorMessage::new(outcome::FALLBACK_MESSAGE, hint));
            }
            let clipboard = serde_json::to_string_pretty(&parsed.raw)
                .unwrap_or_else(|_| detail.to_string());
            UploadError {
                row_number,
                errors,
                clipboard_content: Some(clipboard),
            }
        }
        Err(e) => {
            tracing::error!("failed to parse validation outcome of row {row_number}: {e}");
            UploadError {
                row_number,
                errors: vec![ErrorMessage::new(outcome::FALLBACK_MESSAGE, hint)],
                clipboard_content: Some(detail.to_string()),
            }
        }
    }
}

fn single(row_number: u32, text: String, hint: SearchHint) -> UploadError {
    UploadError {
        row_number,
        errors: vec![ErrorMessage::new(text.clone(), Some(hint))],
        clipboard_content: Some(text),
    }
}
