//! Failure kinds raised along the upload pipeline.

use thiserror::Error;

/// Failure reported by a gateway call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The server answered with a non-success status.
    #[error("{status} {message}")]
    Http {
        status: u16,
        message: String,
        /// `detail` of a problem-JSON body, if the server sent one.
        detail: Option<String>,
    },
    /// The request never produced a response.
    #[error("0 {0}")]
    Transport(String),
    /// The response could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn status(&self) -> u16 {
        match self {
            Self::Http { status, .. } => *status,
            _ => 0,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Http { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                message: e.to_string(),
                detail: None,
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Why a row did not reach SUCCESS. Produced where the failure is caught.
#[derive(Debug, Error)]
pub enum UploadFailure {
    #[error("creating the document reference for {file} failed: {source}")]
    Reference { file: String, source: GatewayError },

    #[error("uploading {file} failed: {source}")]
    Transfer { file: String, source: GatewayError },

    #[error("reading {file} failed: {source}")]
    Read {
        file: String,
        source: std::io::Error,
    },

    #[error("upload plan for {file} has a part size of 0")]
    InvalidPlan { file: String },

    #[error("validating {file} failed: {source}")]
    Validation { file: String, source: GatewayError },

    #[error("sequence validation of {file} did not finish after {attempts} attempts")]
    ValidationTimeout { file: String, attempts: u32 },

    #[error("sequence {file} is not valid: {message}")]
    ValidationRejected { file: String, message: String },

    #[error("submitting the notification failed: {0}")]
    Submission(GatewayError),

    #[error("{0}")]
    Contract(#[from] ContractViolation),
}

/// Data-integrity problems that retrying cannot fix.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("no SHA-256 hash is given for sequence file \"{0}\"")]
    MissingHash(String),

    #[error("no document reference id is available for sequence file \"{0}\"")]
    MissingReferenceId(String),

    #[error("sequence file \"{0}\" is not attached")]
    MissingFile(String),

    #[error("the backend accepted the notification but assigned no sequence id")]
    MissingSequenceId,
}

/// Why a batch could not start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("the metadata batch contains no rows")]
    Empty,
}
