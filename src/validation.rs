//! Polling the server-side validation of an uploaded sequence.

use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    error::GatewayError,
    gateway::{Gateway, ValidationInfo},
};

/// Attempt budget and fixed delay between status polls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub wait_between: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            wait_between: Duration::from_millis(1000),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// A terminal status (VALID or VALIDATION_FAILED) was observed.
    Finished(ValidationInfo),
    Cancelled,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("validation did not finish after {attempts} attempts")]
    Timeout { attempts: u32 },
}

/// Poll until the status is terminal or the budget is used up.
///
/// A poll request already sent is awaited; cancellation is observed before
/// each poll and ends the wait between polls immediately. Transport failures
/// are returned at once and do not consume attempts.
pub async fn poll_validation(
    gateway: &dyn Gateway,
    reference_id: &str,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<PollOutcome, PollError> {
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }
        let info = gateway.validation_status(reference_id).await?;
        if info.status.is_terminal() {
            tracing::debug!("validation of {reference_id} ended with {:?}", info.status);
            return Ok(PollOutcome::Finished(info));
        }
        tracing::trace!("validation of {reference_id} still {:?} (attempt {attempt})", info.status);
        if attempt == policy.max_attempts {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            _ = tokio::time::sleep(policy.wait_between) => {}
        }
    }
    Err(PollError::Timeout {
        attempts: policy.max_attempts,
    })
}
