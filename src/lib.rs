//! Batch upload of genomic sequence notifications.
//!
//! Rows of a parsed metadata batch are processed one after the other: each
//! attached sequence file is registered, uploaded in chunks and validated,
//! then the notification is submitted. Progress, results and errors live in a
//! [`session::BatchSession`] that persists every change.

pub mod attach;
pub mod batch;
pub mod classify;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metadata;
pub mod outcome;
pub mod report;
pub mod session;
pub mod status;
pub mod store;
pub mod transfer;
pub mod upload;
pub mod validation;
pub mod wizard;

pub use batch::{BatchOrchestrator, BatchSummary};
pub use config::Config;
pub use error::{BatchError, GatewayError, UploadFailure};
pub use gateway::{Gateway, HttpGateway};
pub use session::BatchSession;
