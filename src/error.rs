//! Error types for the edgequake-doc2md service.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`ServiceError`] — **Fatal for the current call**: the request itself is
//!   wrong (unsupported format, missing input) or the pipeline is untrustworthy
//!   (queue unreachable, engine crashed, health probe timed out). Returned as
//!   `Err(ServiceError)` from every orchestrator entry point.
//!
//! * [`DocumentError`] — **Non-fatal**: one document could not be converted
//!   but its siblings are fine. Stored as text inside that document's own
//!   [`crate::schema::ConversionResult`] or [`crate::schema::JobRecord`] so a
//!   single malformed file never aborts a batch.
//!
//! * [`EngineError`] — what a [`crate::engine::ConversionEngine`] reports. The
//!   orchestrators absorb the `Document` side and escalate the `Fault` side.
//!
//! "Job not found" is deliberately absent: lookups return
//! [`crate::schema::Lookup`] and callers check it explicitly.

use thiserror::Error;

/// Which side of the boundary is at fault.
///
/// Maps onto the HTTP surface as 4xx vs 5xx. Neither class is retried by the
/// core; retry/backoff belongs to the dispatcher and its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request is wrong; re-sending it unchanged will fail again.
    Caller,
    /// The pipeline failed; the request may be fine.
    System,
}

/// All call-level errors returned by the service.
///
/// Per-document failures use [`DocumentError`] and are stored in the data
/// model rather than propagated here.
#[derive(Debug, Error)]
pub enum ServiceError {
    // ── Caller errors ─────────────────────────────────────────────────────
    /// Neither a file nor a URL was supplied.
    #[error("Either {what} must be provided")]
    MissingInput { what: &'static str },

    /// Both files and URLs were supplied where exactly one kind is allowed.
    #[error("Provide either {what}, not both")]
    AmbiguousInput { what: &'static str },

    /// The URL is not a valid HTTP/HTTPS URL.
    #[error("Invalid URL '{url}': not a valid HTTP/HTTPS URL")]
    InvalidUrl { url: String },

    /// The capability gate rejected the document.
    #[error("Unsupported file format: {filename}")]
    UnsupportedFormat { filename: String },

    /// Conversion options are out of range.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Service configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── System faults ─────────────────────────────────────────────────────
    /// The task dispatcher refused or could not accept a conversion unit.
    #[error("Failed to dispatch conversion job: {reason}")]
    DispatchFailed { reason: String },

    /// The conversion engine failed in a way that is not specific to one
    /// document (crash, upstream down, resource exhaustion).
    #[error("Conversion engine fault: {detail}")]
    EngineFault { detail: String },

    /// The liveness round-trip did not complete in time.
    #[error("Health probe timed out after {timeout_ms}ms")]
    ProbeTimeout { timeout_ms: u64 },

    /// The liveness round-trip completed with an unexpected reply.
    #[error("Health probe received unexpected reply '{reply}'")]
    ProbeMismatch { reply: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Classify the error for the boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::MissingInput { .. }
            | ServiceError::AmbiguousInput { .. }
            | ServiceError::InvalidUrl { .. }
            | ServiceError::UnsupportedFormat { .. }
            | ServiceError::InvalidOptions(_)
            | ServiceError::InvalidConfig(_) => ErrorClass::Caller,
            ServiceError::DispatchFailed { .. }
            | ServiceError::EngineFault { .. }
            | ServiceError::ProbeTimeout { .. }
            | ServiceError::ProbeMismatch { .. }
            | ServiceError::Internal(_) => ErrorClass::System,
        }
    }

    /// `true` for client-fault errors.
    pub fn is_caller_error(&self) -> bool {
        self.class() == ErrorClass::Caller
    }
}

/// A non-fatal error for a single document.
///
/// Rendered to text and stored in the document's result or job record. The
/// surrounding batch continues regardless.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// The engine could not convert this document.
    #[error("{detail}")]
    ConversionFailed { detail: String },

    /// The engine refused this document (HTTP 4xx from the upstream).
    #[error("Document '{filename}' rejected by engine: {detail}")]
    Rejected { filename: String, detail: String },

    /// A URL source could not be downloaded.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// A URL download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// A CSV document is in none of the supported text encodings.
    #[error("Could not decode CSV file. Supported encodings: utf-8, latin1, cp1252, iso-8859-1")]
    UndecodableCsv { filename: String },

    /// The engine did not answer within the configured timeout.
    #[error("Conversion of '{filename}' timed out after {secs}s")]
    Timeout { filename: String, secs: u64 },
}

/// Outcome of a failed engine call.
#[derive(Debug, Error)]
pub enum EngineError {
    /// This document failed; others may still succeed.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// The engine itself is broken.
    #[error("{0}")]
    Fault(String),
}
