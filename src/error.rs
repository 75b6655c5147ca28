//! Error types for the lecture-ingest library.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`IngestError`] — **Fatal**: the source buffer cannot be read as a PDF
//!   (or the pipeline cannot be set up at all). Returned as
//!   `Err(IngestError)` from the top-level `ingest*` functions, before any
//!   output is produced.
//!
//! * [`EnrichmentError`] — **Non-fatal**: a single image could not be
//!   uploaded or described. The document still carries a placeholder URL or
//!   a bracketed error description for that image, and the error itself is
//!   collected into [`crate::output::IngestOutput::warnings`].
//!
//! * [`PersistenceError`] — **Non-fatal**: the metadata store could not be
//!   written, read or cleaned up. A processed document survives a failed save
//!   and can still be written to disk by the caller.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the lecture-ingest library.
///
/// Per-image failures use [`EnrichmentError`] and never abort a run.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Source errors ─────────────────────────────────────────────────────
    /// The buffer is empty, is not a PDF, has no pages, or a page could not
    /// be read.
    #[error("Malformed document: {detail}")]
    MalformedDocument { detail: String },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium system-wide, or set PDFIUM_LIB_DIR to the directory\n\
that contains it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Vision errors ─────────────────────────────────────────────────────
    /// The configured vision provider is not initialised (missing API key etc.).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the downloadable document file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        IngestError::MalformedDocument {
            detail: detail.into(),
        }
    }
}

/// A non-fatal error for a single embedded image.
///
/// The pipeline substitutes placeholder content for the affected image and
/// keeps going.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum EnrichmentError {
    /// Blob upload did not succeed and was not a duplicate.
    #[error("Storage failure for '{key}': {detail}")]
    StorageFailure { key: String, detail: String },

    /// The vision call failed or returned an unusable response.
    #[error("Description failure: {detail}")]
    DescriptionFailure { detail: String },
}

/// A failure talking to the metadata store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// No database URL / key was configured.
    #[error("Metadata store is not configured (set SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY)")]
    NotConfigured,

    /// Transport-level failure (DNS, TLS, timeout, …).
    #[error("Metadata store request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("Metadata store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("Could not decode metadata store response: {0}")]
    Decode(String),

    /// No row carries the requested identifier.
    #[error("No document with id '{id}'")]
    NotFound { id: String },
}
