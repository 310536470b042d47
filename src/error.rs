//! Error types for the docmill library.
//!
//! One enum, two propagation classes:
//!
//! * **Fatal** — the variant reaches the caller of a top-level operation.
//!   A backend failure discards the whole batch; a storage write failure
//!   stops materialization of the remaining documents.
//!
//! * **Per-document** — [`DocmillError::UnsupportedFormat`] and
//!   [`DocmillError::DuplicateDocument`] are scoped to a single input.
//!   During batch intake they are logged and the offending document is
//!   dropped; sibling documents continue unaffected.
//!
//! Recoverable conditions (an out-of-range page id, a failed hardware
//! probe) never appear here at all: they are clamped or defaulted locally
//! with a `tracing::warn!` and processing continues.

use std::path::PathBuf;
use thiserror::Error;

use crate::convert::RunState;

/// All errors returned by the docmill library.
#[derive(Debug, Error)]
pub enum DocmillError {
    // ── Intake errors ─────────────────────────────────────────────────────
    /// Input path was not found.
    #[error("input not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Process does not have read permission on the input.
    #[error("permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// Byte content matched neither a paged document nor an accepted raster
    /// image. Scoped to one document; siblings in the batch are unaffected.
    #[error("unsupported format for '{name}'{}", detected.as_deref().map(|d| format!(" (detected {d})")).unwrap_or_default())]
    UnsupportedFormat {
        name: String,
        /// MIME type sniffed from the bytes, when anything was recognised.
        detected: Option<String>,
    },

    /// Two inputs in the same batch resolve to the same `name + method`
    /// output directory. The later one is dropped.
    #[error("duplicate document stem '{name}' in batch; output directory key must be unique")]
    DuplicateDocument { name: String },

    /// The paged document could not be opened or its pages copied.
    #[error("document '{name}' could not be processed: {detail}")]
    CorruptDocument { name: String, detail: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The analysis backend failed. Fatal for the entire batch: no output
    /// records are committed for any document in it.
    #[error("analysis backend failed: {detail}")]
    Backend { detail: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// A write through a [`crate::data::DataWriter`] failed. Fatal for the
    /// remaining documents in the run; already-flushed documents are kept.
    #[error("failed to write '{key}': {detail}")]
    WriteFailed { key: String, detail: String },

    /// A read through a [`crate::data::DataReader`] failed.
    #[error("failed to read '{key}': {detail}")]
    ReadFailed { key: String, detail: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "failed to bind to pdfium library: {0}\n\
         Install pdfium or place the platform library next to the executable."
    )]
    PdfiumBinding(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Orchestration boundary ────────────────────────────────────────────
    /// Wrapper attached once at the orchestration boundary, carrying the
    /// run phase and (when known) the document being processed so a caller
    /// can decide whether a fresh invocation is worth attempting.
    #[error("run failed during {phase}{}: {source}", document.as_deref().map(|d| format!(" (document '{d}')")).unwrap_or_default())]
    RunFailed {
        phase: RunState,
        document: Option<String>,
        #[source]
        source: Box<DocmillError>,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DocmillError {
    /// Wrap a fatal error with run-phase and document context.
    ///
    /// `RunFailed` is never nested: re-wrapping keeps the innermost
    /// phase/document pair, which is the one closest to the failure.
    pub(crate) fn in_phase(self, phase: RunState, document: Option<&str>) -> Self {
        match self {
            already @ DocmillError::RunFailed { .. } => already,
            source => DocmillError::RunFailed {
                phase,
                document: document.map(str::to_owned),
                source: Box::new(source),
            },
        }
    }
}
