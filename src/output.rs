//! Result types returned by a conversion run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where one document's materialized output landed.
///
/// The path layout is a persisted-state contract relied on by downstream
/// consumers: `output_dir/<name>/<method>/<name>.md` with images under
/// `output_dir/<name>/<method>/images/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    pub document_name: String,
    /// `<output_root>/<name>/<method>/`
    pub output_dir: PathBuf,
    /// `<output_root>/<name>/<method>/images/`
    pub image_dir: PathBuf,
    /// `<output_root>/<name>/<method>/<name>.md`
    pub content_file_path: PathBuf,
    /// Language the backend actually used for this document.
    pub resolved_language: String,
    /// Whether the backend decided OCR was required.
    pub resolved_ocr_enabled: bool,
}

/// Batch-level accounting for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Inputs whose sniffed kind was accepted and queued.
    pub queued_documents: usize,
    /// Inputs dropped during classification (unsupported or duplicate).
    pub skipped_documents: usize,
    /// Documents with a committed output record.
    pub converted_documents: usize,
    /// Wall-clock duration of the whole run.
    pub total_duration_ms: u64,
    /// Time spent inside the backend call.
    pub dispatch_duration_ms: u64,
    /// Time spent writing output.
    pub materialize_duration_ms: u64,
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// One record per converted document, in input order.
    pub records: Vec<OutputRecord>,
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// A run that queued nothing: no backend call was made.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
