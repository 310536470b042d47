//! # docmill
//!
//! Convert heterogeneous document inputs — multi-page PDFs and single
//! raster images — into a predictable Markdown output tree, by batching
//! them through a pluggable layout/OCR analysis backend.
//!
//! ## Why this crate?
//!
//! Document analysis backends are expensive to warm up: model loading and
//! device initialisation dwarf per-document cost. Feeding documents one at
//! a time wastes that warm-up on every file. docmill instead normalizes a
//! whole batch up front — sniffing real byte content (extensions lie),
//! wrapping raster images into single-page paged documents, trimming page
//! ranges — and submits everything in exactly one backend call, then
//! materializes the results into a stable on-disk layout that downstream
//! consumers can address by construction.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input path(s)
//!  │
//!  ├─ 1. Classify    sniff bytes → paged | image | unsupported;
//!  │                 wrap images into single-page paged documents
//!  ├─ 2. Trim        cut the configured page range (clamped, never fatal)
//!  ├─ 3. Plan        resolve {device_class, capacity_budget} once,
//!  │                 publish set-if-absent
//!  ├─ 4. Dispatch    ONE batched call into the analysis backend
//!  └─ 5. Materialize content file + extracted images per document,
//!                    through the Reader/Writer storage abstraction
//! ```
//!
//! ## Output layout
//!
//! Per document stem `S` and method `M` (a persisted-state contract):
//!
//! ```text
//! output_dir/S/M/S.md        content file
//! output_dir/S/M/images/*    extracted images
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docmill::{Converter, ConversionConfig, HttpAnalysisBackend, ParseMethod};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), docmill::DocmillError> {
//!     let config = ConversionConfig::builder()
//!         .method(ParseMethod::Auto)
//!         .language("en")
//!         .build()?;
//!     let backend = Arc::new(HttpAnalysisBackend::new("http://localhost:8008"));
//!
//!     let converter = Converter::new(config, backend);
//!     let output = converter.convert("contracts/", "out/").await?;
//!     for record in &output.records {
//!         println!("{}", record.content_file_path.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Failure model
//!
//! Unsupported or unreadable inputs are dropped per document with a
//! warning; siblings continue. Out-of-range page ids are clamped, probe
//! failures fall back to cpu — neither is ever fatal. A backend error
//! discards the whole batch (all-or-nothing); a storage write failure
//! stops the run but keeps documents already flushed.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docmill` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod convert;
pub mod data;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod plan;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    AnalysisBackend, AnalysisDocument, AnalysisRequest, BackendError, BackendResult,
    ContentBlock, ExtractedImage, HttpAnalysisBackend,
};
pub use config::{ConversionConfig, ConversionConfigBuilder, ParseMethod};
pub use convert::{Converter, RunState};
pub use data::{
    DataReader, DataWriter, DummyDataWriter, FileBasedDataReader, FileBasedDataWriter, HttpReader,
};
pub use error::DocmillError;
pub use output::{ConversionOutput, ConversionStats, OutputRecord};
pub use pipeline::classify::{DocumentInput, DocumentKind};
pub use plan::{DeviceClass, DeviceProbe, ResourcePlan, SystemProbe};
