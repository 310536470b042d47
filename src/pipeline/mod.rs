//! Pipeline stages for batched document conversion.
//!
//! Each submodule implements exactly one transformation step. Keeping the
//! stages separate makes each independently testable and lets an
//! implementation swap (a different storage backend, a different analysis
//! service) stay local to one module.
//!
//! ## Data Flow
//!
//! ```text
//! raw bytes ──▶ classify ──▶ trim ──▶ dispatch ──▶ materialize
//!  (intake)     (sniff +     (page     (one batched   (content file
//!               normalize)   range)    backend call)   + images)
//! ```
//!
//! 1. [`classify`] — sniff byte content, wrap raster images into
//!    single-page paged documents; runs pdfium work in `spawn_blocking`
//! 2. [`trim`] — cut the configured page subrange into a fresh byte buffer
//! 3. [`dispatch`] — exactly one call into the analysis backend per batch
//! 4. [`materialize`] — render results into the output directory tree
//!    through the storage abstraction

pub mod classify;
pub mod dispatch;
pub mod materialize;
pub mod trim;

use pdfium_render::prelude::*;

use crate::error::DocmillError;

/// Bind to a pdfium library: the platform library next to the executable
/// first, then the system library. Binding is cheap; each blocking closure
/// binds its own instance so no pdfium handle ever crosses an await point.
pub(crate) fn bind_pdfium() -> Result<Pdfium, DocmillError> {
    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| DocmillError::PdfiumBinding(format!("{e:?}")))
}
