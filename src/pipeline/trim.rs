//! Page range trimming: extract a contiguous page subrange into a fresh
//! byte buffer.
//!
//! Pages are imported into a new document via pdfium, so page content is
//! carried over byte-for-byte — no re-encoding. Out-of-range ids are
//! clamped with a warning, never a hard failure: a caller asking for pages
//! 0–499 of a 10-page document gets the 10 pages, not an error.
//!
//! Both the source and the destination document handles live entirely
//! inside one blocking closure; they are released on every exit path,
//! success or failure. A long-running batch service cannot afford leaked
//! native handles.

use tracing::{debug, warn};

use crate::error::DocmillError;
use crate::pipeline::bind_pdfium;

/// Clamp `[start, end]` into the valid index range `[0, last_index]`.
///
/// `end = None` means the last page. Returns the effective inclusive range
/// and whether anything had to be clamped.
pub fn clamp_page_range(
    start: usize,
    end: Option<usize>,
    last_index: usize,
) -> (usize, usize, bool) {
    let mut clamped = false;

    let mut effective_end = end.unwrap_or(last_index);
    if effective_end > last_index {
        effective_end = last_index;
        clamped = true;
    }

    let mut effective_start = start;
    if effective_start > effective_end {
        effective_start = effective_end;
        clamped = true;
    }

    (effective_start, effective_end, clamped)
}

/// Produce a paged-document buffer holding exactly pages
/// `[start_page_id, end_page_id]` of `bytes`, in order.
///
/// A full-range request (`start = 0`, `end = None`) passes the buffer
/// through unchanged — every page is kept, so there is nothing to import.
/// No document is opened on that path, so validation is range-conditional:
/// corrupt-but-sniffable bytes surface at the backend, not here.
pub async fn trim_pages(
    name: &str,
    bytes: Vec<u8>,
    start_page_id: usize,
    end_page_id: Option<usize>,
) -> Result<Vec<u8>, DocmillError> {
    if start_page_id == 0 && end_page_id.is_none() {
        debug!("'{name}': full page range requested; keeping buffer as-is");
        return Ok(bytes);
    }

    let owner = name.to_string();
    tokio::task::spawn_blocking(move || {
        trim_pages_blocking(&owner, &bytes, start_page_id, end_page_id)
    })
    .await
    .map_err(|e| DocmillError::Internal(format!("trim task panicked: {e}")))?
}

fn trim_pages_blocking(
    name: &str,
    bytes: &[u8],
    start_page_id: usize,
    end_page_id: Option<usize>,
) -> Result<Vec<u8>, DocmillError> {
    let corrupt = |detail: String| DocmillError::CorruptDocument {
        name: name.to_string(),
        detail,
    };

    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| corrupt(format!("{e:?}")))?;

    let page_count = document.pages().len() as usize;
    if page_count == 0 {
        return Err(corrupt("document has no pages".into()));
    }
    let last_index = page_count - 1;

    let (start, end, was_clamped) = clamp_page_range(start_page_id, end_page_id, last_index);
    if was_clamped {
        warn!(
            "page range [{start_page_id}, {end_page_id:?}] is out of range for \
             '{name}' ({page_count} pages); clamped to [{start}, {end}]"
        );
    }

    let mut output = pdfium
        .create_new_pdf()
        .map_err(|e| corrupt(format!("{e:?}")))?;

    // pdfium page-import strings are 1-indexed and inclusive.
    let range = format!("{}-{}", start + 1, end + 1);
    output
        .pages_mut()
        .copy_pages_from_document(&document, &range, 0)
        .map_err(|e| corrupt(format!("page import {range} failed: {e:?}")))?;

    let out = output
        .save_to_bytes()
        .map_err(|e| corrupt(format!("{e:?}")))?;
    debug!(
        "trimmed '{name}' to pages [{start}, {end}] ({} of {page_count})",
        end - start + 1
    );
    Ok(out)
}
