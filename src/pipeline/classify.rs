//! Format classification: route raw bytes into paged-document, image, or
//! unsupported — by content, never by filename.
//!
//! Extensions lie: scanned "PDFs" that are actually TIFFs, images saved
//! with the wrong suffix, downloads with no suffix at all. The classifier
//! therefore sniffs magic bytes (via the `infer` crate) and uses the
//! filename only for naming. A raster image is normalized into a
//! single-page paged document so every batch entry the dispatcher sees is
//! the same shape.
//!
//! Unsupported content fails with [`DocmillError::UnsupportedFormat`]
//! scoped to that one document; classification of siblings continues.

use pdfium_render::prelude::*;
use tracing::debug;

use crate::error::DocmillError;
use crate::pipeline::bind_pdfium;

/// Extensions accepted as paged documents.
pub const PAGED_EXTENSIONS: &[&str] = &["pdf"];
/// Extensions accepted as raster images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "jp2", "webp", "gif", "bmp"];

/// What the byte content turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// A multi-page paged document (PDF).
    Paged,
    /// A raster image, wrapped into a single-page paged document.
    Image,
    /// Neither; dropped from the batch.
    Unsupported,
}

/// One classified, normalized batch entry. `bytes` always holds paged-
/// document content, regardless of what the input looked like, and is
/// immutable from here on.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub name: String,
    pub bytes: Vec<u8>,
    pub language: String,
    pub kind: DocumentKind,
}

/// Sniff the kind from byte content. Returns the kind and, when anything
/// was recognised at all, the detected MIME type.
pub fn classify_bytes(bytes: &[u8]) -> (DocumentKind, Option<&'static str>) {
    let Some(detected) = infer::get(bytes) else {
        return (DocumentKind::Unsupported, None);
    };
    let ext = detected.extension();
    let kind = if PAGED_EXTENSIONS.contains(&ext) {
        DocumentKind::Paged
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        DocumentKind::Image
    } else {
        DocumentKind::Unsupported
    };
    (kind, Some(detected.mime_type()))
}

/// Classify raw bytes and normalize them into a [`DocumentInput`].
///
/// Paged documents pass through untouched; raster images are wrapped into
/// a single-page paged document on a blocking thread (pdfium is not
/// async-safe). Unsupported content returns `UnsupportedFormat` carrying
/// the offending name.
pub async fn normalize(
    name: &str,
    language: &str,
    bytes: Vec<u8>,
) -> Result<DocumentInput, DocmillError> {
    let (kind, detected) = classify_bytes(&bytes);
    debug!("classified '{name}' as {kind:?} ({detected:?})");

    let bytes = match kind {
        DocumentKind::Paged => bytes,
        DocumentKind::Image => {
            let owner = name.to_string();
            tokio::task::spawn_blocking(move || wrap_image_to_pdf(&owner, &bytes))
                .await
                .map_err(|e| DocmillError::Internal(format!("wrap task panicked: {e}")))??
        }
        DocumentKind::Unsupported => {
            return Err(DocmillError::UnsupportedFormat {
                name: name.to_string(),
                detected: detected.map(str::to_owned),
            });
        }
    };

    Ok(DocumentInput {
        name: name.to_string(),
        bytes,
        language: language.to_string(),
        kind,
    })
}

/// Wrap a raster image into a single-page PDF, preserving pixel dimensions
/// (1 px = 1 pt page, image object spanning the full page).
///
/// Blocking: binds pdfium and releases the new document before returning on
/// every path — the handle never outlives this function.
fn wrap_image_to_pdf(name: &str, bytes: &[u8]) -> Result<Vec<u8>, DocmillError> {
    let corrupt = |detail: String| DocmillError::CorruptDocument {
        name: name.to_string(),
        detail,
    };

    let img = image::load_from_memory(bytes)
        .map_err(|e| corrupt(format!("image decode failed: {e}")))?;
    let width = PdfPoints::new(img.width() as f32);
    let height = PdfPoints::new(img.height() as f32);

    let pdfium = bind_pdfium()?;
    let mut document = pdfium
        .create_new_pdf()
        .map_err(|e| corrupt(format!("{e:?}")))?;
    let mut page = document
        .pages_mut()
        .create_page_at_end(PdfPagePaperSize::Custom(width, height))
        .map_err(|e| corrupt(format!("{e:?}")))?;
    page.objects_mut()
        .create_image_object(
            PdfPoints::new(0.0),
            PdfPoints::new(0.0),
            &img,
            Some(width),
            Some(height),
        )
        .map_err(|e| corrupt(format!("{e:?}")))?;

    let out = document
        .save_to_bytes()
        .map_err(|e| corrupt(format!("{e:?}")))?;
    debug!(
        "wrapped image '{name}' ({}x{} px) into a {}-byte single-page document",
        img.width(),
        img.height(),
        out.len()
    );
    Ok(out)
}
