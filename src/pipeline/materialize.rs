//! Output materialization: render backend results into the output tree.
//!
//! Per document, in input order:
//!
//! ```text
//! <output_root>/<name>/<method>/<name>.md      content file
//! <output_root>/<name>/<method>/images/*       extracted images
//! ```
//!
//! This layout is a persisted-state contract; downstream consumers address
//! the content file by constructing exactly this path. Every byte goes
//! through a [`DataWriter`] — no direct filesystem calls — so the same
//! code materializes to local disk, nowhere (dry run), or any other
//! conforming backend.
//!
//! A write or render failure aborts materialization of the remaining
//! documents but leaves directories already fully flushed for earlier
//! documents untouched.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{BackendResult, ContentBlock};
use crate::config::ParseMethod;
use crate::convert::RunState;
use crate::data::DataWriter;
use crate::error::DocmillError;
use crate::output::OutputRecord;
use crate::pipeline::classify::DocumentInput;

/// Name of the per-document image subdirectory.
pub const IMAGES_DIR: &str = "images";

/// Produces a writer rooted at the given directory. The seam through which
/// dry-run (discard) and test writers are injected.
pub type WriterFactory = dyn Fn(&Path) -> Arc<dyn DataWriter> + Send + Sync;

/// Materialize every result, in input order. `documents` and `results`
/// are order-aligned; the dispatcher guarantees equal length.
pub async fn materialize_batch(
    output_root: &Path,
    method: ParseMethod,
    documents: &[DocumentInput],
    results: &[BackendResult],
    writer_factory: &WriterFactory,
) -> Result<Vec<OutputRecord>, DocmillError> {
    let mut records = Vec::with_capacity(results.len());

    for (input, result) in documents.iter().zip(results) {
        let record = materialize_document(output_root, method, input, result, writer_factory)
            .await
            .map_err(|e| e.in_phase(RunState::Materializing, Some(&input.name)))?;
        records.push(record);
    }

    Ok(records)
}

/// Materialize one document: images first, then the content file.
async fn materialize_document(
    output_root: &Path,
    method: ParseMethod,
    input: &DocumentInput,
    result: &BackendResult,
    writer_factory: &WriterFactory,
) -> Result<OutputRecord, DocmillError> {
    let output_dir = output_root.join(&input.name).join(method.as_str());
    let image_dir = output_dir.join(IMAGES_DIR);

    let image_writer = writer_factory(&image_dir);
    let content_writer = writer_factory(&output_dir);

    for img in &result.extracted_images {
        image_writer.write(&img.name, &img.bytes).await?;
    }

    let markdown = render_markdown(&result.blocks, IMAGES_DIR);
    let content_file = format!("{}.md", input.name);
    content_writer.write_string(&content_file, &markdown).await?;

    debug!(
        "materialized '{}' ({} blocks, {} images, ocr={}, lang={})",
        input.name,
        result.blocks.len(),
        result.extracted_images.len(),
        result.resolved_ocr_enabled,
        result.resolved_language
    );
    info!("local output dir is {}", output_dir.display());

    Ok(OutputRecord {
        document_name: input.name.clone(),
        content_file_path: output_dir.join(&content_file),
        output_dir,
        image_dir,
        resolved_language: result.resolved_language.clone(),
        resolved_ocr_enabled: result.resolved_ocr_enabled,
    })
}

/// Render the inference payload as Markdown. Image references are relative
/// paths under `image_dir_name` so the content file stays relocatable
/// together with its images.
pub fn render_markdown(blocks: &[ContentBlock], image_dir_name: &str) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(blocks.len());

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(text.trim_end().to_string()),
            ContentBlock::Title { level, text } => {
                let hashes = "#".repeat((*level).clamp(1, 6) as usize);
                parts.push(format!("{hashes} {text}"));
            }
            ContentBlock::Image { name, caption } => {
                let alt = caption.as_deref().unwrap_or("");
                parts.push(format!("![{alt}]({image_dir_name}/{name})"));
            }
            ContentBlock::Table { html, caption } => {
                if let Some(caption) = caption {
                    parts.push(format!("*{caption}*"));
                }
                parts.push(html.trim().to_string());
            }
            ContentBlock::Equation { latex } => {
                parts.push(format!("$$\n{latex}\n$$"));
            }
        }
    }

    let mut md = parts.join("\n\n");
    md.push('\n');
    md
}
