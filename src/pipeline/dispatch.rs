//! Batch dispatch: N independent documents, exactly one backend call.
//!
//! Backend warm-up (model loading, device initialisation) dominates
//! per-document cost, so the dispatcher amortizes it by submitting the
//! whole batch at once. The call is a suspension point: the run yields
//! until the backend returns.
//!
//! Failure semantics are all-or-nothing: any backend error aborts the
//! entire batch and no output records are produced for any document in it.
//! The caller receives one aggregated [`DocmillError::Backend`].

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{AnalysisBackend, AnalysisDocument, AnalysisRequest, BackendResult};
use crate::config::ParseMethod;
use crate::error::DocmillError;
use crate::pipeline::classify::DocumentInput;
use crate::plan::ResourcePlan;

/// Shared analysis knobs for one batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub method: ParseMethod,
    pub formula_enable: bool,
    pub table_enable: bool,
    /// Model cache directory surfaced to the backend, when configured.
    pub models_dir: Option<PathBuf>,
}

/// Submit the batch and return per-document results in input order.
///
/// An empty batch short-circuits: no backend call is made. A result count
/// that does not line up with the input order is treated as a backend
/// failure, since order alignment is the backend's contract.
pub async fn dispatch(
    backend: &Arc<dyn AnalysisBackend>,
    documents: &[DocumentInput],
    options: BatchOptions,
    plan: ResourcePlan,
) -> Result<Vec<BackendResult>, DocmillError> {
    if documents.is_empty() {
        debug!("empty batch; skipping backend call");
        return Ok(Vec::new());
    }

    let request = AnalysisRequest {
        documents: documents
            .iter()
            .map(|d| AnalysisDocument {
                name: d.name.clone(),
                data: d.bytes.clone(),
                language: d.language.clone(),
            })
            .collect(),
        method: options.method,
        formula_enable: options.formula_enable,
        table_enable: options.table_enable,
        plan,
        models_dir: options.models_dir,
    };

    info!(
        "dispatching batch of {} documents (method={})",
        documents.len(),
        options.method
    );

    let results = backend
        .analyze(request)
        .await
        .map_err(|e| DocmillError::Backend {
            detail: e.to_string(),
        })?;

    if results.len() != documents.len() {
        return Err(DocmillError::Backend {
            detail: format!(
                "backend returned {} results for {} documents; \
                 order alignment is broken",
                results.len(),
                documents.len()
            ),
        });
    }

    Ok(results)
}
