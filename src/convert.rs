//! Conversion orchestration: intake → classify → trim → dispatch →
//! materialize, as one run.
//!
//! A [`Converter`] holds only immutable run inputs (config, backend handle,
//! resolved resource plan); `convert` keeps all batch state in locals, so
//! distinct runs — even concurrent ones in the same process — share nothing
//! mutable. The one process-wide value, the resource plan, is write-once
//! (see [`crate::plan`]).
//!
//! ## Run state machine
//!
//! ```text
//! IDLE → CLASSIFYING → TRIMMING → DISPATCHED → MATERIALIZING → DONE
//!                                (awaiting backend)
//! ```
//!
//! `FAILED` is reachable from every non-terminal state and is terminal:
//! the orchestration never retries a failed batch. Retry is the caller's
//! responsibility via a fresh invocation. Cancellation is cooperative —
//! dropping the `convert` future aborts the in-flight run without rolling
//! back documents the materializer already flushed.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::backend::AnalysisBackend;
use crate::config::ConversionConfig;
use crate::data::{DataWriter, DummyDataWriter, FileBasedDataWriter};
use crate::error::DocmillError;
use crate::output::{ConversionOutput, ConversionStats};
use crate::pipeline::classify::{self, DocumentInput};
use crate::pipeline::dispatch::{self, BatchOptions};
use crate::pipeline::materialize::{self, WriterFactory};
use crate::pipeline::trim;
use crate::plan::{DeviceProbe, ResourcePlan, SystemProbe};

// ── Run state machine ────────────────────────────────────────────────────

/// Phase of a conversion run. Carried in error context so a caller knows
/// how far a failed run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Classifying,
    Trimming,
    /// Awaiting the backend; the run yields here.
    Dispatched,
    Materializing,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Classifying => "classifying",
            RunState::Trimming => "trimming",
            RunState::Dispatched => "dispatched",
            RunState::Materializing => "materializing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Run-local phase tracker; transitions are logged, and a run that errors
/// out is marked failed exactly once.
struct Run {
    state: RunState,
}

impl Run {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!("run state: {} → {next}", self.state);
        self.state = next;
    }

    fn fail<T>(&mut self, err: DocmillError, document: Option<&str>) -> Result<T, DocmillError> {
        let phase = self.state;
        self.state = RunState::Failed;
        Err(err.in_phase(phase, document))
    }
}

// ── Converter ────────────────────────────────────────────────────────────

/// The document conversion pipeline.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use docmill::{Converter, ConversionConfig, HttpAnalysisBackend};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), docmill::DocmillError> {
/// let backend = Arc::new(HttpAnalysisBackend::new("http://localhost:8008"));
/// let converter = Converter::new(ConversionConfig::default(), backend);
/// let output = converter.convert("contracts/", "out/").await?;
/// println!("converted {} documents", output.records.len());
/// # Ok(())
/// # }
/// ```
pub struct Converter {
    config: ConversionConfig,
    backend: Arc<dyn AnalysisBackend>,
    plan: ResourcePlan,
    models_dir: Option<PathBuf>,
}

impl Converter {
    /// Build a converter, resolving and publishing the resource plan from
    /// the host hardware.
    pub fn new(config: ConversionConfig, backend: Arc<dyn AnalysisBackend>) -> Self {
        Self::with_probe(config, backend, &SystemProbe)
    }

    /// Build a converter with a caller-supplied hardware probe.
    pub fn with_probe(
        config: ConversionConfig,
        backend: Arc<dyn AnalysisBackend>,
        probe: &dyn DeviceProbe,
    ) -> Self {
        let plan = ResourcePlan::resolve(&config, probe).publish();
        let models_dir = crate::config::models_dir();
        info!(
            "converter ready: device={} capacity={} method={}",
            plan.device, plan.capacity_budget, config.method
        );
        if let Some(dir) = &models_dir {
            info!("model cache directory: {}", dir.display());
        }
        Self {
            config,
            backend,
            plan,
            models_dir,
        }
    }

    /// The resource plan in effect for this converter's runs.
    pub fn plan(&self) -> ResourcePlan {
        self.plan
    }

    /// Convert a single accepted file or every accepted immediate child of
    /// a directory, materializing results under `output_dir`.
    ///
    /// Per document stem `S` and method `M` this populates
    /// `output_dir/S/M/S.md` and `output_dir/S/M/images/*`. Inputs whose
    /// sniffed content is neither a paged document nor an accepted raster
    /// image are skipped with a warning and never abort their siblings.
    pub async fn convert(
        &self,
        input_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> Result<ConversionOutput, DocmillError> {
        let total_start = Instant::now();
        let input_path = input_path.as_ref();
        let output_root = output_dir.as_ref();
        let mut run = Run::new();

        info!("starting conversion run: {}", input_path.display());

        // ── Step 1: Collect candidate paths ──────────────────────────────
        let candidates = collect_candidates(input_path)?;

        tokio::fs::create_dir_all(output_root)
            .await
            .map_err(|e| DocmillError::WriteFailed {
                key: output_root.display().to_string(),
                detail: e.to_string(),
            })?;

        // ── Step 2: Classify and normalize ───────────────────────────────
        run.advance(RunState::Classifying);
        let mut documents: Vec<DocumentInput> = Vec::with_capacity(candidates.len());
        let mut seen_names: HashSet<String> = HashSet::new();
        let mut skipped = 0usize;

        for path in &candidates {
            let name = document_stem(path);

            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("skipping unreadable '{}': {e}", path.display());
                    skipped += 1;
                    continue;
                }
            };

            if !seen_names.insert(name.clone()) {
                warn!(
                    "{}",
                    DocmillError::DuplicateDocument { name: name.clone() }
                );
                skipped += 1;
                continue;
            }

            match classify::normalize(&name, &self.config.language, bytes).await {
                Ok(input) => documents.push(input),
                Err(e @ DocmillError::UnsupportedFormat { .. })
                | Err(e @ DocmillError::CorruptDocument { .. }) => {
                    // Scoped to this document; siblings continue.
                    warn!("skipping '{name}': {e}");
                    seen_names.remove(&name);
                    skipped += 1;
                }
                Err(fatal) => return run.fail(fatal, Some(&name)),
            }
        }

        let queued = documents.len();
        if documents.is_empty() {
            warn!("no valid documents found at {}", input_path.display());
            run.advance(RunState::Done);
            return Ok(ConversionOutput {
                records: Vec::new(),
                stats: ConversionStats {
                    queued_documents: 0,
                    skipped_documents: skipped,
                    converted_documents: 0,
                    total_duration_ms: total_start.elapsed().as_millis() as u64,
                    ..Default::default()
                },
            });
        }

        // ── Step 3: Trim page ranges ─────────────────────────────────────
        run.advance(RunState::Trimming);
        for doc in &mut documents {
            let bytes = std::mem::take(&mut doc.bytes);
            match trim::trim_pages(
                &doc.name,
                bytes,
                self.config.start_page_id,
                self.config.end_page_id,
            )
            .await
            {
                Ok(trimmed) => doc.bytes = trimmed,
                Err(e) => {
                    let name = doc.name.clone();
                    return run.fail(e, Some(&name));
                }
            }
        }

        // ── Step 4: Dispatch the batch (one backend call) ────────────────
        run.advance(RunState::Dispatched);
        let options = BatchOptions {
            method: self.config.method,
            formula_enable: self.config.effective_formula_enable(),
            table_enable: self.config.effective_table_enable(),
            models_dir: self.models_dir.clone(),
        };
        let dispatch_start = Instant::now();
        let results = match dispatch::dispatch(&self.backend, &documents, options, self.plan).await
        {
            Ok(results) => results,
            Err(e) => return run.fail(e, None),
        };
        let dispatch_duration_ms = dispatch_start.elapsed().as_millis() as u64;

        // ── Step 5: Materialize output, in input order ───────────────────
        run.advance(RunState::Materializing);
        let factory = self.writer_factory();
        let materialize_start = Instant::now();
        let records = match materialize::materialize_batch(
            output_root,
            self.config.method,
            &documents,
            &results,
            factory.as_ref(),
        )
        .await
        {
            Ok(records) => records,
            // Already carries phase + document context.
            Err(e) => {
                run.state = RunState::Failed;
                return Err(e);
            }
        };
        let materialize_duration_ms = materialize_start.elapsed().as_millis() as u64;

        // ── Step 6: Done ─────────────────────────────────────────────────
        run.advance(RunState::Done);
        let stats = ConversionStats {
            queued_documents: queued,
            skipped_documents: skipped,
            converted_documents: records.len(),
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            dispatch_duration_ms,
            materialize_duration_ms,
        };
        info!(
            "run complete: {}/{} documents in {}ms",
            stats.converted_documents, stats.queued_documents, stats.total_duration_ms
        );

        Ok(ConversionOutput { records, stats })
    }

    /// Synchronous wrapper around [`Converter::convert`].
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn convert_sync(
        &self,
        input_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> Result<ConversionOutput, DocmillError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| DocmillError::Internal(format!("failed to create tokio runtime: {e}")))?
            .block_on(self.convert(input_path, output_dir))
    }

    /// Writer factory honoring `dry_run`: discard writers instead of
    /// file-based ones, same pipeline either way.
    fn writer_factory(&self) -> Box<WriterFactory> {
        if self.config.dry_run {
            Box::new(|_dir: &Path| Arc::new(DummyDataWriter) as Arc<dyn DataWriter>)
        } else {
            Box::new(|dir: &Path| Arc::new(FileBasedDataWriter::new(dir)) as Arc<dyn DataWriter>)
        }
    }
}

// ── Intake helpers ───────────────────────────────────────────────────────

/// Expand the input path: a file stands alone; a directory contributes its
/// immediate children (files only), in lexicographic order so batch order
/// is deterministic.
fn collect_candidates(input_path: &Path) -> Result<Vec<PathBuf>, DocmillError> {
    if !input_path.exists() {
        return Err(DocmillError::InputNotFound {
            path: input_path.to_path_buf(),
        });
    }

    if input_path.is_file() {
        return Ok(vec![input_path.to_path_buf()]);
    }

    let entries = std::fs::read_dir(input_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            DocmillError::PermissionDenied {
                path: input_path.to_path_buf(),
            }
        } else {
            DocmillError::InputNotFound {
                path: input_path.to_path_buf(),
            }
        }
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Document name: the file stem, or the whole file name when there is no
/// stem to take. Extensions are advisory; this is the only place they are
/// consulted, and only for naming.
fn document_stem(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_display_is_lowercase() {
        assert_eq!(RunState::Dispatched.to_string(), "dispatched");
        assert_eq!(RunState::Materializing.to_string(), "materializing");
    }

    #[test]
    fn run_marks_failed_once() {
        let mut run = Run::new();
        run.advance(RunState::Classifying);
        let err: Result<(), _> = run.fail(
            DocmillError::Internal("boom".into()),
            Some("doc"),
        );
        assert_eq!(run.state, RunState::Failed);
        match err.unwrap_err() {
            DocmillError::RunFailed { phase, .. } => assert_eq!(phase, RunState::Classifying),
            other => panic!("expected RunFailed, got {other:?}"),
        }
    }

    #[test]
    fn document_stem_prefers_file_stem() {
        assert_eq!(document_stem(Path::new("/tmp/act1.pdf")), "act1");
        assert_eq!(document_stem(Path::new("/tmp/noext")), "noext");
        assert_eq!(document_stem(Path::new("/tmp/archive.tar.gz")), "archive.tar");
    }

    #[test]
    fn collect_candidates_rejects_missing_path() {
        let err = collect_candidates(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, DocmillError::InputNotFound { .. }));
    }

    #[test]
    fn collect_candidates_is_sorted_and_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.pdf"), b"x").unwrap();

        let paths = collect_candidates(dir.path()).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
    }
}
