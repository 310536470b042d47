//! Configuration types for batched document conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across runs and diff two runs to understand
//! why their outputs differ.
//!
//! Environment overrides follow set-if-absent discipline: a variable already
//! present in the environment wins over the constructed value, and nothing
//! here ever overwrites one. The overrides are read once, at plan-resolution
//! time, not ambiently throughout the pipeline.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DocmillError;
use crate::plan::DeviceClass;

// ── Environment override variables ───────────────────────────────────────

/// Device-class override (`cpu`, `cuda`, `mps`, `npu`).
pub const ENV_DEVICE_MODE: &str = "DOCMILL_DEVICE_MODE";
/// Capacity-budget override (integer units).
pub const ENV_CAPACITY_BUDGET: &str = "DOCMILL_CAPACITY_BUDGET";
/// Formula-extraction override (`true`/`false`).
pub const ENV_FORMULA_ENABLE: &str = "DOCMILL_FORMULA_ENABLE";
/// Table-extraction override (`true`/`false`).
pub const ENV_TABLE_ENABLE: &str = "DOCMILL_TABLE_ENABLE";
/// Config-file path override; a relative value resolves under `$HOME`.
pub const ENV_CONFIG_JSON: &str = "DOCMILL_CONFIG_JSON";
/// Model-cache-directory override, surfaced to the analysis backend.
pub const ENV_MODELS_DIR: &str = "DOCMILL_MODELS_DIR";

const DEFAULT_CONFIG_FILE: &str = "docmill.json";

// ── Parse method ─────────────────────────────────────────────────────────

/// How the analysis backend should read page content.
///
/// The backend may still decide per document that OCR is required regardless
/// of the requested method; that decision comes back on
/// [`crate::backend::BackendResult::resolved_ocr_enabled`] and is respected
/// downstream, never recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMethod {
    /// Let the backend choose between text extraction and OCR. (default)
    #[default]
    Auto,
    /// Extract the embedded text layer only.
    Text,
    /// Force OCR on every page.
    Ocr,
}

impl ParseMethod {
    /// The method name as used in output paths (`<name>/<method>/`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMethod::Auto => "auto",
            ParseMethod::Text => "text",
            ParseMethod::Ocr => "ocr",
        }
    }
}

impl fmt::Display for ParseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParseMethod {
    type Err = DocmillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ParseMethod::Auto),
            "text" => Ok(ParseMethod::Text),
            "ocr" => Ok(ParseMethod::Ocr),
            other => Err(DocmillError::InvalidConfig(format!(
                "unknown parse method '{other}' (expected auto, text, or ocr)"
            ))),
        }
    }
}

// ── Conversion config ────────────────────────────────────────────────────

/// Configuration for a conversion run.
///
/// Built via [`ConversionConfig::builder()`] or [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use docmill::{ConversionConfig, ParseMethod};
///
/// let config = ConversionConfig::builder()
///     .method(ParseMethod::Auto)
///     .language("en")
///     .page_range(0, Some(9))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Requested analysis method. Default: [`ParseMethod::Auto`].
    pub method: ParseMethod,

    /// Document language hint passed to the backend. Default: `"en"`.
    pub language: String,

    /// First page to keep (0-indexed). Default: 0.
    pub start_page_id: usize,

    /// Last page to keep (0-indexed, inclusive). `None` means the last page
    /// of each document. An id past the end is clamped, never an error.
    pub end_page_id: Option<usize>,

    /// Ask the backend to parse formulae. Default: true.
    /// `DOCMILL_FORMULA_ENABLE`, when set, wins over this value.
    pub formula_enable: bool,

    /// Ask the backend to parse tables. Default: true.
    /// `DOCMILL_TABLE_ENABLE`, when set, wins over this value.
    pub table_enable: bool,

    /// Explicit device class. `None` means: environment override, then
    /// hardware probe.
    pub device_mode: Option<DeviceClass>,

    /// Explicit capacity budget. `None` means: environment override, then
    /// hardware-reported capacity (accelerators) or 1 (cpu).
    pub capacity_budget: Option<u32>,

    /// Discard all output instead of writing it. Routes materialization
    /// through [`crate::data::DummyDataWriter`]. Default: false.
    pub dry_run: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            method: ParseMethod::Auto,
            language: "en".to_string(),
            start_page_id: 0,
            end_page_id: None,
            formula_enable: true,
            table_enable: true,
            device_mode: None,
            capacity_budget: None,
            dry_run: false,
        }
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective formula flag: environment override first, config value second.
    pub fn effective_formula_enable(&self) -> bool {
        env_bool(ENV_FORMULA_ENABLE).unwrap_or(self.formula_enable)
    }

    /// Effective table flag: environment override first, config value second.
    pub fn effective_table_enable(&self) -> bool {
        env_bool(ENV_TABLE_ENABLE).unwrap_or(self.table_enable)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn method(mut self, method: ParseMethod) -> Self {
        self.config.method = method;
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    /// Set the inclusive 0-indexed page range. `end = None` means last page.
    pub fn page_range(mut self, start: usize, end: Option<usize>) -> Self {
        self.config.start_page_id = start;
        self.config.end_page_id = end;
        self
    }

    pub fn formula_enable(mut self, v: bool) -> Self {
        self.config.formula_enable = v;
        self
    }

    pub fn table_enable(mut self, v: bool) -> Self {
        self.config.table_enable = v;
        self
    }

    pub fn device_mode(mut self, device: DeviceClass) -> Self {
        self.config.device_mode = Some(device);
        self
    }

    pub fn capacity_budget(mut self, budget: u32) -> Self {
        self.config.capacity_budget = Some(budget.max(1));
        self
    }

    pub fn dry_run(mut self, v: bool) -> Self {
        self.config.dry_run = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, DocmillError> {
        let c = &self.config;
        if let Some(end) = c.end_page_id {
            if end < c.start_page_id {
                return Err(DocmillError::InvalidConfig(format!(
                    "end_page_id ({end}) must be >= start_page_id ({})",
                    c.start_page_id
                )));
            }
        }
        if c.language.is_empty() {
            return Err(DocmillError::InvalidConfig("language must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Config file ──────────────────────────────────────────────────────────

/// Optional on-disk configuration, looked up at `$DOCMILL_CONFIG_JSON` or
/// `~/docmill.json`. Absent or unparseable files are not an error; callers
/// get `None` and defaults apply.
pub fn read_config_file() -> Option<serde_json::Value> {
    let name = env::var(ENV_CONFIG_JSON).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let path = PathBuf::from(&name);
    let path = if path.is_absolute() {
        path
    } else {
        PathBuf::from(env::var("HOME").unwrap_or_else(|_| ".".into())).join(path)
    };

    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("ignoring malformed config file {}: {e}", path.display());
            None
        }
    }
}

/// Model-cache directory, surfaced to the backend. Precedence:
/// `DOCMILL_MODELS_DIR` env, then the `models-dir` key of the config file.
/// Model-weight acquisition itself is the backend's concern.
pub fn models_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var(ENV_MODELS_DIR) {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    read_config_file()?
        .get("models-dir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
}

pub(crate) fn env_bool(var: &str) -> Option<bool> {
    env::var(var).ok().map(|v| v.to_ascii_lowercase() == "true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let c = ConversionConfig::default();
        assert_eq!(c.method, ParseMethod::Auto);
        assert_eq!(c.language, "en");
        assert_eq!(c.start_page_id, 0);
        assert_eq!(c.end_page_id, None);
        assert!(c.formula_enable);
        assert!(c.table_enable);
        assert!(c.device_mode.is_none());
        assert!(c.capacity_budget.is_none());
    }

    #[test]
    fn method_round_trips_through_str() {
        for m in [ParseMethod::Auto, ParseMethod::Text, ParseMethod::Ocr] {
            assert_eq!(m.as_str().parse::<ParseMethod>().unwrap(), m);
        }
        assert!("vision".parse::<ParseMethod>().is_err());
    }

    #[test]
    fn builder_rejects_inverted_page_range() {
        let err = ConversionConfig::builder()
            .page_range(5, Some(2))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("end_page_id"));
    }

    #[test]
    fn builder_accepts_open_ended_range() {
        let c = ConversionConfig::builder()
            .page_range(3, None)
            .build()
            .unwrap();
        assert_eq!(c.start_page_id, 3);
        assert_eq!(c.end_page_id, None);
    }

    #[test]
    fn capacity_budget_floor_is_one() {
        let c = ConversionConfig::builder().capacity_budget(0).build().unwrap();
        assert_eq!(c.capacity_budget, Some(1));
    }

    #[test]
    fn formula_and_table_env_overrides_win_over_config() {
        let c = ConversionConfig::builder()
            .formula_enable(true)
            .table_enable(true)
            .build()
            .unwrap();

        env::set_var(ENV_FORMULA_ENABLE, "false");
        env::set_var(ENV_TABLE_ENABLE, "false");
        assert!(!c.effective_formula_enable());
        assert!(!c.effective_table_enable());

        env::set_var(ENV_FORMULA_ENABLE, "true");
        assert!(c.effective_formula_enable());

        env::remove_var(ENV_FORMULA_ENABLE);
        env::remove_var(ENV_TABLE_ENABLE);
        assert!(c.effective_formula_enable());
        assert!(c.effective_table_enable());
    }

    // DOCMILL_MODELS_DIR and DOCMILL_CONFIG_JSON manipulation stays in one
    // test so parallel test threads never race on the same variables.
    #[test]
    fn models_dir_consults_env_then_config_file() {
        env::set_var(ENV_MODELS_DIR, "/opt/models");
        assert_eq!(models_dir(), Some(PathBuf::from("/opt/models")));
        env::remove_var(ENV_MODELS_DIR);

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("docmill.json");
        std::fs::write(&file, r#"{ "models-dir": "/srv/cache" }"#).unwrap();
        env::set_var(ENV_CONFIG_JSON, file.display().to_string());
        assert_eq!(models_dir(), Some(PathBuf::from("/srv/cache")));

        // A malformed file is ignored, not an error.
        std::fs::write(&file, "{ not json").unwrap();
        assert_eq!(read_config_file(), None);
        assert_eq!(models_dir(), None);
        env::remove_var(ENV_CONFIG_JSON);
    }
}
