//! The analysis backend capability: one batched call in, ordered results out.
//!
//! The layout/OCR/structure inference engine is an external collaborator.
//! It is modeled as a single-method trait rather than a base type so any
//! implementation — remote service, in-process engine, test mock — can be
//! substituted behind an `Arc<dyn AnalysisBackend>`.
//!
//! The backend owns two per-document decisions the rest of the pipeline
//! must respect, never recompute: whether OCR was actually required
//! (`resolved_ocr_enabled`) and which language was ultimately used
//! (`resolved_language`). Both come back as typed fields on
//! [`BackendResult`], order-aligned with the submitted batch.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ParseMethod;
use crate::plan::ResourcePlan;

/// Error raised by an [`AnalysisBackend`] implementation. Always fatal for
/// the batch that produced it.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

// ── Request ──────────────────────────────────────────────────────────────

/// One normalized document submitted for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisDocument {
    pub name: String,
    /// Trimmed, normalized paged-document bytes.
    #[serde(with = "b64")]
    pub data: Vec<u8>,
    /// Requested language hint.
    pub language: String,
}

/// A whole batch: N documents plus the shared analysis knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub documents: Vec<AnalysisDocument>,
    pub method: ParseMethod,
    pub formula_enable: bool,
    pub table_enable: bool,
    /// Consumed, never mutated, by the backend.
    pub plan: ResourcePlan,
    /// Model cache directory for the backend, when one is configured
    /// (`DOCMILL_MODELS_DIR` or the config file's `models-dir` key).
    /// Weight acquisition itself is the backend's concern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models_dir: Option<PathBuf>,
}

// ── Result ───────────────────────────────────────────────────────────────

/// One element of the inference payload.
///
/// Typed just enough for the materializer to render Markdown; anything the
/// backend knows beyond these shapes travels in `document_handle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Title {
        level: u8,
        text: String,
    },
    /// References an entry of `extracted_images` by name.
    Image {
        name: String,
        #[serde(default)]
        caption: Option<String>,
    },
    Table {
        html: String,
        #[serde(default)]
        caption: Option<String>,
    },
    Equation {
        latex: String,
    },
}

/// An image the backend extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedImage {
    /// File name relative to the document's `images/` directory.
    pub name: String,
    #[serde(with = "b64")]
    pub bytes: Vec<u8>,
}

/// Per-document analysis result, order-aligned with the submitted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResult {
    /// The inference payload: ordered content blocks for rendering.
    pub blocks: Vec<ContentBlock>,
    /// Images referenced by [`ContentBlock::Image`] entries, in order.
    #[serde(default)]
    pub extracted_images: Vec<ExtractedImage>,
    /// Opaque backend-owned state. Carried through untouched.
    #[serde(default)]
    pub document_handle: serde_json::Value,
    /// Language the backend actually used.
    pub resolved_language: String,
    /// Whether the backend decided OCR was required, regardless of the
    /// requested method.
    pub resolved_ocr_enabled: bool,
}

// ── Capability trait ─────────────────────────────────────────────────────

/// Submit one batch, receive one result per document in input order.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest) -> Result<Vec<BackendResult>, BackendError>;
}

// ── Remote implementation ────────────────────────────────────────────────

/// Reference backend: POSTs the batch as JSON to a remote analysis service.
///
/// Wire contract: `POST {base_url}/analyze` with an [`AnalysisRequest`]
/// body (document and image bytes base64-encoded); the service answers
/// `{"results": [BackendResult, …]}` in input order.
#[derive(Debug, Clone)]
pub struct HttpAnalysisBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct AnalyzeResponse {
    results: Vec<BackendResult>,
}

impl HttpAnalysisBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            // The backend call is the long pole of a run; connect errors
            // should still surface promptly.
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AnalysisBackend for HttpAnalysisBackend {
    async fn analyze(&self, request: AnalysisRequest) -> Result<Vec<BackendResult>, BackendError> {
        let url = format!("{}/analyze", self.base_url.trim_end_matches('/'));
        info!(
            "submitting batch of {} documents to {url} (method={}, device={})",
            request.documents.len(),
            request.method,
            request.plan.device
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError(format!("HTTP {status} from {url}: {body}")));
        }

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| BackendError(format!("malformed response from {url}: {e}")))?;

        debug!("backend returned {} results", parsed.results.len());
        Ok(parsed.results)
    }
}

/// Base64 (de)serialisation for raw byte fields in the JSON wire format.
mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    #[test]
    fn content_blocks_use_tagged_wire_format() {
        let block = ContentBlock::Image {
            name: "figure_1.png".into(),
            caption: Some("Figure 1".into()),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["name"], "figure_1.png");

        let back: ContentBlock = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn document_bytes_travel_as_base64() {
        let doc = AnalysisDocument {
            name: "act1".into(),
            data: vec![0x25, 0x50, 0x44, 0x46],
            language: "en".into(),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["data"], STANDARD.encode(b"%PDF"));

        let back: AnalysisDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back.data, doc.data);
    }

    #[test]
    fn backend_result_defaults_are_lenient() {
        // A minimal service answer without images or handle still parses.
        let raw = serde_json::json!({
            "blocks": [{"type": "text", "text": "hello"}],
            "resolved_language": "en",
            "resolved_ocr_enabled": false,
        });
        let result: BackendResult = serde_json::from_value(raw).unwrap();
        assert!(result.extracted_images.is_empty());
        assert!(result.document_handle.is_null());
    }
}
