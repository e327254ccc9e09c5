use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("OCR service request failed: {0}")]
    Http(String),
    #[error("OCR service returned an error: {0}")]
    Service(String),
    #[error("OCR timed out after {0}s")]
    Timeout(u64),
    #[error("OCR backend is not configured: {0}")]
    NotConfigured(String),
    #[error("Tesseract not available, build with the `tesseract` feature")]
    NotAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngine {
    GoogleVision,
    Tesseract,
    Mock,
}

impl std::fmt::Display for OcrEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcrEngine::GoogleVision => write!(f, "google_vision"),
            OcrEngine::Tesseract => write!(f, "tesseract"),
            OcrEngine::Mock => write!(f, "mock"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Smallest box containing every `(x, y)` vertex.
    pub fn from_vertices(vertices: &[(i32, i32)]) -> Option<Self> {
        let min_x = vertices.iter().map(|v| v.0).min()?;
        let max_x = vertices.iter().map(|v| v.0).max()?;
        let min_y = vertices.iter().map(|v| v.1).min()?;
        let max_y = vertices.iter().map(|v| v.1).max()?;
        Some(BoundingBox {
            x: min_x,
            y: min_y,
            width: (max_x - min_x).unsigned_abs(),
            height: (max_y - min_y).unsigned_abs(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

/// What a backend recognized in one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    pub blocks: Vec<TextBlock>,
    pub engine: OcrEngine,
}

impl OcrOutput {
    pub fn empty(engine: OcrEngine) -> Self {
        OcrOutput { text: String::new(), blocks: Vec::new(), engine }
    }

    /// Mean block confidence, `None` when the engine reported no blocks.
    pub fn mean_confidence(&self) -> Option<f32> {
        if self.blocks.is_empty() {
            return None;
        }
        let sum: f32 = self.blocks.iter().map(|b| b.confidence).sum();
        Some(sum / self.blocks.len() as f32)
    }
}

/// Abstraction over an OCR backend.
/// Implementations accept PNG/JPEG image bytes and return the recognized text.
#[async_trait::async_trait]
pub trait OcrBackend: Send + Sync {
    fn engine(&self) -> OcrEngine;
    async fn recognize(&self, image_bytes: &[u8]) -> Result<OcrOutput, OcrError>;
}

// ── Test doubles ──────────────────────────────────────────────────────────────

/// Returns a pre-set string regardless of the image.
pub struct MockRecognizer {
    pub text: String,
    pub confidence: Option<f32>,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), confidence: None }
    }

    /// Reports one block per non-empty line at `confidence`.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

#[async_trait::async_trait]
impl OcrBackend for MockRecognizer {
    fn engine(&self) -> OcrEngine {
        OcrEngine::Mock
    }

    async fn recognize(&self, _image_bytes: &[u8]) -> Result<OcrOutput, OcrError> {
        let blocks = match self.confidence {
            Some(confidence) => self
                .text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| TextBlock { text: l.trim().to_string(), confidence, bbox: None })
                .collect(),
            None => Vec::new(),
        };
        Ok(OcrOutput { text: self.text.clone(), blocks, engine: OcrEngine::Mock })
    }
}

/// Always fails; counts how often it was asked.
pub struct FailingRecognizer {
    message: String,
    engine: OcrEngine,
    calls: AtomicUsize,
}

impl FailingRecognizer {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), engine: OcrEngine::Mock, calls: AtomicUsize::new(0) }
    }

    pub fn as_engine(mut self, engine: OcrEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl OcrBackend for FailingRecognizer {
    fn engine(&self) -> OcrEngine {
        self.engine
    }

    async fn recognize(&self, _image_bytes: &[u8]) -> Result<OcrOutput, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(OcrError::Engine(self.message.clone()))
    }
}

// ── Tesseract backend (real engine behind the `tesseract` feature) ─────────────

pub struct TesseractRecognizer {
    #[cfg_attr(not(feature = "tesseract"), allow(dead_code))]
    data_path: Option<String>,
    #[cfg_attr(not(feature = "tesseract"), allow(dead_code))]
    lang: String,
}

impl TesseractRecognizer {
    pub fn new(data_path: Option<String>, lang: &str) -> Self {
        Self { data_path, lang: lang.to_string() }
    }
}

#[cfg(feature = "tesseract")]
#[async_trait::async_trait]
impl OcrBackend for TesseractRecognizer {
    fn engine(&self) -> OcrEngine {
        OcrEngine::Tesseract
    }

    async fn recognize(&self, image_bytes: &[u8]) -> Result<OcrOutput, OcrError> {
        use leptess::LepTess;

        let data_path = self.data_path.clone();
        let lang = self.lang.clone();
        let bytes = image_bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut lt = LepTess::new(data_path.as_deref(), &lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(&bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            let text = lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))?;
            let confidence = (lt.mean_text_conf() as f32 / 100.0).clamp(0.0, 1.0);
            let blocks = text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| TextBlock { text: l.trim().to_string(), confidence, bbox: None })
                .collect();
            Ok(OcrOutput { text, blocks, engine: OcrEngine::Tesseract })
        })
        .await
        .map_err(|e| OcrError::Engine(e.to_string()))?
    }
}

#[cfg(not(feature = "tesseract"))]
#[async_trait::async_trait]
impl OcrBackend for TesseractRecognizer {
    fn engine(&self) -> OcrEngine {
        OcrEngine::Tesseract
    }

    async fn recognize(&self, _image_bytes: &[u8]) -> Result<OcrOutput, OcrError> {
        Err(OcrError::NotAvailable)
    }
}
