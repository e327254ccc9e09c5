//! Google Cloud Vision `images:annotate` backend.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::recognizer::{BoundingBox, OcrBackend, OcrEngine, OcrError, OcrOutput, TextBlock};

/// Base confidence when the response carries no page-level score.
const DEFAULT_BASE_CONFIDENCE: f32 = 0.8;

pub struct VisionRecognizer {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl VisionRecognizer {
    pub fn new(client: reqwest::Client, api_key: &str, endpoint: &str) -> Result<Self, OcrError> {
        if api_key.trim().is_empty() {
            return Err(OcrError::NotConfigured("Google Vision API key is empty".into()));
        }
        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            endpoint: endpoint.to_string(),
        })
    }
}

// ── Vision API request/response types ────────────────────────────────────────

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<ImageRequest>,
}

#[derive(Serialize)]
struct ImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    full_text_annotation: Option<FullText>,
    error: Option<ApiStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
    bounding_poly: Option<BoundingPoly>,
}

#[derive(Deserialize)]
struct BoundingPoly {
    #[serde(default)]
    vertices: Vec<Vertex>,
}

#[derive(Deserialize)]
struct Vertex {
    #[serde(default)]
    x: i32,
    #[serde(default)]
    y: i32,
}

#[derive(Deserialize)]
struct FullText {
    #[serde(default)]
    text: String,
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Deserialize)]
struct Page {
    confidence: Option<f32>,
}

#[derive(Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
}

// ── Response interpretation ──────────────────────────────────────────────────

/// Word confidence from the page score, the word's area and how far down
/// the page it sits.
fn block_confidence(base: f32, bbox: Option<&BoundingBox>) -> f32 {
    let (size_factor, position_factor) = match bbox {
        Some(b) => (
            ((b.width as f32 * b.height as f32) / 1000.0).min(1.0),
            (1.0 - b.y.max(0) as f32 / 2000.0).clamp(0.0, 1.0),
        ),
        None => (0.5, 0.5),
    };
    (base * 0.6 + size_factor * 0.2 + position_factor * 0.2).clamp(0.0, 1.0)
}

/// Turns an `images:annotate` response body into an [`OcrOutput`].
pub fn parse_annotate_response(body: &str) -> Result<OcrOutput, OcrError> {
    let parsed: AnnotateResponse =
        serde_json::from_str(body).map_err(|e| OcrError::Service(format!("bad response: {e}")))?;
    let response = parsed.responses.into_iter().next().unwrap_or_default();

    if let Some(err) = response.error {
        return Err(OcrError::Service(err.message));
    }

    let page_confidences: Vec<f32> = response
        .full_text_annotation
        .as_ref()
        .map(|f| f.pages.iter().filter_map(|p| p.confidence).collect())
        .unwrap_or_default();
    let base = if page_confidences.is_empty() {
        DEFAULT_BASE_CONFIDENCE
    } else {
        page_confidences.iter().sum::<f32>() / page_confidences.len() as f32
    };

    let text = match response.full_text_annotation {
        Some(full) if !full.text.trim().is_empty() => full.text,
        _ => response
            .text_annotations
            .first()
            .map(|a| a.description.clone())
            .unwrap_or_default(),
    };

    // The first annotation is the whole page; the rest are single words.
    let blocks = response
        .text_annotations
        .iter()
        .skip(1)
        .map(|a| {
            let vertices: Vec<(i32, i32)> = a
                .bounding_poly
                .as_ref()
                .map(|p| p.vertices.iter().map(|v| (v.x, v.y)).collect())
                .unwrap_or_default();
            let bbox = BoundingBox::from_vertices(&vertices);
            TextBlock {
                text: a.description.clone(),
                confidence: block_confidence(base, bbox.as_ref()),
                bbox,
            }
        })
        .collect();

    Ok(OcrOutput { text, blocks, engine: OcrEngine::GoogleVision })
}

#[async_trait::async_trait]
impl OcrBackend for VisionRecognizer {
    fn engine(&self) -> OcrEngine {
        OcrEngine::GoogleVision
    }

    async fn recognize(&self, image_bytes: &[u8]) -> Result<OcrOutput, OcrError> {
        let body = AnnotateRequest {
            requests: vec![ImageRequest {
                image: ImageContent {
                    content: base64::engine::general_purpose::STANDARD.encode(image_bytes),
                },
                features: vec![Feature { kind: "TEXT_DETECTION" }],
            }],
        };

        info!("VisionRecognizer: calling images:annotate ({} bytes)", image_bytes.len());

        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| OcrError::Http(e.to_string()))?;

        let status = resp.status();
        let raw = resp.text().await.map_err(|e| OcrError::Http(e.to_string()))?;
        if !status.is_success() {
            let snippet: String = raw.chars().take(300).collect();
            return Err(OcrError::Service(format!("HTTP {status}: {snippet}")));
        }
        debug!("VisionRecognizer: response {} bytes", raw.len());

        parse_annotate_response(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "responses": [{
        "textAnnotations": [
          {"description": "COSTCO\nMILK 3.49\n", "boundingPoly": {"vertices": [{"x":0,"y":0},{"x":400,"y":0},{"x":400,"y":300},{"y":300}]}},
          {"description": "COSTCO", "boundingPoly": {"vertices": [{"x":10,"y":10},{"x":110,"y":10},{"x":110,"y":40},{"x":10,"y":40}]}},
          {"description": "MILK", "boundingPoly": {"vertices": [{"x":10,"y":60},{"x":60,"y":60},{"x":60,"y":80},{"x":10,"y":80}]}}
        ],
        "fullTextAnnotation": {"text": "COSTCO\nMILK 3.49\n", "pages": [{"confidence": 0.9}]}
      }]
    }"#;

    #[test]
    fn parses_full_text_and_word_blocks() {
        let out = parse_annotate_response(SAMPLE).unwrap();
        assert_eq!(out.text, "COSTCO\nMILK 3.49\n");
        assert_eq!(out.blocks.len(), 2);
        assert_eq!(out.blocks[0].text, "COSTCO");
        assert_eq!(out.blocks[0].bbox.unwrap().width, 100);
        let conf = out.mean_confidence().unwrap();
        assert!(conf > 0.5 && conf <= 1.0, "confidence was {conf}");
    }

    #[test]
    fn falls_back_to_first_annotation() {
        let body = r#"{"responses":[{"textAnnotations":[{"description":"TARGET\n"}]}]}"#;
        let out = parse_annotate_response(body).unwrap();
        assert_eq!(out.text, "TARGET\n");
        assert!(out.blocks.is_empty());
    }

    #[test]
    fn api_error_is_reported() {
        let body = r#"{"responses":[{"error":{"code":7,"message":"API key invalid"}}]}"#;
        match parse_annotate_response(body) {
            Err(OcrError::Service(msg)) => assert_eq!(msg, "API key invalid"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_response_is_empty_text() {
        let out = parse_annotate_response(r#"{"responses":[{}]}"#).unwrap();
        assert!(out.text.is_empty());
    }

    #[test]
    fn empty_key_is_rejected() {
        let r = VisionRecognizer::new(reqwest::Client::new(), " ", "http://localhost");
        assert!(matches!(r, Err(OcrError::NotConfigured(_))));
    }
}
