use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use halves_core::AppConfig;

use crate::adapter::OcrAdapter;
use crate::attachments::AttachmentStore;
use crate::classify::{AliasTable, StoreClassifier};
use crate::confidence::ConfidenceScorer;
use crate::handlers::HandlerRegistry;
use crate::preprocess;
use crate::types::{Receipt, ReceiptError, StoreKey};
use crate::validate::check_sums;

/// Metadata key holding the engine's mean confidence, so reprocessing can
/// score OCR quality the same way as the first pass.
pub const OCR_CONFIDENCE_KEY: &str = "ocr_confidence";

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "webp", "bmp", "gif"];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Attachment store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Receipt(#[from] ReceiptError),
}

/// Orchestrates: hash -> content-store -> preprocess -> OCR -> classify ->
/// extract -> validate -> score.
pub struct ReceiptPipeline {
    adapter: OcrAdapter,
    classifier: StoreClassifier,
    registry: HandlerRegistry,
    scorer: ConfidenceScorer,
    attachments: AttachmentStore,
}

impl ReceiptPipeline {
    pub fn new(adapter: OcrAdapter, attachments: AttachmentStore) -> Self {
        Self {
            adapter,
            classifier: StoreClassifier::default(),
            registry: HandlerRegistry::with_defaults(),
            scorer: ConfidenceScorer::default(),
            attachments,
        }
    }

    /// Engines, thresholds and aliases from configuration.
    pub fn from_config(config: &AppConfig, attachments_dir: PathBuf, aliases: AliasTable) -> Self {
        let adapter = OcrAdapter::from_settings(&config.ocr, reqwest::Client::new());
        Self::new(adapter, AttachmentStore::new(attachments_dir))
            .with_classifier(StoreClassifier::new(aliases))
            .with_registry(
                HandlerRegistry::with_defaults()
                    .with_suspicious_price(config.extraction.suspicious_item_price),
            )
            .with_scorer(ConfidenceScorer::from_settings(&config.extraction))
    }

    pub fn with_classifier(mut self, classifier: StoreClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_scorer(mut self, scorer: ConfidenceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    /// Process a file on disk.
    pub async fn process_file(&self, path: &Path) -> Result<Receipt, PipelineError> {
        self.process_file_as(path, None).await
    }

    /// Like [`process_file`](Self::process_file), skipping classification
    /// when the store is already known.
    pub async fn process_file_as(
        &self,
        path: &Path,
        store_override: Option<&StoreKey>,
    ) -> Result<Receipt, PipelineError> {
        let bytes = tokio::fs::read(path).await?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_lowercase();
        self.process_bytes_as(&bytes, &ext, store_override).await
    }

    /// Process raw image bytes. Only attachment-store I/O is an error;
    /// everything else ends up as warnings or errors on the receipt.
    pub async fn process_bytes(&self, data: &[u8], ext: &str) -> Result<Receipt, PipelineError> {
        self.process_bytes_as(data, ext, None).await
    }

    pub async fn process_bytes_as(
        &self,
        data: &[u8],
        ext: &str,
        store_override: Option<&StoreKey>,
    ) -> Result<Receipt, PipelineError> {
        let image = self.attachments.put(data, ext).await?;
        info!("processing receipt image {}", image.hash_hex);

        let mut warnings = Vec::new();
        let owned = data.to_vec();
        let prepared = match tokio::task::spawn_blocking(move || preprocess::prepare_for_ocr_from_bytes(&owned)).await {
            Ok(Ok(png)) => png,
            Ok(Err(e)) => {
                warn!("preprocessing failed, sending original image: {e}");
                warnings.push(format!("image preprocessing failed: {e}"));
                data.to_vec()
            }
            Err(e) => {
                warn!("preprocessing task failed: {e}");
                warnings.push(format!("image preprocessing failed: {e}"));
                data.to_vec()
            }
        };

        let outcome = self.adapter.recognize(&prepared).await;
        let mut receipt = Receipt::new(&outcome.output.text);
        receipt.image = Some(image);
        receipt.ocr_engine = Some(outcome.output.engine);
        receipt.flags.used_fallback = outcome.used_fallback;
        receipt.errors = outcome.errors;
        let engine_confidence = outcome.output.mean_confidence();
        self.analyze(&mut receipt, store_override, engine_confidence);
        warnings.append(&mut receipt.warnings);
        receipt.warnings = warnings;
        Ok(receipt)
    }

    /// Skips imaging and OCR: the text is taken as the OCR output.
    pub fn process_text(&self, text: &str) -> Receipt {
        self.process_text_as(text, None)
    }

    pub fn process_text_as(&self, text: &str, store_override: Option<&StoreKey>) -> Receipt {
        let mut receipt = Receipt::new(text);
        self.analyze(&mut receipt, store_override, None);
        receipt
    }

    /// Re-runs classification and extraction on the stored OCR text,
    /// replacing items, totals and scores. Manual edits are lost.
    pub fn reprocess(&self, receipt: &mut Receipt, store_override: Option<&StoreKey>) -> Result<(), PipelineError> {
        receipt.ensure_mutable()?;
        let engine_confidence = receipt
            .metadata
            .get(OCR_CONFIDENCE_KEY)
            .and_then(|v| v.parse::<f32>().ok());
        receipt.warnings.clear();
        receipt.flags.verified = false;
        self.analyze(receipt, store_override, engine_confidence);
        receipt.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn analyze(&self, receipt: &mut Receipt, store_override: Option<&StoreKey>, engine_confidence: Option<f32>) {
        let text = receipt.raw_text.clone();
        if text.trim().is_empty() {
            receipt.warnings.push("OCR returned no text".into());
        }

        let store = self.classifier.classify_with_override(&text, store_override);
        let extraction = self.registry.extract(&text, store.key.as_ref());
        let sum_warnings = check_sums(&extraction.items, &extraction.totals, &self.scorer);
        let confidence = self.scorer.score(&extraction, &store, &text, engine_confidence);

        receipt.items = extraction.items;
        receipt.totals = extraction.totals;
        receipt.date = extraction.date;
        receipt.payment_method = extraction.payment_method;
        receipt.metadata = extraction.metadata;
        if let Some(c) = engine_confidence {
            receipt.metadata.insert(OCR_CONFIDENCE_KEY.into(), format!("{c:.3}"));
        }
        receipt.warnings.extend(extraction.warnings);
        receipt.warnings.extend(sum_warnings);
        receipt.confidence = confidence;
        receipt.flags.needs_review = self.scorer.needs_review(&confidence);
        receipt.store = store;

        info!(
            "receipt {}: store={} items={} total={} confidence={:.2}{}",
            receipt.id,
            receipt.store.name,
            receipt.items.len(),
            receipt.effective_total(),
            confidence.overall,
            if receipt.flags.needs_review { " (needs review)" } else { "" }
        );
    }
}

pub fn is_receipt_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

// ── Watch-folder integration ──────────────────────────────────────────────────

/// Spawn a notify watcher on `watch_dir` that sends new receipt images to
/// `tx`. The watcher must be kept alive for watching to continue.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if let Ok(ev) = event {
            if matches!(ev.kind, EventKind::Create(_)) {
                for path in ev.paths.into_iter().filter(|p| is_receipt_image(p)) {
                    if tx.try_send(path).is_err() {
                        warn!("intake queue full or closed, dropping event");
                    }
                }
            }
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{FailingRecognizer, MockRecognizer};
    use crate::types::MatchReason;
    use halves_core::Money;
    use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
    use std::io::Cursor;
    use std::time::Duration;

    const TRADER_JOES: &str = "\
TRADER JOE'S
ORGANIC BANANAS 2.99
2 @ $3.99 AVOCADOS 7.98
0.50 lb @ $5.99/lb APPLES 2.99
DARK CHOCOLATE 3.49
GREEK YOGURT 4.99
SUBTOTAL 22.44
TAX 1.87
TOTAL 24.31
VISA **** 1234
05/15/2023 14:30";

    fn tiny_png() -> Vec<u8> {
        let img: GrayImage = ImageBuffer::from_fn(4, 4, |_, _| Luma([200u8]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn pipeline(dir: &Path, text: &str) -> ReceiptPipeline {
        let adapter = OcrAdapter::new(Box::new(MockRecognizer::new(text).with_confidence(0.9)));
        ReceiptPipeline::new(adapter, AttachmentStore::new(dir))
    }

    #[tokio::test]
    async fn process_bytes_builds_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let receipt = pipeline(dir.path(), TRADER_JOES)
            .process_bytes(&tiny_png(), "png")
            .await
            .unwrap();

        let image = receipt.image.as_ref().unwrap();
        assert_eq!(image.hash_hex.len(), 64);
        assert!(image.path.exists());
        assert_eq!(receipt.store.name, "Trader Joe's");
        assert_eq!(receipt.items.len(), 5);
        assert_eq!(receipt.totals.total, Some(Money::from_cents(2431)));
        assert!(receipt.warnings.is_empty(), "{:?}", receipt.warnings);
        assert!(!receipt.flags.needs_review);
        assert_eq!(receipt.metadata.get(OCR_CONFIDENCE_KEY).map(String::as_str), Some("0.900"));
    }

    #[tokio::test]
    async fn store_override_on_upload() {
        let dir = tempfile::tempdir().unwrap();
        let receipt = pipeline(dir.path(), TRADER_JOES)
            .process_bytes_as(&tiny_png(), "png", Some(&StoreKey::new("h_mart")))
            .await
            .unwrap();
        assert_eq!(receipt.store.name, "H Mart");
        assert_eq!(receipt.store.reason, MatchReason::Override);
    }

    #[tokio::test]
    async fn same_upload_lands_on_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), "irrelevant");
        let data = tiny_png();
        let r1 = p.process_bytes(&data, "png").await.unwrap();
        let r2 = p.process_bytes(&data, "png").await.unwrap();
        assert_eq!(r1.image, r2.image);
        assert_ne!(r1.id, r2.id);
    }

    #[tokio::test]
    async fn undecodable_image_still_reaches_ocr() {
        let dir = tempfile::tempdir().unwrap();
        let receipt = pipeline(dir.path(), TRADER_JOES)
            .process_bytes(b"not an image", "jpg")
            .await
            .unwrap();
        assert!(receipt.warnings.iter().any(|w| w.contains("preprocessing")));
        assert_eq!(receipt.items.len(), 5);
    }

    #[tokio::test]
    async fn ocr_failure_yields_flagged_empty_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = OcrAdapter::new(Box::new(FailingRecognizer::new("service down")))
            .with_retries(0, Duration::ZERO);
        let p = ReceiptPipeline::new(adapter, AttachmentStore::new(dir.path()));
        let receipt = p.process_bytes(&tiny_png(), "png").await.unwrap();

        assert!(!receipt.errors.is_empty());
        assert!(receipt.store.is_unknown());
        assert!(receipt.items.is_empty());
        assert!(receipt.flags.needs_review);
        assert!(receipt.warnings.iter().any(|w| w == "no items extracted"));
    }

    #[test]
    fn unknown_store_goes_through_generic_handler() {
        let dir = tempfile::tempdir().unwrap();
        let receipt = pipeline(dir.path(), "")
            .process_text("CORNER MARKET\nCOFFEE 12.99\nMILK 3.49\nTOTAL 16.48");
        assert_eq!(receipt.store.key, None);
        assert_eq!(receipt.items.len(), 2);
        assert_eq!(receipt.totals.total, Some(Money::from_cents(1648)));
    }

    #[test]
    fn sum_mismatch_is_only_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let receipt = pipeline(dir.path(), "").process_text("SHOP\nCOFFEE 12.99\nTOTAL 30.00");
        assert_eq!(receipt.items.len(), 1);
        assert!(receipt.warnings.iter().any(|w| w.contains("does not match")));
    }

    #[test]
    fn reprocess_with_override_and_export_lock() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), "");
        let mut receipt = p.process_text(TRADER_JOES);
        receipt.mark_verified().unwrap();

        p.reprocess(&mut receipt, Some(&StoreKey::new("costco"))).unwrap();
        assert_eq!(receipt.store.name, "Costco");
        assert_eq!(receipt.store.reason, MatchReason::Override);
        assert!(!receipt.flags.verified);
        assert!(!receipt.items.is_empty());

        receipt.mark_exported();
        let err = p.reprocess(&mut receipt, None).unwrap_err();
        assert!(matches!(err, PipelineError::Receipt(ReceiptError::Exported(_))));
    }

    #[test]
    fn image_extensions() {
        assert!(is_receipt_image(Path::new("/in/r.JPG")));
        assert!(!is_receipt_image(Path::new("/in/notes.txt")));
        assert!(!is_receipt_image(Path::new("/in/noext")));
    }
}
