//! Receipt images in, structured receipts out.

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

pub mod adapter;
pub mod attachments;
pub mod classify;
pub mod confidence;
pub mod handlers;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod seed;
pub mod types;
pub mod validate;
pub mod vision;

pub use adapter::{OcrAdapter, OcrOutcome};
pub use attachments::{sha256_bytes, sha256_file, to_hex, AttachmentStore};
pub use classify::{AliasEntry, AliasTable, StoreClassifier};
pub use confidence::ConfidenceScorer;
pub use handlers::{Extraction, HandlerRegistry, ReceiptHandler};
pub use pipeline::{is_receipt_image, spawn_intake_watcher, PipelineError, ReceiptPipeline};
pub use preprocess::{prepare_for_ocr, prepare_for_ocr_from_bytes, PreprocessError};
pub use recognizer::{MockRecognizer, OcrBackend, OcrEngine, OcrError, OcrOutput};
pub use seed::seed_expense;
pub use types::{
    ConfidenceBreakdown, ImageRef, Item, ItemUpdate, MatchReason, PaymentMethod, Receipt, ReceiptError,
    ReceiptFlags, StoreKey, StoreMatch, Totals,
};
pub use validate::{compare, GroundTruth, ValidationReport};
pub use vision::VisionRecognizer;
