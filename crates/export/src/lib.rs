//! CSV reports for the monthly ledger and JSON interchange for receipts.

pub mod csv;
pub mod json;

use thiserror::Error;

pub use self::csv::{expenses_to_csv, monthly_filename, summary_filename, summary_to_csv};
pub use self::json::{export_receipt_json, import_receipt_json};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
