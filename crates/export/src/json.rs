use halves_ocr::Receipt;
use tracing::info;

use crate::ExportError;

/// Freezes the receipt and returns it as pretty JSON. Exporting twice
/// gives the same document apart from formatting.
pub fn export_receipt_json(receipt: &mut Receipt) -> Result<String, ExportError> {
    receipt.mark_exported();
    let json = serde_json::to_string_pretty(receipt)?;
    info!("exported receipt {}", receipt.id);
    Ok(json)
}

pub fn import_receipt_json(json: &str) -> Result<Receipt, ExportError> {
    Ok(serde_json::from_str(json)?)
}
