use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

use super::lines::{classify_line, quantity_line, split_item_code, split_lines, trailing_amount, LineKind};
use super::{
    apply_discount, apply_quantity, count_price_lines, item_from_head, scan_totals,
    ConfidenceComponents, Extraction, ReceiptHandler, TaxMode,
};
use crate::types::StoreKey;

re!(re_name_upc, r"^(?P<name>.*?\S)\s+(?P<upc>\d{12,13})(?:\s+[A-Z])?$");
re!(re_transaction, r"(?i)\bTC#\s*(?P<tc>\d[\d -]{8,}\d)");
re!(re_store_number, r"(?i)\bST#\s*(?P<st>\d+)");

const ITEM_CONFIDENCE: f32 = 0.85;

/// Walmart prints `NAME UPC [F] PRICE FLAG`, weight and quantity rows below
/// the item, and splits tax into `TAX 1` / `TAX 2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WalmartHandler;

fn split_upc(head: &str) -> (Option<String>, String) {
    match re_name_upc().captures(head) {
        Some(c) => (
            c.name("upc").map(|m| m.as_str().to_string()),
            c.name("name").map(|m| m.as_str().to_string()).unwrap_or_default(),
        ),
        None => split_item_code(head),
    }
}

impl ReceiptHandler for WalmartHandler {
    fn name(&self) -> &'static str {
        "walmart"
    }

    fn extract(&self, ocr_text: &str, _store_hint: Option<&StoreKey>) -> Extraction {
        let lines = split_lines(ocr_text);
        let scan = scan_totals(&lines, TaxMode::Sum);
        let body = &lines[..scan.body_end];

        let mut items = Vec::new();
        let mut matched = 0;
        for line in body {
            if let Some(q) = quantity_line(line) {
                if let Some(last) = items.pop() {
                    items.push(apply_quantity(last, &q));
                    matched += 1;
                }
                continue;
            }
            let kind = classify_line(line);
            if !matches!(kind, LineKind::Other | LineKind::Savings) {
                continue;
            }
            let Some(priced) = trailing_amount(line) else {
                continue;
            };
            if priced.negative {
                if let Some(last) = items.last_mut() {
                    apply_discount(last, priced.amount);
                    matched += 1;
                }
                continue;
            }
            if kind == LineKind::Savings {
                continue;
            }
            let (upc, name) = split_upc(&priced.head);
            if let Some(mut item) = item_from_head(&name, priced.amount, ITEM_CONFIDENCE) {
                if let Some(upc) = upc {
                    item.add_note(format!("upc {upc}"));
                }
                debug!("walmart: {} {}", item.description, item.line_price);
                items.push(item);
                matched += 1;
            }
        }

        let mut extraction = Extraction {
            items,
            totals: scan.totals,
            components: ConfidenceComponents {
                price_lines: count_price_lines(body),
                matched_lines: matched,
            },
            ..Default::default()
        };
        if let Some(tc) = re_transaction().captures(ocr_text).and_then(|c| c.name("tc")) {
            extraction
                .metadata
                .insert("transaction_code".into(), tc.as_str().split_whitespace().collect::<Vec<_>>().join(" "));
        }
        if let Some(st) = re_store_number().captures(ocr_text).and_then(|c| c.name("st")) {
            extraction.metadata.insert("store_number".into(), st.as_str().to_string());
        }
        info!("walmart handler extracted {} items", extraction.items.len());
        extraction
    }
}
