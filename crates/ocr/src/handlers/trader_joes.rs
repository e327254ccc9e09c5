use regex::Regex;
use std::sync::OnceLock;
use tracing::info;

use super::lines::{classify_line, quantity_line, split_lines, trailing_amount, LineKind};
use super::{
    apply_discount, apply_quantity, count_price_lines, item_from_head, scan_totals,
    ConfidenceComponents, Extraction, ReceiptHandler, TaxMode,
};
use crate::types::StoreKey;

re!(re_crew_member, r"(?i)\bcrew\s*member:?\s*(?P<name>[A-Za-z][A-Za-z .'-]*[A-Za-z])");
re!(re_store_number, r"(?i)\bstore\s*#\s*(?P<n>\d{3,})");

const ITEM_CONFIDENCE: f32 = 0.8;

/// Trader Joe's prints short rows with quantity or weight in front of the
/// name: `2 @ $3.99 AVOCADOS 7.98`, `0.50 lb @ $5.99/lb APPLES 2.99`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraderJoesHandler;

impl ReceiptHandler for TraderJoesHandler {
    fn name(&self) -> &'static str {
        "trader_joes"
    }

    fn extract(&self, ocr_text: &str, _store_hint: Option<&StoreKey>) -> Extraction {
        let lines = split_lines(ocr_text);
        let scan = scan_totals(&lines, TaxMode::Last);
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
            if let Some(item) = item_from_head(&priced.head, priced.amount, ITEM_CONFIDENCE) {
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
        if let Some(name) = re_crew_member().captures(ocr_text).and_then(|c| c.name("name")) {
            extraction.metadata.insert("crew_member".into(), name.as_str().trim().to_string());
        }
        if let Some(n) = re_store_number().captures(ocr_text).and_then(|c| c.name("n")) {
            extraction.metadata.insert("store_number".into(), n.as_str().to_string());
        }
        info!("trader joe's handler extracted {} items", extraction.items.len());
        extraction
    }
}
