use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

use super::lines::{classify_line, quantity_line, split_item_code, split_lines, trailing_amount, LineKind};
use super::{
    apply_discount, apply_quantity, count_price_lines, item_from_head, scan_totals,
    ConfidenceComponents, Extraction, ReceiptHandler, TaxMode,
};
use crate::types::{Item, StoreKey};

re!(re_item_number_line, r"^\d{5,}$");
re!(re_discount_ref, r"^/\s*(\d{4,})");
re!(re_membership, r"(?i)\bmember(?:ship)?\s*(?:#|no\.?|number)?\s*(\d{10,})\b");

const ITEM_CONFIDENCE: f32 = 0.85;

/// Costco warehouse receipts: `E 1234567 NAME 4.99 N` rows, item numbers on
/// their own line, `2 @ 1.99` quantity rows and `/1234567 4.00-` discounts.
#[derive(Debug, Default, Clone, Copy)]
pub struct CostcoHandler;

struct Row {
    item: Item,
    code: Option<String>,
}

impl ReceiptHandler for CostcoHandler {
    fn name(&self) -> &'static str {
        "costco"
    }

    fn extract(&self, ocr_text: &str, _store_hint: Option<&StoreKey>) -> Extraction {
        let lines = split_lines(ocr_text);
        let scan = scan_totals(&lines, TaxMode::Last);
        let body = &lines[..scan.body_end];

        let mut rows: Vec<Row> = Vec::new();
        let mut matched = 0;
        let mut warnings = Vec::new();

        for line in body {
            if re_item_number_line().is_match(line) {
                if let Some(row) = rows.last_mut().filter(|r| r.code.is_none()) {
                    row.item.add_note(format!("item #{line}"));
                    row.code = Some(line.to_string());
                }
                continue;
            }
            if let Some(q) = quantity_line(line) {
                if let Some(row) = rows.pop() {
                    rows.push(Row { item: apply_quantity(row.item, &q), code: row.code });
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
                let reference = re_discount_ref()
                    .captures(&priced.head)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
                let target = match &reference {
                    Some(code) => rows.iter_mut().rev().find(|r| r.code.as_deref() == Some(code.as_str())),
                    None => rows.last_mut(),
                };
                match target {
                    Some(row) => {
                        apply_discount(&mut row.item, priced.amount);
                        matched += 1;
                    }
                    None => warnings.push(format!("discount {} has no matching item", priced.amount)),
                }
                continue;
            }
            if kind == LineKind::Savings {
                continue;
            }

            let (code, name) = split_item_code(&priced.head);
            match item_from_head(&name, priced.amount, ITEM_CONFIDENCE) {
                Some(mut item) => {
                    if let Some(code) = &code {
                        item.add_note(format!("item #{code}"));
                    }
                    debug!("costco: {} {}", item.description, item.line_price);
                    rows.push(Row { item, code });
                    matched += 1;
                }
                None => debug!("costco: skipped {line:?}"),
            }
        }

        let mut extraction = Extraction {
            items: rows.into_iter().map(|r| r.item).collect(),
            totals: scan.totals,
            warnings,
            components: ConfidenceComponents {
                price_lines: count_price_lines(body),
                matched_lines: matched,
            },
            ..Default::default()
        };
        if let Some(c) = re_membership().captures(ocr_text) {
            if let Some(number) = c.get(1) {
                extraction
                    .metadata
                    .insert("membership_number".into(), number.as_str().to_string());
            }
        }
        info!("costco handler extracted {} items", extraction.items.len());
        extraction
    }
}
