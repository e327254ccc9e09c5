use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, info};

use super::lines::{classify_line, parse_amount, quantity_line, split_lines, trailing_amount, LineKind, QuantitySpec};
use super::{
    apply_discount, apply_quantity, count_price_lines, item_from_head, scan_totals,
    ConfidenceComponents, Extraction, ReceiptHandler, TaxMode,
};
use crate::types::{Item, StoreKey};

re!(re_qty_at,
    r"(?i)^(?P<name>.+?)\s+(?P<qty>\d+(?:\.\d+)?)\s*(?P<lb>lbs?|kg)?\s*@\s*\$?(?P<unit>\d+\.\d{2})\s+\$?(?P<total>\d+\.\d{2})\s*[A-Z]?$");
re!(re_unit_total,
    r"^(?P<name>.+?)\s+\$?(?P<unit>\d+\.\d{2})\s+\$?(?P<total>\d+\.\d{2})\s*[A-Z]?$");

const ITEM_CONFIDENCE: f32 = 0.85;

/// H Mart lists `NAME QTY @ UNIT TOTAL` or `NAME UNIT TOTAL`, with Korean
/// product names alongside English.
#[derive(Debug, Default, Clone, Copy)]
pub struct HMartHandler;

fn qty_at_item(line: &str) -> Option<Item> {
    let c = re_qty_at().captures(line)?;
    let total = parse_amount(c.name("total")?.as_str())?;
    let spec = QuantitySpec {
        quantity: Decimal::from_str(c.name("qty")?.as_str()).ok()?,
        unit_price: parse_amount(c.name("unit")?.as_str()),
        total: Some(total),
        rest: String::new(),
        by_weight: c.name("lb").is_some(),
    };
    let item = item_from_head(c.name("name")?.as_str(), total, ITEM_CONFIDENCE)?;
    Some(apply_quantity(item, &spec))
}

/// Quantity is implied by total / unit when that divides evenly.
fn unit_total_item(line: &str) -> Option<Item> {
    let c = re_unit_total().captures(line)?;
    let unit = parse_amount(c.name("unit")?.as_str())?;
    let total = parse_amount(c.name("total")?.as_str())?;
    if !unit.is_positive() {
        return None;
    }
    let ratio = total.as_decimal().checked_div(unit.as_decimal())?;
    let quantity = ratio.round();
    let mut item = item_from_head(c.name("name")?.as_str(), total, ITEM_CONFIDENCE)?;
    if quantity >= Decimal::ONE && (ratio - quantity).abs() < Decimal::new(1, 2) {
        item = item.with_quantity(quantity, unit);
    } else {
        item.confidence = (item.confidence - 0.2).max(0.0);
        item.add_note(format!("unit {unit} does not divide total {total}"));
    }
    Some(item)
}

impl ReceiptHandler for HMartHandler {
    fn name(&self) -> &'static str {
        "h_mart"
    }

    fn extract(&self, ocr_text: &str, _store_hint: Option<&StoreKey>) -> Extraction {
        let lines = split_lines(ocr_text);
        let scan = scan_totals(&lines, TaxMode::Last);
        let body = &lines[..scan.body_end];

        let mut items: Vec<Item> = Vec::new();
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
            if kind == LineKind::Other {
                if let Some(item) = qty_at_item(line).or_else(|| unit_total_item(line)) {
                    debug!("h mart: {} {}", item.description, item.line_price);
                    items.push(item);
                    matched += 1;
                    continue;
                }
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

        info!("h mart handler extracted {} items", items.len());
        Extraction {
            items,
            totals: scan.totals,
            components: ConfidenceComponents {
                price_lines: count_price_lines(body),
                matched_lines: matched,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halves_core::Money;

    fn m(cents: i64) -> Money {
        Money::from_cents(cents)
    }

    const RECEIPT: &str = "\
H MART
(718) 555-0000
KIMCHI 김치 1 @ 5.99 5.99
PORK BELLY 1.52 lb @ 8.99 13.66
SHIN RAMYUN 4.49 8.98
GREEN ONION 1.99
SUBTOTAL 30.62
TAX 0.54
TOTAL 31.16
MASTERCARD 31.16";

    #[test]
    fn reads_all_row_shapes() {
        let ex = HMartHandler.extract(RECEIPT, None);
        let got: Vec<(&str, Money)> =
            ex.items.iter().map(|i| (i.description.as_str(), i.line_price)).collect();
        assert_eq!(
            got,
            [
                ("KIMCHI 김치", m(599)),
                ("PORK BELLY", m(1366)),
                ("SHIN RAMYUN", m(898)),
                ("GREEN ONION", m(199)),
            ]
        );
    }

    #[test]
    fn quantities_from_rows() {
        let ex = HMartHandler.extract(RECEIPT, None);
        assert_eq!(ex.items[1].quantity, Decimal::new(152, 2));
        assert!(ex.items[1].notes.as_deref().unwrap().contains("lb"));
        assert_eq!(ex.items[2].quantity, Decimal::from(2));
        assert_eq!(ex.items[2].unit_price, m(449));
        assert_eq!(ex.totals.total, Some(m(3116)));
    }

    #[test]
    fn uneven_unit_total_lowers_confidence() {
        let item = unit_total_item("TOFU 2.00 3.00").unwrap();
        assert_eq!(item.line_price, m(300));
        assert!(item.confidence < ITEM_CONFIDENCE);
    }
}
