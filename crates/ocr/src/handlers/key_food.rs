use halves_core::Money;
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

re!(re_member_savings,
    r"(?i)^(?P<name>.+?)\s+\$?(?P<orig>\d+\.\d{2})\s*-\s*\$?(?P<save>\d+\.\d{2})\s*member\s*savings?$");
re!(re_weighed,
    r"(?i)^(?P<name>.+?)\s+(?P<qty>\d+(?:\.\d+)?)\s*(?:lb|lbs)\s*@\s*\$?(?P<unit>\d+\.\d{2})\s*/\s*lb\s+\$?(?P<total>\d+\.\d{2})$");
re!(re_count_name, r"^\d{1,3}\s*@\s*[^\d\s$]");

const PLAIN_CONFIDENCE: f32 = 0.9;
const SAVINGS_CONFIDENCE: f32 = 0.95;
const COUNT_CONFIDENCE: f32 = 0.85;
const WEIGHT_CONFIDENCE: f32 = 0.8;

/// Key Food (Queens) receipts print member savings on the item row itself:
/// `ORANGE JUICE 5.99 - 1.00 MEMBER SAVINGS`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyFoodHandler;

fn member_savings_item(line: &str) -> Option<(Item, Money)> {
    let c = re_member_savings().captures(line)?;
    let original = parse_amount(c.name("orig")?.as_str())?;
    let savings = parse_amount(c.name("save")?.as_str())?;
    let mut item = item_from_head(c.name("name")?.as_str(), original - savings, SAVINGS_CONFIDENCE)?;
    item.add_note(format!("member savings {savings} off {original}"));
    Some((item, savings))
}

fn weighed_item(line: &str) -> Option<Item> {
    let c = re_weighed().captures(line)?;
    let total = parse_amount(c.name("total")?.as_str())?;
    let spec = QuantitySpec {
        quantity: Decimal::from_str(c.name("qty")?.as_str()).ok()?,
        unit_price: parse_amount(c.name("unit")?.as_str()),
        total: Some(total),
        rest: String::new(),
        by_weight: true,
    };
    let item = item_from_head(c.name("name")?.as_str(), total, WEIGHT_CONFIDENCE)?;
    Some(apply_quantity(item, &spec))
}

impl ReceiptHandler for KeyFoodHandler {
    fn name(&self) -> &'static str {
        "key_food"
    }

    fn extract(&self, ocr_text: &str, _store_hint: Option<&StoreKey>) -> Extraction {
        let lines = split_lines(ocr_text);
        let scan = scan_totals(&lines, TaxMode::Last);
        let body = &lines[..scan.body_end];

        let mut items = Vec::new();
        let mut matched = 0;
        let mut savings_total = Money::zero();
        for line in body {
            let special = match member_savings_item(line) {
                Some((item, saved)) => {
                    savings_total += saved;
                    Some(item)
                }
                None => weighed_item(line),
            };
            if let Some(item) = special {
                debug!("key food: {} {}", item.description, item.line_price);
                items.push(item);
                matched += 1;
                continue;
            }
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
            let confidence = if re_count_name().is_match(&priced.head) {
                COUNT_CONFIDENCE
            } else {
                PLAIN_CONFIDENCE
            };
            if let Some(item) = item_from_head(&priced.head, priced.amount, confidence) {
                items.push(item);
                matched += 1;
            }
        }

        let mut extraction = Extraction {
            items,
            totals: scan.totals,
            components: ConfidenceComponents {
                price_lines: count_price_lines(body) + count_savings_rows(body),
                matched_lines: matched,
            },
            ..Default::default()
        };
        if !savings_total.is_zero() {
            extraction
                .metadata
                .insert("member_savings".into(), savings_total.to_string());
        }
        info!("key food handler extracted {} items", extraction.items.len());
        extraction
    }
}

// Savings rows end in text, so the generic price-line count misses them.
fn count_savings_rows(body: &[&str]) -> usize {
    body.iter().filter(|l| re_member_savings().is_match(l)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(cents: i64) -> Money {
        Money::from_cents(cents)
    }

    const RECEIPT: &str = "\
KEY FOOD
46-02 QUEENS BLVD
SUNNYSIDE NY 11104
MILK 3.99
ORANGE JUICE 5.99 - 1.00 MEMBER SAVINGS
2 @ CHIPS 6.00
BANANAS 1.20 lb @ 0.69/lb 0.83
SUBTOTAL 15.81
TAX 0.00
TOTAL 15.81
CASH 20.00
CHANGE 4.19";

    #[test]
    fn member_savings_row_is_net_price() {
        let ex = KeyFoodHandler.extract(RECEIPT, None);
        let oj = &ex.items[1];
        assert_eq!(oj.description, "ORANGE JUICE");
        assert_eq!(oj.line_price, m(499));
        assert!((oj.confidence - 0.95).abs() < 1e-6);
        assert!(oj.notes.as_deref().unwrap().contains("member savings $1.00"));
    }

    #[test]
    fn counted_and_weighed_rows() {
        let ex = KeyFoodHandler.extract(RECEIPT, None);
        let got: Vec<(&str, Money)> =
            ex.items.iter().map(|i| (i.description.as_str(), i.line_price)).collect();
        assert_eq!(
            got,
            [("MILK", m(399)), ("ORANGE JUICE", m(499)), ("CHIPS", m(600)), ("BANANAS", m(83))]
        );
        assert_eq!(ex.items[2].quantity, Decimal::from(2));
        assert_eq!(ex.items[2].unit_price, m(300));
        assert_eq!(ex.items[3].quantity, Decimal::new(120, 2));
        assert_eq!(ex.totals.total, Some(m(1581)));
    }

    #[test]
    fn every_price_row_is_matched() {
        let ex = KeyFoodHandler.extract(RECEIPT, None);
        assert_eq!(ex.components.match_fraction(), 1.0);
        assert_eq!(ex.metadata.get("member_savings").map(String::as_str), Some("$1.00"));
    }
}
