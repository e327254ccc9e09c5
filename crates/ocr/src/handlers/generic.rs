use tracing::{debug, info};

use super::lines::{classify_line, quantity_line, split_item_code, split_lines, trailing_amount, LineKind};
use super::{
    apply_discount, apply_quantity, count_price_lines, item_from_head, scan_totals,
    ConfidenceComponents, Extraction, ReceiptHandler, TaxMode,
};
use crate::types::StoreKey;

const ITEM_CONFIDENCE: f32 = 0.7;

/// Layout-agnostic extraction used for unknown stores: any body line ending
/// in an amount is a candidate item.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericHandler;

impl ReceiptHandler for GenericHandler {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn extract(&self, ocr_text: &str, _store_hint: Option<&StoreKey>) -> Extraction {
        let lines = split_lines(ocr_text);
        let scan = scan_totals(&lines, TaxMode::Last);
        let body = &lines[..scan.body_end];

        let mut items = Vec::new();
        let mut matched = 0;
        for (n, line) in body.iter().enumerate() {
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
            let (_, head) = split_item_code(&priced.head);
            match item_from_head(&head, priced.amount, ITEM_CONFIDENCE) {
                Some(item) => {
                    debug!("generic: line {} -> {:?} {}", n + 1, item.description, item.line_price);
                    items.push(item);
                    matched += 1;
                }
                None => debug!("generic: line {} not an item: {line:?}", n + 1),
            }
        }

        info!("generic handler extracted {} items", items.len());
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
    use rust_decimal::Decimal;

    fn m(cents: i64) -> Money {
        Money::from_cents(cents)
    }

    const CORNER_STORE: &str = "\
CORNER MARKET
123 MAIN ST
(555) 123-4567
COFFEE BEANS 12.99
OAT MILK 3.00
2 @ 1.50
BAGELS 3.00
PAPER TOWELS 8.99
COUPON 1.00-
SUBTOTAL 26.98
TAX 1.08
TOTAL 28.06
VISA 28.06
THANK YOU";

    #[test]
    fn extracts_items_and_totals() {
        let ex = GenericHandler.extract(CORNER_STORE, None);
        let names: Vec<&str> = ex.items.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(names, ["COFFEE BEANS", "OAT MILK", "BAGELS", "PAPER TOWELS"]);
        assert_eq!(ex.totals.subtotal, Some(m(2698)));
        assert_eq!(ex.totals.tax, Some(m(108)));
        assert_eq!(ex.totals.total, Some(m(2806)));
    }

    #[test]
    fn quantity_and_coupon_lines_amend_previous_item() {
        let ex = GenericHandler.extract(CORNER_STORE, None);
        let milk = &ex.items[1];
        assert_eq!(milk.quantity, Decimal::from(2));
        assert_eq!(milk.unit_price, m(150));
        let towels = &ex.items[3];
        assert_eq!(towels.line_price, m(799));
    }

    #[test]
    fn components_count_body_price_lines() {
        let ex = GenericHandler.extract(CORNER_STORE, None);
        assert_eq!(ex.components.matched_lines, 6);
        assert!(ex.components.match_fraction() > 0.9);
    }

    #[test]
    fn empty_and_garbage_text_do_not_panic() {
        let ex = GenericHandler.extract("", None);
        assert!(ex.items.is_empty());
        assert_eq!(ex.totals.total, None);
        let ex = GenericHandler.extract("!@#$%^&*()\n\0\x01\x02\n$$$ 1.0", None);
        assert!(ex.items.is_empty());
    }

    #[test]
    fn total_without_decimal_point() {
        let ex = GenericHandler.extract("SHOP\nSOAP 2.50\nTOTAL 250", None);
        assert_eq!(ex.totals.total, Some(m(250)));
        assert_eq!(ex.items.len(), 1);
    }
}
