//! Vendor-specific text extraction.
//!
//! Every handler turns raw OCR text into items and totals. The
//! [`HandlerRegistry`] picks one by store key and falls back to
//! [`GenericHandler`] for anything it does not know.

pub mod costco;
pub mod fields;
pub mod generic;
pub mod h_mart;
pub mod key_food;
pub mod lines;
pub mod registry;
pub mod trader_joes;
pub mod walmart;

use chrono::NaiveDate;
use halves_core::Money;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{Item, PaymentMethod, StoreKey, Totals};
use lines::{
    classify_line, clean_description, is_column_header, is_skip_line, plausible_description,
    quantity_prefix, quantity_suffix, trailing_amount, trailing_amount_lenient, LineKind,
    QuantitySpec,
};

pub use costco::CostcoHandler;
pub use generic::GenericHandler;
pub use h_mart::HMartHandler;
pub use key_food::KeyFoodHandler;
pub use registry::HandlerRegistry;
pub use trader_joes::TraderJoesHandler;
pub use walmart::WalmartHandler;

/// Line counts the scorer uses to judge how much of the receipt body was
/// understood.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfidenceComponents {
    /// Body lines ending in an amount.
    pub price_lines: usize,
    /// Lines the handler turned into (or folded into) an item.
    pub matched_lines: usize,
}

impl ConfidenceComponents {
    pub fn match_fraction(&self) -> f32 {
        match (self.price_lines, self.matched_lines) {
            (_, 0) => 0.0,
            (0, _) => 1.0,
            (p, m) => (m as f32 / p as f32).min(1.0),
        }
    }
}

/// What a handler pulled out of one receipt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub items: Vec<Item>,
    pub totals: Totals,
    pub warnings: Vec<String>,
    pub components: ConfidenceComponents,
    pub date: Option<NaiveDate>,
    pub payment_method: Option<PaymentMethod>,
    pub metadata: BTreeMap<String, String>,
}

pub trait ReceiptHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, ocr_text: &str, store_hint: Option<&StoreKey>) -> Extraction;
}

// ── Shared building blocks ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaxMode {
    /// Use the last tax line.
    Last,
    /// Add up every tax line (state + county, TAX 1 + TAX 2).
    Sum,
}

/// The summary block at the bottom of a receipt.
#[derive(Debug, Clone, Default)]
pub(crate) struct SummaryScan {
    pub totals: Totals,
    /// Index of the first summary line; items live above it.
    pub body_end: usize,
}

pub(crate) fn scan_totals(lines: &[&str], tax_mode: TaxMode) -> SummaryScan {
    let mut subtotal = None;
    let mut taxes: Vec<Money> = Vec::new();
    let mut totals: Vec<(usize, Money)> = Vec::new();
    let mut body_end = None;

    for (i, line) in lines.iter().enumerate() {
        let kind = classify_line(line);
        if matches!(kind, LineKind::Subtotal | LineKind::Tax | LineKind::Total) && body_end.is_none() {
            body_end = Some(i);
        }
        let Some(priced) = trailing_amount_lenient(line) else {
            continue;
        };
        match kind {
            LineKind::Subtotal => subtotal = Some(priced.amount),
            LineKind::Tax => taxes.push(priced.amount),
            LineKind::Total => totals.push((i, priced.amount)),
            _ => {}
        }
    }

    let tax = match tax_mode {
        _ if taxes.is_empty() => None,
        TaxMode::Last => taxes.last().copied(),
        TaxMode::Sum => Some(taxes.iter().sum()),
    };

    // The last total-like line in the lower two thirds wins, unless it is
    // smaller than the subtotal, in which case the largest candidate does.
    let bottom_start = lines.len() / 3;
    let bottom: Vec<Money> = totals
        .iter()
        .filter(|(i, _)| *i >= bottom_start)
        .map(|(_, m)| *m)
        .collect();
    let candidates: Vec<Money> = if bottom.is_empty() {
        totals.iter().map(|(_, m)| *m).collect()
    } else {
        bottom
    };
    let total = match (candidates.last().copied(), subtotal) {
        (Some(last), Some(sub)) if last < sub => candidates.iter().max().copied(),
        (last, _) => last,
    };

    let mut result = Totals { subtotal, tax, total };
    derive_missing_totals(&mut result);
    SummaryScan {
        totals: result,
        body_end: body_end.unwrap_or(lines.len()),
    }
}

/// Fill one missing figure from the other two when they agree.
pub(crate) fn derive_missing_totals(totals: &mut Totals) {
    match (totals.subtotal, totals.tax, totals.total) {
        (Some(s), Some(t), None) => {
            debug!("deriving total from subtotal + tax");
            totals.total = Some(s + t);
        }
        (None, Some(t), Some(total)) if total > t => {
            debug!("deriving subtotal from total - tax");
            totals.subtotal = Some(total - t);
        }
        (Some(s), None, Some(total)) if total >= s => {
            debug!("deriving tax from total - subtotal");
            totals.tax = Some(total - s);
        }
        _ => {}
    }
}

/// Body lines ending in an amount, excluding summary/tender lines.
pub(crate) fn count_price_lines(body: &[&str]) -> usize {
    body.iter()
        .filter(|l| classify_line(l) == LineKind::Other && trailing_amount(l).is_some())
        .count()
}

/// Builds an item from the text left of a price, reading quantity prefixes
/// and suffixes. Returns `None` for names that do not look like products.
pub(crate) fn item_from_head(head: &str, line_price: Money, base_confidence: f32) -> Option<Item> {
    let spec = quantity_prefix(head).or_else(|| quantity_suffix(head));
    let name = match &spec {
        Some(q) => q.rest.as_str(),
        None => head,
    };
    let description = clean_description(name);
    if !plausible_description(&description)
        || is_column_header(&description)
        || is_skip_line(&description)
    {
        return None;
    }

    let item = Item::new(&description, line_price, base_confidence);
    Some(match spec {
        Some(q) => apply_quantity(item, &q),
        None => item,
    })
}

/// Sets quantity and unit price on `item`. A printed extended price replaces
/// the line price. Confidence drops when the numbers disagree.
pub(crate) fn apply_quantity(mut item: Item, q: &QuantitySpec) -> Item {
    if let Some(total) = q.total {
        item.line_price = total;
    }
    let unit = q.unit_price.unwrap_or_else(|| {
        if q.quantity > Decimal::ZERO {
            item.line_price.checked_div(q.quantity).unwrap_or(item.line_price)
        } else {
            item.line_price
        }
    });
    item = item.with_quantity(q.quantity, unit);
    if q.by_weight {
        item.add_note(format!("{} lb @ {}/lb", q.quantity.normalize(), unit));
    }
    if item.quantity_consistent(Money::from_cents(2)) {
        item.confidence = (item.confidence + 0.05).min(1.0);
    } else {
        item.confidence = (item.confidence - 0.2).max(0.0);
    }
    item
}

/// Applies a discount line to `item`.
pub(crate) fn apply_discount(item: &mut Item, discount: Money) {
    item.line_price = item.line_price - discount;
    if item.quantity == Decimal::ONE {
        item.unit_price = item.line_price;
    }
    item.add_note(format!("discount {discount}"));
}
