use halves_core::config::ExtractionSettings;
use halves_core::Money;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::handlers::lines::{is_clean_line, split_lines};
use crate::handlers::Extraction;
use crate::types::{ConfidenceBreakdown, Item, StoreMatch, Totals};

const ITEMS_WEIGHT: f32 = 0.35;
const TOTALS_WEIGHT: f32 = 0.30;
const STORE_WEIGHT: f32 = 0.15;
const OCR_WEIGHT: f32 = 0.20;

/// Engine confidence assumed when the engine reports none.
const DEFAULT_ENGINE_CONFIDENCE: f32 = 0.5;

/// Weighs item, totals, store and OCR evidence into one score. The result
/// only drives the `needs_review` flag.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    sum_tolerance: Decimal,
    review_threshold: f32,
    suspicious_price: Money,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::from_settings(&ExtractionSettings::default())
    }
}

impl ConfidenceScorer {
    pub fn from_settings(settings: &ExtractionSettings) -> Self {
        ConfidenceScorer {
            sum_tolerance: Decimal::from_f64(settings.sum_tolerance).unwrap_or_default(),
            review_threshold: settings.review_threshold,
            suspicious_price: settings.suspicious_item_price,
        }
    }

    /// Allowed gap between two sums near `total`: a fraction of the total,
    /// never less than two cents.
    pub fn tolerance(&self, total: Money) -> Money {
        let relative = total.abs() * self.sum_tolerance;
        relative.max(Money::from_cents(2))
    }

    pub fn needs_review(&self, confidence: &ConfidenceBreakdown) -> bool {
        confidence.overall < self.review_threshold
    }

    pub fn score(
        &self,
        extraction: &Extraction,
        store: &StoreMatch,
        ocr_text: &str,
        engine_confidence: Option<f32>,
    ) -> ConfidenceBreakdown {
        let items = self.items_score(extraction);
        let totals = self.totals_score(&extraction.items, &extraction.totals);
        let store = store.confidence.clamp(0.0, 1.0);
        let ocr = ocr_score(ocr_text, engine_confidence);
        let overall = (ITEMS_WEIGHT * items + TOTALS_WEIGHT * totals + STORE_WEIGHT * store + OCR_WEIGHT * ocr)
            .clamp(0.0, 1.0);
        debug!("confidence items={items:.2} totals={totals:.2} store={store:.2} ocr={ocr:.2} overall={overall:.2}");
        ConfidenceBreakdown { items, totals, store, ocr, overall }
    }

    fn item_valid(&self, item: &Item) -> bool {
        item.line_price.is_positive()
            && item.line_price <= self.suspicious_price
            && !item.suspicious
            && item.quantity_consistent(Money::from_cents(2))
    }

    fn items_score(&self, extraction: &Extraction) -> f32 {
        if extraction.items.is_empty() {
            return 0.0;
        }
        let valid = extraction.items.iter().filter(|i| self.item_valid(i)).count();
        let validity = valid as f32 / extraction.items.len() as f32;
        0.5 * extraction.components.match_fraction() + 0.5 * validity
    }

    fn totals_score(&self, items: &[Item], totals: &Totals) -> f32 {
        let Some(total) = totals.total else {
            return 0.0;
        };
        let tolerance = self.tolerance(total);
        let mut score = 0.4;
        if let (Some(subtotal), Some(tax)) = (totals.subtotal, totals.tax) {
            if (subtotal + tax).approx_eq(total, tolerance) {
                score += 0.3;
            }
        }
        if !items.is_empty() {
            let sum: Money = items.iter().map(|i| i.line_price).sum();
            let matches_subtotal = totals.subtotal.is_some_and(|s| sum.approx_eq(s, self.tolerance(s)));
            if sum.approx_eq(total, tolerance) || matches_subtotal {
                score += 0.3;
            }
        }
        score
    }
}

fn ocr_score(text: &str, engine_confidence: Option<f32>) -> f32 {
    let lines = split_lines(text);
    if lines.is_empty() {
        return 0.0;
    }
    let clean = lines.iter().filter(|l| is_clean_line(l)).count() as f32 / lines.len() as f32;
    let engine = engine_confidence.unwrap_or(DEFAULT_ENGINE_CONFIDENCE).clamp(0.0, 1.0);
    0.6 * engine + 0.4 * clean
}
