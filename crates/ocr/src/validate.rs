//! Consistency checks on extracted receipts and comparison against
//! hand-labelled ground truth.

use halves_core::Money;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::confidence::ConfidenceScorer;
use crate::types::{Item, Receipt, Totals};

/// Warnings for sums that do not add up. Never fails: a mismatch is
/// reported, the receipt is still kept.
pub fn check_sums(items: &[Item], totals: &Totals, scorer: &ConfidenceScorer) -> Vec<String> {
    let mut warnings = Vec::new();

    if let (Some(subtotal), Some(tax), Some(total)) = (totals.subtotal, totals.tax, totals.total) {
        if !(subtotal + tax).approx_eq(total, scorer.tolerance(total)) {
            warnings.push(format!("subtotal {subtotal} + tax {tax} does not match total {total}"));
        }
    }

    if !items.is_empty() {
        let sum: Money = items.iter().map(|i| i.line_price).sum();
        // With tax on the receipt the items add up to the subtotal.
        let target = match (totals.subtotal, totals.tax, totals.total) {
            (Some(sub), Some(_), _) => Some(("subtotal", sub)),
            (_, _, Some(total)) => Some(("total", total)),
            (Some(sub), None, None) => Some(("subtotal", sub)),
            _ => None,
        };
        if let Some((label, expected)) = target {
            if !sum.approx_eq(expected, scorer.tolerance(expected)) {
                warnings.push(format!("items sum {sum} does not match {label} {expected}"));
            }
        }
    }

    for w in &warnings {
        warn!("{w}");
    }
    warnings
}

/// Hand-checked facts about one receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub store: String,
    pub total: Money,
    #[serde(default)]
    pub items: Vec<TruthItem>,
    /// Defaults to `items.len()` when omitted.
    #[serde(default)]
    pub item_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthItem {
    pub description: String,
    pub price: Money,
}

impl GroundTruth {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn expected_count(&self) -> usize {
        self.item_count.unwrap_or(self.items.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<Check>,
}

impl ValidationReport {
    fn push(&mut self, name: impl Into<String>, passed: bool, detail: String) {
        self.checks.push(Check { name: name.into(), passed, detail });
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Fraction of checks that passed.
    pub fn score(&self) -> f32 {
        if self.checks.is_empty() {
            return 1.0;
        }
        self.checks.iter().filter(|c| c.passed).count() as f32 / self.checks.len() as f32
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.checks {
            writeln!(f, "[{}] {}: {}", if c.passed { "PASS" } else { "FAIL" }, c.name, c.detail)?;
        }
        write!(f, "{:.0}% passed", self.score() * 100.0)
    }
}

const PRICE_TOLERANCE_CENTS: i64 = 1;

fn find_item<'a>(items: &'a [Item], description: &str) -> Option<&'a Item> {
    let wanted = description.to_lowercase();
    items
        .iter()
        .find(|i| i.description.to_lowercase() == wanted)
        .or_else(|| {
            items.iter().find(|i| {
                let have = i.description.to_lowercase();
                have.contains(&wanted) || wanted.contains(&have)
            })
        })
}

/// Store name must match exactly, total within a cent, item count within
/// one, and every labelled item present at its price.
pub fn compare(receipt: &Receipt, truth: &GroundTruth) -> ValidationReport {
    let mut report = ValidationReport::default();
    let cent = Money::from_cents(PRICE_TOLERANCE_CENTS);

    report.push(
        "store",
        receipt.store.name == truth.store,
        format!("expected {:?}, got {:?}", truth.store, receipt.store.name),
    );

    let total = receipt.effective_total();
    report.push(
        "total",
        total.approx_eq(truth.total, cent),
        format!("expected {}, got {}", truth.total, total),
    );

    let expected = truth.expected_count();
    let got = receipt.items.len();
    report.push(
        "item_count",
        expected.abs_diff(got) <= 1,
        format!("expected {expected}, got {got}"),
    );

    for wanted in &truth.items {
        let name = format!("item {}", wanted.description);
        match find_item(&receipt.items, &wanted.description) {
            Some(item) => report.push(
                name,
                item.line_price.approx_eq(wanted.price, cent),
                format!("expected {}, got {}", wanted.price, item.line_price),
            ),
            None => report.push(name, false, "missing".to_string()),
        }
    }
    report
}
