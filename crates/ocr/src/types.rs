use chrono::{DateTime, NaiveDate, Utc};
use halves_core::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::recognizer::OcrEngine;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReceiptError {
    #[error("Receipt {0} has been exported and can no longer be changed")]
    Exported(Uuid),
    #[error("No item at index {index} (receipt has {len} items)")]
    ItemIndex { index: usize, len: usize },
    #[error("Invalid item: {0}")]
    InvalidItem(String),
}

/// Canonical store identifier such as `costco` or `trader_joes`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreKey(String);

impl StoreKey {
    /// Lowercases and joins words with underscores: `"Key Food"` -> `key_food`.
    pub fn new(raw: &str) -> Self {
        let key = raw
            .trim()
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || c == '-')
            .map(|s| s.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect::<String>())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        StoreKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which classifier rule produced a [`StoreMatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ExactAlias,
    SubstringAlias,
    LayoutPattern,
    HeaderAlias,
    FuzzyHeader,
    HeaderLine,
    Override,
    NoMatch,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchReason::ExactAlias => "exact_alias",
            MatchReason::SubstringAlias => "substring_alias",
            MatchReason::LayoutPattern => "layout_pattern",
            MatchReason::HeaderAlias => "header_alias",
            MatchReason::FuzzyHeader => "fuzzy_header",
            MatchReason::HeaderLine => "header_line",
            MatchReason::Override => "override",
            MatchReason::NoMatch => "no_match",
        };
        f.write_str(s)
    }
}

pub const UNKNOWN_STORE: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMatch {
    pub name: String,
    pub key: Option<StoreKey>,
    pub confidence: f32,
    pub reason: MatchReason,
}

impl StoreMatch {
    pub fn new(name: &str, key: Option<StoreKey>, confidence: f32, reason: MatchReason) -> Self {
        StoreMatch {
            name: name.to_string(),
            key,
            confidence: confidence.clamp(0.0, 1.0),
            reason,
        }
    }

    pub fn unknown() -> Self {
        StoreMatch::new(UNKNOWN_STORE, None, crate::classify::UNKNOWN_CONFIDENCE, MatchReason::NoMatch)
    }

    pub fn is_unknown(&self) -> bool {
        self.reason == MatchReason::NoMatch
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentMethod {
    Visa,
    Mastercard,
    Amex,
    Discover,
    Cash,
    Debit,
    Ebt,
    Other(String),
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Visa => write!(f, "Visa"),
            PaymentMethod::Mastercard => write!(f, "Mastercard"),
            PaymentMethod::Amex => write!(f, "Amex"),
            PaymentMethod::Discover => write!(f, "Discover"),
            PaymentMethod::Cash => write!(f, "Cash"),
            PaymentMethod::Debit => write!(f, "Debit"),
            PaymentMethod::Ebt => write!(f, "EBT"),
            PaymentMethod::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A purchased line on a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub description: String,
    pub unit_price: Money,
    pub quantity: Decimal,
    pub line_price: Money,
    #[serde(default = "default_shared")]
    pub shared: bool,
    #[serde(default)]
    pub suspicious: bool,
    pub confidence: f32,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_shared() -> bool {
    true
}

impl Item {
    /// A single-quantity item.
    pub fn new(description: &str, line_price: Money, confidence: f32) -> Self {
        Item {
            description: description.to_string(),
            unit_price: line_price,
            quantity: Decimal::ONE,
            line_price,
            shared: true,
            suspicious: false,
            confidence: confidence.clamp(0.0, 1.0),
            notes: None,
        }
    }

    pub fn with_quantity(mut self, quantity: Decimal, unit_price: Money) -> Self {
        self.quantity = quantity;
        self.unit_price = unit_price;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.add_note(note);
        self
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        let note = note.into();
        self.notes = Some(match self.notes.take() {
            Some(existing) => format!("{existing}; {note}"),
            None => note,
        });
    }

    /// Whether `quantity * unit_price` agrees with `line_price` to within `tolerance`.
    pub fn quantity_consistent(&self, tolerance: Money) -> bool {
        (self.unit_price * self.quantity).approx_eq(self.line_price, tolerance)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Option<Money>,
    pub tax: Option<Money>,
    pub total: Option<Money>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub items: f32,
    pub totals: f32,
    pub store: f32,
    pub ocr: f32,
    pub overall: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptFlags {
    pub verified: bool,
    pub used_fallback: bool,
    pub exported: bool,
    pub needs_review: bool,
}

/// Where the original upload lives in the attachment store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub hash_hex: String,
    pub path: PathBuf,
}

/// Partial edit applied by [`Receipt::update_item`].
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub description: Option<String>,
    pub line_price: Option<Money>,
    pub quantity: Option<Decimal>,
    pub shared: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: Uuid,
    pub image: Option<ImageRef>,
    pub raw_text: String,
    pub store: StoreMatch,
    pub items: Vec<Item>,
    pub totals: Totals,
    pub confidence: ConfidenceBreakdown,
    pub flags: ReceiptFlags,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub date: Option<NaiveDate>,
    pub payment_method: Option<PaymentMethod>,
    pub ocr_engine: Option<OcrEngine>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Receipt {
    pub fn new(raw_text: &str) -> Self {
        let now = Utc::now();
        Receipt {
            id: Uuid::new_v4(),
            image: None,
            raw_text: raw_text.to_string(),
            store: StoreMatch::unknown(),
            items: Vec::new(),
            totals: Totals::default(),
            confidence: ConfidenceBreakdown::default(),
            flags: ReceiptFlags::default(),
            warnings: Vec::new(),
            errors: Vec::new(),
            date: None,
            payment_method: None,
            ocr_engine: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn items_total(&self) -> Money {
        self.items.iter().map(|i| i.line_price).sum()
    }

    pub fn shared_items_total(&self) -> Money {
        self.items
            .iter()
            .filter(|i| i.shared)
            .map(|i| i.line_price)
            .sum()
    }

    /// The amount the receipt says was paid, falling back to subtotal + tax
    /// and finally the item sum.
    pub fn effective_total(&self) -> Money {
        match self.totals {
            Totals { total: Some(t), .. } => t,
            Totals { subtotal: Some(s), tax, .. } => s + tax.unwrap_or_default(),
            _ => self.items_total(),
        }
    }

    pub fn ensure_mutable(&self) -> Result<(), ReceiptError> {
        if self.flags.exported {
            Err(ReceiptError::Exported(self.id))
        } else {
            Ok(())
        }
    }

    fn item_mut(&mut self, index: usize) -> Result<&mut Item, ReceiptError> {
        let len = self.items.len();
        self.items
            .get_mut(index)
            .ok_or(ReceiptError::ItemIndex { index, len })
    }

    pub fn set_item_shared(&mut self, index: usize, shared: bool) -> Result<(), ReceiptError> {
        self.ensure_mutable()?;
        self.item_mut(index)?.shared = shared;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn update_item(&mut self, index: usize, update: ItemUpdate) -> Result<(), ReceiptError> {
        self.ensure_mutable()?;
        if let Some(price) = update.line_price {
            if !price.is_positive() {
                return Err(ReceiptError::InvalidItem(format!("price {price} must be positive")));
            }
        }
        if let Some(qty) = update.quantity {
            if qty <= Decimal::ZERO {
                return Err(ReceiptError::InvalidItem(format!("quantity {qty} must be positive")));
            }
        }
        let item = self.item_mut(index)?;
        if let Some(description) = update.description {
            item.description = description;
        }
        if let Some(qty) = update.quantity {
            item.quantity = qty;
        }
        if let Some(price) = update.line_price {
            item.line_price = price;
        }
        if (update.line_price.is_some() || update.quantity.is_some())
            && item.quantity > Decimal::ZERO
        {
            item.unit_price = item.line_price.checked_div(item.quantity).unwrap_or(item.line_price);
        }
        if let Some(shared) = update.shared {
            item.shared = shared;
        }
        // A person has looked at it now.
        item.confidence = 1.0;
        item.suspicious = false;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn add_item(&mut self, item: Item) -> Result<(), ReceiptError> {
        self.ensure_mutable()?;
        if item.description.trim().is_empty() {
            return Err(ReceiptError::InvalidItem("description is empty".into()));
        }
        if !item.line_price.is_positive() {
            return Err(ReceiptError::InvalidItem(format!(
                "price {} must be positive",
                item.line_price
            )));
        }
        self.items.push(item);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove_item(&mut self, index: usize) -> Result<Item, ReceiptError> {
        self.ensure_mutable()?;
        let len = self.items.len();
        if index >= len {
            return Err(ReceiptError::ItemIndex { index, len });
        }
        self.updated_at = Utc::now();
        Ok(self.items.remove(index))
    }

    pub fn mark_verified(&mut self) -> Result<(), ReceiptError> {
        self.ensure_mutable()?;
        self.flags.verified = true;
        self.flags.needs_review = false;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Freezes the receipt. Idempotent.
    pub fn mark_exported(&mut self) {
        if !self.flags.exported {
            self.flags.exported = true;
            self.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt() -> Receipt {
        let mut r = Receipt::new("MILK 3.49\nBREAD 2.50");
        r.items = vec![
            Item::new("MILK", Money::from_cents(349), 0.9),
            Item::new("BREAD", Money::from_cents(250), 0.9),
        ];
        r
    }

    #[test]
    fn store_key_normalizes() {
        assert_eq!(StoreKey::new("Key Food").as_str(), "key_food");
        assert_eq!(StoreKey::new(" H-Mart ").as_str(), "h_mart");
        assert_eq!(StoreKey::new("Trader Joe's").as_str(), "trader_joes");
    }

    #[test]
    fn item_confidence_is_clamped() {
        assert_eq!(Item::new("X", Money::from_cents(1), 1.4).confidence, 1.0);
    }

    #[test]
    fn quantity_consistency() {
        let item = Item::new("AVOCADOS", Money::from_cents(798), 0.9)
            .with_quantity(Decimal::from(2), Money::from_cents(399));
        assert!(item.quantity_consistent(Money::from_cents(1)));
        let off = Item::new("AVOCADOS", Money::from_cents(900), 0.9)
            .with_quantity(Decimal::from(2), Money::from_cents(399));
        assert!(!off.quantity_consistent(Money::from_cents(2)));
    }

    #[test]
    fn edits_update_items() {
        let mut r = receipt();
        r.set_item_shared(1, false).unwrap();
        assert!(!r.items[1].shared);
        assert_eq!(r.shared_items_total(), Money::from_cents(349));

        r.update_item(
            0,
            ItemUpdate {
                line_price: Some(Money::from_cents(698)),
                quantity: Some(Decimal::from(2)),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(r.items[0].unit_price, Money::from_cents(349));
        assert_eq!(r.items_total(), Money::from_cents(948));
    }

    #[test]
    fn bad_index_and_bad_price_are_rejected() {
        let mut r = receipt();
        assert_eq!(
            r.set_item_shared(5, true),
            Err(ReceiptError::ItemIndex { index: 5, len: 2 })
        );
        assert!(matches!(
            r.add_item(Item::new("FREE", Money::zero(), 0.5)),
            Err(ReceiptError::InvalidItem(_))
        ));
        assert!(r.remove_item(2).is_err());
        assert_eq!(r.remove_item(0).unwrap().description, "MILK");
    }

    #[test]
    fn exported_receipt_is_frozen() {
        let mut r = receipt();
        r.mark_exported();
        let id = r.id;
        assert_eq!(r.set_item_shared(0, false), Err(ReceiptError::Exported(id)));
        assert_eq!(r.mark_verified(), Err(ReceiptError::Exported(id)));
        assert!(r.remove_item(0).is_err());
        assert_eq!(r.items.len(), 2);
    }

    #[test]
    fn verify_clears_review_flag() {
        let mut r = receipt();
        r.flags.needs_review = true;
        r.mark_verified().unwrap();
        assert!(r.flags.verified);
        assert!(!r.flags.needs_review);
    }

    #[test]
    fn effective_total_falls_back() {
        let mut r = receipt();
        assert_eq!(r.effective_total(), Money::from_cents(599));
        r.totals.subtotal = Some(Money::from_cents(599));
        r.totals.tax = Some(Money::from_cents(50));
        assert_eq!(r.effective_total(), Money::from_cents(649));
        r.totals.total = Some(Money::from_cents(650));
        assert_eq!(r.effective_total(), Money::from_cents(650));
    }
}
