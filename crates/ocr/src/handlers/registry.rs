use halves_core::Money;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::fields::{extract_date, extract_payment_method};
use super::{
    CostcoHandler, Extraction, GenericHandler, HMartHandler, KeyFoodHandler, ReceiptHandler,
    TraderJoesHandler, WalmartHandler,
};
use crate::types::StoreKey;

/// Items priced above this many cents are flagged unless configured otherwise.
pub const DEFAULT_SUSPICIOUS_CENTS: i64 = 100_000;

/// Maps store keys to handlers. Unknown keys get the generic handler.
pub struct HandlerRegistry {
    handlers: HashMap<StoreKey, Box<dyn ReceiptHandler>>,
    generic: GenericHandler,
    suspicious_price: Money,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl HandlerRegistry {
    /// An empty registry; every receipt goes to the generic handler.
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: HashMap::new(),
            generic: GenericHandler,
            suspicious_price: Money::from_cents(DEFAULT_SUSPICIOUS_CENTS),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("costco", Box::new(CostcoHandler));
        registry.register("walmart", Box::new(WalmartHandler));
        registry.register("trader_joes", Box::new(TraderJoesHandler));
        registry.register("key_food", Box::new(KeyFoodHandler));
        registry.register("h_mart", Box::new(HMartHandler));
        registry
    }

    pub fn with_suspicious_price(mut self, price: Money) -> Self {
        self.suspicious_price = price;
        self
    }

    pub fn register(&mut self, key: &str, handler: Box<dyn ReceiptHandler>) {
        self.handlers.insert(StoreKey::new(key), handler);
    }

    pub fn handler_for(&self, key: Option<&StoreKey>) -> &dyn ReceiptHandler {
        key.and_then(|k| self.handlers.get(k))
            .map(|h| h.as_ref())
            .unwrap_or(&self.generic)
    }

    /// Runs the matching handler and applies the checks every receipt gets:
    /// date and payment method, non-positive prices, implausibly large prices.
    pub fn extract(&self, ocr_text: &str, key: Option<&StoreKey>) -> Extraction {
        let handler = self.handler_for(key);
        debug!("extracting with {} handler", handler.name());
        let mut extraction = handler.extract(ocr_text, key);

        if extraction.date.is_none() {
            extraction.date = extract_date(ocr_text);
        }
        if extraction.payment_method.is_none() {
            extraction.payment_method = extract_payment_method(ocr_text);
        }

        let before = extraction.items.len();
        extraction.items.retain(|i| i.line_price.is_positive());
        let dropped = before - extraction.items.len();
        if dropped > 0 {
            extraction
                .warnings
                .push(format!("dropped {dropped} item(s) with zero or negative price"));
        }

        for item in extraction.items.iter_mut() {
            if item.line_price > self.suspicious_price {
                item.suspicious = true;
                item.confidence /= 2.0;
                extraction.warnings.push(format!(
                    "{} priced at {} looks wrong",
                    item.description, item.line_price
                ));
            }
        }

        if extraction.items.is_empty() {
            warn!("{} handler found no items", handler.name());
            extraction.warnings.push("no items extracted".into());
        }
        extraction
    }
}
