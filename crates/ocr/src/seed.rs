use chrono::NaiveDate;
use halves_core::{Expense, ExpenseItem, Participant, Purchase};

use crate::types::Receipt;

/// Starts an expense from a receipt. The date falls back to the receipt's
/// printed date, then to the upload day. The two are independent afterwards.
pub fn seed_expense(receipt: &Receipt, payer: Participant, date: Option<NaiveDate>) -> Expense {
    let date = date
        .or(receipt.date)
        .unwrap_or_else(|| receipt.created_at.date_naive());
    let mut expense = Expense::new(payer, date, &receipt.store.name, receipt.effective_total());
    expense.items = receipt
        .items
        .iter()
        .map(|item| ExpenseItem {
            name: item.description.clone(),
            amount: item.line_price,
            shared: item.shared,
        })
        .collect();
    expense.receipt_id = Some(receipt.id);
    expense
}

/// A receipt as one shopping trip for spending reports, dated like
/// [`seed_expense`] without an explicit date.
impl From<&Receipt> for Purchase {
    fn from(receipt: &Receipt) -> Self {
        Purchase {
            date: receipt.date.unwrap_or_else(|| receipt.created_at.date_naive()),
            store: receipt.store.name.clone(),
            total: receipt.effective_total(),
            payment_method: receipt.payment_method.as_ref().map(|m| m.to_string()),
            items: receipt.items.iter().map(|i| i.description.clone()).collect(),
        }
    }
}
