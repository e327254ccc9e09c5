use serde::{Deserialize, Serialize};

use super::expense::{Expense, Participant, Participants};
use super::money::Money;
use super::period::Month;

/// A month's worth of expenses between the two participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub month: Month,
    pub expenses: Vec<Expense>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSummary {
    pub month: Month,
    pub total_expenses: Money,
    pub total_shared: Money,
    pub first_paid: Money,
    pub second_paid: Money,
    pub balance: Money,
    pub owed_statement: String,
}

impl BalanceSheet {
    /// Keeps only the expenses dated inside `month`.
    pub fn new(month: Month, expenses: Vec<Expense>) -> Self {
        let expenses = expenses
            .into_iter()
            .filter(|e| month.contains(e.date))
            .collect();
        BalanceSheet { month, expenses }
    }

    /// Positive: the second participant owes the first. Negative: the reverse.
    pub fn net_balance(&self) -> Money {
        self.expenses
            .iter()
            .map(|e| match e.payer {
                Participant::First => e.amount_owed(),
                Participant::Second => -e.amount_owed(),
            })
            .sum()
    }

    pub fn paid_by(&self, who: Participant) -> Money {
        self.expenses
            .iter()
            .filter(|e| e.payer == who)
            .map(|e| e.total)
            .sum()
    }

    pub fn summary(&self, names: &Participants) -> BalanceSummary {
        let balance = self.net_balance();
        let owed_statement = if balance.is_positive() {
            format!("{} owes {} {}", names.second, names.first, balance)
        } else if balance.is_zero() {
            "All settled! No one owes anything.".to_string()
        } else {
            format!("{} owes {} {}", names.first, names.second, balance.abs())
        };

        BalanceSummary {
            month: self.month,
            total_expenses: self.expenses.iter().map(|e| e.total).sum(),
            total_shared: self.expenses.iter().map(|e| e.shared_total()).sum(),
            first_paid: self.paid_by(Participant::First),
            second_paid: self.paid_by(Participant::Second),
            balance,
            owed_statement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expense::ExpenseItem;
    use chrono::NaiveDate;

    fn expense(payer: Participant, day: u32, shared_cents: i64) -> Expense {
        let mut e = Expense::new(
            payer,
            NaiveDate::from_ymd_opt(2024, 4, day).unwrap(),
            "Store",
            Money::from_cents(shared_cents),
        );
        e.items.push(ExpenseItem::new("stuff", Money::from_cents(shared_cents)));
        e
    }

    fn april() -> Month {
        Month::new(2024, 4).unwrap()
    }

    #[test]
    fn net_balance_nets_both_directions() {
        let sheet = BalanceSheet::new(
            april(),
            vec![
                expense(Participant::First, 1, 4000),
                expense(Participant::Second, 2, 1000),
            ],
        );
        // second owes 20.00, first owes 5.00
        assert_eq!(sheet.net_balance(), Money::from_cents(1500));
    }

    #[test]
    fn summary_statement_names_debtor() {
        let sheet = BalanceSheet::new(april(), vec![expense(Participant::Second, 3, 1000)]);
        let s = sheet.summary(&Participants::default());
        assert_eq!(s.balance, Money::from_cents(-500));
        assert_eq!(s.owed_statement, "Alvand owes Roni $5.00");
        assert_eq!(s.second_paid, Money::from_cents(1000));
        assert!(s.first_paid.is_zero());
    }

    #[test]
    fn settled_when_balanced() {
        let sheet = BalanceSheet::new(
            april(),
            vec![
                expense(Participant::First, 1, 1000),
                expense(Participant::Second, 2, 1000),
            ],
        );
        let s = sheet.summary(&Participants::default());
        assert!(s.balance.is_zero());
        assert_eq!(s.owed_statement, "All settled! No one owes anything.");
        assert_eq!(s.total_expenses, Money::from_cents(2000));
    }

    #[test]
    fn new_drops_expenses_from_other_months() {
        let mut may = expense(Participant::First, 1, 1000);
        may.date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let sheet = BalanceSheet::new(april(), vec![may, expense(Participant::First, 30, 200)]);
        assert_eq!(sheet.expenses.len(), 1);
    }
}
