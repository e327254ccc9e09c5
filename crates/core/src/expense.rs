use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::money::Money;
use super::period::Month;

/// One of the two people sharing expenses. Display names live in
/// [`Participants`] so the ledger itself never depends on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Participant {
    First,
    Second,
}

impl Participant {
    pub fn other(self) -> Participant {
        match self {
            Participant::First => Participant::Second,
            Participant::Second => Participant::First,
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Participant::First => write!(f, "first"),
            Participant::Second => write!(f, "second"),
        }
    }
}

impl FromStr for Participant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" | "1" => Ok(Participant::First),
            "second" | "2" => Ok(Participant::Second),
            other => Err(format!("Unknown participant: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub first: String,
    pub second: String,
}

impl Default for Participants {
    fn default() -> Self {
        Participants {
            first: "Alvand".to_string(),
            second: "Roni".to_string(),
        }
    }
}

impl Participants {
    pub fn name(&self, who: Participant) -> &str {
        match who {
            Participant::First => &self.first,
            Participant::Second => &self.second,
        }
    }

    /// Resolves either a role (`first`/`second`) or a configured display name.
    pub fn resolve(&self, s: &str) -> Option<Participant> {
        if let Ok(p) = s.parse::<Participant>() {
            return Some(p);
        }
        if s.eq_ignore_ascii_case(&self.first) {
            Some(Participant::First)
        } else if s.eq_ignore_ascii_case(&self.second) {
            Some(Participant::Second)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseItem {
    pub name: String,
    pub amount: Money,
    #[serde(default = "default_shared")]
    pub shared: bool,
}

fn default_shared() -> bool {
    true
}

impl ExpenseItem {
    pub fn new(name: &str, amount: Money) -> Self {
        ExpenseItem {
            name: name.to_string(),
            amount,
            shared: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: Uuid,
    pub payer: Participant,
    pub date: NaiveDate,
    pub store: String,
    pub total: Money,
    pub items: Vec<ExpenseItem>,
    pub receipt_id: Option<Uuid>,
}

impl Expense {
    pub fn new(payer: Participant, date: NaiveDate, store: &str, total: Money) -> Self {
        Expense {
            id: Uuid::new_v4(),
            payer,
            date,
            store: store.to_string(),
            total,
            items: Vec::new(),
            receipt_id: None,
        }
    }

    /// Sum of the amounts of items marked shared.
    pub fn shared_total(&self) -> Money {
        self.items
            .iter()
            .filter(|i| i.shared)
            .map(|i| i.amount)
            .sum()
    }

    /// What the non-paying participant owes the payer for this expense.
    pub fn amount_owed(&self) -> Money {
        self.shared_total().half()
    }

    pub fn owed_by(&self) -> Participant {
        self.payer.other()
    }

    pub fn month(&self) -> Month {
        Month::of(self.date)
    }

    pub fn items_total(&self) -> Money {
        self.items.iter().map(|i| i.amount).sum()
    }
}
