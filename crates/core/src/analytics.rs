//! Spending reports: totals per period, per store and per payment method,
//! plus month-over-month trends.

use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use super::expense::Expense;
use super::money::Money;
use super::period::{DateRange, Month};

pub const UNKNOWN_PAYMENT: &str = "Unknown";

const TOP_N: usize = 5;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// One shopping trip, whether it came from a receipt or an expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub date: NaiveDate,
    pub store: String,
    pub total: Money,
    pub payment_method: Option<String>,
    pub items: Vec<String>,
}

impl From<&Expense> for Purchase {
    fn from(expense: &Expense) -> Self {
        Purchase {
            date: expense.date,
            store: expense.store.clone(),
            total: expense.total,
            payment_method: None,
            items: expense.items.iter().map(|i| i.name.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl Grouping {
    /// Bucket label for `date`: `2024-03-09`, `2024-W10`, `2024-03` or `2024`.
    pub fn key(self, date: NaiveDate) -> String {
        match self {
            Grouping::Day => date.format("%Y-%m-%d").to_string(),
            Grouping::Week => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Grouping::Month => Month::of(date).to_string(),
            Grouping::Year => date.year().to_string(),
        }
    }
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grouping::Day => "day",
            Grouping::Week => "week",
            Grouping::Month => "month",
            Grouping::Year => "year",
        };
        f.write_str(s)
    }
}

impl FromStr for Grouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" => Ok(Grouping::Day),
            "week" => Ok(Grouping::Week),
            "month" => Ok(Grouping::Month),
            "year" => Ok(Grouping::Year),
            other => Err(format!("Unknown grouping '{other}', expected day, week, month or year")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub store: String,
    pub visits: usize,
    pub total_spent: Money,
    /// Mean number of items per visit.
    pub average_basket: f64,
    /// Most frequently bought items with their counts, at most five.
    pub popular_items: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStats {
    pub method: String,
    pub uses: usize,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthChange {
    pub month: Month,
    pub total: Money,
    /// Percent change from the previous month; `None` for the first month
    /// and after a month with no spending.
    pub change_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendingReport {
    pub range: DateRange,
    pub grouping: Grouping,
    pub purchases: usize,
    pub total: Money,
    pub by_period: Vec<(String, Money)>,
    pub stores: Vec<StoreStats>,
    pub payment_methods: Vec<PaymentStats>,
    pub monthly_trend: Vec<MonthChange>,
    pub largest: Vec<Purchase>,
    pub busy_days: Vec<(Weekday, usize)>,
}

impl SpendingReport {
    pub fn build(purchases: &[Purchase], range: DateRange, grouping: Grouping) -> Self {
        let in_range = within(purchases, range);
        SpendingReport {
            range,
            grouping,
            purchases: in_range.len(),
            total: in_range.iter().map(|p| p.total).sum(),
            by_period: spending_by_period(purchases, range, grouping),
            stores: store_stats(purchases, range),
            payment_methods: payment_methods(purchases, range),
            monthly_trend: monthly_trend(purchases, range),
            largest: largest_purchases(purchases, range),
            busy_days: busy_days(purchases, range),
        }
    }
}

fn within(purchases: &[Purchase], range: DateRange) -> Vec<&Purchase> {
    purchases.iter().filter(|p| range.contains(p.date)).collect()
}

/// Total spent per bucket, in chronological order. Buckets without spending
/// are left out.
pub fn spending_by_period(purchases: &[Purchase], range: DateRange, grouping: Grouping) -> Vec<(String, Money)> {
    let mut buckets: BTreeMap<String, Money> = BTreeMap::new();
    for p in within(purchases, range) {
        *buckets.entry(grouping.key(p.date)).or_default() += p.total;
    }
    buckets.into_iter().collect()
}

/// Per-store visits and spending, biggest spend first.
pub fn store_stats(purchases: &[Purchase], range: DateRange) -> Vec<StoreStats> {
    struct Acc {
        visits: usize,
        total: Money,
        basket_items: usize,
        items: HashMap<String, usize>,
    }

    let mut by_store: HashMap<&str, Acc> = HashMap::new();
    for p in within(purchases, range) {
        let acc = by_store.entry(p.store.as_str()).or_insert_with(|| Acc {
            visits: 0,
            total: Money::zero(),
            basket_items: 0,
            items: HashMap::new(),
        });
        acc.visits += 1;
        acc.total += p.total;
        acc.basket_items += p.items.len();
        for item in &p.items {
            *acc.items.entry(item.clone()).or_default() += 1;
        }
    }

    let mut stats: Vec<StoreStats> = by_store
        .into_iter()
        .map(|(store, acc)| StoreStats {
            store: store.to_string(),
            visits: acc.visits,
            total_spent: acc.total,
            average_basket: acc.basket_items as f64 / acc.visits as f64,
            popular_items: top_counts(acc.items),
        })
        .collect();
    stats.sort_by(|a, b| b.total_spent.cmp(&a.total_spent).then_with(|| a.store.cmp(&b.store)));
    stats
}

fn top_counts(counts: HashMap<String, usize>) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts.truncate(TOP_N);
    counts
}

/// Uses and amount per payment method, biggest amount first. Purchases
/// without a known method are counted under `Unknown`.
pub fn payment_methods(purchases: &[Purchase], range: DateRange) -> Vec<PaymentStats> {
    let mut by_method: HashMap<&str, (usize, Money)> = HashMap::new();
    for p in within(purchases, range) {
        let method = p.payment_method.as_deref().unwrap_or(UNKNOWN_PAYMENT);
        let entry = by_method.entry(method).or_default();
        entry.0 += 1;
        entry.1 += p.total;
    }
    let mut stats: Vec<PaymentStats> = by_method
        .into_iter()
        .map(|(method, (uses, total))| PaymentStats { method: method.to_string(), uses, total })
        .collect();
    stats.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.method.cmp(&b.method)));
    stats
}

/// Spending for every month the range touches, with the change against the
/// month before.
pub fn monthly_trend(purchases: &[Purchase], range: DateRange) -> Vec<MonthChange> {
    let mut totals: BTreeMap<Month, Money> = BTreeMap::new();
    for p in within(purchases, range) {
        *totals.entry(Month::of(p.date)).or_default() += p.total;
    }

    let mut previous: Option<Money> = None;
    range
        .months()
        .into_iter()
        .map(|month| {
            let total = totals.get(&month).copied().unwrap_or_default();
            let change_pct = previous.and_then(|prev| percent_change(prev, total));
            previous = Some(total);
            MonthChange { month, total, change_pct }
        })
        .collect()
}

fn percent_change(previous: Money, current: Money) -> Option<f64> {
    if previous.is_zero() {
        return None;
    }
    (current - previous)
        .as_decimal()
        .checked_div(previous.as_decimal())?
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp(1)
        .to_f64()
}

/// The five biggest purchases, largest first; ties go to the earlier date.
pub fn largest_purchases(purchases: &[Purchase], range: DateRange) -> Vec<Purchase> {
    let mut all: Vec<Purchase> = within(purchases, range).into_iter().cloned().collect();
    all.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.date.cmp(&b.date)));
    all.truncate(TOP_N);
    all
}

/// Shopping trips per weekday, busiest first.
pub fn busy_days(purchases: &[Purchase], range: DateRange) -> Vec<(Weekday, usize)> {
    let mut counts = [0usize; 7];
    for p in within(purchases, range) {
        counts[p.date.weekday().num_days_from_monday() as usize] += 1;
    }
    let mut days: Vec<(Weekday, usize)> = WEEK
        .into_iter()
        .map(|day| (day, counts[day.num_days_from_monday() as usize]))
        .filter(|(_, n)| *n > 0)
        .collect();
    days.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| a.0.num_days_from_monday().cmp(&b.0.num_days_from_monday()))
    });
    days
}
