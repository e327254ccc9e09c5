pub mod analytics;
pub mod balance;
pub mod config;
pub mod expense;
pub mod money;
pub mod period;

pub use analytics::{Grouping, Purchase, SpendingReport};
pub use balance::{BalanceSheet, BalanceSummary};
pub use config::{AppConfig, ConfigError};
pub use expense::{Expense, ExpenseItem, Participant, Participants};
pub use money::Money;
pub use period::{DateRange, Month};
