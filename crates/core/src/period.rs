use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A calendar month, the unit expenses are grouped and settled by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Month {
    year: i32,
    month: u32,
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = String;

    /// Parses `YYYY-MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("Invalid month '{s}', expected YYYY-MM"))?;
        let year: i32 = y.parse().map_err(|_| format!("Invalid year in '{s}'"))?;
        let month: u32 = m.parse().map_err(|_| format!("Invalid month in '{s}'"))?;
        Month::new(year, month).ok_or_else(|| format!("Month out of range in '{s}'"))
    }
}

impl Month {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Month { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Month { year: date.year(), month: date.month() }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn start_date(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Last day of the month (inclusive).
    pub fn end_date(self) -> Option<NaiveDate> {
        self.next().start_date().and_then(|d| d.pred_opt())
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Month { year: self.year + 1, month: 1 }
        } else {
            Month { year: self.year, month: self.month + 1 }
        }
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

/// Inclusive span of days a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    /// Swaps the bounds when given in the wrong order.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            DateRange { start, end }
        } else {
            DateRange { start: end, end: start }
        }
    }

    /// January 1st of `today`'s year through `today`.
    pub fn year_to_date(today: NaiveDate) -> Self {
        let start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today);
        DateRange::new(start, today)
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Every month touched by the range, in order.
    pub fn months(self) -> Vec<Month> {
        let last = Month::of(self.end);
        let mut month = Month::of(self.start);
        let mut months = vec![month];
        while month < last {
            month = month.next();
            months.push(month);
        }
        months
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn display_and_parse() {
        let m: Month = "2024-03".parse().unwrap();
        assert_eq!(m, Month::new(2024, 3).unwrap());
        assert_eq!(m.to_string(), "2024-03");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("2024".parse::<Month>().is_err());
        assert!("2024-13".parse::<Month>().is_err());
        assert!("abcd-01".parse::<Month>().is_err());
    }

    #[test]
    fn end_date_handles_february_and_december() {
        assert_eq!(Month::new(2024, 2).unwrap().end_date(), Some(date(2024, 2, 29)));
        assert_eq!(Month::new(2023, 12).unwrap().end_date(), Some(date(2023, 12, 31)));
    }

    #[test]
    fn contains_and_of() {
        let m = Month::of(date(2024, 5, 17));
        assert!(m.contains(date(2024, 5, 1)));
        assert!(m.contains(date(2024, 5, 31)));
        assert!(!m.contains(date(2024, 6, 1)));
        assert!(!m.contains(date(2023, 5, 17)));
    }

    #[test]
    fn date_range_bounds_and_months() {
        let range = DateRange::new(date(2024, 3, 15), date(2023, 11, 2));
        assert_eq!(range.start, date(2023, 11, 2));
        assert!(range.contains(date(2024, 3, 15)));
        assert!(!range.contains(date(2024, 3, 16)));
        let months: Vec<String> = range.months().iter().map(|m| m.to_string()).collect();
        assert_eq!(months, ["2023-11", "2023-12", "2024-01", "2024-02", "2024-03"]);
        assert_eq!(range.to_string(), "2023-11-02 to 2024-03-15");
    }

    #[test]
    fn year_to_date_starts_in_january() {
        let range = DateRange::year_to_date(date(2024, 8, 9));
        assert_eq!(range, DateRange::new(date(2024, 1, 1), date(2024, 8, 9)));
        assert_eq!(range.months().len(), 8);
    }
}
