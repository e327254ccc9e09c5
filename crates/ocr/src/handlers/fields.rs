//! Receipt-wide fields that do not depend on the vendor layout: purchase date
//! and payment method.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use crate::types::PaymentMethod;

re!(re_date_month_name,
    r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{1,2}),?\s+(\d{4})\b");
re!(re_date_abbr_month,
    r"(?i)\b(\d{1,2})[\s\-]+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)\.?[\s\-]+(\d{2,4})\b");
re!(re_date_iso,
    r"\b(\d{4})-(\d{2})-(\d{2})\b");
re!(re_date_slash,
    r"\b(\d{1,2})/(\d{1,2})/(\d{2,4})\b");
re!(re_date_dash,
    r"\b(\d{1,2})-(\d{1,2})-(\d{2,4})\b");

re!(re_card_payment,
    r"(?i)\b(visa|mastercard|master\s*card|amex|american\s+express|discover)\b");
re!(re_other_payment,
    r"(?i)\b(ebt|debit|cash)\b");

/// First date found, trying unambiguous formats before US `MM/DD/YY`.
pub fn extract_date(text: &str) -> Option<NaiveDate> {
    try_date_iso(text)
        .or_else(|| try_date_month_name(text))
        .or_else(|| try_date_abbr_month(text))
        .or_else(|| try_date_slash(text))
        .or_else(|| try_date_dash(text))
}

/// Card brands win over `CASH`/`DEBIT`, which also appear in footer text
/// such as "CHANGE DUE CASH".
pub fn extract_payment_method(text: &str) -> Option<PaymentMethod> {
    if let Some(c) = re_card_payment().captures(text) {
        let method = match c.get(1)?.as_str().to_lowercase().replace(' ', "").as_str() {
            "visa" => PaymentMethod::Visa,
            "mastercard" => PaymentMethod::Mastercard,
            "amex" | "americanexpress" => PaymentMethod::Amex,
            "discover" => PaymentMethod::Discover,
            other => PaymentMethod::Other(other.to_string()),
        };
        return Some(method);
    }
    let c = re_other_payment().captures(text)?;
    Some(match c.get(1)?.as_str().to_lowercase().as_str() {
        "ebt" => PaymentMethod::Ebt,
        "debit" => PaymentMethod::Debit,
        _ => PaymentMethod::Cash,
    })
}

fn try_date_month_name(text: &str) -> Option<NaiveDate> {
    let c = re_date_month_name().captures(text)?;
    let month = month_number(&c.get(1)?.as_str()[..3])?;
    let day: u32 = c.get(2)?.as_str().parse().ok()?;
    let year: i32 = c.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn try_date_abbr_month(text: &str) -> Option<NaiveDate> {
    let c = re_date_abbr_month().captures(text)?;
    let day: u32 = c.get(1)?.as_str().parse().ok()?;
    let month = month_number(c.get(2)?.as_str())?;
    let year = expand_year(c.get(3)?.as_str().parse().ok()?);
    NaiveDate::from_ymd_opt(year, month, day)
}

fn try_date_iso(text: &str) -> Option<NaiveDate> {
    re_date_iso().captures_iter(text).find_map(|c| {
        let y: i32 = c.get(1)?.as_str().parse().ok()?;
        let m: u32 = c.get(2)?.as_str().parse().ok()?;
        let d: u32 = c.get(3)?.as_str().parse().ok()?;
        NaiveDate::from_ymd_opt(y, m, d)
    })
}

// Receipts here are US: month first.
fn try_date_slash(text: &str) -> Option<NaiveDate> {
    re_date_slash().captures_iter(text).find_map(|c| {
        let m: u32 = c.get(1)?.as_str().parse().ok()?;
        let d: u32 = c.get(2)?.as_str().parse().ok()?;
        let y = expand_year(c.get(3)?.as_str().parse().ok()?);
        NaiveDate::from_ymd_opt(y, m, d)
    })
}

fn try_date_dash(text: &str) -> Option<NaiveDate> {
    re_date_dash().captures_iter(text).find_map(|c| {
        let m: u32 = c.get(1)?.as_str().parse().ok()?;
        let d: u32 = c.get(2)?.as_str().parse().ok()?;
        let y = expand_year(c.get(3)?.as_str().parse().ok()?);
        NaiveDate::from_ymd_opt(y, m, d)
    })
}

fn expand_year(y: i32) -> i32 {
    if y < 100 { 2000 + y } else { y }
}

fn month_number(abbr: &str) -> Option<u32> {
    match abbr.to_lowercase().as_str() {
        "jan" => Some(1), "feb" => Some(2), "mar" => Some(3), "apr" => Some(4),
        "may" => Some(5), "jun" => Some(6), "jul" => Some(7), "aug" => Some(8),
        "sep" => Some(9), "oct" => Some(10), "nov" => Some(11), "dec" => Some(12),
        _ => None,
    }
}
