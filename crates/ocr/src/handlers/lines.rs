//! Line-level tooling shared by every handler: noise-tolerant amount parsing,
//! keyword classification and description cleanup.

use halves_core::Money;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;

re!(re_trailing_amount,
    r"^(?P<head>.*?)(?:^|\s+|\$)\s*(?P<neg1>-)?\$?\s*(?P<amt>[0-9OolI][0-9OolI,]*[.,][0-9OolI]{2})\s*(?P<neg2>-)?\s*(?P<flag>TX|[NTFAXSEB]{1,2})?\s*(?P<neg3>-)?$");
re!(re_trailing_cents,
    r"^(?P<head>.*?)\s+\$?\s*(?P<amt>\d{3,6})\s*(?P<flag>TX|[NTFAXSEB]{1,2})?$");
re!(re_any_amount,
    r"\d+[.,]\d{2}\b");

re!(re_qty_prefix,
    r"(?i)^(?P<qty>\d{1,3})\s*(?:@|x|at)\s*\$?\s*(?P<unit>\d+[.,]\d{2})\s+(?P<rest>\S.*)$");
re!(re_weight_prefix,
    r"(?i)^(?P<qty>\d+(?:\.\d+)?)\s*(?:lb|lbs|kg)\s*@\s*\$?\s*(?P<unit>\d+[.,]\d{2})\s*/\s*(?:lb|kg)\s+(?P<rest>\S.*)$");
re!(re_qty_name,
    r"^(?P<qty>\d{1,3})\s*@\s*(?P<rest>[^\d\s$].*)$");
re!(re_qty_suffix,
    r"(?i)^(?P<rest>.*?\S)\s+(?P<qty>\d{1,3})\s*(?:@|x)\s*(?:\$?\s*(?P<unit>\d+[.,]\d{2}))?$");
re!(re_leading_code,
    r"^(?:[A-Z]\s+)?(?P<code>\d{4,13})\s+(?P<rest>\S.*)$");
re!(re_qty_line,
    r"(?i)^(?P<qty>\d{1,3})\s*(?:@|x|at)\s*(?:1\s*for\s*)?\$?\s*(?P<unit>\d+[.,]\d{2})(?:\s*(?:ea|/ea))?(?:\s+\$?\s*(?P<total>\d+[.,]\d{2}))?\s*[A-Z]?$");
re!(re_weight_line,
    r"(?i)^(?P<qty>\d+(?:\.\d+)?)\s*(?:lb|lbs|kg)\s*@\s*\$?\s*(?P<unit>\d+[.,]\d{2})\s*/\s*(?:lb|kg)(?:\s+\$?\s*(?P<total>\d+[.,]\d{2}))?\s*[A-Z]?$");

re!(re_kind_count,
    r"(?i)\b(?:items?\s+sold|number\s+of\s+items|item\s+count|#\s*of\s+items|total\s+items)\b");
re!(re_kind_savings,
    r"(?i)\b(?:you\s+saved|savings?|discount|coupon|cpn)\b");
re!(re_kind_change,
    r"(?i)\bchange\b");
re!(re_kind_subtotal,
    r"(?i)\b(?:sub\s*-?\s*t[o0]ta[l1]|subtl)\b");
re!(re_kind_tax,
    r"(?i)\b(?:tax|vat|gst|hst|pst)\b");
re!(re_kind_total,
    r"(?i)\b(?:t[o0]ta[l1]|totl|amount\s+due|balance\s+due|bal\s+due)\b");
re!(re_kind_tender,
    r"(?i)\b(?:visa|master\s*card|amex|discover|debit|credit|cash|ebt|tend|tender|payment|paid|approved|auth)\b");

re!(re_skip_keyword,
    r"(?i)\b(?:total|subtotal|tax|sum|amount|balance|credit|debit|change|cash|payment|paid|discount|due|account|customer|store|receipt|invoice|date|welcome|thank\s+you|thanks|phone|tel|fax|address|website|url|http|www|email|e-mail)\b");
re!(re_header_word,
    r"(?i)^(?:item|qty|description|price|amount)$");
re!(re_junk_chars,
    r"[|_~=*#{}\[\]<>]+");

/// What a receipt line is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Subtotal,
    Tax,
    Total,
    Tender,
    Change,
    Savings,
    Count,
    Other,
}

impl LineKind {
    pub fn is_summary(self) -> bool {
        !matches!(self, LineKind::Other)
    }
}

pub fn classify_line(line: &str) -> LineKind {
    if re_kind_count().is_match(line) {
        LineKind::Count
    } else if re_kind_savings().is_match(line) {
        LineKind::Savings
    } else if re_kind_change().is_match(line) {
        LineKind::Change
    } else if re_kind_subtotal().is_match(line) {
        LineKind::Subtotal
    } else if re_kind_tax().is_match(line) {
        LineKind::Tax
    } else if re_kind_total().is_match(line) {
        LineKind::Total
    } else if re_kind_tender().is_match(line) {
        LineKind::Tender
    } else {
        LineKind::Other
    }
}

/// Trimmed, non-empty lines.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// OCR commonly confuses letters and digits inside numbers.
fn normalize_digits(token: &str) -> String {
    token
        .chars()
        .map(|c| match c {
            'O' | 'o' => '0',
            'l' | 'I' | '|' => '1',
            other => other,
        })
        .collect()
}

/// No grocery receipt prints a line of a billion dollars or more.
const MAX_INTEGER_DIGITS: usize = 9;

/// Parses `12.99`, `$ 12.99`, `12,99`, `1,234.56` and `12.9O`. A decimal
/// separator followed by exactly two digits is required.
pub fn parse_amount(token: &str) -> Option<Money> {
    let cleaned: String = normalize_digits(token)
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), _) if cleaned.len() - dot == 3 => cleaned.replace(',', ""),
        (None, Some(comma)) if cleaned.len() - comma == 3 => {
            let (int, frac) = cleaned.split_at(comma);
            format!("{}.{}", int.replace(',', ""), &frac[1..])
        }
        _ => return None,
    };
    if normalized.starts_with('.') {
        return None;
    }
    let integer_digits = normalized.find('.').unwrap_or(normalized.len());
    if integer_digits > MAX_INTEGER_DIGITS {
        return None;
    }
    Decimal::from_str(&normalized).ok().map(Money::from_decimal)
}

/// Like [`parse_amount`] but also reads a bare `1299` as $12.99, which is how
/// OCR renders a price whose decimal point got lost.
pub fn parse_amount_assume_cents(token: &str) -> Option<Money> {
    parse_amount(token).or_else(|| {
        let digits = token.trim().trim_start_matches('$').trim();
        if (3..=6).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
            digits.parse::<i64>().ok().map(Money::from_cents)
        } else {
            None
        }
    })
}

/// A line split into its text and the amount printed at its end.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub head: String,
    pub amount: Money,
    pub negative: bool,
    pub flag: Option<String>,
}

impl PricedLine {
    pub fn signed_amount(&self) -> Money {
        if self.negative {
            -self.amount
        } else {
            self.amount
        }
    }
}

pub fn trailing_amount(line: &str) -> Option<PricedLine> {
    let c = re_trailing_amount().captures(line.trim())?;
    let amount = parse_amount(c.name("amt")?.as_str())?;
    let negative = c.name("neg1").is_some() || c.name("neg2").is_some() || c.name("neg3").is_some();
    Some(PricedLine {
        head: c.name("head").map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
        amount,
        negative,
        flag: c.name("flag").map(|m| m.as_str().to_string()),
    })
}

/// [`trailing_amount`], falling back to a bare cents number. Only used on
/// lines already known to be totals, where a number is certainly money.
pub fn trailing_amount_lenient(line: &str) -> Option<PricedLine> {
    trailing_amount(line).or_else(|| {
        let c = re_trailing_cents().captures(line.trim())?;
        Some(PricedLine {
            head: c.name("head")?.as_str().trim().to_string(),
            amount: parse_amount_assume_cents(c.name("amt")?.as_str())?,
            negative: false,
            flag: c.name("flag").map(|m| m.as_str().to_string()),
        })
    })
}

pub fn has_amount(line: &str) -> bool {
    re_any_amount().is_match(line)
}

/// Whether a line is likely part of the purchased-items list rather than
/// header/footer chatter.
pub fn is_skip_line(line: &str) -> bool {
    re_skip_keyword().is_match(line)
}

pub fn is_column_header(description: &str) -> bool {
    re_header_word().is_match(description.trim())
}

/// Collapse whitespace and strip OCR artifacts around an item name.
pub fn clean_description(raw: &str) -> String {
    let replaced = re_junk_chars().replace_all(raw, " ");
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| matches!(c, '-' | '.' | ':' | ',' | '/' | '\\' | '\'' | '"'))
        .trim()
        .to_string()
}

/// Name must carry at least two letters to count as an item.
pub fn plausible_description(description: &str) -> bool {
    description.chars().filter(|c| c.is_alphabetic()).count() >= 2
}

/// Fraction of visible characters that are letters, digits or common
/// receipt punctuation. Lines scoring at least 0.6 count as clean.
pub fn is_clean_line(line: &str) -> bool {
    let visible: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    if visible.is_empty() {
        return false;
    }
    let good = visible
        .iter()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | ',' | '$' | '@' | '/' | '-' | '\'' | '%' | ':' | '&' | '#'))
        .count();
    good as f32 / visible.len() as f32 >= 0.6
}

/// Quantity found in front of an item name or on a line of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantitySpec {
    pub quantity: Decimal,
    pub unit_price: Option<Money>,
    /// Extended price printed on a quantity line, if any.
    pub total: Option<Money>,
    /// Remaining text (the item name) for prefixed forms.
    pub rest: String,
    pub by_weight: bool,
}

/// `2 @ $3.99 AVOCADOS`, `0.50 lb @ $5.99/lb APPLES` or `2 @ SODA`.
pub fn quantity_prefix(head: &str) -> Option<QuantitySpec> {
    if let Some(c) = re_weight_prefix().captures(head) {
        return Some(QuantitySpec {
            quantity: Decimal::from_str(c.name("qty")?.as_str()).ok()?,
            unit_price: parse_amount(c.name("unit")?.as_str()),
            total: None,
            rest: c.name("rest")?.as_str().to_string(),
            by_weight: true,
        });
    }
    if let Some(c) = re_qty_prefix().captures(head) {
        return Some(QuantitySpec {
            quantity: Decimal::from_str(c.name("qty")?.as_str()).ok()?,
            unit_price: parse_amount(c.name("unit")?.as_str()),
            total: None,
            rest: c.name("rest")?.as_str().to_string(),
            by_weight: false,
        });
    }
    let c = re_qty_name().captures(head)?;
    Some(QuantitySpec {
        quantity: Decimal::from_str(c.name("qty")?.as_str()).ok()?,
        unit_price: None,
        total: None,
        rest: c.name("rest")?.as_str().to_string(),
        by_weight: false,
    })
}

/// `MANGO 3 @ 1.25` or `SODA 2 x` (quantity after the name).
pub fn quantity_suffix(head: &str) -> Option<QuantitySpec> {
    let c = re_qty_suffix().captures(head)?;
    Some(QuantitySpec {
        quantity: Decimal::from_str(c.name("qty")?.as_str()).ok()?,
        unit_price: c.name("unit").and_then(|m| parse_amount(m.as_str())),
        total: None,
        rest: c.name("rest")?.as_str().to_string(),
        by_weight: false,
    })
}

/// Splits a leading item number / UPC (`E 1234567 KS WATER`) from the name.
pub fn split_item_code(head: &str) -> (Option<String>, String) {
    match re_leading_code().captures(head.trim()) {
        Some(c) => (
            c.name("code").map(|m| m.as_str().to_string()),
            c.name("rest").map(|m| m.as_str().to_string()).unwrap_or_default(),
        ),
        None => (None, head.trim().to_string()),
    }
}

/// A line holding only a quantity, such as `2 @ 4.99`, `3 x 1.25 3.75` or
/// `0.75 lb @ 1.28/lb 0.96`; it amends the item above it.
pub fn quantity_line(line: &str) -> Option<QuantitySpec> {
    let line = line.trim();
    let (c, by_weight) = match re_weight_line().captures(line) {
        Some(c) => (c, true),
        None => (re_qty_line().captures(line)?, false),
    };
    let quantity = Decimal::from_str(c.name("qty")?.as_str()).ok()?;
    if quantity <= Decimal::ZERO {
        return None;
    }
    Some(QuantitySpec {
        quantity,
        unit_price: parse_amount(c.name("unit")?.as_str()),
        total: c.name("total").and_then(|m| parse_amount(m.as_str())),
        rest: String::new(),
        by_weight,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(cents: i64) -> Money {
        Money::from_cents(cents)
    }

    #[test]
    fn amount_parsing_tolerates_noise() {
        assert_eq!(parse_amount("12.99"), Some(m(1299)));
        assert_eq!(parse_amount("$ 12.99"), Some(m(1299)));
        assert_eq!(parse_amount("12,99"), Some(m(1299)));
        assert_eq!(parse_amount("1,234.56"), Some(m(123456)));
        assert_eq!(parse_amount("1O.5O"), Some(m(1050)));
        assert_eq!(parse_amount("l2.00"), Some(m(1200)));
        assert_eq!(parse_amount("1299"), None);
        assert_eq!(parse_amount("12.9"), None);
        assert_eq!(parse_amount("123,456,789.00"), Some(m(12_345_678_900)));
        assert_eq!(parse_amount("1,234,567,890.00"), None);
        assert_eq!(parse_amount("50000000000000000000000000000.00"), None);
    }

    #[test]
    fn bare_cents_only_when_asked() {
        assert_eq!(parse_amount_assume_cents("2431"), Some(m(2431)));
        assert_eq!(parse_amount_assume_cents("5"), None);
        assert_eq!(parse_amount_assume_cents("3.50"), Some(m(350)));
    }

    #[test]
    fn trailing_amount_with_flags_and_signs() {
        let p = trailing_amount("KS WATER 4.99 N").unwrap();
        assert_eq!(p.head, "KS WATER");
        assert_eq!(p.amount, m(499));
        assert_eq!(p.flag.as_deref(), Some("N"));

        let p = trailing_amount("/1234567 2.00-").unwrap();
        assert!(p.negative);
        assert_eq!(p.signed_amount(), m(-200));

        let p = trailing_amount("BANANAS $ 0.96").unwrap();
        assert_eq!(p.head, "BANANAS");
        assert_eq!(p.amount, m(96));

        assert!(trailing_amount("NO PRICE HERE").is_none());
        assert!(trailing_amount("PACK OF 24").is_none());
    }

    #[test]
    fn lenient_reads_lost_decimal_point() {
        let p = trailing_amount_lenient("TOTAL 2431").unwrap();
        assert_eq!(p.amount, m(2431));
        assert!(trailing_amount_lenient("TOTAL ITEMS 5").is_none());
    }

    #[test]
    fn line_kinds() {
        assert_eq!(classify_line("SUBTOTAL 22.44"), LineKind::Subtotal);
        assert_eq!(classify_line("SUB TOTAL 22.44"), LineKind::Subtotal);
        assert_eq!(classify_line("TAX 1.87"), LineKind::Tax);
        assert_eq!(classify_line("**** TOTAL 24.31"), LineKind::Total);
        assert_eq!(classify_line("T0TAL 24.31"), LineKind::Total);
        assert_eq!(classify_line("BALANCE DUE 24.31"), LineKind::Total);
        assert_eq!(classify_line("CHANGE DUE 0.00"), LineKind::Change);
        assert_eq!(classify_line("TOTAL SAVINGS 3.00"), LineKind::Savings);
        assert_eq!(classify_line("TOTAL NUMBER OF ITEMS SOLD = 5"), LineKind::Count);
        assert_eq!(classify_line("VISA TEND 24.31"), LineKind::Tender);
        assert_eq!(classify_line("BANANAS 0.96"), LineKind::Other);
    }

    #[test]
    fn descriptions_are_cleaned() {
        assert_eq!(clean_description("  ORGANIC   BANANAS | "), "ORGANIC BANANAS");
        assert_eq!(clean_description("**GREEK YOGURT**"), "GREEK YOGURT");
        assert!(plausible_description("MILK"));
        assert!(!plausible_description("12 A"));
    }

    #[test]
    fn quantity_forms() {
        let q = quantity_prefix("2 @ $3.99 AVOCADOS").unwrap();
        assert_eq!(q.quantity, Decimal::from(2));
        assert_eq!(q.unit_price, Some(m(399)));
        assert_eq!(q.rest, "AVOCADOS");

        let q = quantity_prefix("0.50 lb @ $5.99/lb APPLES").unwrap();
        assert!(q.by_weight);
        assert_eq!(q.quantity, Decimal::new(50, 2));
        assert_eq!(q.rest, "APPLES");

        let q = quantity_prefix("3 @ SODA").unwrap();
        assert_eq!(q.unit_price, None);
        assert_eq!(q.rest, "SODA");

        assert!(quantity_prefix("ORGANIC BANANAS").is_none());
    }

    #[test]
    fn standalone_quantity_lines() {
        let q = quantity_line("2 @ 4.99").unwrap();
        assert_eq!(q.quantity, Decimal::from(2));
        assert_eq!(q.total, None);

        let q = quantity_line("3 x 1.25 3.75").unwrap();
        assert_eq!(q.total, Some(m(375)));

        let q = quantity_line("0.75 lb @ 1.28/lb 0.96").unwrap();
        assert!(q.by_weight);
        assert_eq!(q.total, Some(m(96)));

        assert!(quantity_line("MILK 3.49").is_none());
    }

    #[test]
    fn suffix_quantity_and_item_codes() {
        let q = quantity_suffix("MANGO 3 @ 1.25").unwrap();
        assert_eq!(q.quantity, Decimal::from(3));
        assert_eq!(q.unit_price, Some(m(125)));
        assert_eq!(q.rest, "MANGO");
        assert!(quantity_suffix("MANGO").is_none());

        assert_eq!(
            split_item_code("E 1234567 KS WATER"),
            (Some("1234567".to_string()), "KS WATER".to_string())
        );
        assert_eq!(split_item_code("KS WATER"), (None, "KS WATER".to_string()));
    }

    #[test]
    fn clean_line_detection() {
        assert!(is_clean_line("ORGANIC BANANAS 2.99"));
        assert!(!is_clean_line("~~}{%^^&&**"));
        assert!(!is_clean_line("   "));
    }
}
