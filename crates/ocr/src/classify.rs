//! Store identification from OCR text.
//!
//! Three passes, first confident answer wins: alias matching, layout rules
//! for stores with a recognisable receipt shape, then header heuristics.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::handlers::lines::{clean_description, has_amount, is_skip_line, split_lines};
use crate::types::{MatchReason, StoreKey, StoreMatch};

/// Confidence reported when nothing identifies the store.
pub const UNKNOWN_CONFIDENCE: f32 = 0.1;

/// Lines treated as the receipt header.
pub const HEADER_LINES: usize = 8;
const HEADER_SCAN: usize = 5;

const EXACT_CONFIDENCE: f32 = 0.95;
const EXACT_HEADER_CONFIDENCE: f32 = 0.97;
const ALIAS_ACCEPT: f32 = 0.8;
const LAYOUT_ACCEPT: f32 = 0.7;
const FUZZY_SIMILARITY: f32 = 0.8;

re!(re_costco_wholesale, r"(?i)={2,}\s*wholesale");
re!(re_costco_member, r"(?i)\b(?:member|membership)\s*(?:number|#|no\.?)?\s*\d{6,}");
re!(re_tj_store, r"(?i)\b(?:store|tr)\s*#\s*\d{3}");
re!(re_tj_name, r"(?i)\b(?:trader|joe)");
re!(re_hangul, r"[\x{AC00}-\x{D7A3}]");
re!(re_mart, r"(?i)mart\b|마트");
re!(re_queens, r"(?i)\b(?:queens|sunnyside|astoria|flushing|long\s+island\s+city)\b");
re!(re_key_word, r"(?i)\bkey\b");
re!(re_key_food_branch, r"(?i)\b46-02\s+queens");
re!(re_walmart_slogan, r"(?i)save\s+money\.?\s+live\s+better");
re!(re_walmart_format, r"(?i)wal-?\s?mart.*(?:supercenter|neighborhood\s+market)|(?:supercenter|neighborhood\s+market).*wal-?\s?mart");
re!(re_target_slogan, r"(?i)expect\s+more\.?\s+pay\s+less|target\.com");
re!(re_store_name_line, r"^[A-Za-z\x{AC00}-\x{D7A3}][A-Za-z\x{AC00}-\x{D7A3}&'. -]{2,29}$");

/// One canonical store and the spellings that identify it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub key: StoreKey,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Alias -> store mapping. Read-only at runtime except through
/// [`AliasTable::add_alias`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasTable {
    #[serde(default)]
    stores: Vec<AliasEntry>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AliasTable {
    pub fn empty() -> Self {
        AliasTable { stores: Vec::new() }
    }

    pub fn builtin() -> Self {
        let defaults: &[(&str, &str, &[&str])] = &[
            ("costco", "Costco", &["COSTCO", "COSTCO WHOLESALE", "WHOLESALE"]),
            ("trader_joes", "Trader Joe's", &["TRADER JOE'S", "TRADER JOES", "TJ"]),
            ("h_mart", "H Mart", &["H MART", "H-MART", "HMART"]),
            ("key_food", "Key Food", &["KEY FOOD", "KEYFOOD"]),
            ("walmart", "Walmart", &["WALMART", "WAL-MART", "WAL MART"]),
            ("target", "Target", &["TARGET", "SUPER TARGET"]),
            ("kroger", "Kroger", &["KROGER"]),
            ("safeway", "Safeway", &["SAFEWAY"]),
            ("publix", "Publix", &["PUBLIX"]),
            ("whole_foods", "Whole Foods", &["WHOLE FOODS", "WHOLE FOODS MARKET", "WFM"]),
            ("aldi", "Aldi", &["ALDI"]),
        ];
        AliasTable {
            stores: defaults
                .iter()
                .map(|(key, name, aliases)| AliasEntry {
                    key: StoreKey::new(key),
                    name: name.to_string(),
                    aliases: aliases.iter().map(|a| a.to_string()).collect(),
                })
                .collect(),
        }
    }

    /// Parses `[[stores]]` tables with `key`, `name` and `aliases`.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let mut table: AliasTable = toml::from_str(content)?;
        for entry in &mut table.stores {
            entry.key = StoreKey::new(entry.key.as_str());
        }
        Ok(table)
    }

    /// Adds `alias` for `store`, creating the store if it is new. Aliases
    /// are compared case-insensitively; duplicates are ignored.
    pub fn add_alias(&mut self, store: &str, alias: &str) {
        self.add_named_alias(StoreKey::new(store), store.trim(), alias);
    }

    /// Same as [`add_alias`](Self::add_alias), with the display name used
    /// when `key` is new.
    pub fn add_named_alias(&mut self, key: StoreKey, name: &str, alias: &str) {
        let alias = alias.trim().to_uppercase();
        if alias.is_empty() {
            return;
        }
        match self.stores.iter_mut().find(|e| e.key == key) {
            Some(entry) => {
                if !entry.aliases.iter().any(|a| a.eq_ignore_ascii_case(&alias)) {
                    entry.aliases.push(alias);
                }
            }
            None => self.stores.push(AliasEntry {
                key,
                name: name.to_string(),
                aliases: vec![alias],
            }),
        }
    }

    pub fn entries(&self) -> &[AliasEntry] {
        &self.stores
    }

    /// `(alias, key)` pairs, for persisting the table.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &StoreKey)> {
        self.stores
            .iter()
            .flat_map(|e| e.aliases.iter().map(move |a| (a.as_str(), &e.key)))
    }

    pub fn lookup(&self, alias: &str) -> Option<&StoreKey> {
        self.pairs()
            .find(|(a, _)| a.eq_ignore_ascii_case(alias.trim()))
            .map(|(_, k)| k)
    }

    pub fn display_name(&self, key: &StoreKey) -> String {
        self.stores
            .iter()
            .find(|e| &e.key == key)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| key.to_string())
    }
}

struct CompiledAlias {
    entry: usize,
    upper: String,
    word: Regex,
}

pub struct StoreClassifier {
    table: AliasTable,
    compiled: Vec<CompiledAlias>,
}

impl Default for StoreClassifier {
    fn default() -> Self {
        Self::new(AliasTable::builtin())
    }
}

impl StoreClassifier {
    pub fn new(table: AliasTable) -> Self {
        let compiled = table
            .stores
            .iter()
            .enumerate()
            .flat_map(|(entry, e)| {
                e.aliases.iter().filter_map(move |alias| {
                    let pattern = format!(r"(?i)\b{}\b", regex::escape(alias));
                    Regex::new(&pattern).ok().map(|word| CompiledAlias {
                        entry,
                        upper: alias.to_uppercase(),
                        word,
                    })
                })
            })
            .collect();
        StoreClassifier { table, compiled }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.table
    }

    pub fn classify_with_override(&self, text: &str, store_override: Option<&StoreKey>) -> StoreMatch {
        match store_override {
            Some(key) => {
                StoreMatch::new(&self.table.display_name(key), Some(key.clone()), 1.0, MatchReason::Override)
            }
            None => self.classify(text),
        }
    }

    pub fn classify(&self, text: &str) -> StoreMatch {
        let lines = split_lines(text);
        if lines.is_empty() {
            return StoreMatch::unknown();
        }
        let header = lines[..lines.len().min(HEADER_LINES)].join("\n");
        let mut fallbacks: Vec<StoreMatch> = Vec::new();

        // (a) aliases
        if let Some(found) = self.exact_alias(text, &header) {
            debug!("store by exact alias: {} ({:.2})", found.name, found.confidence);
            return found;
        }
        if let Some(found) = self.substring_alias(text) {
            if found.confidence > ALIAS_ACCEPT {
                debug!("store by alias substring: {}", found.name);
                return found;
            }
            fallbacks.push(found);
        }

        // (c) layout rules
        if let Some(found) = self.layout_rule(text) {
            if found.confidence > LAYOUT_ACCEPT {
                debug!("store by layout: {}", found.name);
                return found;
            }
            fallbacks.push(found);
        }

        // (b) header heuristics
        fallbacks.extend(self.header_match(&lines));

        fallbacks
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .unwrap_or_else(StoreMatch::unknown)
    }

    fn matched(&self, entry: usize, confidence: f32, reason: MatchReason) -> StoreMatch {
        let e = &self.table.stores[entry];
        StoreMatch::new(&e.name, Some(e.key.clone()), confidence, reason)
    }

    fn exact_alias(&self, text: &str, header: &str) -> Option<StoreMatch> {
        self.compiled
            .iter()
            .filter(|c| c.word.is_match(text))
            .map(|c| {
                let confidence = if c.word.is_match(header) {
                    EXACT_HEADER_CONFIDENCE
                } else {
                    EXACT_CONFIDENCE
                };
                (confidence, c.upper.len(), c.entry)
            })
            .max_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(confidence, _, entry)| self.matched(entry, confidence, MatchReason::ExactAlias))
    }

    fn substring_alias(&self, text: &str) -> Option<StoreMatch> {
        let upper = text.to_uppercase();
        self.compiled
            .iter()
            .filter(|c| upper.contains(&c.upper))
            .map(|c| (0.7 + (c.upper.len() as f32 / 50.0).min(0.2), c.entry))
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(confidence, entry)| self.matched(entry, confidence, MatchReason::SubstringAlias))
    }

    fn keyed(&self, key: &str, confidence: f32, reason: MatchReason) -> StoreMatch {
        let key = StoreKey::new(key);
        StoreMatch::new(&self.table.display_name(&key), Some(key), confidence, reason)
    }

    fn layout_rule(&self, text: &str) -> Option<StoreMatch> {
        let rules: [(&str, f32, bool); 8] = [
            ("costco", 0.9, re_costco_wholesale().is_match(text)),
            ("costco", 0.85, re_costco_member().is_match(text)),
            ("trader_joes", 0.9, re_tj_store().is_match(text) && re_tj_name().is_match(text)),
            ("h_mart", 0.9, re_hangul().is_match(text) && re_mart().is_match(text)),
            ("key_food", 0.9, re_queens().is_match(text) && re_key_word().is_match(text)),
            ("key_food", 0.85, re_key_food_branch().is_match(text)),
            ("walmart", 0.9, re_walmart_slogan().is_match(text) || re_walmart_format().is_match(text)),
            ("target", 0.9, re_target_slogan().is_match(text)),
        ];
        rules
            .iter()
            .filter(|(_, _, hit)| *hit)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(key, confidence, _)| self.keyed(key, *confidence, MatchReason::LayoutPattern))
    }

    fn header_match(&self, lines: &[&str]) -> Option<StoreMatch> {
        let scan = &lines[..lines.len().min(HEADER_SCAN)];

        for (i, line) in scan.iter().enumerate() {
            let factor = 1.0 - 0.1 * i as f32;
            let upper = line.to_uppercase();
            if let Some(c) = self.compiled.iter().find(|c| upper.contains(&c.upper)) {
                return Some(self.matched(c.entry, 0.75 * factor, MatchReason::HeaderAlias));
            }
        }

        for (i, line) in scan.iter().enumerate() {
            let factor = 1.0 - 0.1 * i as f32;
            let normalized = normalize_header(line);
            if normalized.chars().count() < 4 {
                continue;
            }
            let best = self
                .compiled
                .iter()
                .filter(|c| c.upper.chars().count() >= 4)
                .map(|c| (similarity(&normalized, &normalize_header(&c.upper)), c.entry))
                .max_by(|a, b| a.0.total_cmp(&b.0));
            if let Some((sim, entry)) = best.filter(|(sim, _)| *sim >= FUZZY_SIMILARITY) {
                debug!("fuzzy header match {line:?} ({sim:.2})");
                return Some(self.matched(entry, 0.65 * sim * factor, MatchReason::FuzzyHeader));
            }
        }

        for (i, line) in scan.iter().enumerate() {
            let name = clean_description(line);
            if re_store_name_line().is_match(&name) && !is_skip_line(&name) && !has_amount(line) {
                return Some(StoreMatch::new(&name, None, 0.5 * (1.0 - 0.1 * i as f32), MatchReason::HeaderLine));
            }
        }

        let first = clean_description(lines[0]);
        let len = first.chars().count();
        if (3..=30).contains(&len) && first.chars().any(char::is_alphabetic) {
            return Some(StoreMatch::new(&first, None, 0.4, MatchReason::HeaderLine));
        }
        None
    }
}

fn normalize_header(s: &str) -> String {
    s.to_uppercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Levenshtein edit distance over chars, two-row variant.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let (a, b) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let (m, n) = (a.len(), b.len());
    if m == 0 {
        return n;
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];
    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

/// `1 - distance / longer length`, in [0, 1].
pub fn similarity(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f32 / longest as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> StoreMatch {
        StoreClassifier::default().classify(text)
    }

    #[test]
    fn exact_alias_in_header() {
        let m = classify("TRADER JOE'S\n142 E 14TH ST\nBANANAS 0.99");
        assert_eq!(m.name, "Trader Joe's");
        assert_eq!(m.key, Some(StoreKey::new("trader_joes")));
        assert_eq!(m.reason, MatchReason::ExactAlias);
        assert!((m.confidence - 0.97).abs() < 1e-6);
    }

    #[test]
    fn exact_alias_below_header() {
        let text = "a\nb\nc\nd\ne\nf\ng\nh\ni\nthanks for shopping at costco";
        let m = classify(text);
        assert_eq!(m.key, Some(StoreKey::new("costco")));
        assert!((m.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn longer_alias_wins_ties() {
        let m = classify("COSTCO WHOLESALE\nWHOLESALE");
        assert_eq!(m.key, Some(StoreKey::new("costco")));
        let m = classify("SUPER TARGET\nMILK 1.00");
        assert_eq!(m.key, Some(StoreKey::new("target")));
    }

    #[test]
    fn glued_alias_matches_as_substring() {
        let m = classify("WELCOMETOCOSTCOWHOLESALE\nMILK 3.00");
        assert_eq!(m.reason, MatchReason::SubstringAlias);
        assert_eq!(m.key, Some(StoreKey::new("costco")));
        assert!(m.confidence > 0.8);
    }

    #[test]
    fn layout_rules() {
        let m = classify("#### 9\n=== WHOLESALE\nMILK 3.00");
        assert_eq!(m.key, Some(StoreKey::new("costco")));

        let m = classify("김치 마트\nKIMCHI 5.99");
        assert_eq!(m.key, Some(StoreKey::new("h_mart")));
        assert_eq!(m.reason, MatchReason::LayoutPattern);

        let m = classify("Save money. Live better.\nSOAP 1.00");
        assert_eq!(m.key, Some(StoreKey::new("walmart")));

        let m = classify("46-02 QUEENS BLVD\nMILK 3.99");
        assert_eq!(m.key, Some(StoreKey::new("key_food")));
        assert!((m.confidence - 0.85).abs() < 1e-6);
    }

    #[test]
    fn ocr_noise_in_header_is_fuzzy_matched() {
        let m = classify("TRADER J0ES\nBANANAS 0.99");
        assert_eq!(m.key, Some(StoreKey::new("trader_joes")));
        assert_eq!(m.reason, MatchReason::FuzzyHeader);
        assert!(m.confidence < 0.7);
    }

    #[test]
    fn unknown_header_becomes_store_name_without_key() {
        let m = classify("CORNER MARKET\n123 MAIN ST\nCOFFEE 12.99");
        assert_eq!(m.name, "CORNER MARKET");
        assert_eq!(m.key, None);
        assert_eq!(m.reason, MatchReason::HeaderLine);
        assert!((m.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_or_garbage_is_unknown() {
        assert!(classify("").is_unknown());
        assert!(classify("   \n\n").is_unknown());
        let m = classify("12.99\n3.00");
        assert!(m.is_unknown());
        assert_eq!(m.confidence, UNKNOWN_CONFIDENCE);
    }

    #[test]
    fn override_wins() {
        let c = StoreClassifier::default();
        let m = c.classify_with_override("COSTCO", Some(&StoreKey::new("walmart")));
        assert_eq!(m.name, "Walmart");
        assert_eq!(m.confidence, 1.0);
        assert_eq!(m.reason, MatchReason::Override);
    }

    #[test]
    fn alias_table_admin_path() {
        let mut table = AliasTable::builtin();
        table.add_alias("costco", "costco whse");
        table.add_alias("costco", "COSTCO WHSE");
        table.add_alias("Fairway", "FAIRWAY MARKET");
        assert_eq!(table.lookup("Costco Whse"), Some(&StoreKey::new("costco")));
        assert_eq!(table.lookup("fairway market"), Some(&StoreKey::new("fairway")));
        let costco = table.entries().iter().find(|e| e.key.as_str() == "costco").unwrap();
        assert_eq!(costco.aliases.iter().filter(|a| *a == "COSTCO WHSE").count(), 1);

        let m = StoreClassifier::new(table).classify("FAIRWAY MARKET\nAPPLES 1.00");
        assert_eq!(m.key, Some(StoreKey::new("fairway")));
        assert_eq!(m.name, "Fairway");
    }

    #[test]
    fn alias_table_from_toml() {
        let table = AliasTable::from_toml(
            r#"
[[stores]]
key = "Fairway Market"
name = "Fairway"
aliases = ["FAIRWAY"]
"#,
        )
        .unwrap();
        assert_eq!(table.lookup("fairway"), Some(&StoreKey::new("fairway_market")));
        assert!(AliasTable::from_toml("stores = 3").is_err());
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("cat", "bat"), 1);
        assert_eq!(levenshtein_distance("마트", "마트"), 0);
        assert_eq!(levenshtein_distance("amazon", "amzn"), levenshtein_distance("amzn", "amazon"));
        assert!(similarity("TRADER JOES", "TRADER J0ES") > 0.9);
    }
}
