//! Shared text, price and date normalization.
//!
//! Both plugin families and the merger use these helpers, injected by
//! composition so the behavior is testable in isolation.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::models::Price;

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_space = true;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Normalize a venue name for grouping: same treatment as event names, with
/// leading articles dropped.
pub fn normalize_venue(venue: &str) -> String {
    let normalized = normalize_name(venue);
    normalized
        .strip_prefix("the ")
        .map(|rest| rest.to_string())
        .unwrap_or(normalized)
}

/// Token set of a normalized name.
pub fn name_tokens(name: &str) -> BTreeSet<String> {
    normalize_name(name)
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

/// Token-set similarity in [0, 1].
///
/// Jaccard index over normalized tokens. Word order does not matter, so
/// "Team Y vs Team X" matches "Team X vs Team Y".
pub fn token_set_similarity(a: &str, b: &str) -> f64 {
    let ta = name_tokens(a);
    let tb = name_tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    intersection as f64 / union as f64
}

fn price_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<symbol>[$€£])?\s*(?P<amount>\d{1,6}(?:[.,]\d{2})?)\s*(?P<code>USD|EUR|GBP|CAD|AUD)?")
            .expect("price regex is valid")
    })
}

/// Extract the first price from free-form text, e.g. "from $55.00".
///
/// Returns None when no currency marker is present; a bare number is too
/// ambiguous to treat as a price.
pub fn parse_price(text: &str) -> Option<Price> {
    let caps = price_regex().captures_iter(text).find(|c| {
        c.name("symbol").is_some() || c.name("code").is_some()
    })?;

    let currency = match (caps.name("symbol").map(|m| m.as_str()), caps.name("code")) {
        (_, Some(code)) => code.as_str().to_string(),
        (Some("$"), None) => "USD".to_string(),
        (Some("€"), None) => "EUR".to_string(),
        (Some("£"), None) => "GBP".to_string(),
        _ => return None,
    };

    let raw = caps.name("amount")?.as_str().replace(',', ".");
    let amount_minor = match raw.split_once('.') {
        Some((whole, frac)) => {
            let whole: i64 = whole.parse().ok()?;
            let frac: i64 = frac.parse().ok()?;
            whole * 100 + frac
        }
        None => raw.parse::<i64>().ok()? * 100,
    };

    Some(Price {
        amount_minor,
        currency,
    })
}

/// Date/time formats tried in order when a platform profile does not
/// override them.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%b %d, %Y %H:%M",
    "%b %d, %Y",
    "%d %b %Y %H:%M",
    "%d %b %Y",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y",
];

/// Parse an event date/time with the given formats, falling back to the
/// defaults. Date-only formats are pinned to midnight.
pub fn parse_event_datetime(text: &str, formats: &[String]) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    for fmt in formats.iter().map(|f| f.as_str()).chain(DEFAULT_DATE_FORMATS.iter().copied()) {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
        if let Ok(d) = chrono::NaiveDate::parse_from_str(trimmed, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}
