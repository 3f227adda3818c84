//! Concrete extractors, one module per source.
//!
//! Every module follows the same shape: strategy structs holding an
//! `Arc<dyn PageFetcher>`, async methods that fetch, and plain
//! functions that parse, so the parsing is testable against embedded
//! fixtures and no HTML value ever lives across an await.

pub mod adb;
pub mod afdb;
pub mod aiib;
pub mod bio;
pub mod deg;
pub mod dfc;
pub mod ebrd;
pub mod eib;
pub mod fmo;
pub mod idb;
pub mod ifc;
pub mod kfw;
pub mod miga;
pub mod nbim;
pub mod pro;
pub mod sec;
pub mod undp;
pub mod wb;

use chrono::NaiveDate;
use scraper::{ElementRef, Selector};

use crate::error::{Result, WorkflowError};

/// Parses a CSS selector known at compile time. Selectors are
/// exercised by the parse tests, so a syntax error cannot reach a
/// production scrape.
pub(crate) fn selector(css: &'static str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector \"{css}\": {e:?}"))
}

/// Collects an element's text content, collapsing internal whitespace.
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trims a scraped field to `None` when it is empty noise.
pub(crate) fn clean_field(raw: &str) -> Option<String> {
    let cleaned = raw.trim().trim_matches('\u{a0}').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Extracts the first numeric token (commas and decimal point allowed)
/// from a money cell, e.g. `"US$ 12,500.75 million"` → `12500.75`.
pub(crate) fn parse_amount(raw: &str) -> Option<f64> {
    let mut token = String::new();
    let mut seen_digit = false;
    for c in raw.chars() {
        match c {
            '0'..='9' => {
                seen_digit = true;
                token.push(c);
            }
            ',' if seen_digit => {}
            '.' if seen_digit => token.push(c),
            _ if seen_digit => break,
            _ => {}
        }
    }
    if seen_digit {
        token.parse().ok()
    } else {
        None
    }
}

/// Converts a string of digits (commas and decimals stripped) into an
/// integer. Errors on anything that has no digits at all.
pub(crate) fn parse_digits(raw: &str) -> Result<i64> {
    let stripped: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if stripped.is_empty() {
        return Err(WorkflowError::scrape(format!(
            "value \"{}\" could not be coerced into an integer",
            raw.trim()
        )));
    }
    stripped
        .parse()
        .map_err(|_| WorkflowError::scrape(format!("integer overflow parsing \"{}\"", raw.trim())))
}

/// Splits a date into the (year, month, day) triple staged records use.
pub(crate) fn date_parts(date: NaiveDate) -> (Option<i32>, Option<u32>, Option<u32>) {
    use chrono::Datelike;
    (Some(date.year()), Some(date.month()), Some(date.day()))
}

/// Parses a date in any of the formats that show up across sources.
pub(crate) fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    for format in ["%d %b %Y", "%d %B %Y", "%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y", "%b %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_parsing_handles_currency_noise() {
        assert_eq!(parse_amount("US$ 12,500.75 million"), Some(12500.75));
        assert_eq!(parse_amount("EUR 3.2"), Some(3.2));
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn digit_parsing_strips_separators_and_rejects_blanks() {
        assert_eq!(parse_digits("1,234,567").unwrap(), 1234567);
        assert_eq!(parse_digits("89.00").unwrap(), 8900);
        assert!(parse_digits("\u{a0}").is_err());
    }

    #[test]
    fn flexible_dates_cover_the_formats_in_the_wild() {
        assert!(parse_flexible_date("26 Oct 2021").is_some());
        assert!(parse_flexible_date("2021-10-26").is_some());
        assert!(parse_flexible_date("Oct 26, 2021").is_some());
        assert!(parse_flexible_date("sometime soon").is_none());
    }
}
