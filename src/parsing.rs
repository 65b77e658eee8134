//! Tolerant extraction of numeric facts from the free-text values the
//! listing sources return ("5+", "5 locali", "€ 350.000", "R").
//!
//! All parsers are total: they never fail, they only degrade to `None`
//! values while keeping the original text around when it carries more
//! information than the parsed number.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());
static PLUS_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*\+$").unwrap());
static BARE_INT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());
static SIGNED_INT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+$").unwrap());
static DA_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)da\s*").unwrap());

/// Result of parsing a count-like or floor-like field: the numeric value
/// when one could be extracted, and the raw source string when it says more
/// than the number alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parsed {
    pub value: Option<i64>,
    pub raw: Option<String>,
}

impl Parsed {
    fn none() -> Self {
        Self::default()
    }

    fn value(value: i64) -> Self {
        Self {
            value: Some(value),
            raw: None,
        }
    }
}

fn first_digit_run(s: &str) -> Option<i64> {
    DIGITS
        .captures(s)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn numeric_value(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))
}

/// Best-effort integer from an already-numeric or free-text value.
pub fn parse_number(value: Option<&Value>) -> Option<i64> {
    match value {
        Some(Value::Number(n)) => numeric_value(n),
        Some(Value::String(s)) => parse_number_text(s),
        _ => None,
    }
}

/// First integer run in a string, e.g. "350 m²" -> 350.
pub fn parse_number_text(s: &str) -> Option<i64> {
    first_digit_run(s)
}

/// Parse a room/bathroom/bedroom count.
pub fn parse_count(value: Option<&Value>) -> Parsed {
    match value {
        Some(Value::Number(n)) => numeric_value(n).map(Parsed::value).unwrap_or_default(),
        Some(Value::String(s)) => parse_count_text(s),
        _ => Parsed::none(),
    }
}

pub fn parse_count_text(s: &str) -> Parsed {
    let s = s.trim();
    if s.is_empty() {
        return Parsed::none();
    }

    // "5+" (and "5 +") means at-least-five; keep the canonical raw form so
    // display logic can render the plus.
    if let Some(caps) = PLUS_COUNT.captures(s) {
        let digits = &caps[1];
        return Parsed {
            value: digits.parse().ok(),
            raw: Some(format!("{digits}+")),
        };
    }

    if BARE_INT.is_match(s) {
        return s.parse().map(Parsed::value).unwrap_or_default();
    }

    match first_digit_run(s) {
        Some(value) => Parsed {
            value: Some(value),
            raw: Some(s.to_string()),
        },
        None => Parsed {
            value: None,
            raw: Some(s.to_string()),
        },
    }
}

/// Parse a floor indication. Floors are discrete codes, not measurements:
/// a non-numeric label like "R" or "T" is kept as raw text and never
/// digit-mined.
pub fn parse_floor(value: Option<&Value>) -> Parsed {
    match value {
        Some(Value::Number(n)) => numeric_value(n).map(Parsed::value).unwrap_or_default(),
        Some(Value::String(s)) => parse_floor_text(s),
        _ => Parsed::none(),
    }
}

pub fn parse_floor_text(s: &str) -> Parsed {
    let s = s.trim();
    if s.is_empty() {
        return Parsed::none();
    }
    if SIGNED_INT.is_match(s) {
        return s.parse().map(Parsed::value).unwrap_or_default();
    }
    Parsed {
        value: None,
        raw: Some(s.to_string()),
    }
}

/// Parse a displayed price like "€ 350.000" or "da € 1.200.000" into the
/// integer amount plus the cleaned display string. Unparseable input yields 0
/// (price not disclosed).
pub fn parse_price(text: &str) -> (i64, String) {
    let cleaned = DA_PREFIX.replace(text, "").trim().to_string();
    let numeric: String = cleaned
        .replace(['€', '.'], "")
        .split_whitespace()
        .collect::<String>()
        .replace(",00", "");
    let price = numeric.parse().unwrap_or(0);
    (price, cleaned)
}

/// it-IT display form: dot-separated thousands with a euro prefix.
pub fn format_price_eur(price: i64) -> String {
    let digits = price.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    let sign = if price < 0 { "-" } else { "" };
    format!("€ {sign}{grouped}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Option<i64>, raw: Option<&str>) -> Parsed {
        Parsed {
            value,
            raw: raw.map(str::to_string),
        }
    }

    #[test]
    fn number_passes_through_numbers() {
        assert_eq!(parse_number(Some(&json!(10))), Some(10));
        assert_eq!(parse_number(Some(&json!(0))), Some(0));
    }

    #[test]
    fn number_extracts_digits_from_strings() {
        assert_eq!(parse_number(Some(&json!("123"))), Some(123));
        assert_eq!(parse_number(Some(&json!("350 m²"))), Some(350));
        assert_eq!(parse_number(Some(&json!("€ 450.000"))), Some(450));
    }

    #[test]
    fn number_rejects_digitless_input() {
        assert_eq!(parse_number(Some(&json!("N/A"))), None);
        assert_eq!(parse_number(Some(&json!(" "))), None);
        assert_eq!(parse_number(None), None);
        assert_eq!(parse_number(Some(&Value::Null)), None);
    }

    #[test]
    fn count_empty_inputs() {
        assert_eq!(parse_count(None), raw(None, None));
        assert_eq!(parse_count(Some(&Value::Null)), raw(None, None));
        assert_eq!(parse_count(Some(&json!(""))), raw(None, None));
    }

    #[test]
    fn count_plain_numbers() {
        assert_eq!(parse_count(Some(&json!(5))), raw(Some(5), None));
        assert_eq!(parse_count(Some(&json!("5"))), raw(Some(5), None));
    }

    #[test]
    fn count_plus_forms() {
        assert_eq!(parse_count(Some(&json!("5+"))), raw(Some(5), Some("5+")));
        assert_eq!(parse_count(Some(&json!("5 +"))), raw(Some(5), Some("5+")));
    }

    #[test]
    fn count_keeps_raw_when_string_says_more() {
        assert_eq!(
            parse_count(Some(&json!("5 locali"))),
            raw(Some(5), Some("5 locali"))
        );
        assert_eq!(parse_count(Some(&json!("locali"))), raw(None, Some("locali")));
    }

    #[test]
    fn floor_numeric_forms() {
        assert_eq!(parse_floor(Some(&json!(3))), raw(Some(3), None));
        assert_eq!(parse_floor(Some(&json!("-1"))), raw(Some(-1), None));
        assert_eq!(parse_floor(Some(&json!("0"))), raw(Some(0), None));
        assert_eq!(parse_floor(Some(&json!("3"))), raw(Some(3), None));
    }

    #[test]
    fn floor_codes_stay_raw() {
        assert_eq!(parse_floor(Some(&json!("R"))), raw(None, Some("R")));
        assert_eq!(parse_floor(Some(&json!("T"))), raw(None, Some("T")));
    }

    #[test]
    fn floor_empty_inputs() {
        assert_eq!(parse_floor(None), raw(None, None));
        assert_eq!(parse_floor(Some(&json!(" "))), raw(None, None));
    }

    #[test]
    fn price_parses_euro_strings() {
        assert_eq!(parse_price("€ 350.000"), (350_000, "€ 350.000".to_string()));
        assert_eq!(
            parse_price("da € 1.200.000"),
            (1_200_000, "€ 1.200.000".to_string())
        );
        assert_eq!(parse_price("€ 89.000,00"), (89_000, "€ 89.000,00".to_string()));
    }

    #[test]
    fn price_degrades_to_zero() {
        let (price, formatted) = parse_price("Prezzo su richiesta");
        assert_eq!(price, 0);
        assert_eq!(formatted, "Prezzo su richiesta");
    }

    #[test]
    fn formats_prices_italian_style() {
        assert_eq!(format_price_eur(350_000), "€ 350.000");
        assert_eq!(format_price_eur(1_234_567), "€ 1.234.567");
        assert_eq!(format_price_eur(950), "€ 950");
        assert_eq!(format_price_eur(0), "€ 0");
    }
}
