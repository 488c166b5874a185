//! Helpers for interpreting raw captured strings.
//!
//! The engine returns captures as text. Callers that need numbers or dates
//! convert them here, using the date formats carried on the matched
//! template.

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Parse an amount as printed on a document.
///
/// Thousands separators may be `.`, `,` or spaces; the digits after the last
/// separator are the decimals. A leading or trailing `-` makes the amount
/// negative, so SAP-style `"1.254,33-"` reads as `-1254.33`.
pub fn parse_number(value: &str) -> Option<Decimal> {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let negative = compact.starts_with('-') || compact.ends_with('-');
    let unsigned = compact.trim_matches('-');
    if unsigned.is_empty() {
        return None;
    }

    let scale = unsigned
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| unsigned.len() - i - 1)
        .unwrap_or(0);
    let digits: String = unsigned.chars().filter(|c| *c != '.' && *c != ',').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let mantissa: i128 = digits.parse().ok()?;
    let amount = Decimal::try_from_i128_with_scale(mantissa, u32::try_from(scale).ok()?).ok()?;
    Some(if negative { -amount } else { amount })
}

/// Parse a date with the first of `formats` that accepts it.
pub fn parse_date<S: AsRef<str>>(value: &str, formats: &[S]) -> Option<NaiveDate> {
    let value = value.trim();
    formats
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format.as_ref()).ok())
}
