use crate::error::TallyError;
use crate::model::UnitOfMeasure;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use std::sync::LazyLock;

static UOM_THEN_PACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([a-z]+)\.?\s*(?:of|/|-|x)?\s*(\d{1,5})\s*$").expect("valid regex")
});

static PACK_THEN_UOM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,5})\s*(?:/|-|x|per)?\s*([a-z]+)\.?\s*$").expect("valid regex")
});

/// Parse a money cell into a non-negative decimal.
///
/// Handles formats like:
/// - "45.99", "$45.99", "45.99 USD"
/// - "1,234.50" (thousands separator), "1.234,50" and "12,50" (decimal comma)
/// - "(12.00)" and "-12.00" (credits) -> Some(0)
/// - "", "-", "n/a", "TBD" -> None
pub fn parse_money(s: &str) -> Result<Option<Decimal>, TallyError> {
    let s = s.trim();
    if is_placeholder(s) {
        return Ok(None);
    }

    // Strip currency markers before reading the sign.
    let bare: String = s
        .replace("USD", "")
        .replace("CAD", "")
        .replace("EUR", "")
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥') && !c.is_whitespace())
        .collect();
    if bare.is_empty() || is_placeholder(&bare) {
        return Ok(None);
    }

    let negative = (bare.starts_with('(') && bare.ends_with(')'))
        || bare.starts_with('-')
        || bare.ends_with('-');
    let digits = bare
        .trim_matches(|c| c == '(' || c == ')')
        .trim_matches('-');

    let value = parse_decimal(digits)?;
    if negative || value.is_sign_negative() {
        return Ok(Some(Decimal::ZERO));
    }
    Ok(Some(value))
}

/// Parse a quantity cell ("1,549", "12", "2.0", "12 EA") into a whole number.
///
/// Fractional quantities are rounded half-up.
pub fn parse_quantity(s: &str) -> Result<Option<u64>, TallyError> {
    let s = s.trim();
    if is_placeholder(s) {
        return Ok(None);
    }
    // "12 EA": the quantity is the leading token
    let token = s.split_whitespace().next().unwrap_or(s);
    let value = parse_decimal(token)?;
    if value.is_sign_negative() {
        return Err(TallyError::Extraction(format!("negative quantity '{s}'")));
    }
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded
        .to_u64()
        .map(Some)
        .ok_or_else(|| TallyError::Extraction(format!("quantity out of range '{s}'")))
}

/// Parse a unit-of-measure cell into a unit and optional pack size.
///
/// "EA" -> (Each, 1), "BX/12" -> (Box, 12), "12/BX" -> (Box, 12),
/// "Box of 10" -> (Box, 10), "DZ" -> (Dozen, 12).
pub fn parse_uom(s: &str) -> Option<(UnitOfMeasure, Option<u32>)> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(caps) = UOM_THEN_PACK.captures(s) {
        if let Some(uom) = known_uom(&caps[1]) {
            return Some((uom, caps[2].parse::<u32>().ok().filter(|n| *n > 0)));
        }
    }
    if let Some(caps) = PACK_THEN_UOM.captures(s) {
        if let Some(uom) = known_uom(&caps[2]) {
            return Some((uom, caps[1].parse::<u32>().ok().filter(|n| *n > 0)));
        }
    }

    let uom = UnitOfMeasure::from_str_loose(s)?;
    let pack = uom.implied_pack();
    Some((uom, pack))
}

/// True when the cell reads as a number (money or plain).
pub fn is_numeric(s: &str) -> bool {
    matches!(parse_money(s), Ok(Some(_)))
}

fn known_uom(word: &str) -> Option<UnitOfMeasure> {
    match UnitOfMeasure::from_str_loose(word)? {
        UnitOfMeasure::Other(_) => None,
        uom => Some(uom),
    }
}

fn is_placeholder(s: &str) -> bool {
    let lower = s.to_lowercase();
    matches!(
        lower.as_str(),
        "" | "-" | "--" | "—" | "*" | "n/a" | "na" | "n.a." | "tbd" | "call" | "quote"
    )
}

/// Parse a decimal that may use either separator convention.
fn parse_decimal(s: &str) -> Result<Decimal, TallyError> {
    let s = s.trim();
    let has_comma = s.contains(',');
    let has_dot = s.contains('.');

    let normalized = if has_comma && has_dot {
        // Whichever separator comes last is the decimal point
        let last_comma = s.rfind(',').unwrap_or(0);
        let last_dot = s.rfind('.').unwrap_or(0);
        if last_comma > last_dot {
            s.replace('.', "").replace(',', ".")
        } else {
            s.replace(',', "")
        }
    } else if has_comma {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() == 2 && (1..=2).contains(&parts[1].len()) {
            s.replace(',', ".")
        } else {
            s.replace(',', "")
        }
    } else if s.matches('.').count() > 1 {
        s.replace('.', "")
    } else {
        s.to_string()
    };

    Decimal::from_str(&normalized)
        .map_err(|e| TallyError::Extraction(format!("invalid number '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_plain() {
        assert_eq!(parse_money("45.99").unwrap(), Some(dec!(45.99)));
    }

    #[test]
    fn test_money_currency_symbol() {
        assert_eq!(parse_money("$1,234.50").unwrap(), Some(dec!(1234.50)));
        assert_eq!(parse_money("45.99 USD").unwrap(), Some(dec!(45.99)));
    }

    #[test]
    fn test_money_decimal_comma() {
        assert_eq!(parse_money("12,50").unwrap(), Some(dec!(12.50)));
        assert_eq!(parse_money("1.234,50").unwrap(), Some(dec!(1234.50)));
    }

    #[test]
    fn test_money_credit_is_zero() {
        assert_eq!(parse_money("(12.00)").unwrap(), Some(Decimal::ZERO));
        assert_eq!(parse_money("-3").unwrap(), Some(Decimal::ZERO));
        assert_eq!(parse_money("$-12.00").unwrap(), Some(Decimal::ZERO));
        assert_eq!(parse_money("USD -5").unwrap(), Some(Decimal::ZERO));
        assert_eq!(parse_money("($4.50)").unwrap(), Some(Decimal::ZERO));
        assert_eq!(parse_money("12.00-").unwrap(), Some(Decimal::ZERO));
    }

    #[test]
    fn test_money_placeholder() {
        assert!(parse_money("").unwrap().is_none());
        assert!(parse_money("N/A").unwrap().is_none());
        assert!(parse_money("-").unwrap().is_none());
    }

    #[test]
    fn test_money_garbage_is_error() {
        assert!(parse_money("abc").is_err());
    }

    #[test]
    fn test_quantity_thousands_separator() {
        assert_eq!(parse_quantity("1,549").unwrap(), Some(1549));
    }

    #[test]
    fn test_quantity_variants() {
        assert_eq!(parse_quantity("12").unwrap(), Some(12));
        assert_eq!(parse_quantity("2.0").unwrap(), Some(2));
        assert_eq!(parse_quantity("2.5").unwrap(), Some(3));
        assert_eq!(parse_quantity("12 EA").unwrap(), Some(12));
        assert!(parse_quantity("").unwrap().is_none());
        assert!(parse_quantity("-4").is_err());
    }

    #[test]
    fn test_uom_pack_forms() {
        assert_eq!(parse_uom("BX/12"), Some((UnitOfMeasure::Box, Some(12))));
        assert_eq!(parse_uom("12/BX"), Some((UnitOfMeasure::Box, Some(12))));
        assert_eq!(parse_uom("CS 6"), Some((UnitOfMeasure::Case, Some(6))));
        assert_eq!(parse_uom("PK10"), Some((UnitOfMeasure::Pack, Some(10))));
        assert_eq!(parse_uom("Box of 10"), Some((UnitOfMeasure::Box, Some(10))));
    }

    #[test]
    fn test_uom_bare_units() {
        assert_eq!(parse_uom("EA"), Some((UnitOfMeasure::Each, Some(1))));
        assert_eq!(parse_uom("DZ"), Some((UnitOfMeasure::Dozen, Some(12))));
        assert_eq!(parse_uom("BX"), Some((UnitOfMeasure::Box, None)));
        assert_eq!(parse_uom(""), None);
    }
}
