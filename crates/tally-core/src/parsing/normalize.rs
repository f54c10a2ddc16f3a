use regex::Regex;
use std::sync::LazyLock;

/// Wholesaler/distributor code prefixes that get glued in front of an
/// OEM number, e.g. "HEWCF410A" for HP's "CF410A".
pub const VENDOR_PREFIXES: &[&str] = &[
    "HEW", "CNM", "BRT", "EPS", "LEX", "XER", "SAM", "OKI", "KYO", "RIC", "SHR", "BSN", "UNV",
    "AVE", "SPR", "DEL",
];

static PACK_ANNOTATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\d+(\.\d+)?\s*/?\s*(pk|bx|cs|ea|ct|dz|rl|rm|lb|lbs|oz|ml|l|in|mm|cm|ft|yd|gb|tb|mb|sh|pg|pgs|page|pages|pack|box|case)$",
    )
    .expect("valid regex")
});

static DIMENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\d+(\.\d+)?x\d+(\.\d+)?$").expect("valid regex")
});

/// Canonical comparison form of an identifier: uppercase, ASCII
/// alphanumerics only ("cf-410 a" -> "CF410A").
pub fn normalize_identifier(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Strip a known vendor prefix from a normalized identifier.
///
/// Only strips when what remains still looks like a part number (at least
/// three characters with a digit), so "HEWLETT" is left alone.
pub fn strip_vendor_prefix(normalized: &str) -> Option<String> {
    VENDOR_PREFIXES.iter().find_map(|prefix| {
        let rest = normalized.strip_prefix(prefix)?;
        if rest.len() >= 3 && rest.chars().any(|c| c.is_ascii_digit()) {
            Some(rest.to_string())
        } else {
            None
        }
    })
}

/// Does this token look like a product identifier?
///
/// Accepts 3-30 character tokens made of alphanumerics and common code
/// separators that mix letters and digits, or all-letter codes carrying a
/// known vendor prefix. Pack-size and dimension annotations are rejected.
pub fn looks_like_identifier(token: &str) -> bool {
    let len = token.chars().count();
    if !(3..=30).contains(&len) {
        return false;
    }
    if !token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '/' | '.' | '_' | '#'))
    {
        return false;
    }
    if PACK_ANNOTATION.is_match(token) || DIMENSION.is_match(token) {
        return false;
    }

    let has_letter = token.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = token.chars().any(|c| c.is_ascii_digit());
    if has_letter && has_digit {
        return true;
    }

    has_letter
        && !has_digit
        && len >= 6
        && token.chars().all(|c| c.is_ascii_uppercase())
        && VENDOR_PREFIXES.iter().any(|p| token.starts_with(p))
}

/// Identifier-like tokens inside a free-form cell, in reading order.
pub fn identifier_tokens(cell: &str) -> Vec<String> {
    cell.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .map(|t| {
            t.trim_matches(|c: char| {
                matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"' | '\'' | '.' | ':' | '#')
            })
        })
        .filter(|t| looks_like_identifier(t))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_separators_and_case() {
        assert_eq!(normalize_identifier("cf-410 a"), "CF410A");
        assert_eq!(normalize_identifier("CL-246"), "CL246");
    }

    #[test]
    fn test_strip_vendor_prefix() {
        assert_eq!(strip_vendor_prefix("HEWCF410A").as_deref(), Some("CF410A"));
        assert_eq!(strip_vendor_prefix("CNMCL246").as_deref(), Some("CL246"));
        assert_eq!(strip_vendor_prefix("HEWLETT"), None);
        assert_eq!(strip_vendor_prefix("CF410A"), None);
    }

    #[test]
    fn test_looks_like_identifier() {
        assert!(looks_like_identifier("CF410A"));
        assert!(looks_like_identifier("CL-246"));
        assert!(looks_like_identifier("8280B001"));
        assert!(looks_like_identifier("HEWCFXXA"));
        assert!(!looks_like_identifier("INK"));
        assert!(!looks_like_identifier("C/M/Y"));
        assert!(!looks_like_identifier("12345"));
        assert!(!looks_like_identifier("10PK"));
        assert!(!looks_like_identifier("12/BX"));
        assert!(!looks_like_identifier("8.5x11"));
        assert!(!looks_like_identifier("AB"));
    }

    #[test]
    fn test_identifier_tokens_from_description() {
        let tokens = identifier_tokens("Canon CL-246 C/M/Y Color Ink (8280B001), 10PK");
        assert_eq!(tokens, vec!["CL-246", "8280B001"]);
    }
}
