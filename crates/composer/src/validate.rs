//! Format validators for campaign input, mirroring the remote API's schema.

use std::sync::LazyLock;

use regex::Regex;

/// Smallest and largest payable amount, in euro cents.
pub const MIN_PAYMENT_AMOUNT: u64 = 1;
pub const MAX_PAYMENT_AMOUNT: u64 = 9_999_999_999;

static FISCAL_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^[A-Za-z]{6}[0-9LMNPQRSTUV]{2}[A-Za-z]",
        r"[0-9LMNPQRSTUV]{2}[A-Za-z][0-9LMNPQRSTUV]{3}[A-Za-z]$",
    ))
    .expect("valid fiscal code pattern")
});

static NOTICE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0123][0-9]{17}$").expect("valid notice number pattern"));

/// Italian fiscal code (16 characters, omocodia letters allowed).
pub fn is_valid_fiscal_code(code: &str) -> bool {
    FISCAL_CODE.is_match(code)
}

/// Payment notice number: 18 digits, the first being 0-3.
pub fn is_valid_notice_number(notice: &str) -> bool {
    NOTICE_NUMBER.is_match(notice)
}

/// Parse a payment amount in cents. Accepts integral values only, within
/// `MIN_PAYMENT_AMOUNT..=MAX_PAYMENT_AMOUNT`.
pub fn parse_payment_amount(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let amount = match raw.parse::<u64>() {
        Ok(amount) => amount,
        Err(_) => {
            let value = raw.parse::<f64>().ok()?;
            if !value.is_finite() || value.fract() != 0.0 || value < 0.0 {
                return None;
            }
            value as u64
        }
    };

    (MIN_PAYMENT_AMOUNT..=MAX_PAYMENT_AMOUNT)
        .contains(&amount)
        .then_some(amount)
}

/// String length as the remote API counts it (UTF-16 code units).
pub(crate) fn api_len(s: &str) -> usize {
    s.encode_utf16().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fiscal_code() {
        assert!(is_valid_fiscal_code("RSSMRA80A01H501U"));
        assert!(is_valid_fiscal_code("rssmra80a01h501u"));
        // omocodia substitutes digits with letters from LMNPQRSTUV
        assert!(is_valid_fiscal_code("RSSMRAURALMHRQMU"));
        assert!(!is_valid_fiscal_code("RSSMRA80A01H501"));
        assert!(!is_valid_fiscal_code("1SSMRA80A01H501U"));
        assert!(!is_valid_fiscal_code(""));
    }

    #[test]
    fn test_notice_number() {
        assert!(is_valid_notice_number("012345678901234567"));
        assert!(is_valid_notice_number("312345678901234567"));
        assert!(!is_valid_notice_number("412345678901234567"));
        assert!(!is_valid_notice_number("01234567890123456"));
        assert!(!is_valid_notice_number("01234567890123456a"));
    }

    #[test]
    fn test_payment_amount() {
        assert_eq!(parse_payment_amount("123"), Some(123));
        assert_eq!(parse_payment_amount(" 42 "), Some(42));
        assert_eq!(parse_payment_amount("12.0"), Some(12));
        assert_eq!(parse_payment_amount("9999999999"), Some(MAX_PAYMENT_AMOUNT));
        assert_eq!(parse_payment_amount("10000000000"), None);
        assert_eq!(parse_payment_amount("0"), None);
        assert_eq!(parse_payment_amount("-5"), None);
        assert_eq!(parse_payment_amount("1.5"), None);
        assert_eq!(parse_payment_amount("abc"), None);
        assert_eq!(parse_payment_amount(""), None);
    }

    #[test]
    fn test_api_len_counts_utf16_units() {
        assert_eq!(api_len("abc"), 3);
        assert_eq!(api_len("€"), 1);
        assert_eq!(api_len("😀"), 2);
    }
}
