//! Campaign row mapping and markdown template interpolation.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// CSV column names, by position.
pub const CSV_COLUMNS: [&str; 9] = [
    "name",
    "surname",
    "fiscal_code",
    "email",
    "subject",
    "markdown",
    "amount",
    "notice_number",
    "due_date",
];

pub const AMOUNT_FIELD: &str = "amount";
/// Derived field holding the formatted amount.
pub const VALUE_FIELD: &str = "value";

const CURRENCY_SYMBOL: &str = "€";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([\s\S]+?)\}\}").expect("valid placeholder pattern"));

/// Map a positional row onto the named CSV columns.
///
/// An absent row yields only an empty `amount`; columns past the end of a
/// short row map to the empty string.
pub fn map_row<S: AsRef<str>>(row: Option<&[S]>) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    values.insert(AMOUNT_FIELD.to_string(), String::new());

    let Some(row) = row else {
        return values;
    };

    for (index, name) in CSV_COLUMNS.iter().enumerate() {
        let value = row.get(index).map(|v| v.as_ref().to_string()).unwrap_or_default();
        values.insert(name.to_string(), value);
    }
    values
}

/// Substitute `{{name}}` placeholders with the row's values and the derived `value`.
/// Unknown names are left untouched.
pub fn interpolate<S: AsRef<str>>(markdown: &str, row: Option<&[S]>) -> String {
    let mut values = map_row(row);
    let value = format_amount(values.get(AMOUNT_FIELD).map(String::as_str).unwrap_or_default());
    values.insert(VALUE_FIELD.to_string(), value);

    PLACEHOLDER
        .replace_all(markdown, |caps: &Captures| {
            let name = caps[1].trim();
            values
                .get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Format an amount in euro cents for display: `"123"` → `"1.23€"`.
///
/// Follows the `it-IT` currency formatter with grouping disabled, keeping only
/// the integer and fraction parts (the sign is dropped) joined by a dot.
/// An empty amount formats as the empty string; so does a non-numeric one.
pub fn format_amount(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let trimmed = raw.trim();
    // Blank input counts as zero
    if trimmed.is_empty() {
        return format!("0.00{CURRENCY_SYMBOL}");
    }

    if let Ok(cents) = trimmed.parse::<i128>() {
        let cents = cents.unsigned_abs();
        return format!("{}.{:02}{CURRENCY_SYMBOL}", cents / 100, cents % 100);
    }

    match trimmed.parse::<f64>() {
        Ok(cents) if cents.is_finite() => {
            // Round half away from zero on the hundredths, as the locale formatter does
            let hundredths = (cents.abs()).round() as u128;
            format!("{}.{:02}{CURRENCY_SYMBOL}", hundredths / 100, hundredths % 100)
        }
        _ => {
            tracing::debug!(amount = raw, "Amount is not numeric, leaving value empty");
            String::new()
        }
    }
}
