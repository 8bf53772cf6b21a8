//! Lenient number parsing and canonical number formatting.
//!
//! Supplier data routinely carries units or trailing text (`"250 g"`,
//! `"12kg"`). A value counts as numeric when it *starts* with a decimal
//! literal.

use once_cell::sync::Lazy;
use regex::Regex;

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?").expect("valid number regex")
});

/// Parse the leading decimal literal of `s`.
///
/// Returns `None` for blank input, input without a leading number, or a
/// non-finite result.
pub fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim_start();
    let literal = LEADING_NUMBER.find(trimmed)?.as_str();
    literal.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Format a number in its shortest form: `5.0` -> `"5"`, `1.25` -> `"1.25"`.
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        // avoid "-0"
        return "0".to_string();
    }
    n.to_string()
}
