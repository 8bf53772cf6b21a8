//! Row validation against the rules' `validation` block.
//!
//! Three independent checks, each producing human-readable messages:
//!
//! | Check     | Applies to                      | Message                                   |
//! |-----------|---------------------------------|-------------------------------------------|
//! | required  | `validation.required`           | `Required field missing: <field>`         |
//! | data type | `validation.dataTypes` (number) | `Invalid number for field '<f>': '<v>'`   |
//! | range     | `validation.ranges`             | `Value out of range for field '<f>': ...` |
//!
//! A row may accumulate several errors. The validator never mutates the row.
//!
//! # Example
//!
//! ```rust,ignore
//! use fieldmap::{validate, MappingRules, MappedRow};
//!
//! let rules = MappingRules::new(&["title"]).require("title");
//! let row = MappedRow::from([("title".to_string(), String::new())]);
//! assert_eq!(validate(&row, &rules), vec!["Required field missing: title"]);
//! ```

pub mod number;

pub use number::{format_number, parse_number};

use crate::models::MappedRow;
use crate::rules::{DataType, MappingRules};

/// Validate a mapped row. An empty result means the row is valid.
pub fn validate(row: &MappedRow, rules: &MappingRules) -> Vec<String> {
    let mut errors: Vec<String> = missing_required(row, rules)
        .map(|field| format!("Required field missing: {}", field))
        .collect();

    for (field, data_type) in &rules.validation.data_types {
        if *data_type != DataType::Number {
            continue;
        }
        if let Some(value) = present(row, field) {
            if parse_number(value).is_none() {
                errors.push(format!(
                    "Invalid number for field '{}': received '{}'",
                    field, value
                ));
            }
        }
    }

    for (field, range) in &rules.validation.ranges {
        let Some(value) = present(row, field) else {
            continue;
        };
        // Non-numeric values are the data-type check's concern.
        if let Some(n) = parse_number(value) {
            if !range.contains(n) {
                errors.push(format!(
                    "Value out of range for field '{}': {} (expected {})",
                    field, value, range
                ));
            }
        }
    }

    errors
}

/// Quick check: true when [`validate`] reports nothing.
pub fn is_valid(row: &MappedRow, rules: &MappingRules) -> bool {
    validate(row, rules).is_empty()
}

/// Required fields that are absent or blank in `row`.
pub fn missing_required<'r>(
    row: &'r MappedRow,
    rules: &'r MappingRules,
) -> impl Iterator<Item = &'r str> + 'r {
    rules
        .validation
        .required
        .iter()
        .filter(move |field| present(row, field).is_none())
        .map(String::as_str)
}

/// Validate many rows, returning `(1-based row, errors)` for the invalid ones.
pub fn validate_rows(rows: &[MappedRow], rules: &MappingRules) -> Vec<(usize, Vec<String>)> {
    rows.iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let errors = validate(row, rules);
            (!errors.is_empty()).then_some((i + 1, errors))
        })
        .collect()
}

fn present<'r>(row: &'r MappedRow, field: &str) -> Option<&'r str> {
    row.get(field)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Range;

    fn row(pairs: &[(&str, &str)]) -> MappedRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_required_missing_and_blank() {
        let rules = MappingRules::new(&["title", "sku"]).require("title").require("sku");
        let errors = validate(&row(&[("title", "  ")]), &rules);
        assert_eq!(
            errors,
            vec!["Required field missing: title", "Required field missing: sku"]
        );
    }

    #[test]
    fn test_number_type() {
        let rules = MappingRules::new(&["w"]).with_data_type("w", DataType::Number);
        assert!(validate(&row(&[("w", "12.5")]), &rules).is_empty());
        assert!(validate(&row(&[("w", "12kg")]), &rules).is_empty());
        // empty values are not type-checked
        assert!(validate(&row(&[("w", "")]), &rules).is_empty());

        let errors = validate(&row(&[("w", "heavy")]), &rules);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'w'"));
        assert!(errors[0].contains("heavy"));
    }

    #[test]
    fn test_other_types_not_checked() {
        let rules =
            MappingRules::new(&["n"]).with_data_type("n", DataType::Other("string".into()));
        assert!(validate(&row(&[("n", "anything")]), &rules).is_empty());
    }

    #[test]
    fn test_range_inclusive() {
        let rules = MappingRules::new(&["w"]).with_range("w", Range::new(0.0, 1000.0));
        assert!(validate(&row(&[("w", "0")]), &rules).is_empty());
        assert!(validate(&row(&[("w", "1000")]), &rules).is_empty());

        let errors = validate(&row(&[("w", "1000.5")]), &rules);
        assert_eq!(
            errors,
            vec!["Value out of range for field 'w': 1000.5 (expected [0, 1000])"]
        );
    }

    #[test]
    fn test_errors_accumulate() {
        let rules = MappingRules::new(&["a", "w", "v"])
            .require("a")
            .with_data_type("w", DataType::Number)
            .with_range("v", Range::new(1.0, 2.0));
        let errors = validate(&row(&[("w", "x"), ("v", "5")]), &rules);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_validate_rows_tags_invalid() {
        let rules = MappingRules::new(&["a"]).require("a");
        let rows = vec![row(&[("a", "1")]), row(&[("a", "")])];
        let invalid = validate_rows(&rows, &rules);
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].0, 2);
    }
}
