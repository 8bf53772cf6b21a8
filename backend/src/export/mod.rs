//! CSV Serializer
//!
//! Renders mapped rows as delimited text. Output columns are exactly
//! `outputFormat.columns`, whatever else the row carries; a missing column is
//! an empty cell.
//!
//! A field is quoted, with inner quotes doubled, iff it contains the
//! delimiter, a double quote, `\n` or `\r`. Lines are joined with `\n` and
//! there is no trailing newline.

use std::borrow::Cow;

use crate::models::MappedRow;
use crate::rules::MappingRules;

/// Serialize rows to CSV text.
///
/// Zero rows yield `""`, even when the header is enabled.
pub fn to_csv(rows: &[MappedRow], rules: &MappingRules) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let format = &rules.output_format;
    let delimiter = format.delimiter.as_str();
    let mut lines = Vec::with_capacity(rows.len() + 1);

    if format.include_header {
        lines.push(join(format.columns.iter().map(String::as_str), delimiter));
    }

    for row in rows {
        let cells = format
            .columns
            .iter()
            .map(|column| row.get(column).map(String::as_str).unwrap_or(""));
        lines.push(join(cells, delimiter));
    }

    lines.join("\n")
}

/// Quote `value` if it needs quoting for `delimiter`.
pub fn escape_field<'a>(value: &'a str, delimiter: &str) -> Cow<'a, str> {
    let needs_quotes = value.contains(|c: char| matches!(c, '"' | '\n' | '\r'))
        || (!delimiter.is_empty() && value.contains(delimiter));

    if needs_quotes {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn join<'a>(cells: impl Iterator<Item = &'a str>, delimiter: &str) -> String {
    cells
        .map(|cell| escape_field(cell, delimiter))
        .collect::<Vec<_>>()
        .join(delimiter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(pairs: &[(&str, &str)]) -> MappedRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_header_and_rows() {
        let rules = MappingRules::new(&["title", "sku"]);
        let rows = vec![row(&[("title", "Cell"), ("sku", "A1")])];
        assert_eq!(to_csv(&rows, &rules), "title,sku\nCell,A1");
    }

    #[test]
    fn test_without_header() {
        let rules = MappingRules::new(&["title"]).with_header(false);
        let rows = vec![row(&[("title", "a")]), row(&[("title", "b")])];
        assert_eq!(to_csv(&rows, &rules), "a\nb");
    }

    #[test]
    fn test_empty_input_is_empty_even_with_header() {
        let rules = MappingRules::new(&["title", "sku"]);
        assert!(rules.output_format.include_header);
        assert_eq!(to_csv(&[], &rules), "");
    }

    #[test]
    fn test_column_order_and_missing_columns() {
        let rules = MappingRules::new(&["b", "a", "c"]);
        let rows = vec![row(&[("a", "1"), ("b", "2"), ("extra", "x")])];
        assert_eq!(to_csv(&rows, &rules), "b,a,c\n2,1,");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(escape_field("plain", ","), "plain");
        assert_eq!(escape_field("a,b", ","), "\"a,b\"");
        assert_eq!(escape_field("a,b", ";"), "a,b");
        assert_eq!(escape_field("say \"hi\"", ","), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("l1\nl2", ","), "\"l1\nl2\"");
        assert_eq!(escape_field("l1\rl2", ","), "\"l1\rl2\"");
        assert_eq!(escape_field("", ","), "");
    }

    #[test]
    fn test_custom_delimiter() {
        let rules = MappingRules::new(&["a", "b"]).with_delimiter(";");
        let rows = vec![row(&[("a", "x;y"), ("b", "1,5")])];
        assert_eq!(to_csv(&rows, &rules), "a;b\n\"x;y\";1,5");
    }

    #[test]
    fn test_header_names_are_quoted_too() {
        let rules = MappingRules::new(&["weight, kg"]);
        let rows = vec![row(&[("weight, kg", "1")])];
        assert_eq!(to_csv(&rows, &rules), "\"weight, kg\"\n1");
    }

    fn read_back(text: &str, delimiter: u8) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(text.as_bytes());
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    proptest! {
        #[test]
        fn prop_round_trip_through_csv_reader(
            delimiter in prop::sample::select(vec![',', ';', '\t', '|']),
            cells in prop::collection::vec(
                prop::collection::vec("[a-z ,;|\t\"\r\n]{0,8}", 3),
                1..6,
            ),
        ) {
            let rules = MappingRules::new(&["a", "b", "c"]).with_delimiter(&delimiter.to_string());
            let rows: Vec<MappedRow> = cells
                .iter()
                .map(|c| row(&[("a", c[0].as_str()), ("b", c[1].as_str()), ("c", c[2].as_str())]))
                .collect();

            let text = to_csv(&rows, &rules);
            prop_assert!(!text.ends_with('\n'));

            let parsed = read_back(&text, delimiter as u8);
            prop_assert_eq!(parsed, cells);
        }
    }
}
