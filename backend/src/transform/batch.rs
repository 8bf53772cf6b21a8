//! Batch Processor: map many rows, tag issues, aggregate stats.
//!
//! One bad row never aborts the batch. A row that fails with a
//! [`RowProcessingError`](crate::error::RowProcessingError) is counted in
//! `failed_rows` and reported as a processing error; the remaining rows are
//! still mapped.

use serde_json::Value;
use std::collections::BTreeSet;

use super::mapper::{map_row, map_value};
use crate::error::RowProcessingError;
use crate::models::{BatchResult, IssueKind, RowIssue, RowOutcome, SourceRow};
use crate::rules::MappingRules;
use crate::validation::missing_required;

/// Map a batch of JSON rows (as received over HTTP or from a scraper).
pub fn map_batch(rows: &[Value], rules: &MappingRules) -> BatchResult {
    run(rows, rules, map_value)
}

/// Map a batch of already-flat records (as produced by the CSV parser).
pub fn map_records(rows: &[SourceRow], rules: &MappingRules) -> BatchResult {
    run(rows, rules, map_row)
}

fn run<T>(
    rows: &[T],
    rules: &MappingRules,
    map: impl Fn(&T, &MappingRules) -> Result<RowOutcome, RowProcessingError>,
) -> BatchResult {
    let span = tracing::info_span!("map_batch", rows = rows.len());
    let _guard = span.enter();

    let mut result = BatchResult::default();
    result.stats.total_rows = rows.len();
    let mut missing = BTreeSet::new();

    for (idx, source) in rows.iter().enumerate() {
        let row_number = idx + 1;

        let outcome = match map(source, rules) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(row = row_number, error = %e, "row skipped");
                result.stats.failed_rows += 1;
                result
                    .errors
                    .push(RowIssue::new(row_number, IssueKind::Processing, e.to_string()));
                continue;
            }
        };

        missing.extend(missing_required(&outcome.row, rules).map(str::to_string));

        result.warnings.extend(
            outcome
                .warnings
                .into_iter()
                .map(|w| RowIssue::new(row_number, IssueKind::Transformation, w)),
        );

        if outcome.errors.is_empty() {
            result.stats.valid_rows += 1;
            result.mapped_rows.push(outcome.row);
        } else {
            tracing::debug!(row = row_number, errors = outcome.errors.len(), "row invalid");
            result.stats.invalid_rows += 1;
            result.errors.extend(
                outcome
                    .errors
                    .into_iter()
                    .map(|e| RowIssue::new(row_number, IssueKind::Validation, e)),
            );
        }
    }

    result.stats.missing_fields_across_dataset = missing;

    tracing::info!(
        total = result.stats.total_rows,
        valid = result.stats.valid_rows,
        invalid = result.stats.invalid_rows,
        failed = result.stats.failed_rows,
        warnings = result.warnings.len(),
        "batch mapped"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn title_rules() -> MappingRules {
        MappingRules::new(&["title"]).with_mapping("p_name", &["title"]).require("title")
    }

    #[test]
    fn test_empty_batch() {
        let result = map_batch(&[], &title_rules());
        assert!(result.mapped_rows.is_empty());
        assert!(result.errors.is_empty());
        assert_eq!(result.stats.total_rows, 0);
        assert!(result.stats.missing_fields_across_dataset.is_empty());
    }

    #[test]
    fn test_valid_and_invalid_rows() {
        let rows = vec![json!({ "p_name": "Battery AA" }), json!({ "p_name": "" })];
        let result = map_batch(&rows, &title_rules());

        assert_eq!(result.stats.total_rows, 2);
        assert_eq!(result.stats.valid_rows, 1);
        assert_eq!(result.stats.invalid_rows, 1);
        assert_eq!(result.mapped_rows.len(), 1);
        assert_eq!(result.mapped_rows[0]["title"], "Battery AA");
        assert_eq!(result.error_messages(), vec!["Row 2: Required field missing: title"]);
        assert_eq!(
            result.stats.missing_fields_across_dataset,
            BTreeSet::from(["title".to_string()])
        );
    }

    #[test]
    fn test_processing_error_does_not_abort() {
        let mut rows: Vec<Value> = (0..10).map(|i| json!({ "p_name": format!("item {}", i) })).collect();
        rows[4] = json!({ "p_name": ["nested"] });

        let result = map_batch(&rows, &title_rules());
        assert_eq!(result.stats.failed_rows, 1);
        assert_eq!(result.stats.valid_rows, 9);
        assert_eq!(result.mapped_rows.len(), 9);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].row, 5);
        assert_eq!(result.errors[0].kind, IssueKind::Processing);
    }

    #[test]
    fn test_counts_partition_total() {
        let rows = vec![
            json!({ "p_name": "a" }),
            json!({ "p_name": "" }),
            json!(42),
            json!({ "p_name": "b" }),
        ];
        let result = map_batch(&rows, &title_rules());
        let s = &result.stats;
        assert_eq!(s.valid_rows + s.invalid_rows + s.failed_rows, s.total_rows);
        assert_eq!(result.mapped_rows.len(), s.valid_rows);
    }

    #[test]
    fn test_warnings_are_row_tagged() {
        let rules = MappingRules::new(&["slug"]).with_auto_generate(
            "slug",
            "p_name",
            "{{dependsOn}}",
            Some("none"),
        );
        let rows = vec![json!({ "p_name": "x" }), json!({})];
        let result = map_batch(&rows, &rules);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].row, 2);
        assert_eq!(result.warnings[0].kind, IssueKind::Transformation);
        assert_eq!(result.stats.valid_rows, 2);
    }

    #[test]
    fn test_map_records() {
        let rows: Vec<SourceRow> = vec![
            json!({ "p_name": "a" }).as_object().cloned().unwrap(),
            json!({ "other": "b" }).as_object().cloned().unwrap(),
        ];
        let result = map_records(&rows, &title_rules());
        assert_eq!(result.stats.valid_rows, 1);
        assert_eq!(result.stats.invalid_rows, 1);
    }
}
