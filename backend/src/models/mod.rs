//! Domain models shared by the mapper, validator and serializer.
//!
//! - [`SourceRow`] - Flat source record (CSV row or scraped attributes)
//! - [`MappedRow`] - Target record, ordered by schema/output columns
//! - [`RowOutcome`] - Result of mapping a single row
//! - [`RowIssue`] - Row-tagged error or warning
//! - [`BatchResult`] / [`BatchStats`] - Aggregated batch output

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// A flat source record: field name to scalar (string, number, boolean, null).
pub type SourceRow = Map<String, Value>;

/// A mapped target record. Keys keep schema/column order; values are strings.
pub type MappedRow = IndexMap<String, String>;

// =============================================================================
// Single row
// =============================================================================

/// Output of mapping one source row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowOutcome {
    /// The mapped record (present even when invalid).
    pub row: MappedRow,
    /// Validation errors; non-empty means the row is rejected.
    pub errors: Vec<String>,
    /// Non-fatal notes (auto-generate fallback, formula failure).
    pub warnings: Vec<String>,
}

impl RowOutcome {
    /// A row is valid when validation reported nothing.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

// =============================================================================
// Row-tagged issues
// =============================================================================

/// Category of a row-tagged issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    /// Required/type/range check failed; row rejected.
    Validation,
    /// Unexpected failure while mapping; row rejected.
    Processing,
    /// Informational; row kept.
    Transformation,
}

/// An error or warning attached to the source row it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowIssue {
    /// 1-based row number in the input batch.
    pub row: usize,
    pub kind: IssueKind,
    pub message: String,
}

impl RowIssue {
    pub fn new(row: usize, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            row,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row {}: {}", self.row, self.message)
    }
}

// =============================================================================
// Batch
// =============================================================================

/// Aggregate counts for a batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    /// Rows that failed with a processing error (neither valid nor invalid).
    pub failed_rows: usize,
    /// Required fields that were empty on at least one row.
    pub missing_fields_across_dataset: BTreeSet<String>,
}

/// Result of mapping a batch of source rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Valid rows only, in input order.
    pub mapped_rows: Vec<MappedRow>,
    pub errors: Vec<RowIssue>,
    pub warnings: Vec<RowIssue>,
    pub stats: BatchStats,
}

impl BatchResult {
    /// Check if every row was valid.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Row-tagged error strings, e.g. `"Row 3: Required field missing: sku"`.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Row-tagged warning strings.
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }

    /// Get summary statistics
    pub fn summary(&self) -> String {
        format!(
            "{} of {} rows mapped, {} invalid, {} failed, {} warnings",
            self.stats.valid_rows,
            self.stats.total_rows,
            self.stats.invalid_rows,
            self.stats.failed_rows,
            self.warnings.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_issue_display() {
        let issue = RowIssue::new(5, IssueKind::Processing, "boom");
        assert_eq!(issue.to_string(), "Row 5: boom");
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let stats = BatchStats {
            total_rows: 2,
            valid_rows: 1,
            invalid_rows: 1,
            failed_rows: 0,
            missing_fields_across_dataset: BTreeSet::from(["title".to_string()]),
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["totalRows"], 2);
        assert_eq!(json["missingFieldsAcrossDataset"][0], "title");
    }

    #[test]
    fn test_summary() {
        let mut result = BatchResult::default();
        result.stats.total_rows = 3;
        result.stats.valid_rows = 2;
        result.stats.invalid_rows = 1;
        assert_eq!(result.summary(), "2 of 3 rows mapped, 1 invalid, 0 failed, 0 warnings");
    }
}
