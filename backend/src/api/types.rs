//! REST API types.
//!
//! Field names are camelCase to match the rules document format.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{BatchStats, MappedRow, RowIssue};
use crate::registry::StoredRules;
use crate::transform::pipeline::{CsvInfo, EnrichResult};

/// Response sent after an upload was mapped.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapResponse {
    /// Unique job identifier
    pub job_id: String,

    /// "ready" when every row was valid, "warning" otherwise
    pub status: String,

    /// Valid rows, in input order
    pub mapped_rows: Vec<MappedRow>,

    pub errors: Vec<RowIssue>,
    pub warnings: Vec<RowIssue>,
    pub stats: BatchStats,
    pub csv_info: CsvMetadata,

    /// Stored rule set used, if any
    pub rules_id: Option<String>,
}

/// CSV file metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvMetadata {
    pub encoding: String,
    pub delimiter: String,
    pub row_count: usize,
    pub columns: Vec<String>,
}

impl From<CsvInfo> for CsvMetadata {
    fn from(info: CsvInfo) -> Self {
        Self {
            encoding: info.encoding,
            delimiter: info.delimiter.to_string(),
            row_count: info.row_count,
            columns: info.headers,
        }
    }
}

impl From<EnrichResult> for MapResponse {
    fn from(result: EnrichResult) -> Self {
        let batch = result.batch;
        MapResponse {
            job_id: Uuid::new_v4().to_string(),
            status: if batch.is_clean() { "ready" } else { "warning" }.to_string(),
            mapped_rows: batch.mapped_rows,
            errors: batch.errors,
            warnings: batch.warnings,
            stats: batch.stats,
            csv_info: result.csv_info.into(),
            rules_id: result.rules_id,
        }
    }
}

/// Stored rule set as listed by `GET /api/rules`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesSummary {
    pub id: String,
    pub name: String,
    pub source_columns: Vec<String>,
    pub output_columns: Vec<String>,
    pub success_rate: f64,
    pub use_count: u32,
    pub created_at: String,
    pub last_used: Option<String>,
}

impl From<&StoredRules> for RulesSummary {
    fn from(stored: &StoredRules) -> Self {
        Self {
            id: stored.id.clone(),
            name: stored.name.clone(),
            source_columns: stored.source_columns.clone(),
            output_columns: stored.rules.output_format.columns.clone(),
            success_rate: stored.success_rate,
            use_count: stored.use_count,
            created_at: stored.created_at.clone(),
            last_used: stored.last_used.clone(),
        }
    }
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "jobId": Uuid::new_v4().to_string(),
        "status": "error",
        "error": error,
        "mappedRows": [],
    })
}
