//! High-level pipeline API: CSV in, mapped rows and CSV out.
//!
//! Combines ingest, rule selection, batch mapping and serialization. Rules
//! come from, in order of precedence:
//!
//! 1. an explicit rules file,
//! 2. an explicit registry id,
//! 3. the best compatible registry entry that maps at least one valid row.
//!
//! # Example
//!
//! ```rust,ignore
//! use fieldmap::pipeline::{enrich_file, EnrichOptions};
//!
//! let options = EnrichOptions {
//!     rules_path: Some("rules/battery.json".into()),
//!     ..Default::default()
//! };
//! let result = enrich_file("supplier.csv", &options)?;
//! std::fs::write("catalog.csv", &result.csv)?;
//! ```

use serde::Serialize;
use std::path::{Path, PathBuf};

use super::batch::map_records;
use crate::api::logs::{log_error, log_info, log_info_indent, log_success, log_warning};
use crate::error::{PipelineError, PipelineResult};
use crate::export::to_csv;
use crate::models::{BatchResult, SourceRow};
use crate::parser::{parse_bytes_auto, parse_csv_file_auto, ParseResult};
use crate::registry::RulesRegistry;
use crate::rules::MappingRules;

/// Row-tagged errors echoed to the progress log before truncating.
const LOGGED_ERRORS: usize = 5;

/// Options for the enrichment pipeline
#[derive(Debug, Clone, Default)]
pub struct EnrichOptions {
    /// Use this rules document instead of the registry
    pub rules_path: Option<PathBuf>,

    /// Use this stored rule set
    pub rules_id: Option<String>,

    /// Don't fall back to compatible stored rule sets
    pub no_cache: bool,

    /// Registry directory (defaults to the configured one)
    pub registry_dir: Option<PathBuf>,
}

impl EnrichOptions {
    fn registry(&self) -> RulesRegistry {
        match &self.registry_dir {
            Some(dir) => RulesRegistry::with_dir(dir),
            None => RulesRegistry::new(),
        }
    }
}

/// CSV file information
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvInfo {
    pub encoding: String,
    pub delimiter: char,
    pub headers: Vec<String>,
    pub row_count: usize,
}

impl From<&ParseResult> for CsvInfo {
    fn from(parsed: &ParseResult) -> Self {
        Self {
            encoding: parsed.encoding.clone(),
            delimiter: parsed.delimiter,
            headers: parsed.headers.clone(),
            row_count: parsed.records.len(),
        }
    }
}

/// Result of a complete enrichment run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichResult {
    pub batch: BatchResult,

    /// Valid rows serialized per the rules' output format
    pub csv: String,

    /// Registry id when a stored rule set was used
    pub rules_id: Option<String>,

    pub csv_info: CsvInfo,
}

/// Enrich a CSV file.
pub fn enrich_file(path: impl AsRef<Path>, options: &EnrichOptions) -> PipelineResult<EnrichResult> {
    let parsed = parse_csv_file_auto(path)?;
    enrich_parsed(parsed, options)
}

/// Enrich CSV bytes (an upload, a download, stdin).
pub fn enrich_bytes(bytes: &[u8], options: &EnrichOptions) -> PipelineResult<EnrichResult> {
    let parsed = parse_bytes_auto(bytes)?;
    enrich_parsed(parsed, options)
}

/// Enrich records that were already parsed or scraped.
pub fn enrich_records(
    records: Vec<SourceRow>,
    headers: Vec<String>,
    options: &EnrichOptions,
) -> PipelineResult<EnrichResult> {
    let parsed = ParseResult {
        records,
        encoding: "utf-8".to_string(),
        delimiter: ',',
        headers,
    };
    enrich_parsed(parsed, options)
}

/// Map parsed records with a rules instance the caller already holds.
pub fn enrich_with_rules(parsed: &ParseResult, rules: &MappingRules) -> EnrichResult {
    run(parsed, rules, None)
}

fn enrich_parsed(parsed: ParseResult, options: &EnrichOptions) -> PipelineResult<EnrichResult> {
    log_info("📖 Reading CSV...");
    log_success(format!("Detected encoding: {}", parsed.encoding));
    log_success(format!("Detected separator: '{}'", format_delimiter(parsed.delimiter)));
    log_success(format!("Read {} rows", parsed.records.len()));

    if parsed.records.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    log_info(format!("📋 CSV has {} columns:", parsed.headers.len()));
    for (i, col) in parsed.headers.iter().enumerate() {
        log_info_indent(format!("[{:2}] {}", i + 1, col), 1);
    }

    // Option 1: explicit rules file
    if let Some(ref path) = options.rules_path {
        log_info(format!("Using rules file: {}", path.display()));
        let rules = MappingRules::load_path(path)?;
        return Ok(run(&parsed, &rules, None));
    }

    let mut registry = options.registry();

    // Option 2: explicit stored rule set
    if let Some(ref id) = options.rules_id {
        let stored = registry.get(id)?;
        log_info(format!("Using stored rules \"{}\" ({})", stored.name, id));
        let rules = stored.rules.clone();
        let result = run(&parsed, &rules, Some(id.clone()));
        record_use(&mut registry, id, &result.batch);
        return Ok(result);
    }

    // Option 3: compatible stored rule sets, best first
    if !options.no_cache {
        log_info("🔍 Looking for compatible stored rules...");
        let candidates: Vec<(String, String, MappingRules, f64)> = registry
            .find_compatible(&parsed.headers)
            .into_iter()
            .map(|(s, score)| (s.id.clone(), s.name.clone(), s.rules.clone(), score))
            .collect();

        if candidates.is_empty() {
            log_warning("No compatible stored rules found");
        }

        for (i, (id, name, rules, score)) in candidates.iter().enumerate() {
            log_info(format!(
                "→ Trying {}/{}: {} (column match {:.0}%)",
                i + 1,
                candidates.len(),
                name,
                score * 100.0
            ));
            let result = run(&parsed, rules, Some(id.clone()));
            record_use(&mut registry, id, &result.batch);

            if result.batch.stats.valid_rows > 0 {
                log_success(format!("✅ Rules \"{}\" worked", name));
                return Ok(result);
            }
            log_warning(format!("Rules \"{}\" produced no valid rows", name));
        }
    }

    Err(PipelineError::NoRules(parsed.headers))
}

/// Map, report and serialize.
fn run(parsed: &ParseResult, rules: &MappingRules, rules_id: Option<String>) -> EnrichResult {
    if let Err(missing) = rules.validate_headers(&parsed.headers) {
        log_warning(format!("Mapped columns absent from CSV: {}", missing.join(", ")));
    }

    log_info("⚙️  Mapping rows...");
    let batch = map_records(&parsed.records, rules);
    report(&batch);

    let csv = to_csv(&batch.mapped_rows, rules);

    EnrichResult {
        batch,
        csv,
        rules_id,
        csv_info: CsvInfo::from(parsed),
    }
}

fn record_use(registry: &mut RulesRegistry, id: &str, batch: &BatchResult) {
    if let Err(e) = registry.update_stats(id, batch.stats.valid_rows > 0) {
        tracing::warn!(%id, error = %e, "failed to update rules stats");
    }
}

fn report(batch: &BatchResult) {
    let stats = &batch.stats;
    if batch.is_clean() {
        log_success(format!("All {} rows valid", stats.total_rows));
    } else {
        log_success(format!("Valid: {}", stats.valid_rows));
        if stats.invalid_rows > 0 {
            log_error(format!("Invalid: {}", stats.invalid_rows));
        }
        if stats.failed_rows > 0 {
            log_error(format!("Failed: {}", stats.failed_rows));
        }
        for issue in batch.errors.iter().take(LOGGED_ERRORS) {
            log_info_indent(issue.to_string(), 1);
        }
        if batch.errors.len() > LOGGED_ERRORS {
            log_info_indent(format!("... +{} more", batch.errors.len() - LOGGED_ERRORS), 1);
        }
    }

    if !stats.missing_fields_across_dataset.is_empty() {
        let missing: Vec<&str> = stats
            .missing_fields_across_dataset
            .iter()
            .map(String::as_str)
            .collect();
        log_warning(format!("Required fields missing somewhere: {}", missing.join(", ")));
    }
    if !batch.warnings.is_empty() {
        log_warning(format!("{} warnings", batch.warnings.len()));
    }
}

/// Format delimiter for display
fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "TAB".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_csv_str;
    use crate::rules::example_rules;
    use tempfile::tempdir;

    fn title_rules() -> MappingRules {
        MappingRules::new(&["title"]).with_mapping("p_name", &["title"]).require("title")
    }

    #[test]
    fn test_enrich_with_rules() {
        let parsed = parse_csv_str("p_name,sku\nBattery AA,1\n,2\n", ',').unwrap();
        let result = enrich_with_rules(&parsed, &title_rules());

        assert_eq!(result.batch.stats.total_rows, 2);
        assert_eq!(result.batch.stats.valid_rows, 1);
        assert_eq!(result.csv, "title\nBattery AA");
        assert_eq!(result.csv_info.row_count, 2);
        assert!(result.rules_id.is_none());
    }

    #[test]
    fn test_explicit_rules_file() {
        let dir = tempdir().unwrap();
        let rules_path = dir.path().join("rules.json");
        std::fs::write(&rules_path, example_rules().to_json().unwrap()).unwrap();

        let options = EnrichOptions {
            rules_path: Some(rules_path),
            registry_dir: Some(dir.path().join("registry")),
            ..Default::default()
        };
        let csv = "ean;p_name;weight_g\n4006381333931;AA Alkaline;23\n";
        let result = enrich_bytes(csv.as_bytes(), &options).unwrap();

        assert_eq!(result.batch.stats.valid_rows, 1);
        assert_eq!(result.csv_info.delimiter, ';');
        assert!(result.csv.starts_with("sku,title,brand,weight_kg"));
        assert!(result.csv.contains("0.023"));
    }

    #[test]
    fn test_empty_input() {
        let options = EnrichOptions {
            rules_path: Some(PathBuf::from("unused.json")),
            ..Default::default()
        };
        assert!(matches!(
            enrich_bytes(b"p_name\n", &options),
            Err(PipelineError::EmptyInput)
        ));
    }

    #[test]
    fn test_registry_fallback_and_stats() {
        let dir = tempdir().unwrap();
        let id = RulesRegistry::with_dir(dir.path())
            .save(title_rules(), "titles", vec!["p_name".into()])
            .unwrap();

        let options = EnrichOptions {
            registry_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let result = enrich_bytes(b"p_name,other\nCell,x\n", &options).unwrap();
        assert_eq!(result.rules_id.as_deref(), Some(id.as_str()));
        assert_eq!(result.batch.stats.valid_rows, 1);

        let registry = RulesRegistry::with_dir(dir.path());
        assert_eq!(registry.get(&id).unwrap().use_count, 1);
    }

    #[test]
    fn test_no_rules_available() {
        let dir = tempdir().unwrap();
        let options = EnrichOptions {
            registry_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        match enrich_bytes(b"isbn\n123\n", &options) {
            Err(PipelineError::NoRules(headers)) => assert_eq!(headers, vec!["isbn"]),
            other => panic!("expected NoRules, got {:?}", other.map(|r| r.batch)),
        }
    }

    #[test]
    fn test_unknown_rules_id() {
        let dir = tempdir().unwrap();
        let options = EnrichOptions {
            rules_id: Some("missing".into()),
            registry_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            enrich_bytes(b"a\n1\n", &options),
            Err(PipelineError::Registry(_))
        ));
    }
}
