//! # fieldmap - Rule-driven field mapping and CSV enrichment
//!
//! fieldmap takes heterogeneous supplier records (CSV rows or scraped product
//! attributes) and maps them onto a fixed catalog schema using a declarative
//! rules document, then exports the result as CSV.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Source CSV │────▶│   Parser    │────▶│   Mapper    │────▶│ CSV export  │
//! │  (ISO/UTF8) │     │  (auto-enc) │     │ + Validator │     │ (quoted)    │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!                                                ▲
//!                                         ┌──────┴──────┐
//!                                         │ Rules (JSON)│
//!                                         └─────────────┘
//! ```
//!
//! Per row, in this order: initialize every target field to `""`, apply
//! `mapping` (with `mappingPriority`), overwrite with `fixedValues`, derive
//! `autoGenerate` fields, apply `transformations`, validate.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fieldmap::{map_batch, to_csv, MappingRules};
//!
//! let rules = MappingRules::load(&std::fs::read_to_string("rules.json")?)?;
//! let result = map_batch(&rows, &rules);
//! println!("{}", result.summary());
//! std::fs::write("out.csv", to_csv(&result.mapped_rows, &rules))?;
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types, one per layer
//! - [`models`] - Rows, outcomes, batch results
//! - [`rules`] - Rules document loading and checks
//! - [`parser`] - CSV ingest with auto-detection
//! - [`transform`] - Formula, mapper, batch, pipeline
//! - [`validation`] - Required/type/range checks
//! - [`export`] - CSV serialization
//! - [`registry`] - Stored rule sets
//! - [`api`] - HTTP API server
//! - [`config`] / [`logging`] - Runtime configuration and tracing setup

// Core modules
pub mod error;
pub mod models;
pub mod rules;

// Parsing
pub mod parser;

// Transformation
pub mod transform;

// Validation
pub mod validation;

// Output
pub mod export;

// Stored rules
pub mod registry;

// HTTP API
pub mod api;

// Runtime
pub mod config;
pub mod logging;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, FormulaError, PipelineError, RegistryError, RowProcessingError,
    RulesParseError, ServerError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{BatchResult, BatchStats, IssueKind, MappedRow, RowIssue, RowOutcome, SourceRow};

// =============================================================================
// Re-exports - Rules
// =============================================================================

pub use rules::{
    example_rules, AutoGenerateRule, DataType, MappingRules, OutputFormat, Range,
    Transformation, ValidationRules,
};

// =============================================================================
// Re-exports - Engine
// =============================================================================

pub use export::{escape_field, to_csv};
pub use transform::{map_batch, map_records, map_row, map_value, Formula};
pub use validation::{is_valid, missing_required, validate, validate_rows};

// =============================================================================
// Re-exports - CSV Parsing
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_encoding, parse_bytes_auto, parse_csv_file_auto,
    parse_csv_str, CsvError, ParseResult,
};

// =============================================================================
// Re-exports - Registry
// =============================================================================

pub use registry::{RulesRegistry, StoredRules};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::pipeline::{
    enrich_bytes, enrich_file, enrich_records, enrich_with_rules, CsvInfo, EnrichOptions,
    EnrichResult,
};

/// Pipeline entry points under a short path.
pub mod pipeline {
    pub use crate::transform::pipeline::*;
}

// Server
pub mod server {
    pub use crate::api::server::{router, start_server, AppState};
}
