//! Error types for the mapping and enrichment engine.
//!
//! One error type per layer:
//!
//! - [`RulesParseError`] - Malformed or incomplete rules document (fatal)
//! - [`RowProcessingError`] - A single source row could not be mapped (non-fatal)
//! - [`FormulaError`] - A transformation formula failed to parse or evaluate
//! - [`RegistryError`] - Stored rule set errors
//! - [`PipelineError`] - Top-level orchestration errors
//! - [`ServerError`] - HTTP layer errors
//! - [`ConfigError`] - Invalid environment configuration
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

use crate::parser::CsvError;

// =============================================================================
// Rules Errors
// =============================================================================

/// Errors while loading a mapping-rules document.
///
/// Any of these aborts a mapping run before a single row is processed.
#[derive(Debug, Error)]
pub enum RulesParseError {
    /// The document is not well-formed JSON.
    #[error("Rules document is not well-formed JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The document is JSON but not an object.
    #[error("Rules document must be a JSON object")]
    NotAnObject,

    /// A required top-level key is absent.
    #[error("Rules document is missing required key '{0}'")]
    MissingKey(&'static str),

    /// The document does not match the rules schema.
    #[error("Rules document does not match the expected shape: {}", .errors.join("; "))]
    Schema { errors: Vec<String> },

    /// The document parsed but carries an unusable value.
    #[error("Invalid rules: {0}")]
    Invalid(String),

    /// Failed to read the document from disk.
    #[error("Failed to read rules document: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Row Errors
// =============================================================================

/// Unexpected failure while mapping a single source row.
///
/// The row is excluded from the batch output; the batch continues.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RowProcessingError {
    /// The row is not a flat key-value record.
    #[error("Source row is not an object (found {0})")]
    NotAnObject(&'static str),

    /// A field read by the rules holds a nested value.
    #[error("Source field '{field}' holds a nested {kind}, expected a scalar")]
    NestedValue { field: String, kind: &'static str },
}

/// Errors from the arithmetic formula evaluator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FormulaError {
    /// Formula text is empty.
    #[error("Formula is empty")]
    Empty,

    /// A character that is not part of the grammar.
    #[error("Unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    /// Input ended in the middle of an expression.
    #[error("Unexpected end of formula")]
    UnexpectedEnd,

    /// Trailing input after a complete expression.
    #[error("Unexpected token at position {0}")]
    TrailingInput(usize),

    /// Only `value` may be referenced.
    #[error("Unknown variable '{0}' (only 'value' is allowed)")]
    UnknownVariable(String),

    /// Numeric literal could not be parsed.
    #[error("Invalid number literal '{0}'")]
    InvalidNumber(String),

    /// Result is infinite or NaN (e.g. division by zero).
    #[error("Formula result is not a finite number")]
    NonFinite,

    /// Nesting deeper than the parser allows.
    #[error("Formula is nested too deeply (limit {0})")]
    TooDeep(usize),
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors from the stored rules registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Rule set not found.
    #[error("Rule set not found: {0}")]
    NotFound(String),

    /// Imported document is not a valid rules document.
    #[error("Invalid rules document: {0}")]
    InvalidRules(#[from] RulesParseError),

    /// IO error.
    #[error("Registry IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error.
    #[error("Registry JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the error type returned by [`crate::transform::pipeline::enrich_file`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// CSV ingest error.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// Rules document error.
    #[error("Rules error: {0}")]
    Rules(#[from] RulesParseError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// No records to map.
    #[error("No records to map")]
    EmptyInput,

    /// No rule set was given and none in the registry fits the input.
    #[error("No rule set available for columns: {}", .0.join(", "))]
    NoRules(Vec<String>),
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Config Errors
// =============================================================================

/// Invalid environment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for rules loading.
pub type RulesResult<T> = Result<T, RulesParseError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // RulesParseError -> PipelineError
        let rules_err = RulesParseError::MissingKey("mapping");
        let pipeline_err: PipelineError = rules_err.into();
        assert!(pipeline_err.to_string().contains("mapping"));

        // PipelineError -> ServerError
        let server_err: ServerError = PipelineError::EmptyInput.into();
        assert!(server_err.to_string().contains("No records"));
    }

    #[test]
    fn test_schema_error_format() {
        let err = RulesParseError::Schema {
            errors: vec!["a is wrong".into(), "b is wrong".into()],
        };
        assert_eq!(
            err.to_string(),
            "Rules document does not match the expected shape: a is wrong; b is wrong"
        );
    }

    #[test]
    fn test_nested_value_format() {
        let err = RowProcessingError::NestedValue {
            field: "dims".into(),
            kind: "array",
        };
        let msg = err.to_string();
        assert!(msg.contains("dims"));
        assert!(msg.contains("array"));
    }
}
