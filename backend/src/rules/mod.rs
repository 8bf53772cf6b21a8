//! Rule Store: the declarative mapping-rules document.
//!
//! A [`MappingRules`] value is loaded once per run and never mutated by the
//! engine. Loading a document twice yields two independent instances; there is
//! no process-wide cache.
//!
//! # Document shape
//!
//! ```json
//! {
//!   "targetSchema": ["title", "sku", "weight_kg"],
//!   "mapping": { "p_name": ["title"], "ean": ["sku"], "weight_g": ["weight_kg"] },
//!   "mappingPriority": { "sku": ["ean", "mpn"] },
//!   "fixedValues": { "currency": "EUR" },
//!   "autoGenerate": { "slug": { "dependsOn": "p_name", "rule": "p-{{dependsOn}}", "fallback": "untitled" } },
//!   "transformations": { "weight_kg": { "type": "unit_conversion", "formula": "value / 1000" } },
//!   "validation": { "required": ["title"], "dataTypes": { "weight_kg": "number" }, "ranges": { "weight_kg": { "min": 0, "max": 1000 } } },
//!   "outputFormat": { "delimiter": ",", "includeHeader": true, "columns": ["title", "sku", "weight_kg"] }
//! }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use fieldmap::MappingRules;
//!
//! let rules = MappingRules::load(&std::fs::read_to_string("rules.json")?)?;
//! println!("{} output columns", rules.output_format.columns.len());
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

use crate::error::{FormulaError, RulesParseError, RulesResult};
use crate::transform::formula::Formula;

/// Top-level keys every rules document must carry.
pub const REQUIRED_KEYS: [&str; 3] = ["mapping", "validation", "outputFormat"];

/// A complete, immutable set of mapping rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRules {
    /// Ordered output field names.
    #[serde(default)]
    pub target_schema: Vec<String>,

    /// Source field -> target fields it may populate (document order).
    pub mapping: IndexMap<String, Vec<String>>,

    /// Target field -> ordered source fields; first non-empty source wins.
    #[serde(default)]
    pub mapping_priority: IndexMap<String, Vec<String>>,

    /// Target field -> constant written to every row after mapping.
    #[serde(default)]
    pub fixed_values: IndexMap<String, Value>,

    /// Target field -> template computed from a source field.
    #[serde(default)]
    pub auto_generate: IndexMap<String, AutoGenerateRule>,

    /// Target field -> numeric transformation applied last.
    #[serde(default)]
    pub transformations: IndexMap<String, Transformation>,

    pub validation: ValidationRules,

    pub output_format: OutputFormat,
}

/// Template-based derivation of one target field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoGenerateRule {
    /// Source field whose value is substituted.
    pub depends_on: String,
    /// Template containing `{{dependsOn}}` (or `{{<depends_on>}}`).
    pub rule: String,
    /// Used verbatim when the dependency is missing or empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// Placeholder accepted in every auto-generate template.
pub const DEPENDS_ON_PLACEHOLDER: &str = "{{dependsOn}}";

impl AutoGenerateRule {
    /// Replace every placeholder occurrence with `value`.
    ///
    /// Single left-to-right pass: text coming from `value` is never scanned
    /// for placeholders.
    pub fn render(&self, value: &str) -> String {
        let named = format!("{{{{{}}}}}", self.depends_on);
        let placeholders = [DEPENDS_ON_PLACEHOLDER, named.as_str()];

        let mut out = String::with_capacity(self.rule.len() + value.len());
        let mut rest = self.rule.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            match placeholders.iter().find(|p| tail.starts_with(**p)) {
                Some(p) => {
                    out.push_str(value);
                    rest = &tail[p.len()..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Numeric transformation of a target field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transformation {
    /// Arithmetic expression over `value`, e.g. `value / 1000`. Parsed when
    /// the rules are loaded.
    UnitConversion { formula: Formula },

    /// `value / by`
    Divide { by: f64 },

    /// `value * by`
    Multiply { by: f64 },
}

impl Transformation {
    pub fn unit_conversion(formula: &str) -> Result<Self, FormulaError> {
        Ok(Transformation::UnitConversion {
            formula: Formula::parse(formula)?,
        })
    }

    /// Apply to a numeric value. Non-finite results are errors.
    pub fn apply(&self, value: f64) -> Result<f64, FormulaError> {
        let result = match self {
            Transformation::UnitConversion { formula } => formula.eval(value)?,
            Transformation::Divide { by } => value / by,
            Transformation::Multiply { by } => value * by,
        };
        if result.is_finite() {
            Ok(result)
        } else {
            Err(FormulaError::NonFinite)
        }
    }
}

/// Per-field validation constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    /// Fields that must be non-empty.
    #[serde(default)]
    pub required: Vec<String>,

    /// Field -> expected data type.
    #[serde(default)]
    pub data_types: IndexMap<String, DataType>,

    /// Field -> inclusive numeric bounds.
    #[serde(default)]
    pub ranges: IndexMap<String, Range>,
}

/// Declared data type of a target field.
///
/// Only `number` is checked; other names are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Number,
    Other(String),
}

impl From<String> for DataType {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("number") {
            DataType::Number
        } else {
            DataType::Other(s)
        }
    }
}

impl From<DataType> for String {
    fn from(t: DataType) -> Self {
        match t {
            DataType::Number => "number".to_string(),
            DataType::Other(s) => s,
        }
    }
}

/// Inclusive numeric range. A missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |b: Option<f64>| b.map_or_else(|| "*".to_string(), |v| v.to_string());
        write!(f, "[{}, {}]", bound(self.min), bound(self.max))
    }
}

/// CSV output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFormat {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    #[serde(default = "default_include_header")]
    pub include_header: bool,

    /// Exactly the fields emitted, in this order.
    pub columns: Vec<String>,
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_include_header() -> bool {
    true
}

impl OutputFormat {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            delimiter: default_delimiter(),
            include_header: default_include_header(),
            columns,
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

impl MappingRules {
    /// Create rules emitting `columns`, with no mapping and no validation.
    pub fn new(columns: &[&str]) -> Self {
        Self {
            target_schema: Vec::new(),
            mapping: IndexMap::new(),
            mapping_priority: IndexMap::new(),
            fixed_values: IndexMap::new(),
            auto_generate: IndexMap::new(),
            transformations: IndexMap::new(),
            validation: ValidationRules::default(),
            output_format: OutputFormat::new(columns.iter().map(|c| c.to_string()).collect()),
        }
    }

    /// Parse and validate a rules document.
    ///
    /// Fails fast: malformed JSON, a missing top-level key, a schema mismatch
    /// or an unusable value all return [`RulesParseError`].
    pub fn load(source: &str) -> RulesResult<Self> {
        let value: Value = serde_json::from_str(source).map_err(RulesParseError::Malformed)?;
        Self::from_value(value)
    }

    /// Read and load a rules document from disk.
    pub fn load_path(path: impl AsRef<Path>) -> RulesResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::load(&content)
    }

    /// Load from an already-parsed JSON value.
    pub fn from_value(value: Value) -> RulesResult<Self> {
        let obj = value.as_object().ok_or(RulesParseError::NotAnObject)?;
        for key in REQUIRED_KEYS {
            if !obj.contains_key(key) {
                return Err(RulesParseError::MissingKey(key));
            }
        }

        check_schema(&value)?;

        let rules: MappingRules =
            serde_json::from_value(value).map_err(|e| RulesParseError::Invalid(e.to_string()))?;
        rules.check()?;

        tracing::debug!(
            sources = rules.mapping.len(),
            columns = rules.output_format.columns.len(),
            "mapping rules loaded"
        );
        Ok(rules)
    }

    /// Serialize to a pretty JSON document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Semantic checks the schema cannot express.
    fn check(&self) -> RulesResult<()> {
        if self
            .output_format
            .delimiter
            .contains(|c: char| matches!(c, '"' | '\n' | '\r'))
        {
            return Err(RulesParseError::Invalid(format!(
                "delimiter {:?} cannot contain quotes or newlines",
                self.output_format.delimiter
            )));
        }
        for (field, range) in &self.validation.ranges {
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return Err(RulesParseError::Invalid(format!(
                        "range for '{}' has min {} greater than max {}",
                        field, min, max
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every field of the target row: schema first, then any extra output column.
    pub fn target_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.target_schema.iter().map(String::as_str).collect();
        for column in &self.output_format.columns {
            if !fields.contains(&column.as_str()) {
                fields.push(column);
            }
        }
        fields
    }

    /// Source fields the mapper reads from a row.
    pub fn read_fields(&self) -> impl Iterator<Item = &str> {
        self.mapping
            .keys()
            .map(String::as_str)
            .chain(self.auto_generate.values().map(|r| r.depends_on.as_str()))
    }

    /// All source columns referenced anywhere in the rules, sorted and deduplicated.
    pub fn source_fields(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .read_fields()
            .map(str::to_string)
            .chain(self.mapping_priority.values().flatten().cloned())
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }

    /// Validate that all mapped source columns exist in the CSV headers
    pub fn validate_headers(&self, headers: &[String]) -> Result<(), Vec<String>> {
        let missing: Vec<String> = self
            .mapping
            .keys()
            .filter(|col| !headers.iter().any(|h| h == *col))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }

    // -------------------------------------------------------------------------
    // Builders
    // -------------------------------------------------------------------------

    /// Map `source` onto one or more target fields.
    pub fn with_mapping(mut self, source: &str, targets: &[&str]) -> Self {
        self.mapping
            .insert(source.to_string(), targets.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Set the tie-break order of sources for `target`.
    pub fn with_priority(mut self, target: &str, sources: &[&str]) -> Self {
        self.mapping_priority
            .insert(target.to_string(), sources.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_fixed_value(mut self, target: &str, value: impl Into<Value>) -> Self {
        self.fixed_values.insert(target.to_string(), value.into());
        self
    }

    pub fn with_auto_generate(
        mut self,
        target: &str,
        depends_on: &str,
        rule: &str,
        fallback: Option<&str>,
    ) -> Self {
        self.auto_generate.insert(
            target.to_string(),
            AutoGenerateRule {
                depends_on: depends_on.to_string(),
                rule: rule.to_string(),
                fallback: fallback.map(str::to_string),
            },
        );
        self
    }

    pub fn with_transformation(mut self, target: &str, transformation: Transformation) -> Self {
        self.transformations.insert(target.to_string(), transformation);
        self
    }

    pub fn require(mut self, field: &str) -> Self {
        self.validation.required.push(field.to_string());
        self
    }

    pub fn with_data_type(mut self, field: &str, data_type: DataType) -> Self {
        self.validation.data_types.insert(field.to_string(), data_type);
        self
    }

    pub fn with_range(mut self, field: &str, range: Range) -> Self {
        self.validation.ranges.insert(field.to_string(), range);
        self
    }

    pub fn with_delimiter(mut self, delimiter: &str) -> Self {
        self.output_format.delimiter = delimiter.to_string();
        self
    }

    pub fn with_header(mut self, include_header: bool) -> Self {
        self.output_format.include_header = include_header;
        self
    }
}

/// Validate the raw document against the embedded JSON Schema.
fn check_schema(value: &Value) -> RulesResult<()> {
    let schema: Value = serde_json::from_str(include_str!("../../schemas/mapping-rules.json"))
        .expect("Invalid embedded schema");
    let validator = jsonschema::draft7::new(&schema)
        .map_err(|e| RulesParseError::Invalid(format!("rules schema: {}", e)))?;

    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(RulesParseError::Schema { errors })
    }
}

/// Sample rules for a battery catalog import (documentation and CLI).
pub fn example_rules() -> MappingRules {
    MappingRules::new(&["sku", "title", "brand", "weight_kg", "capacity_ah", "currency", "slug"])
        .with_mapping("ean", &["sku"])
        .with_mapping("mpn", &["sku"])
        .with_mapping("p_name", &["title"])
        .with_mapping("manufacturer", &["brand"])
        .with_mapping("weight_g", &["weight_kg"])
        .with_mapping("capacity_mah", &["capacity_ah"])
        .with_priority("sku", &["ean", "mpn"])
        .with_fixed_value("currency", "EUR")
        .with_auto_generate("slug", "p_name", "battery-{{dependsOn}}", Some("battery"))
        .with_transformation(
            "weight_kg",
            Transformation::unit_conversion("value / 1000").expect("valid example formula"),
        )
        .with_transformation("capacity_ah", Transformation::Divide { by: 1000.0 })
        .require("sku")
        .require("title")
        .with_data_type("weight_kg", DataType::Number)
        .with_data_type("capacity_ah", DataType::Number)
        .with_range("weight_kg", Range::new(0.0, 1000.0))
}
