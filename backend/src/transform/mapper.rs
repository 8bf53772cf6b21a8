//! Row Mapper
//!
//! Maps one flat source record onto the target schema. Steps run in a fixed
//! order, and the order matters:
//!
//! 1. every target field starts as `""`
//! 2. `mapping` (priority lists resolve conflicts)
//! 3. `fixedValues` overwrite mapped data
//! 4. `autoGenerate` reads the *source* row
//! 5. `transformations` see the final value, whatever produced it
//! 6. validation
//!
//! Targets with a priority list are sticky: the first source in list order
//! that is non-empty wins. Targets without one are last-writer-wins in mapping
//! iteration order. Both policies are intentional.

use serde_json::Value;
use std::collections::HashSet;

use crate::error::RowProcessingError;
use crate::models::{MappedRow, RowOutcome, SourceRow};
use crate::rules::MappingRules;
use crate::validation::{format_number, parse_number, validate};

/// Map a JSON value that should be a flat object.
pub fn map_value(row: &Value, rules: &MappingRules) -> Result<RowOutcome, RowProcessingError> {
    match row {
        Value::Object(obj) => map_row(obj, rules),
        other => Err(RowProcessingError::NotAnObject(kind_of(other))),
    }
}

/// Map a single source row and validate the result.
///
/// Fails only when the row cannot be read (a field the rules depend on holds
/// a nested value). Validation problems are reported in
/// [`RowOutcome::errors`], informational notes in [`RowOutcome::warnings`].
pub fn map_row(source: &SourceRow, rules: &MappingRules) -> Result<RowOutcome, RowProcessingError> {
    for field in rules.read_fields() {
        if let Some(value) = source.get(field) {
            if value.is_array() || value.is_object() {
                return Err(RowProcessingError::NestedValue {
                    field: field.to_string(),
                    kind: kind_of(value),
                });
            }
        }
    }

    let mut warnings = Vec::new();

    // 1. Initialize
    let mut row: MappedRow = rules
        .target_fields()
        .into_iter()
        .map(|f| (f.to_string(), String::new()))
        .collect();

    // 2. Mapping
    apply_mapping(source, rules, &mut row);

    // 3. Fixed values
    for (target, value) in &rules.fixed_values {
        row.insert(target.clone(), scalar_text(value).unwrap_or_default());
    }

    // 4. Auto-generate
    for (target, rule) in &rules.auto_generate {
        match source_text(source, &rule.depends_on) {
            Some(dep) => {
                row.insert(target.clone(), rule.render(&dep));
            }
            None => match &rule.fallback {
                Some(fallback) => {
                    row.insert(target.clone(), fallback.clone());
                    warnings.push(format!(
                        "Field '{}' used fallback '{}': dependency '{}' is missing",
                        target, fallback, rule.depends_on
                    ));
                }
                None => warnings.push(format!(
                    "Field '{}' not generated: dependency '{}' is missing",
                    target, rule.depends_on
                )),
            },
        }
    }

    // 5. Transformations
    for (target, transformation) in &rules.transformations {
        let Some(n) = row.get(target).and_then(|v| parse_number(v)) else {
            continue;
        };
        match transformation.apply(n) {
            Ok(result) => {
                row.insert(target.clone(), format_number(result));
            }
            Err(e) => warnings.push(format!(
                "Transformation of field '{}' failed, value kept: {}",
                target, e
            )),
        }
    }

    // 6. Validate
    let errors = validate(&row, rules);

    Ok(RowOutcome {
        row,
        errors,
        warnings,
    })
}

fn apply_mapping(source: &SourceRow, rules: &MappingRules, row: &mut MappedRow) {
    let mut assigned: HashSet<&str> = HashSet::new();

    for (source_field, targets) in &rules.mapping {
        let Some(value) = source_text(source, source_field) else {
            continue;
        };

        for target in targets {
            match rules.mapping_priority.get(target) {
                Some(priority) => {
                    if assigned.contains(target.as_str()) || !priority.contains(source_field) {
                        continue;
                    }
                    // Resolve by list order, not by which source we reached first.
                    if let Some(winner) = resolve_priority(source, rules, target, priority) {
                        row.insert(target.clone(), winner);
                        assigned.insert(target.as_str());
                    }
                }
                None => {
                    row.insert(target.clone(), value.clone());
                }
            }
        }
    }
}

/// First source in `priority` that maps to `target` and is non-empty.
fn resolve_priority(
    source: &SourceRow,
    rules: &MappingRules,
    target: &str,
    priority: &[String],
) -> Option<String> {
    priority
        .iter()
        .filter(|s| {
            rules
                .mapping
                .get(s.as_str())
                .is_some_and(|targets| targets.iter().any(|t| t == target))
        })
        .find_map(|s| source_text(source, s))
}

/// Non-empty text of a source field; `None` when absent, null or blank.
pub fn source_text(source: &SourceRow, field: &str) -> Option<String> {
    source
        .get(field)
        .and_then(scalar_text)
        .filter(|s| !s.trim().is_empty())
}

/// String form of a scalar JSON value. Nested values and null have none.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) => format_number(f),
            _ => n.to_string(),
        }),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
