//! End-to-end behavior of the mapping engine through the public API.

use fieldmap::{
    map_batch, map_row, to_csv, DataType, IssueKind, MappedRow, MappingRules, Range,
    RulesParseError, SourceRow, Transformation,
};
use serde_json::{json, Value};

fn source(value: Value) -> SourceRow {
    value.as_object().cloned().expect("object literal")
}

fn battery_rules() -> MappingRules {
    MappingRules::load(
        r#"{
            "mapping": { "p_name": ["title"] },
            "validation": { "required": ["title"] },
            "outputFormat": { "columns": ["title"] }
        }"#,
    )
    .unwrap()
}

#[test]
fn battery_aa_scenario() {
    let rules = battery_rules();
    let rows = vec![json!({ "p_name": "Battery AA" }), json!({ "p_name": "" })];

    let result = map_batch(&rows, &rules);

    assert_eq!(result.mapped_rows.len(), 1);
    assert_eq!(result.mapped_rows[0]["title"], "Battery AA");
    assert_eq!(result.stats.total_rows, 2);
    assert_eq!(result.stats.valid_rows, 1);
    assert_eq!(result.stats.invalid_rows, 1);
    assert_eq!(to_csv(&result.mapped_rows, &rules), "title\nBattery AA");
}

#[test]
fn mapping_is_deterministic() {
    let rules = fieldmap::example_rules();
    let rows: Vec<Value> = (0..20)
        .map(|i| json!({ "ean": format!("400{}", i), "p_name": format!("Cell {}", i), "weight_g": "23" }))
        .collect();

    let first = map_batch(&rows, &rules);
    let second = map_batch(&rows, &rules);
    assert_eq!(first, second);
    assert_eq!(to_csv(&first.mapped_rows, &rules), to_csv(&second.mapped_rows, &rules));
}

#[test]
fn priority_tie_break_and_sticky_assignment() {
    let rules = MappingRules::new(&["x"])
        .with_mapping("B", &["x"])
        .with_mapping("A", &["x"])
        .with_priority("x", &["A", "B"]);

    let out = map_row(&source(json!({ "A": "a", "B": "b" })), &rules).unwrap();
    assert_eq!(out.row["x"], "a");
}

#[test]
fn last_writer_wins_without_priority() {
    let rules = MappingRules::new(&["x"])
        .with_mapping("A", &["x"])
        .with_mapping("B", &["x"]);

    let out = map_row(&source(json!({ "A": "a", "B": "b" })), &rules).unwrap();
    assert_eq!(out.row["x"], "b");
}

#[test]
fn fixed_value_overrides_mapped_value() {
    let rules = MappingRules::new(&["currency"])
        .with_mapping("cur", &["currency"])
        .with_fixed_value("currency", "EUR");

    let out = map_row(&source(json!({ "cur": "USD" })), &rules).unwrap();
    assert_eq!(out.row["currency"], "EUR");
}

#[test]
fn auto_generate_fallback_is_a_warning() {
    let rules = MappingRules::new(&["slug"]).with_auto_generate(
        "slug",
        "p_name",
        "battery-{{dependsOn}}",
        Some("battery"),
    );

    let result = map_batch(&[json!({})], &rules);
    assert_eq!(result.mapped_rows[0]["slug"], "battery");
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].kind, IssueKind::Transformation);
    assert!(result.errors.is_empty());
}

#[test]
fn unit_conversion_and_non_numeric_passthrough() {
    let rules = MappingRules::new(&["weight_kg"])
        .with_mapping("weight_g", &["weight_kg"])
        .with_transformation(
            "weight_kg",
            Transformation::unit_conversion("value / 1000").unwrap(),
        );

    let out = map_row(&source(json!({ "weight_g": "5000" })), &rules).unwrap();
    assert_eq!(out.row["weight_kg"], "5");

    let out = map_row(&source(json!({ "weight_g": "n/a" })), &rules).unwrap();
    assert_eq!(out.row["weight_kg"], "n/a");
    assert!(out.errors.is_empty());
}

#[test]
fn validation_rejects_missing_required_and_out_of_range() {
    let rules = MappingRules::new(&["title", "weight_kg"])
        .with_mapping("p_name", &["title"])
        .with_mapping("w", &["weight_kg"])
        .require("title")
        .with_data_type("weight_kg", DataType::Number)
        .with_range("weight_kg", Range::new(0.0, 1000.0));

    let result = map_batch(&[json!({ "p_name": "", "w": "1500" })], &rules);
    assert!(result.mapped_rows.is_empty());
    assert_eq!(result.stats.invalid_rows, 1);

    let messages = result.error_messages();
    assert!(messages.iter().any(|m| m.contains("Required field missing: title")));
    assert!(messages.iter().any(|m| m.contains("out of range") && m.contains("weight_kg")));
    assert!(result.stats.missing_fields_across_dataset.contains("title"));
}

#[test]
fn csv_round_trip_with_special_characters() {
    let rules = MappingRules::new(&["name", "notes"]);
    let rows: Vec<MappedRow> = vec![
        [("name", "Cell, AA"), ("notes", "say \"hi\"")],
        [("name", "multi\nline"), ("notes", "carriage\rreturn")],
    ]
    .into_iter()
    .map(|pairs| pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    .collect();

    let text = to_csv(&rows, &rules);
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let parsed: Vec<Vec<String>> = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();

    assert_eq!(parsed[0], vec!["Cell, AA", "say \"hi\""]);
    assert_eq!(parsed[1], vec!["multi\nline", "carriage\rreturn"]);
}

#[test]
fn batch_survives_a_failing_row() {
    let rules = battery_rules();
    let mut rows: Vec<Value> = (1..=10).map(|i| json!({ "p_name": format!("item {}", i) })).collect();
    rows[4] = json!({ "p_name": { "nested": true } });

    let result = map_batch(&rows, &rules);
    let stats = &result.stats;

    assert_eq!(stats.valid_rows + stats.invalid_rows, 9);
    assert_eq!(stats.failed_rows, 1);
    let processing: Vec<_> = result
        .errors
        .iter()
        .filter(|e| e.kind == IssueKind::Processing)
        .collect();
    assert_eq!(processing.len(), 1);
    assert_eq!(processing[0].row, 5);
}

#[test]
fn csv_column_order_follows_output_format() {
    let rules = MappingRules::new(&["c", "a"]);
    let row: MappedRow = [("a", "1"), ("b", "2"), ("c", "3")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    assert_eq!(to_csv(&[row], &rules), "c,a\n3,1");
}

#[test]
fn empty_batch_exports_nothing_even_with_header() {
    let rules = battery_rules();
    let result = map_batch(&[], &rules);
    assert_eq!(to_csv(&result.mapped_rows, &rules), "");
}

#[test]
fn rules_errors_are_fatal_before_mapping() {
    assert!(matches!(
        MappingRules::load(r#"{ "mapping": {}, "validation": {} }"#),
        Err(RulesParseError::MissingKey("outputFormat"))
    ));
    assert!(matches!(
        MappingRules::load("not json"),
        Err(RulesParseError::Malformed(_))
    ));
}
