use pretty_assertions::assert_eq;
use std::collections::HashSet;
use tabula_formula::{DependencyTracker, FormulaError, FormulaEvaluator};
use tabula_model::{ColumnSchema, Frame, Schema, SimpleType, Value};

fn sales() -> (Schema, Frame) {
    let mut schema = Schema::new();
    schema
        .push("price", ColumnSchema::new("price", SimpleType::Numeric))
        .unwrap();
    schema
        .push("region", ColumnSchema::new("region", SimpleType::String))
        .unwrap();

    let mut frame = Frame::new(vec!["price", "region"]).unwrap();
    for (price, region) in [(10, "east"), (20, "west"), (30, "east"), (40, "west")] {
        frame.push_row(vec![price.into(), region.into()]).unwrap();
    }
    (schema, frame)
}

fn numbers(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::from).collect()
}

#[test]
fn ungrouped_formula_is_evaluated_per_row() {
    let (schema, frame) = sales();
    let evaluator = FormulaEvaluator::new();
    let doubled = evaluator.validate("price*2", &schema).unwrap();
    assert_eq!(doubled.result_type(), SimpleType::Numeric);
    assert_eq!(
        evaluator.evaluate(&doubled, &frame, None, &schema).unwrap(),
        numbers(&[20, 40, 60, 80])
    );
}

#[test]
fn grouped_aggregate_is_broadcast_to_each_row() {
    let (schema, frame) = sales();
    let evaluator = FormulaEvaluator::new();
    let total = evaluator.validate("sum(price)", &schema).unwrap();
    let values = evaluator
        .evaluate(&total, &frame, Some("region"), &schema)
        .unwrap();
    assert_eq!(values, numbers(&[40, 60, 40, 60]));

    let distinct_values: HashSet<&Value> = values.iter().collect();
    let distinct_groups: HashSet<&Value> = frame
        .rows()
        .iter()
        .map(|row| &row[1])
        .collect();
    assert_eq!(distinct_values.len(), distinct_groups.len());
}

#[test]
fn unknown_identifier_is_named() {
    let (schema, _) = sales();
    let err = FormulaEvaluator::new()
        .validate("unknown_col + 1", &schema)
        .unwrap_err();
    assert_eq!(err, FormulaError::UnknownIdentifier("unknown_col".into()));
    assert!(err.to_string().contains("unknown_col"));
}

#[test]
fn chained_calculations_are_tracked() {
    let (mut schema, mut frame) = sales();
    let evaluator = FormulaEvaluator::new();
    let mut tracker = DependencyTracker::new();

    let a = evaluator.validate("price*2", &schema).unwrap();
    let a_values = evaluator.evaluate(&a, &frame, None, &schema).unwrap();
    frame.add_column("a", a_values).unwrap();
    schema
        .push("a", ColumnSchema::new("a", a.result_type()))
        .unwrap();
    tracker.insert("a", a.references().to_vec());

    let b = evaluator.validate("a+1", &schema).unwrap();
    assert!(!tracker.would_create_cycle("b", b.references()));
    assert_eq!(
        evaluator.evaluate(&b, &frame, None, &schema).unwrap(),
        numbers(&[21, 41, 61, 81])
    );
    tracker.insert("b", b.references().to_vec());

    assert!(matches!(
        tracker.guard_delete("a"),
        Err(FormulaError::Dependents { .. })
    ));
    tracker.remove("b");
    assert!(tracker.guard_delete("a").is_ok());
}
