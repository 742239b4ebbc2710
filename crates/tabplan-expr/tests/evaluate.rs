use std::collections::HashMap;

use pretty_assertions::assert_eq;
use tabplan_expr::{evaluate, evaluate_predicate, parse, ExprError, Value};

fn trip_row() -> HashMap<String, Value> {
    HashMap::from([
        ("tripDistance".to_string(), Value::Float(2.5)),
        ("passengerCount".to_string(), Value::Int(2)),
        ("vendorID".to_string(), Value::from("CMT")),
        ("storeAndFwdFlag".to_string(), Value::Boolean(false)),
        ("tipAmount".to_string(), Value::Null),
    ])
}

#[test]
fn logical_operators_short_circuit_and_or() {
    let row = trip_row();

    // The right-hand sides would raise errors if evaluated.
    let value = evaluate(&parse("passengerCount > 5 and missing > 1").unwrap(), &row).unwrap();
    assert_eq!(value, Value::Boolean(false));

    let value = evaluate(&parse("passengerCount == 2 or vendorID > 1").unwrap(), &row).unwrap();
    assert_eq!(value, Value::Boolean(true));
}

#[test]
fn right_operand_errors_surface_when_not_short_circuited() {
    let row = trip_row();
    let err = evaluate(&parse("passengerCount == 2 and missing > 1").unwrap(), &row)
        .expect_err("missing column");
    assert_eq!(err, ExprError::ColumnNotFound("missing".to_string()));
}

#[test]
fn integer_and_float_widen_for_comparison() {
    let row = trip_row();
    assert!(evaluate_predicate(&parse("tripDistance > 2").unwrap(), &row).unwrap());
    assert!(evaluate_predicate(&parse("passengerCount == 2.0").unwrap(), &row).unwrap());
    assert!(!evaluate_predicate(&parse("passengerCount >= 2.5").unwrap(), &row).unwrap());
}

#[test]
fn comparing_string_with_number_is_a_type_mismatch() {
    let row = trip_row();
    let err = evaluate(&parse("vendorID > 1").unwrap(), &row).expect_err("mismatch");
    assert_eq!(
        err,
        ExprError::TypeMismatch {
            op: ">",
            left: "string",
            right: "int",
        }
    );
}

#[test]
fn null_predicate_does_not_match() {
    let row = trip_row();
    assert!(!evaluate_predicate(&parse("tipAmount > 0").unwrap(), &row).unwrap());
    assert!(evaluate_predicate(&parse("tipAmount == null").unwrap(), &row).unwrap());
}

#[test]
fn non_boolean_predicate_is_rejected() {
    let row = trip_row();
    let err = evaluate_predicate(&parse("passengerCount + 1").unwrap(), &row).expect_err("int");
    assert!(matches!(err, ExprError::TypeMismatch { op: "filter", .. }), "{err}");
}

#[test]
fn evaluation_does_not_mutate_the_row() {
    let row = trip_row();
    let before = row.clone();
    let _ = evaluate(&parse("not storeAndFwdFlag and vendorID == \"CMT\"").unwrap(), &row);
    assert_eq!(row, before);
}
