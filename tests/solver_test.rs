//! Symbolic solver behavior through the public API

use std::collections::BTreeSet;
use std::time::Duration;

use pdfjs_fuzzgen::symbolic::Value;
use pdfjs_fuzzgen::{solve, ConstraintKind, Solution, SolverBudget, SolverError};

fn single(constraint: &str, kind: ConstraintKind, symbol: &str, known: &str) -> Value {
    match solve(constraint, kind, symbol, known, &SolverBudget::default()) {
        Ok(Solution::Single(value)) => value,
        other => panic!("{} gave {:?}", constraint, other),
    }
}

#[test]
fn test_ordering_constraint_yields_larger_number() {
    match single("(and (>= x 0) (< x y))", ConstraintKind::Number, "x", "5") {
        Value::Number(y) => assert!(y > 5.0),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_boolean_negation() {
    assert_eq!(single("(= y (not x))", ConstraintKind::Boolean, "x", "true"), Value::Bool(false));
}

#[test]
fn test_subset_is_non_empty_subset() {
    match single("(subset y x)", ConstraintKind::Array, "x", "{1,2}") {
        Value::Set(y) => {
            let x: BTreeSet<i64> = [1, 2].into_iter().collect();
            assert!(!y.is_empty());
            assert!(y.is_subset(&x));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_rendered_values_are_literals() {
    let number = solve("(and (< x y) (= y 6))", ConstraintKind::Number, "x", "5", &SolverBudget::default()).unwrap();
    assert_eq!(number.render_single().as_deref(), Some("6"));

    let half = solve("(and (< x y) (= y 6.5))", ConstraintKind::Number, "x", "5", &SolverBudget::default()).unwrap();
    assert_eq!(half.render_single().as_deref(), Some("6.5"));

    let set = solve(
        "(and (subset y x) (not (contains y 2)))",
        ConstraintKind::Array,
        "x",
        "[1, 2]",
        &SolverBudget::default(),
    )
    .unwrap();
    assert_eq!(set.render_single().as_deref(), Some("[1]"));
}

#[test]
fn test_string_witness_combines_several_literals() {
    match single("(and (contains y x) (contains y \"cd\") (= x x))", ConstraintKind::String, "x", "\"ab\"") {
        Value::Str(y) => {
            assert!(y.contains("ab"));
            assert!(y.contains("cd"));
        }
        other => panic!("unexpected {:?}", other),
    }
    let rendered = solve("(= y x)", ConstraintKind::String, "x", "\"hello\"", &SolverBudget::default())
        .unwrap()
        .render_single();
    assert_eq!(rendered.as_deref(), Some("\"hello\""));
}

#[test]
fn test_failures_are_errors_not_panics() {
    let budget = SolverBudget {
        resource_limit: 10,
        timeout: Duration::from_millis(50),
    };
    assert!(matches!(
        solve("(and (> y x) (< y x))", ConstraintKind::Number, "x", "1", &budget),
        Err(SolverError::NoSolution) | Err(SolverError::BudgetExhausted { .. })
    ));
    assert!(solve("(< x", ConstraintKind::Number, "x", "1", &budget).is_err());
    assert!(matches!(
        solve("(< a b)", ConstraintKind::Number, "x", "1", &budget),
        Err(SolverError::KnownSymbolMissing(_))
    ));
}
