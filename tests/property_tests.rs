//! Property-based tests for value normalization and grammar expansion

use pdfjs_fuzzgen::grammar::{ExpansionContext, ExpansionError, Grammar};
use pdfjs_fuzzgen::normalize::ValueNormalizer;
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

// Loosely formatted grammar output: scalars, quoted text and composites
fn raw_value_strategy() -> impl Strategy<Value = String> {
    let scalar = prop_oneof![
        "[ -~]{0,30}",
        "-?[0-9]{1,8}(\\.[0-9]{0,4})?",
        Just("true".to_string()),
        Just("false".to_string()),
        "[a-zA-Z0-9 ]{0,12}".prop_map(|s| format!("\"{}\"", s)),
    ];
    scalar.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(|items| format!("[{}]", items.join(","))),
            prop::collection::vec(("[a-zA-Z0-9_ ]{0,8}", inner), 0..4).prop_map(|members| {
                let body: Vec<String> = members.into_iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                format!("{{{}}}", body.join(", "))
            }),
        ]
    })
}

// Grammars over a handful of symbols whose templates may reference each other
fn grammar_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    let symbol = prop::sample::select(vec!["A", "B", "C"]);
    let piece = prop_oneof![
        "[a-z0-9]{0,3}",
        symbol.clone().prop_map(|s| format!("{{{}}}", s)),
    ];
    let template = prop::collection::vec(piece, 0..4).prop_map(|pieces| pieces.concat());
    prop::collection::vec((symbol.prop_map(str::to_string), template), 1..8)
}

proptest! {
    #[test]
    fn normalization_is_idempotent(raw in raw_value_strategy(), seed in any::<u64>()) {
        let normalizer = ValueNormalizer::deterministic();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let once = normalizer.normalize(&raw, &mut rng);
        let twice = normalizer.normalize(&once, &mut rng);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn normalized_values_have_no_unsafe_characters(raw in "[ -~]{0,40}", seed in any::<u64>()) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let out = ValueNormalizer::deterministic().normalize(&raw, &mut rng);
        prop_assert!(!out.contains('\\'));
        prop_assert!(!out.contains('('));
        prop_assert!(!out.contains(')'));
    }

    #[test]
    fn expansion_terminates_within_limits(rules in grammar_strategy(), seed in any::<u64>()) {
        let grammar = Grammar::from_rules(rules.iter().map(|(s, t)| (s.as_str(), t.as_str())));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut ctx = ExpansionContext::new(10, 5_000);
        let start = grammar.start_symbol().unwrap_or("A").to_string();
        match grammar.expand_with(&start, &mut ctx, &mut rng) {
            Ok(out) => prop_assert!(out.len() <= 5_000 * 12),
            Err(e) => prop_assert!(matches!(
                e,
                ExpansionError::BudgetExhausted { .. } | ExpansionError::DepthExceeded { .. }
            ), "unexpected expansion error: {:?}", e),
        }
    }
}
