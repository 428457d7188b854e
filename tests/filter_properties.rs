//! Property tests for the filter engine: printing any AST and re-parsing it
//! yields a structurally equal AST, and negation semantics hold for
//! arbitrary expressions.

use proptest::prelude::*;
use scim_protocol::filter::ast::{AttrPath, CompareOp, Filter};
use scim_protocol::filter::{FilterEvaluator, parse_filter};
use serde_json::{Value, json};

fn attr_path() -> impl Strategy<Value = AttrPath> {
    let name = "[a-z][a-z0-9]{3,7}";
    prop_oneof![
        name.prop_map(AttrPath::new),
        (name, name).prop_map(|(attr, sub)| AttrPath::with_sub(attr, sub)),
    ]
}

fn compare_op() -> impl Strategy<Value = CompareOp> {
    prop_oneof![
        Just(CompareOp::Eq),
        Just(CompareOp::Ne),
        Just(CompareOp::Co),
        Just(CompareOp::Sw),
        Just(CompareOp::Ew),
        Just(CompareOp::Gt),
        Just(CompareOp::Ge),
        Just(CompareOp::Lt),
        Just(CompareOp::Le),
    ]
}

fn literal() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-zA-Z0-9 @._-]{0,10}".prop_map(Value::String),
        any::<i64>().prop_map(|n| json!(n)),
        any::<bool>().prop_map(Value::Bool),
        Just(Value::Null),
    ]
}

fn filter() -> impl Strategy<Value = Filter> {
    let leaf = prop_oneof![
        (attr_path(), compare_op(), literal())
            .prop_map(|(path, op, value)| Filter::Compare { path, op, value }),
        attr_path().prop_map(|path| Filter::Present { path }),
    ];
    leaf.prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            inner.clone().prop_map(|f| Filter::Not(Box::new(f))),
            (inner.clone(), inner.clone())
                .prop_map(|(l, r)| Filter::And(Box::new(l), Box::new(r))),
            (inner.clone(), inner.clone())
                .prop_map(|(l, r)| Filter::Or(Box::new(l), Box::new(r))),
            (attr_path(), inner).prop_map(|(path, f)| Filter::ValuePath {
                path,
                filter: Box::new(f),
            }),
        ]
    })
}

fn sample_resource() -> Value {
    json!({
        "userName": "bob",
        "active": true,
        "loginCount": 12,
        "emails": [
            {"value": "bob@work.example", "type": "work", "primary": true},
            {"value": "bob@home.example", "type": "home"}
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// Printing any filter and parsing it back gives a structurally equal
    /// AST.
    #[test]
    fn print_parse_round_trip(filter in filter()) {
        let printed = filter.to_string();
        let reparsed = parse_filter(&printed)
            .unwrap_or_else(|e| panic!("failed to re-parse {printed:?}: {e}"));
        prop_assert_eq!(filter, reparsed, "printed form: {}", printed);
    }

    /// `not (f)` always evaluates to the negation of `f`.
    #[test]
    fn negation_inverts_evaluation(filter in filter()) {
        let evaluator = FilterEvaluator::new();
        let resource = sample_resource();
        let plain = evaluator.matches(&filter, &resource);
        let negated = evaluator.matches(&Filter::Not(Box::new(filter)), &resource);
        prop_assert_eq!(plain, !negated);
    }

    /// Conjunction and disjunction match boolean semantics.
    #[test]
    fn and_or_compose(left in filter(), right in filter()) {
        let evaluator = FilterEvaluator::new();
        let resource = sample_resource();
        let l = evaluator.matches(&left, &resource);
        let r = evaluator.matches(&right, &resource);
        let and = Filter::And(Box::new(left.clone()), Box::new(right.clone()));
        let or = Filter::Or(Box::new(left), Box::new(right));
        prop_assert_eq!(evaluator.matches(&and, &resource), l && r);
        prop_assert_eq!(evaluator.matches(&or, &resource), l || r);
    }
}
