//! Property tests for the fold/unfold pass using proptest.
//!
//! 1. Locating recursive positions is deterministic and classifies each
//!    component by its shape alone
//! 2. Lowered folds agree with direct recursion on every input
//! 3. Accumulator folds thread the seed from left to right
//! 4. Unfolds force exactly the layers that are observed

use coal_ast::FileId;
use coal_core::{EvalConfig, Evaluator, Value};
use coal_syntax::parse_module_source;
use proptest::prelude::*;

use crate::locate::{PositionKind, TUPLE_CONTAINER, locate};
use crate::{FoldAnalysis, FoldConfig, analyze_module, register_types};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Component type source paired with its expected classification inside
/// `type Tree<T>`.
fn arb_component() -> impl Strategy<Value = (&'static str, PositionKind)> {
    let wrapped = |container: &str| PositionKind::SelfWrapped {
        container: container.to_string(),
    };
    prop::sample::select(vec![
        ("int", PositionKind::Other),
        ("T", PositionKind::Other),
        ("List<int>", PositionKind::Other),
        ("Tree<T>", PositionKind::SelfRef),
        ("List<Tree<T>>", wrapped("List")),
        ("(Tree<T>, int)", wrapped(TUPLE_CONTAINER)),
        ("Tree<int>", wrapped("Tree")),
    ])
}

fn arb_list() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-1000i64..1000, 0..12)
}

fn list_value(items: &[i64]) -> Value {
    items.iter().rev().fold(
        Value::Ctor {
            name: "Nil".into(),
            args: vec![],
        },
        |tail, head| Value::Ctor {
            name: "Cons".into(),
            args: vec![Value::Int(*head), tail],
        },
    )
}

fn analyze(source: &str) -> FoldAnalysis {
    let module = parse_module_source(source, FileId(0)).unwrap();
    let analysis = analyze_module(&module, &FoldConfig::default());
    assert!(!analysis.has_errors(), "{:?}", analysis.errors);
    analysis
}

fn apply(analysis: &FoldAnalysis, name: &str, args: Vec<Value>) -> String {
    Evaluator::new(&analysis.core, EvalConfig::default())
        .apply(&Value::Function(name.into()), args)
        .unwrap()
        .to_string()
}

// ---------------------------------------------------------------------------
// Locator
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn components_are_classified_by_shape(
        components in prop::collection::vec(arb_component(), 1..5)
    ) {
        let sources: Vec<&str> = components.iter().map(|(source, _)| *source).collect();
        let source = format!("type Tree<T> = Leaf | Node({})", sources.join(", "));
        let module = parse_module_source(&source, FileId(0)).unwrap();
        let (registry, errors) = register_types(&module);
        prop_assert!(errors.is_empty());

        let def = registry.get("Tree").unwrap();
        let first = locate(def, &registry).unwrap();
        let second = locate(def, &registry).unwrap();
        prop_assert_eq!(&first, &second);

        for (index, (_, expected)) in components.iter().enumerate() {
            prop_assert_eq!(first.get("Node", index), Some(expected));
        }
        prop_assert_eq!(first.get("Leaf", 0), None);
    }
}

// ---------------------------------------------------------------------------
// Lowering
// ---------------------------------------------------------------------------

const FACTORIAL: &str =
    "fold factorial : nat -> nat { | Zero => Succ(Zero) | Succ(@p) as m => m * p }";

const SUM: &str = "fold sum : (List<int>, int) -> int {\n\
    | (Nil, acc) => acc\n\
    | (Cons(x, @rest), acc) => rest(acc + x)\n\
}";

const DIGITS: &str = "fold digits : (List<int>, int) -> int {\n\
    | (Nil, acc) => acc\n\
    | (Cons(d, @rest), acc) => rest(acc * 10 + d)\n\
}";

const LENGTH: &str =
    "fold length : List<a> -> int { | Nil => 0 | Cons(_, @rest) => 1 + rest }";

proptest! {
    #[test]
    fn factorial_matches_direct_recursion(n in 0i64..=12) {
        let analysis = analyze(FACTORIAL);
        let expected: i64 = (1..=n).product();
        prop_assert_eq!(apply(&analysis, "factorial", vec![Value::Int(n)]), expected.to_string());
    }

    #[test]
    fn length_counts_every_cell(items in arb_list()) {
        let analysis = analyze(LENGTH);
        prop_assert_eq!(
            apply(&analysis, "length", vec![list_value(&items)]),
            items.len().to_string()
        );
    }

    #[test]
    fn accumulator_sum_matches_iterator_sum(items in arb_list(), seed in -1000i64..1000) {
        let analysis = analyze(SUM);
        let expected = seed + items.iter().sum::<i64>();
        prop_assert_eq!(
            apply(&analysis, "sum", vec![list_value(&items), Value::Int(seed)]),
            expected.to_string()
        );
    }

    #[test]
    fn accumulator_threads_left_to_right(digits in prop::collection::vec(0i64..10, 0..9)) {
        let analysis = analyze(DIGITS);
        let expected = digits.iter().fold(0i64, |acc, d| acc * 10 + d);
        prop_assert_eq!(
            apply(&analysis, "digits", vec![list_value(&digits), Value::Int(0)]),
            expected.to_string()
        );
    }
}

// ---------------------------------------------------------------------------
// Laziness
// ---------------------------------------------------------------------------

const NATURALS: &str = "codata Stream<T> = { head: T, tail: Stream<T> }\n\
    unfold naturals : int -> Stream<int> { n => head = n, @tail = n + 1 }";

proptest! {
    #[test]
    fn observing_depth_forces_only_that_depth(start in -100i64..100, depth in 0usize..20) {
        let analysis = analyze(NATURALS);
        let mut evaluator = Evaluator::new(&analysis.core, EvalConfig::default());
        let mut stream = evaluator
            .apply(&Value::Function("naturals".into()), vec![Value::Int(start)])
            .unwrap();
        for _ in 0..depth {
            stream = evaluator.observe(&stream, "tail").unwrap();
        }
        prop_assert_eq!(evaluator.forced_count(), depth);

        let head = evaluator.observe(&stream, "head").unwrap();
        prop_assert_eq!(head.to_string(), (start + depth as i64).to_string());
        prop_assert_eq!(evaluator.forced_count(), depth + 1);
    }
}
