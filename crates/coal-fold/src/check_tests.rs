use coal_ast::{DeclKind, ExprKind, FileId, Module};
use coal_syntax::{parse_expr_source, parse_module_source};
use coal_types::TypeRegistry;

use super::*;
use crate::{FoldErrorKind, register_types};

const JSON: &str = "type Json = Null | Num(int) | Array(List<Json>)\n";
const STREAM: &str = "codata Stream<T> = { head: T, tail: Stream<T> }\n";

fn parse(source: &str) -> (Module, TypeRegistry) {
    let module = parse_module_source(source, FileId(0)).unwrap();
    let (registry, errors) = register_types(&module);
    assert!(errors.is_empty(), "{errors:?}");
    (module, registry)
}

fn fold_decl<'m>(module: &'m Module, name: &str) -> &'m FoldDecl {
    module
        .declarations
        .iter()
        .find_map(|decl| match &decl.node {
            DeclKind::Fold(fold) if fold.name.node == name => Some(fold),
            _ => None,
        })
        .unwrap()
}

fn unfold_decl<'m>(module: &'m Module, name: &str) -> &'m UnfoldDecl {
    module
        .declarations
        .iter()
        .find_map(|decl| match &decl.node {
            DeclKind::Unfold(unfold) if unfold.name.node == name => Some(unfold),
            _ => None,
        })
        .unwrap()
}

fn fold_errors(source: &str, name: &str) -> Vec<FoldError> {
    let (module, registry) = parse(source);
    check_fold(fold_decl(&module, name), &registry).unwrap_err()
}

fn kinds(errors: &[FoldError]) -> Vec<FoldErrorKind> {
    errors.iter().map(FoldError::kind).collect()
}

fn unfold_errors(source: &str, name: &str) -> Vec<FoldError> {
    let (module, registry) = parse(source);
    check_unfold(unfold_decl(&module, name), &registry).unwrap_err()
}

// -- Folds --

#[test]
fn factorial_is_accepted() {
    let (module, registry) = parse(
        "fold factorial : nat -> nat { | Zero => Succ(Zero) | Succ(@p) as m => m * p }",
    );
    let fold = check_fold(fold_decl(&module, "factorial"), &registry).unwrap();
    assert_eq!(fold.domain, Type::named("nat", vec![]));
    assert!(!fold.accumulator);
    assert!(fold.links.is_empty());
    assert_eq!(fold.clauses.len(), 2);
}

#[test]
fn bare_at_pattern_is_rejected() {
    let errors = fold_errors("fold bad : nat -> nat { | Zero => Zero | @p => p }", "bad");
    assert_eq!(kinds(&errors), vec![FoldErrorKind::IllegalAtPatternPlacement]);
    assert!(errors[0].to_string().contains("whole clause"));
}

#[test]
fn at_inside_wrapped_component_is_rejected() {
    let errors = fold_errors(
        &format!(
            "{JSON}fold size : Json -> int {{ | Null => 0 | Num(_) => 1 | Array(@values) => 1 }}"
        ),
        "size",
    );
    assert_eq!(kinds(&errors), vec![FoldErrorKind::IllegalAtPatternPlacement]);
    assert!(errors[0].to_string().contains("nested inside `List`"), "{}", errors[0]);
}

#[test]
fn at_on_non_recursive_component_is_rejected() {
    let errors = fold_errors(
        "fold bad : List<int> -> int { | Nil => 0 | Cons(@x, @r) => r }",
        "bad",
    );
    assert_eq!(kinds(&errors), vec![FoldErrorKind::IllegalAtPatternPlacement]);
    assert!(errors[0].to_string().contains("not a recursive position"));
}

#[test]
fn at_inside_tuple_component_names_tuple_container() {
    let errors = fold_errors(
        "type Pair = Leaf | Node((Pair, Pair))\nfold leaves : Pair -> int { | Leaf => 1 | Node(@p) => 0 }",
        "leaves",
    );
    assert_eq!(kinds(&errors), vec![FoldErrorKind::IllegalAtPatternPlacement]);
    assert!(errors[0].to_string().contains("`(,)`"));
}

#[test]
fn non_uniform_recursion_needs_a_named_fold() {
    let errors = fold_errors(
        "type Nest<a> = Flat | Nested(a, Nest<(a, a)>)\nfold depth : Nest<a> -> int { | Flat => 0 | Nested(_, @rest) => rest + 1 }",
        "depth",
    );
    assert_eq!(kinds(&errors), vec![FoldErrorKind::IllegalAtPatternPlacement]);
    assert!(errors[0].to_string().contains("nested inside `Nest`"));
}

#[test]
fn deep_at_patterns_are_legal() {
    let (module, registry) = parse(
        "fold pairs : List<int> -> int { | Nil => 0 | Cons(_, Nil) => 0 | Cons(x, Cons(y, @r)) => x + y + r }",
    );
    assert!(check_fold(fold_decl(&module, "pairs"), &registry).is_ok());
}

#[test]
fn missing_constructor_is_reported() {
    let errors = fold_errors("fold pred : nat -> nat { | Succ(@p) => p }", "pred");
    assert_eq!(
        errors,
        vec![FoldError::NonExhaustiveFoldPatterns {
            fold: "pred".into(),
            missing: vec!["Zero".into()],
            span: errors[0].span(),
        }]
    );
}

#[test]
fn exhaustiveness_waits_for_structural_errors() {
    let errors = fold_errors("fold bad : nat -> nat { | @p => p }", "bad");
    assert_eq!(kinds(&errors), vec![FoldErrorKind::IllegalAtPatternPlacement]);
}

#[test]
fn unknown_constructor_is_unbound() {
    let errors = fold_errors("fold f : nat -> int { | Zero => 0 | Sux(@p) => p }", "f");
    assert_eq!(kinds(&errors), vec![FoldErrorKind::UnboundName]);
}

#[test]
fn constructor_arity_is_checked() {
    let errors = fold_errors("fold f : nat -> int { | Zero => 0 | Succ => 1 }", "f");
    assert_eq!(kinds(&errors), vec![FoldErrorKind::ConstructorArity]);
}

#[test]
fn foreign_constructor_is_a_type_mismatch() {
    let errors = fold_errors("fold f : nat -> int { | Nil => 0 | _ => 1 }", "f");
    assert_eq!(kinds(&errors), vec![FoldErrorKind::PatternTypeMismatch]);
}

#[test]
fn or_alternatives_must_bind_the_same_names() {
    let errors = fold_errors(
        "fold f : List<int> -> int { | Nil => 0 | Cons(x, Nil) | Cons(y, _) => 1 }",
        "f",
    );
    assert_eq!(kinds(&errors), vec![FoldErrorKind::InconsistentOrBindings]);
}

const TWIN: &str = "type T = Leaf | A(T) | B(T) | C(T, List<int>) | D(T, List<int>)\n";

#[test]
fn or_alternatives_must_bind_names_the_same_way() {
    let errors = fold_errors(
        &format!("{TWIN}fold g : T -> int {{ | Leaf => 0 | A(@p) | B(p) => 7 | C(_, _) | D(_, _) => 1 }}"),
        "g",
    );
    assert_eq!(kinds(&errors), vec![FoldErrorKind::InconsistentOrBindings]);
    assert!(errors[0].to_string().contains("{@p} vs {p}"), "{}", errors[0]);

    let errors = fold_errors(
        &format!(
            "{TWIN}fold g : T -> int {{ | Leaf => 0 | A(_) | B(_) => 1 | C(_, count(@n)) | D(_, total(@n)) => n }}"
        ),
        "g",
    );
    assert_eq!(kinds(&errors), vec![FoldErrorKind::InconsistentOrBindings]);
}

#[test]
fn or_alternatives_may_share_recursive_binders() {
    let (module, registry) = parse(&format!(
        "{TWIN}fold g : T -> int {{ | Leaf => 0 | A(@p) | B(@p) => p + 1 | (C(@p, stats(@(n, s))) | D(@p, stats(@(n, s)))) as t => p + n }}"
    ));
    let fold = check_fold(fold_decl(&module, "g"), &registry).unwrap();
    assert_eq!(fold.links.len(), 2);
}

#[test]
fn named_fold_pattern_records_a_link() {
    let (module, registry) = parse(&format!(
        "{JSON}fold size : Json -> int {{ | Null => 0 | Num(_) => 1 | Array(size_all(@values)) => values }}"
    ));
    let fold = check_fold(fold_decl(&module, "size"), &registry).unwrap();
    assert_eq!(fold.links.len(), 1);
    assert_eq!(fold.links[0].fold.node, "size_all");
    assert_eq!(
        fold.links[0].component,
        Some(Type::named("List", vec![Type::named("Json", vec![])]))
    );
}

#[test]
fn named_fold_pattern_needs_a_constructor() {
    let errors = fold_errors("fold f : nat -> int { | g(@x) => x }", "f");
    assert_eq!(kinds(&errors), vec![FoldErrorKind::IllegalAtPatternPlacement]);
}

#[test]
fn error_count_is_capped_per_definition() {
    let (module, registry) =
        parse("fold bad : List<int> -> int { | Nil => 0 | Cons(@a, @b) => 0 | Cons(@c, _) => 0 }");
    let config = FoldConfig {
        max_errors_per_definition: 1,
        ..FoldConfig::default()
    };
    let errors = Checker::new(&registry, config)
        .check_fold_decl(fold_decl(&module, "bad"))
        .unwrap_err();
    assert_eq!(errors.len(), 1);
}

#[test]
fn codata_cannot_be_folded() {
    let errors = fold_errors(&format!("{STREAM}fold f : Stream<int> -> int {{ | _ => 0 }}"), "f");
    assert_eq!(kinds(&errors), vec![FoldErrorKind::UndeterminedFoldDomain]);
}

// -- Accumulator folds --

const SUM: &str =
    "fold sum : (List<int>, int) -> int { | (Nil, acc) => acc | (Cons(x, @rest), acc) => rest(acc + x) }";

#[test]
fn accumulator_fold_is_accepted() {
    let (module, registry) = parse(SUM);
    let fold = check_fold(fold_decl(&module, "sum"), &registry).unwrap();
    assert!(fold.accumulator);
    assert_eq!(fold.domain, Type::named("List", vec![Type::Int]));
    assert_eq!(fold.seed_type, Some(Type::Int));
}

#[test]
fn accumulator_clause_must_be_a_pair() {
    let errors = fold_errors(
        "fold sum : (List<int>, int) -> int { | Nil => 0 | (Cons(x, @rest), acc) => rest(acc + x) }",
        "sum",
    );
    assert_eq!(kinds(&errors), vec![FoldErrorKind::MalformedAccumulatorClause]);
}

#[test]
fn accumulator_half_must_be_irrefutable() {
    let errors = fold_errors(
        "fold sum : (List<int>, int) -> int { | (Nil, 0) => 0 | (Nil, acc) => acc | (Cons(x, @rest), acc) => rest(acc + x) }",
        "sum",
    );
    assert_eq!(kinds(&errors), vec![FoldErrorKind::MalformedAccumulatorClause]);
}

#[test]
fn accumulator_binder_used_as_value_warns() {
    let (module, registry) = parse(
        "fold sum : (List<int>, int) -> int { | (Nil, acc) => acc | (Cons(x, @rest), acc) => rest }",
    );
    let decl = fold_decl(&module, "sum");
    let mut checker = Checker::new(&registry, FoldConfig::default());
    checker.check_fold_decl(decl).unwrap();
    let warnings = checker.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(&warnings[0], FoldWarning::AccumulatorThreading { binder, .. } if binder == "rest"));

    let quiet = FoldConfig {
        accumulator_warnings: false,
        ..FoldConfig::default()
    };
    let mut checker = Checker::new(&registry, quiet);
    checker.check_fold_decl(decl).unwrap();
    assert!(checker.take_warnings().is_empty());
}

#[test]
fn calling_the_accumulator_binder_does_not_warn() {
    let (module, registry) = parse(SUM);
    let mut checker = Checker::new(&registry, FoldConfig::default());
    checker.check_fold_decl(fold_decl(&module, "sum")).unwrap();
    assert!(checker.take_warnings().is_empty());
}

// -- Unfolds --

const NATURALS: &str = "unfold naturals : int -> Stream<int> { n => head = n, @tail = n + 1 }";

#[test]
fn naturals_unfold_is_accepted() {
    let (module, registry) = parse(&format!("{STREAM}{NATURALS}"));
    let unfold = check_unfold(unfold_decl(&module, "naturals"), &registry).unwrap();
    assert_eq!(unfold.codata_name(), "Stream");
    assert_eq!(unfold.fields, vec!["head", "tail"]);
    assert_eq!(unfold.seed_type, Some(Type::Int));
}

#[test]
fn missing_field_is_reported() {
    let errors = unfold_errors(
        &format!("{STREAM}unfold ones : int -> Stream<int> {{ n => head = 1 }}"),
        "ones",
    );
    assert!(matches!(
        &errors[..],
        [FoldError::MissingOrDuplicateCodataField { field, problem: FieldProblem::Missing, .. }] if field == "tail"
    ));
}

#[test]
fn duplicate_and_unknown_fields_are_reported() {
    let errors = unfold_errors(
        &format!(
            "{STREAM}unfold s : int -> Stream<int> {{ n => head = n, head = 0, size = 1, @tail = n }}"
        ),
        "s",
    );
    let problems: Vec<FieldProblem> = errors
        .iter()
        .filter_map(|e| match e {
            FoldError::MissingOrDuplicateCodataField { problem, .. } => Some(*problem),
            _ => None,
        })
        .collect();
    assert_eq!(problems, vec![FieldProblem::Duplicate, FieldProblem::Unknown]);
}

#[test]
fn corecursive_marker_on_plain_field_is_rejected() {
    let errors = unfold_errors(
        &format!("{STREAM}unfold s : int -> Stream<int> {{ n => @head = n, @tail = n }}"),
        "s",
    );
    assert_eq!(kinds(&errors), vec![FoldErrorKind::IllegalAtPatternPlacement]);
}

#[test]
fn corecursive_seed_must_match_seed_type() {
    let errors = unfold_errors(
        &format!("{STREAM}unfold s : int -> Stream<int> {{ n => head = n, @tail = true }}"),
        "s",
    );
    assert_eq!(
        errors[0],
        FoldError::SeedTypeMismatch {
            field: "tail".into(),
            expected: "int".into(),
            found: "bool".into(),
            span: errors[0].span(),
        }
    );
}

#[test]
fn tuple_seeds_are_destructured() {
    let (module, registry) = parse(&format!(
        "{STREAM}unfold fibs : (int, int) -> Stream<int> {{ (a, b) => head = a, @tail = (b, a + b) }}"
    ));
    assert!(check_unfold(unfold_decl(&module, "fibs"), &registry).is_ok());
}

// -- Expressions --

fn expr(source: &str) -> coal_ast::Expr {
    parse_expr_source(source, FileId(0)).unwrap()
}

#[test]
fn expression_fold_domain_comes_from_constructors() {
    let registry = TypeRegistry::with_builtins();
    let e = expr("fold(xs) { | Nil => 0 | Cons(x, @r) => x + r }");
    let ExprKind::Fold(fold) = &e.node else {
        panic!("expected fold expression");
    };
    let mut checker = Checker::new(&registry, FoldConfig::default());
    let validated = checker.check_fold_expr(fold).unwrap();
    assert_eq!(validated.domain.head_name(), Some("List"));
    assert!(!validated.named);
    assert!(validated.name.starts_with("fold#"));
}

#[test]
fn expression_fold_without_constructors_is_undetermined() {
    let registry = TypeRegistry::with_builtins();
    let e = expr("fold(x) { | n => n }");
    let ExprKind::Fold(fold) = &e.node else {
        panic!("expected fold expression");
    };
    let errors = Checker::new(&registry, FoldConfig::default())
        .check_fold_expr(fold)
        .unwrap_err();
    assert_eq!(kinds(&errors), vec![FoldErrorKind::UndeterminedFoldDomain]);
}

#[test]
fn expression_unfold_codata_comes_from_field_names() {
    let (_, registry) = parse(STREAM);
    let e = expr("unfold(0) { n => head = n, @tail = n + 1 }");
    let ExprKind::Unfold(unfold) = &e.node else {
        panic!("expected unfold expression");
    };
    let validated = Checker::new(&registry, FoldConfig::default())
        .check_unfold_expr(unfold)
        .unwrap();
    assert_eq!(validated.codata_name(), "Stream");
    assert_eq!(validated.seed_type, Some(Type::Int));
}

#[test]
fn at_pattern_in_let_is_rejected() {
    let registry = TypeRegistry::with_builtins();
    let mut errors = Vec::new();
    Checker::new(&registry, FoldConfig::default()).check_expr(&expr("let @x = 1 in x"), &mut errors);
    assert_eq!(kinds(&errors), vec![FoldErrorKind::IllegalAtPatternPlacement]);
}

#[test]
fn nested_fold_errors_surface_through_check_expr() {
    let registry = TypeRegistry::with_builtins();
    let mut errors = Vec::new();
    Checker::new(&registry, FoldConfig::default())
        .check_expr(&expr("1 + fold(n) { | Succ(@p) => p }"), &mut errors);
    assert_eq!(kinds(&errors), vec![FoldErrorKind::NonExhaustiveFoldPatterns]);
}
