//! Fold/unfold recursion schemes for Coal.
//!
//! This crate implements:
//! - The recursive-position locator over data and codata definitions
//! - The fold/unfold pattern checker (`@` placement, exhaustiveness,
//!   accumulator clauses, codata fields)
//! - The top-level linker for `fold_name(@p)` patterns
//! - The binding-scope rule and the lowering pass into `coal_core`
//!
//! Coal has no self-referential bindings. Recursion exists only through
//! `@` patterns, which lowering turns into explicit `SelfCall` nodes.

pub mod check;
pub mod config;
pub mod error;
pub mod exhaustive;
pub mod link;
pub mod locate;
pub mod lower;
pub mod scope;
pub mod trace;

#[cfg(test)]
mod prop_tests;

use std::collections::BTreeMap;

use coal_ast::{DeclKind, Module, Span};
use coal_core::{CoreItem, CoreModule};
use coal_diag::Diagnostic;
use coal_types::{RegistryError, TypeDefinition, TypeRegistry};

pub use check::{Checker, FoldLink, ValidatedFold, ValidatedUnfold, check_fold, check_unfold};
pub use config::FoldConfig;
pub use error::{FieldProblem, FoldError, FoldErrorKind, FoldWarning};
pub use exhaustive::{ExhaustivenessOracle, MatrixOracle};
pub use link::{FoldCallGraph, FoldEdge, FoldNode, NodeKind, link, link_folds};
pub use locate::{Locator, PositionKind, RecursiveSlots, SharedLocatorCache, locate};
pub use lower::{Lowerer, lower_fold, lower_unfold};
pub use scope::{ScopeChecker, check_scopes};
pub use trace::{FoldAction, FoldStep, Phase, Tracer};

/// Register the module's data and codata types on top of the builtins.
///
/// Definitions that clash with an earlier one are skipped and reported.
pub fn register_types(module: &Module) -> (TypeRegistry, Vec<FoldError>) {
    let mut registry = TypeRegistry::with_builtins();
    let mut errors = Vec::new();
    for decl in &module.declarations {
        let def = match &decl.node {
            DeclKind::TypeDef(def) => TypeDefinition::from_type_def(def),
            DeclKind::CodataDef(def) => TypeDefinition::from_codata_def(def),
            _ => continue,
        };
        let span = decl.node.name().span;
        if let Err(err) = registry.register(def) {
            errors.push(match err {
                RegistryError::DuplicateType { name } => FoldError::DuplicateDefinition {
                    previous: registry.get(&name).map_or(span, |existing| existing.span),
                    name,
                    span,
                },
                RegistryError::BuiltinRedefinition { .. } | RegistryError::DuplicateConstructor { .. } => {
                    FoldError::MalformedTypeDefinition {
                        type_name: decl.node.name().node.clone(),
                        reason: err.to_string(),
                        span,
                    }
                }
            });
        }
    }
    (registry, errors)
}

/// Everything the fold/unfold pass produces for one module.
#[derive(Debug, Clone)]
pub struct FoldAnalysis {
    /// Lowered functions and bindings of every definition without errors.
    pub core: CoreModule,
    pub graph: FoldCallGraph,
    /// Sorted by source position.
    pub errors: Vec<FoldError>,
    pub warnings: Vec<FoldWarning>,
    /// Empty unless [`FoldConfig::trace`] is set.
    pub trace: Vec<FoldStep>,
}

impl FoldAnalysis {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Errors followed by warnings.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.errors
            .iter()
            .map(FoldError::to_diagnostic)
            .chain(self.warnings.iter().map(FoldWarning::to_diagnostic))
            .collect()
    }
}

fn contains(outer: Span, inner: Span) -> bool {
    outer.file == inner.file && outer.start <= inner.start && inner.end <= outer.end
}

/// Run the whole pass over a parsed module.
///
/// Every definition is checked; errors from one definition never stop the
/// others. A definition with any error is left out of the lowered module.
pub fn analyze_module(module: &Module, config: &FoldConfig) -> FoldAnalysis {
    let (registry, mut errors) = register_types(module);
    let mut checker = Checker::new(&registry, config.clone());

    for def in registry.iter().filter(|def| !def.builtin) {
        if let Err(err) = checker.locate(def) {
            errors.push(err);
        }
    }

    let mut folds: BTreeMap<Span, ValidatedFold> = BTreeMap::new();
    let mut unfolds: BTreeMap<Span, ValidatedUnfold> = BTreeMap::new();
    for decl in &module.declarations {
        match &decl.node {
            DeclKind::Fold(fold) => match checker.check_fold_decl(fold) {
                Ok(validated) => {
                    folds.insert(fold.span, validated);
                }
                Err(more) => errors.extend(more),
            },
            DeclKind::Unfold(unfold) => match checker.check_unfold_decl(unfold) {
                Ok(validated) => {
                    unfolds.insert(unfold.span, validated);
                }
                Err(more) => errors.extend(more),
            },
            DeclKind::Let(binding) => checker.check_expr(&binding.value, &mut errors),
            DeclKind::TypeDef(_) | DeclKind::CodataDef(_) => {}
        }
    }

    let expression_folds: Vec<ValidatedFold> = checker.expression_folds().cloned().collect();
    let linked: Vec<&ValidatedFold> = folds.values().chain(&expression_folds).collect();
    let (graph, link_errors) = link_folds(module, &registry, &linked, checker.tracer());
    errors.extend(link_errors);

    let mut scope = ScopeChecker::new(module, &registry);
    for decl in &module.declarations {
        let more = scope.check_decl(decl, checker.tracer());
        errors.extend(more);
    }

    // Locate failures are reported again by every fold over the same type.
    let mut unique: Vec<FoldError> = Vec::with_capacity(errors.len());
    for err in errors {
        if !unique.contains(&err) {
            unique.push(err);
        }
    }
    let mut errors = unique;

    let mut items = Vec::new();
    let mut warnings = checker.take_warnings();
    {
        let mut lowerer = Lowerer::new(&mut checker);
        for decl in &module.declarations {
            if errors.iter().any(|err| contains(decl.span, err.span())) {
                continue;
            }
            let lowered = match &decl.node {
                DeclKind::Fold(fold) => folds
                    .get(&fold.span)
                    .map(|validated| lowerer.lower_fold(validated).map(CoreItem::Function)),
                DeclKind::Unfold(unfold) => unfolds
                    .get(&unfold.span)
                    .map(|validated| lowerer.lower_unfold(validated).map(CoreItem::Function)),
                DeclKind::Let(binding) => {
                    Some(lowerer.lower_binding(binding).map(CoreItem::Binding))
                }
                DeclKind::TypeDef(_) | DeclKind::CodataDef(_) => None,
            };
            match lowered {
                Some(Ok(item)) => items.push(item),
                Some(Err(more)) => errors.extend(more),
                None => {}
            }
        }
    }
    warnings.extend(checker.take_warnings());

    errors.sort_by_key(|err| {
        let span = err.span();
        (span.start, span.end)
    });
    warnings.sort_by_key(|warning| warning.span().start);

    FoldAnalysis {
        core: CoreModule { items },
        graph,
        errors,
        warnings,
        trace: checker.take_trace().into_steps(),
    }
}

#[cfg(test)]
mod tests {
    use coal_ast::FileId;
    use coal_core::{EvalConfig, Evaluator, Value};
    use coal_syntax::parse_module_source;

    use super::*;

    fn analyze(source: &str) -> FoldAnalysis {
        let module = parse_module_source(source, FileId(0)).unwrap();
        analyze_module(&module, &FoldConfig::default())
    }

    fn kinds(analysis: &FoldAnalysis) -> Vec<FoldErrorKind> {
        analysis.errors.iter().map(FoldError::kind).collect()
    }

    const STREAM: &str = "codata Stream<T> = { head: T, tail: Stream<T> }\n";

    #[test]
    fn factorial_module_runs() {
        let analysis = analyze(
            "fold factorial : nat -> nat { | Zero => Succ(Zero) | Succ(@p) as m => m * p }\n\
             let main = factorial(Succ(Succ(Succ(Zero))))",
        );
        assert!(!analysis.has_errors(), "{:?}", analysis.errors);
        let mut evaluator = Evaluator::new(&analysis.core, EvalConfig::default());
        evaluator.run_bindings().unwrap();
        assert_eq!(evaluator.global("main").unwrap().to_string(), "6");
    }

    #[test]
    fn bare_at_pattern_is_reported_and_not_lowered() {
        let analysis = analyze(
            "fold bad : nat -> nat { | @p => p }\nlet ok = 1",
        );
        assert_eq!(kinds(&analysis), vec![FoldErrorKind::IllegalAtPatternPlacement]);
        assert!(analysis.core.function("bad").is_none());
        assert_eq!(analysis.core.bindings().count(), 1);
    }

    #[test]
    fn self_referential_let_is_rejected() {
        let analysis = analyze("let main = let x = x in x");
        assert_eq!(kinds(&analysis), vec![FoldErrorKind::IllegalSelfReference]);
        assert!(analysis.core.items.is_empty());
    }

    #[test]
    fn errors_in_one_definition_do_not_stop_others() {
        let analysis = analyze(
            "fold pred : nat -> nat { | Succ(@p) => p }\n\
             fold double : nat -> nat { | Zero => Zero | Succ(@p) => Succ(Succ(p)) }\n\
             let f = fn(n) => f(n)",
        );
        assert_eq!(
            kinds(&analysis),
            vec![
                FoldErrorKind::NonExhaustiveFoldPatterns,
                FoldErrorKind::IllegalSelfReference
            ]
        );
        assert!(analysis.core.function("double").is_some());
        assert_eq!(analysis.core.items.len(), 1);
    }

    #[test]
    fn malformed_type_is_reported_once() {
        let analysis = analyze(
            "type Bad = Leaf | Node(Missing)\n\
             fold a : Bad -> int { | Leaf => 0 | Node(_) => 1 }\n\
             fold b : Bad -> int { | Leaf => 0 | Node(_) => 1 }",
        );
        let malformed = analysis
            .errors
            .iter()
            .filter(|err| err.kind() == FoldErrorKind::MalformedTypeDefinition)
            .count();
        assert_eq!(malformed, 1);
    }

    #[test]
    fn duplicate_types_and_constructors() {
        let (_, errors) = register_types(
            &parse_module_source(
                "type A = X\ntype A = Y\ntype B = X\ntype List = Empty",
                FileId(0),
            )
            .unwrap(),
        );
        let kinds: Vec<FoldErrorKind> = errors.iter().map(FoldError::kind).collect();
        assert_eq!(
            kinds,
            vec![
                FoldErrorKind::DuplicateDefinition,
                FoldErrorKind::MalformedTypeDefinition,
                FoldErrorKind::MalformedTypeDefinition,
            ]
        );
    }

    #[test]
    fn json_encoders_link_and_run() {
        let analysis = analyze(
            r#"
type Json = Null | Num(int) | Array(List<Json>)

fold encode_json_value : Json -> string {
  | Null => "null"
  | Num(_) => "n"
  | Array(encode_json_array(@items)) => "[" ++ items ++ "]"
}

fold encode_json_array : List<Json> -> string {
  | Nil => ""
  | Cons(encode_json_value(@v), Nil) => v
  | Cons(encode_json_value(@v), @rest) => v ++ "," ++ rest
}

let main = encode_json_value(Array(Cons(Null, Cons(Array(Cons(Num(1), Nil)), Nil))))
"#,
        );
        assert!(!analysis.has_errors(), "{:?}", analysis.errors);
        assert_eq!(analysis.graph.mutually_recursive_groups().len(), 1);
        let mut evaluator = Evaluator::new(&analysis.core, EvalConfig::default());
        evaluator.run_bindings().unwrap();
        assert_eq!(evaluator.global("main").unwrap().to_string(), "\"[null,[n]]\"");
    }

    #[test]
    fn or_patterns_with_recursive_and_linked_binders_run() {
        let analysis = analyze(
            "type T = Leaf | A(T) | B(T) | C(T, List<int>) | D(T, List<int>)\n\
             fold stats : List<int> -> (int, int) {\n\
               | Nil => (0, 0)\n\
               | Cons(x, @r) => let (n, s) = r in (n + 1, s + x)\n\
             }\n\
             fold depth : T -> int {\n\
               | Leaf => 0\n\
               | A(@p) | B(@p) => p + 1\n\
               | (C(@p, stats(@(n, s))) | D(@p, stats(@(n, s)))) as t => p + n * 100 + s * 1000\n\
             }\n\
             let left = depth(B(C(Leaf, Nil)))\n\
             let right = depth(D(A(Leaf), Cons(5, Cons(7, Nil))))",
        );
        assert!(!analysis.has_errors(), "{:?}", analysis.errors);
        let mut evaluator = Evaluator::new(&analysis.core, EvalConfig::default());
        evaluator.run_bindings().unwrap();
        assert_eq!(evaluator.global("left").unwrap().to_string(), "1");
        assert_eq!(evaluator.global("right").unwrap().to_string(), "12201");
    }

    #[test]
    fn mixed_binding_forms_in_or_patterns_are_not_lowered() {
        let analysis = analyze(
            "type T = Leaf | A(T) | B(T)\n\
             fold g : T -> int { | Leaf => 0 | (A(@p) | B(p)) => 7 }\n\
             let other = 1",
        );
        assert_eq!(kinds(&analysis), vec![FoldErrorKind::InconsistentOrBindings]);
        assert!(analysis.core.function("g").is_none());
    }

    #[test]
    fn unfold_layers_are_forced_on_demand() {
        let analysis = analyze(&format!(
            "{STREAM}unfold naturals : int -> Stream<int> {{ n => head = n, @tail = n + 1 }}\n\
             let main = naturals(0).tail.tail.head"
        ));
        assert!(!analysis.has_errors(), "{:?}", analysis.errors);
        let mut evaluator = Evaluator::new(&analysis.core, EvalConfig::default());
        evaluator.run_bindings().unwrap();
        assert_eq!(evaluator.global("main").unwrap().to_string(), "2");
        // tail, tail, head
        assert_eq!(evaluator.forced_count(), 3);
    }

    #[test]
    fn deeper_layers_are_never_forced() {
        let analysis = analyze(&format!(
            "{STREAM}unfold countdown : int -> Stream<int> {{ n => head = 10 / n, @tail = n - 1 }}\n\
             let main = countdown(2).tail.head"
        ));
        assert!(!analysis.has_errors(), "{:?}", analysis.errors);
        let mut evaluator = Evaluator::new(&analysis.core, EvalConfig::default());
        evaluator.run_bindings().unwrap();
        assert_eq!(evaluator.global("main").unwrap().to_string(), "10");

        let stream = evaluator
            .apply(&Value::Function("countdown".into()), vec![Value::Int(2)])
            .unwrap();
        let third = evaluator
            .observe(&stream, "tail")
            .and_then(|layer| evaluator.observe(&layer, "tail"))
            .unwrap();
        assert!(evaluator.observe(&third, "head").is_err());
    }

    #[test]
    fn accumulator_warning_is_surfaced() {
        let analysis = analyze(
            "fold sum : (List<int>, int) -> int { | (Nil, acc) => acc | (Cons(x, @rest), acc) => rest }",
        );
        assert!(!analysis.has_errors());
        assert_eq!(analysis.warnings.len(), 1);
        assert!(!analysis.diagnostics()[0].is_error());
    }

    #[test]
    fn trace_is_recorded_only_when_enabled() {
        let source = "fold factorial : nat -> nat { | Zero => Succ(Zero) | Succ(@p) as m => m * p }";
        let module = parse_module_source(source, FileId(0)).unwrap();
        assert!(analyze_module(&module, &FoldConfig::default()).trace.is_empty());

        let traced = analyze_module(
            &module,
            &FoldConfig {
                trace: true,
                ..FoldConfig::default()
            },
        );
        let actions: Vec<FoldAction> = traced.trace.iter().map(|step| step.action).collect();
        assert!(actions.contains(&FoldAction::CheckExhaustive));
        assert!(actions.contains(&FoldAction::LowerSelfCall));
        assert_eq!(actions.last(), Some(&FoldAction::EmitFunction));
    }
}
