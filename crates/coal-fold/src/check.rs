//! Fold/unfold pattern checker.
//!
//! Validates `@` placement against the recursive positions of the fold's
//! domain, exhaustiveness of the non-`@` part of the clauses, accumulator
//! clause shape, and the field clauses of unfolds. Successful checks produce
//! [`ValidatedFold`] / [`ValidatedUnfold`] values consumed by the linker and
//! the lowering pass.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use coal_ast::{
    BinOp, Expr, ExprKind, FoldClause, FoldDecl, FoldExpr, Lit, Pattern, PatternKind, Span,
    Spanned, UnaryOp, UnfoldBody, UnfoldDecl, UnfoldExpr, pattern_bindings,
};
use coal_types::{ParamScope, Type, TypeDefinition, TypeRegistry, TypeResolver, match_type};

use crate::FoldConfig;
use crate::error::{FieldProblem, FoldError, FoldWarning};
use crate::exhaustive::{ExhaustivenessOracle, MatrixOracle};
use crate::locate::{Locator, PositionKind, RecursiveSlots};
use crate::trace::{FoldAction, Phase, Tracer};

/// A fold whose clauses passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedFold {
    /// Declared name, or a generated `fold#<offset>` for expression folds.
    pub name: String,
    pub named: bool,
    /// The data type consumed.
    pub domain: Type,
    /// Whether the fold threads an accumulator next to its scrutinee.
    pub accumulator: bool,
    pub seed_type: Option<Type>,
    pub codomain: Option<Type>,
    pub clauses: Vec<FoldClause>,
    /// Every `fold_name(@p)` occurrence in the clause patterns.
    pub links: Vec<FoldLink>,
    pub span: Span,
}

/// A `fold_name(@p)` pattern occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldLink {
    pub fold: Spanned<String>,
    /// Type of the matched component, when known.
    pub component: Option<Type>,
    pub span: Span,
}

/// An unfold whose field clauses passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedUnfold {
    /// Declared name, or a generated `unfold#<offset>` for expression unfolds.
    pub name: String,
    pub named: bool,
    /// The codata type produced, e.g. `Stream<int>`.
    pub codata: Type,
    pub seed_type: Option<Type>,
    /// Field names in declaration order of the codata type.
    pub fields: Vec<String>,
    pub body: UnfoldBody,
    pub span: Span,
}

impl ValidatedUnfold {
    pub fn codata_name(&self) -> &str {
        self.codata.head_name().unwrap_or_default()
    }
}

/// Check a top-level named fold.
pub fn check_fold(decl: &FoldDecl, registry: &TypeRegistry) -> Result<ValidatedFold, Vec<FoldError>> {
    Checker::new(registry, FoldConfig::default()).check_fold_decl(decl)
}

/// Check a top-level named unfold.
pub fn check_unfold(
    decl: &UnfoldDecl,
    registry: &TypeRegistry,
) -> Result<ValidatedUnfold, Vec<FoldError>> {
    Checker::new(registry, FoldConfig::default()).check_unfold_decl(decl)
}

/// Stateful checker for one compilation unit.
///
/// Owns the locator cache and memoises expression-level folds by span, so
/// the lowering pass can ask for them again without re-checking.
pub struct Checker<'r> {
    registry: &'r TypeRegistry,
    locator: Locator<'r, TypeRegistry>,
    oracle: Box<dyn ExhaustivenessOracle + 'r>,
    config: FoldConfig,
    tracer: Tracer,
    warnings: Vec<FoldWarning>,
    folds: BTreeMap<Span, ValidatedFold>,
    unfolds: BTreeMap<Span, ValidatedUnfold>,
}

impl<'r> Checker<'r> {
    pub fn new(registry: &'r TypeRegistry, config: FoldConfig) -> Self {
        Self {
            registry,
            locator: Locator::new(registry),
            oracle: Box::new(MatrixOracle::new(registry)),
            tracer: Tracer::new(config.trace),
            config,
            warnings: Vec::new(),
            folds: BTreeMap::new(),
            unfolds: BTreeMap::new(),
        }
    }

    /// Replace the exhaustiveness oracle.
    pub fn with_oracle(mut self, oracle: Box<dyn ExhaustivenessOracle + 'r>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn registry(&self) -> &'r TypeRegistry {
        self.registry
    }

    pub fn config(&self) -> &FoldConfig {
        &self.config
    }

    pub fn tracer(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    pub fn take_trace(&mut self) -> Tracer {
        std::mem::replace(&mut self.tracer, Tracer::new(self.config.trace))
    }

    pub fn take_warnings(&mut self) -> Vec<FoldWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Expression-level folds validated so far, in source order.
    pub fn expression_folds(&self) -> impl Iterator<Item = &ValidatedFold> {
        self.folds.values()
    }

    /// Recursive slots of `def`, through the unit-wide cache.
    pub fn locate(&mut self, def: &TypeDefinition) -> Result<Arc<RecursiveSlots>, FoldError> {
        self.locator.slots(def, &mut self.tracer)
    }

    fn cap(&self, mut errors: Vec<FoldError>) -> Vec<FoldError> {
        errors.truncate(self.config.max_errors_per_definition.max(1));
        errors
    }

    // -- Folds --

    pub fn check_fold_decl(&mut self, decl: &FoldDecl) -> Result<ValidatedFold, Vec<FoldError>> {
        let name = decl.name.node.clone();
        let undetermined = |reason: String| {
            vec![FoldError::UndeterminedFoldDomain {
                subject: name.clone(),
                reason,
                span: decl.domain.span,
            }]
        };
        let declared = self
            .registry
            .resolve(&decl.domain.node, ParamScope::Implicit)
            .map_err(|err| undetermined(err.to_string()))?;
        let (domain, seed_type) = match (decl.is_accumulator(), declared) {
            (true, Type::Tuple(mut items)) if items.len() == 2 => {
                let seed = items.pop();
                let domain = items.pop().ok_or_else(|| undetermined("empty domain".into()))?;
                (domain, seed)
            }
            (_, domain) => (domain, None),
        };
        let codomain = self
            .registry
            .resolve(&decl.codomain.node, ParamScope::Implicit)
            .map_err(|err| {
                vec![FoldError::UndeterminedFoldDomain {
                    subject: name.clone(),
                    reason: format!("result type: {err}"),
                    span: decl.codomain.span,
                }]
            })?;
        self.check_fold_parts(FoldParts {
            name: name.clone(),
            named: true,
            domain,
            accumulator: decl.is_accumulator(),
            seed_type,
            codomain: Some(codomain),
            clauses: &decl.clauses,
            span: decl.span,
        })
    }

    pub fn check_fold_expr(&mut self, fold: &FoldExpr) -> Result<ValidatedFold, Vec<FoldError>> {
        if let Some(done) = self.folds.get(&fold.span) {
            return Ok(done.clone());
        }
        let mut errors = Vec::new();
        self.check_expr(&fold.scrutinee, &mut errors);
        if let Some(seed) = &fold.seed {
            self.check_expr(seed, &mut errors);
        }
        let domain = match fold_expr_domain(self.registry, fold) {
            Ok(domain) => domain,
            Err(err) => {
                errors.push(err);
                return Err(self.cap(errors));
            }
        };
        let seed_type = fold
            .seed
            .as_ref()
            .and_then(|seed| synth(self.registry, seed, &BTreeMap::new()));
        let result = self.check_fold_parts(FoldParts {
            name: format!("fold#{}", fold.span.start),
            named: false,
            domain,
            accumulator: fold.seed.is_some(),
            seed_type,
            codomain: None,
            clauses: &fold.clauses,
            span: fold.span,
        });
        match result {
            Ok(validated) if errors.is_empty() => {
                self.folds.insert(fold.span, validated.clone());
                Ok(validated)
            }
            Ok(_) => Err(self.cap(errors)),
            Err(more) => {
                errors.extend(more);
                Err(self.cap(errors))
            }
        }
    }

    fn check_fold_parts(&mut self, parts: FoldParts<'_>) -> Result<ValidatedFold, Vec<FoldError>> {
        let FoldParts {
            name,
            named,
            domain,
            accumulator,
            seed_type,
            codomain,
            clauses,
            span,
        } = parts;

        let def = data_definition(self.registry, &domain, &name, span).map_err(|e| vec![e])?;
        let slots = self.locate(def).map_err(|e| vec![e])?;
        self.tracer.record(
            Phase::Check,
            FoldAction::ResolveDomain,
            &name,
            format!("consumes {domain}"),
            Some(span),
        );

        let mut walker = ClauseWalker {
            registry: self.registry,
            domain: &domain,
            domain_def: def,
            slots: &slots,
            links: Vec::new(),
            errors: Vec::new(),
        };
        for clause in clauses {
            let before = walker.errors.len();
            if accumulator {
                walker.accumulator_clause(&clause.pattern);
            } else {
                walker.walk(&clause.pattern, Site::Top, Some(domain.clone()));
            }
            let action = if walker.errors.len() == before {
                FoldAction::AcceptClause
            } else {
                FoldAction::RejectClause
            };
            self.tracer.record(
                Phase::Check,
                action,
                &name,
                clause.pattern.node.to_string(),
                Some(clause.pattern.span),
            );
        }
        let ClauseWalker {
            links,
            mut errors,
            ..
        } = walker;

        if errors.is_empty() {
            let scrutinee = if accumulator {
                Type::Tuple(vec![
                    domain.clone(),
                    seed_type.clone().unwrap_or_else(|| Type::Param("?".into())),
                ])
            } else {
                domain.clone()
            };
            let patterns: Vec<&Pattern> = clauses.iter().map(|c| &c.pattern).collect();
            let missing = self.oracle.missing_patterns(&scrutinee, &patterns);
            self.tracer.record(
                Phase::Check,
                FoldAction::CheckExhaustive,
                &name,
                if missing.is_empty() {
                    "exhaustive".to_string()
                } else {
                    format!("missing {}", missing.join(", "))
                },
                Some(span),
            );
            if !missing.is_empty() {
                errors.push(FoldError::NonExhaustiveFoldPatterns {
                    fold: name.clone(),
                    missing,
                    span,
                });
            }
        }

        for clause in clauses {
            self.check_expr(&clause.body, &mut errors);
        }

        if accumulator && self.config.accumulator_warnings {
            for clause in clauses {
                self.warn_accumulator_values(&name, clause);
            }
        }

        if !errors.is_empty() {
            return Err(self.cap(errors));
        }
        Ok(ValidatedFold {
            name,
            named,
            domain,
            accumulator,
            seed_type,
            codomain,
            clauses: clauses.to_vec(),
            links,
            span,
        })
    }

    fn warn_accumulator_values(&mut self, fold: &str, clause: &FoldClause) {
        let PatternKind::Tuple(halves) = &clause.pattern.node else {
            return;
        };
        let Some(data_half) = halves.first() else {
            return;
        };
        for binder in at_binders(data_half) {
            let mut uses = Vec::new();
            value_uses(&clause.body, &binder, &mut uses);
            for span in uses {
                self.warnings.push(FoldWarning::AccumulatorThreading {
                    fold: fold.to_string(),
                    binder: binder.clone(),
                    span,
                });
            }
        }
    }

    // -- Unfolds --

    pub fn check_unfold_decl(
        &mut self,
        decl: &UnfoldDecl,
    ) -> Result<ValidatedUnfold, Vec<FoldError>> {
        let name = decl.name.node.clone();
        let seed_type = self
            .registry
            .resolve(&decl.domain.node, ParamScope::Implicit)
            .map_err(|err| {
                vec![FoldError::UndeterminedFoldDomain {
                    subject: name.clone(),
                    reason: format!("seed type: {err}"),
                    span: decl.domain.span,
                }]
            })?;
        let codata = self
            .registry
            .resolve(&decl.codomain.node, ParamScope::Implicit)
            .map_err(|err| {
                vec![FoldError::UndeterminedFoldDomain {
                    subject: name.clone(),
                    reason: err.to_string(),
                    span: decl.codomain.span,
                }]
            })?;
        self.check_unfold_parts(name, true, codata, Some(seed_type), &decl.body, decl.span)
    }

    pub fn check_unfold_expr(
        &mut self,
        unfold: &UnfoldExpr,
    ) -> Result<ValidatedUnfold, Vec<FoldError>> {
        if let Some(done) = self.unfolds.get(&unfold.span) {
            return Ok(done.clone());
        }
        let mut errors = Vec::new();
        self.check_expr(&unfold.seed, &mut errors);
        let codata = match unfold_expr_codata(self.registry, unfold) {
            Ok(codata) => codata,
            Err(err) => {
                errors.push(err);
                return Err(self.cap(errors));
            }
        };
        let seed_type = synth(self.registry, &unfold.seed, &BTreeMap::new());
        let name = format!("unfold#{}", unfold.span.start);
        match self.check_unfold_parts(name, false, codata, seed_type, &unfold.body, unfold.span) {
            Ok(validated) if errors.is_empty() => {
                self.unfolds.insert(unfold.span, validated.clone());
                Ok(validated)
            }
            Ok(_) => Err(self.cap(errors)),
            Err(more) => {
                errors.extend(more);
                Err(self.cap(errors))
            }
        }
    }

    fn check_unfold_parts(
        &mut self,
        name: String,
        named: bool,
        codata: Type,
        seed_type: Option<Type>,
        body: &UnfoldBody,
        span: Span,
    ) -> Result<ValidatedUnfold, Vec<FoldError>> {
        let def = codata_definition(self.registry, &codata, &name, span).map_err(|e| vec![e])?;
        let slots = self.locate(def).map_err(|e| vec![e])?;
        self.tracer.record(
            Phase::Check,
            FoldAction::ResolveDomain,
            &name,
            format!("produces {codata}"),
            Some(span),
        );
        let subst = def.instantiate(&codata);
        let mut errors = Vec::new();

        let seed_pattern = &body.seed_pattern;
        if seed_pattern.node.contains_at() {
            errors.push(FoldError::IllegalAtPatternPlacement {
                pattern: seed_pattern.node.to_string(),
                reason: "the seed pattern of an unfold cannot use `@`".into(),
                span: seed_pattern.span,
            });
        } else if let Some(seed_type) = &seed_type
            && !irrefutable(seed_pattern)
        {
            let missing = self.oracle.missing_patterns(seed_type, &[seed_pattern]);
            if !missing.is_empty() {
                errors.push(FoldError::NonExhaustiveFoldPatterns {
                    fold: name.clone(),
                    missing,
                    span: seed_pattern.span,
                });
            }
        }

        let mut env = BTreeMap::new();
        if let Some(seed_type) = &seed_type {
            bind_pattern_types(seed_pattern, seed_type, &mut env);
        }

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for field in &body.fields {
            let field_name = field.name.node.as_str();
            let Some(declared) = def.field(field_name) else {
                errors.push(FoldError::MissingOrDuplicateCodataField {
                    codata: def.name.clone(),
                    field: field_name.to_string(),
                    problem: FieldProblem::Unknown,
                    span: field.name.span,
                });
                continue;
            };
            if !seen.insert(field_name) {
                errors.push(FoldError::MissingOrDuplicateCodataField {
                    codata: def.name.clone(),
                    field: field_name.to_string(),
                    problem: FieldProblem::Duplicate,
                    span: field.name.span,
                });
                continue;
            }
            if field.corecursive {
                match slots.slot(&declared.name, 0) {
                    Some(slot) if slot.kind == PositionKind::SelfRef => {
                        if let Some(expected) = &seed_type
                            && let Some(found) = synth(self.registry, &field.value, &env)
                            && !seed_compatible(expected, &found)
                        {
                            errors.push(FoldError::SeedTypeMismatch {
                                field: field_name.to_string(),
                                expected: expected.to_string(),
                                found: found.to_string(),
                                span: field.value.span,
                            });
                        }
                    }
                    slot => {
                        let field_ty = slot
                            .map(|s| s.ty.substitute(&subst).to_string())
                            .unwrap_or_else(|| "?".into());
                        errors.push(FoldError::IllegalAtPatternPlacement {
                            pattern: format!("@{field_name}"),
                            reason: format!(
                                "field `{field_name}` has type `{field_ty}`, not `{codata}`; only corecursive fields take `@`"
                            ),
                            span: field.span,
                        });
                    }
                }
            }
            self.check_expr(&field.value, &mut errors);
        }
        for declared in def.fields() {
            if !seen.contains(declared.name.as_str()) {
                errors.push(FoldError::MissingOrDuplicateCodataField {
                    codata: def.name.clone(),
                    field: declared.name.clone(),
                    problem: FieldProblem::Missing,
                    span,
                });
            }
        }

        if !errors.is_empty() {
            return Err(self.cap(errors));
        }
        Ok(ValidatedUnfold {
            name,
            named,
            fields: def.fields().iter().map(|f| f.name.clone()).collect(),
            codata,
            seed_type,
            body: body.clone(),
            span,
        })
    }

    // -- Expressions --

    /// Check every fold and unfold nested in `expr`, and reject `@`
    /// patterns outside fold clauses.
    pub fn check_expr(&mut self, expr: &Expr, errors: &mut Vec<FoldError>) {
        match &expr.node {
            ExprKind::Lit(_) | ExprKind::Var(_) => {}
            ExprKind::Fold(fold) => {
                if let Err(more) = self.check_fold_expr(fold) {
                    errors.extend(more);
                }
            }
            ExprKind::Unfold(unfold) => {
                if let Err(more) = self.check_unfold_expr(unfold) {
                    errors.extend(more);
                }
            }
            ExprKind::Let {
                pattern,
                value,
                body,
            } => {
                reject_at_outside_fold(pattern, errors);
                self.check_expr(value, errors);
                self.check_expr(body, errors);
            }
            ExprKind::Match { scrutinee, arms } => {
                self.check_expr(scrutinee, errors);
                for arm in arms {
                    reject_at_outside_fold(&arm.pattern, errors);
                    self.check_expr(&arm.body, errors);
                }
            }
            ExprKind::Lambda { body, .. } => self.check_expr(body, errors),
            ExprKind::Call { func, args } => {
                self.check_expr(func, errors);
                for arg in args {
                    self.check_expr(arg, errors);
                }
            }
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.check_expr(condition, errors);
                self.check_expr(then_branch, errors);
                self.check_expr(else_branch, errors);
            }
            ExprKind::BinaryOp { left, right, .. } => {
                self.check_expr(left, errors);
                self.check_expr(right, errors);
            }
            ExprKind::UnaryOp { operand, .. } => self.check_expr(operand, errors),
            ExprKind::Tuple(items) | ExprKind::Constructor { args: items, .. } => {
                for item in items {
                    self.check_expr(item, errors);
                }
            }
            ExprKind::FieldAccess { expr, .. } => self.check_expr(expr, errors),
        }
    }
}

struct FoldParts<'c> {
    name: String,
    named: bool,
    domain: Type,
    accumulator: bool,
    seed_type: Option<Type>,
    codomain: Option<Type>,
    clauses: &'c [FoldClause],
    span: Span,
}

// ---------------------------------------------------------------------------
// Clause patterns
// ---------------------------------------------------------------------------

/// Where a sub-pattern sits inside a clause pattern.
#[derive(Debug, Clone)]
enum Site {
    /// The whole clause pattern, or the value half of an accumulator pair.
    Top,
    /// Argument `index` of constructor `ctor`; `slot` is set when `ctor`
    /// builds the fold's own domain.
    Component {
        ctor: String,
        index: usize,
        slot: Option<PositionKind>,
    },
    TupleElement { under_ctor: bool },
}

struct ClauseWalker<'w> {
    registry: &'w TypeRegistry,
    domain: &'w Type,
    domain_def: &'w TypeDefinition,
    slots: &'w RecursiveSlots,
    links: Vec<FoldLink>,
    errors: Vec<FoldError>,
}

impl ClauseWalker<'_> {
    fn illegal_at(&mut self, pattern: &Pattern, reason: String) {
        self.errors.push(FoldError::IllegalAtPatternPlacement {
            pattern: pattern.node.to_string(),
            reason,
            span: pattern.span,
        });
    }

    fn accumulator_clause(&mut self, pattern: &Pattern) {
        let PatternKind::Tuple(halves) = &pattern.node else {
            self.errors.push(FoldError::MalformedAccumulatorClause {
                reason: format!(
                    "clause pattern `{}` must be a pair `(value, accumulator)`",
                    pattern.node
                ),
                span: pattern.span,
            });
            return;
        };
        let [value, seed] = halves.as_slice() else {
            self.errors.push(FoldError::MalformedAccumulatorClause {
                reason: format!(
                    "clause pattern `{}` has {} elements; expected `(value, accumulator)`",
                    pattern.node,
                    halves.len()
                ),
                span: pattern.span,
            });
            return;
        };
        self.walk(value, Site::Top, Some(self.domain.clone()));
        if seed.node.contains_at() {
            self.illegal_at(
                seed,
                "the accumulator half of a clause cannot use `@`".into(),
            );
        } else if !irrefutable(seed) {
            self.errors.push(FoldError::MalformedAccumulatorClause {
                reason: format!("the accumulator half `{}` must be irrefutable", seed.node),
                span: seed.span,
            });
        }
    }

    fn walk(&mut self, pattern: &Pattern, site: Site, expected: Option<Type>) {
        match &pattern.node {
            PatternKind::Wildcard | PatternKind::Var(_) | PatternKind::Lit(_) => {}
            PatternKind::At(name) => self.check_at(pattern, name, &site),
            PatternKind::AtCall { fold, binder } => {
                let under_ctor = match site {
                    Site::Component { .. } => true,
                    Site::TupleElement { under_ctor } => under_ctor,
                    Site::Top => false,
                };
                if !under_ctor {
                    self.illegal_at(
                        pattern,
                        format!(
                            "`{}(@..)` must be a component of a constructor pattern",
                            fold.node
                        ),
                    );
                } else if binder.node.contains_at() || !irrefutable(binder) {
                    self.illegal_at(
                        pattern,
                        "the binder of a named-fold pattern must be a variable, `_`, or a tuple of those"
                            .into(),
                    );
                } else {
                    self.links.push(FoldLink {
                        fold: fold.clone(),
                        component: expected,
                        span: pattern.span,
                    });
                }
            }
            PatternKind::Constructor { name, args } => {
                self.walk_constructor(pattern, name, args, expected)
            }
            PatternKind::Tuple(items) => {
                let element_types: Vec<Option<Type>> = match &expected {
                    Some(Type::Tuple(types)) if types.len() == items.len() => {
                        types.iter().cloned().map(Some).collect()
                    }
                    None | Some(Type::Param(_)) => vec![None; items.len()],
                    Some(other) => {
                        self.errors.push(FoldError::PatternTypeMismatch {
                            pattern: pattern.node.to_string(),
                            expected: other.to_string(),
                            span: pattern.span,
                        });
                        return;
                    }
                };
                let under_ctor = match site {
                    Site::Component { .. } => true,
                    Site::TupleElement { under_ctor } => under_ctor,
                    Site::Top => false,
                };
                for (item, ty) in items.iter().zip(element_types) {
                    self.walk(item, Site::TupleElement { under_ctor }, ty);
                }
            }
            PatternKind::Or(alternatives) => {
                for alternative in alternatives {
                    self.walk(alternative, site.clone(), expected.clone());
                }
                self.check_or_bindings(alternatives);
            }
            PatternKind::As { pattern: inner, .. } => self.walk(inner, site, expected),
        }
    }

    fn check_at(&mut self, pattern: &Pattern, name: &str, site: &Site) {
        let reason = match site {
            Site::Top => format!(
                "`@{name}` cannot stand for the whole clause; use it as a constructor argument, e.g. `Succ(@{name})`"
            ),
            Site::TupleElement { .. } => {
                "an element of a tuple pattern is not a recursive position".to_string()
            }
            Site::Component { ctor, index, slot } => match slot {
                Some(PositionKind::SelfRef) => return,
                Some(PositionKind::SelfWrapped { container }) => format!(
                    "component {} of `{ctor}` is nested inside `{container}`; recurse into it with a named fold, e.g. `fold_name(@{name})`",
                    index + 1
                ),
                Some(PositionKind::Other) => format!(
                    "component {} of `{ctor}` is not a recursive position of `{}`",
                    index + 1,
                    self.domain
                ),
                None => format!(
                    "`{ctor}` does not build `{}`; `@` recurses only into the fold's own type",
                    self.domain
                ),
            },
        };
        self.illegal_at(pattern, reason);
    }

    fn walk_constructor(
        &mut self,
        pattern: &Pattern,
        name: &str,
        args: &[Pattern],
        expected: Option<Type>,
    ) {
        let registry = self.registry;
        let Some((def, variant)) = registry.constructor(name) else {
            self.errors.push(FoldError::UnboundName {
                what: "constructor",
                name: name.to_string(),
                defined_later: false,
                span: pattern.span,
            });
            return;
        };
        if variant.components.len() != args.len() {
            self.errors.push(FoldError::ConstructorArity {
                constructor: name.to_string(),
                expected: variant.components.len(),
                found: args.len(),
                span: pattern.span,
            });
            return;
        }
        match &expected {
            Some(Type::Named { name: head, .. }) if *head != def.name => {
                self.errors.push(FoldError::PatternTypeMismatch {
                    pattern: pattern.node.to_string(),
                    expected: head.clone(),
                    span: pattern.span,
                });
                return;
            }
            Some(Type::Named { .. } | Type::Param(_)) | None => {}
            Some(other) => {
                self.errors.push(FoldError::PatternTypeMismatch {
                    pattern: pattern.node.to_string(),
                    expected: other.to_string(),
                    span: pattern.span,
                });
                return;
            }
        }

        // Only a constructor of the domain, at the domain's own
        // instantiation, has recursive positions.
        let own = def.name == self.domain_def.name
            && expected.as_ref().is_none_or(|ty| ty == self.domain);
        let subst = expected
            .as_ref()
            .map(|ty| def.instantiate(ty))
            .unwrap_or_default();
        let scope = ParamScope::Declared(&def.params);
        for (index, (arg, component)) in args.iter().zip(&variant.components).enumerate() {
            let component_ty = registry
                .resolve(&component.node, scope)
                .ok()
                .map(|ty| ty.substitute(&subst));
            let slot = if own {
                self.slots.get(name, index).cloned()
            } else {
                None
            };
            self.walk(
                arg,
                Site::Component {
                    ctor: name.to_string(),
                    index,
                    slot,
                },
                component_ty,
            );
        }
    }

    /// Every alternative must bind the same names, each the same way: plain,
    /// `@p`, or through the same named-fold link.
    fn check_or_bindings(&mut self, alternatives: &[Pattern]) {
        let names = |p: &Pattern| -> Vec<String> {
            let mut set = BTreeSet::new();
            binding_forms(p, &mut set);
            set.into_iter().collect()
        };
        let Some((first, rest)) = alternatives.split_first() else {
            return;
        };
        let expected = names(first);
        for alternative in rest {
            let found = names(alternative);
            if found != expected {
                self.errors.push(FoldError::InconsistentOrBindings {
                    expected: expected.clone(),
                    found,
                    span: alternative.span,
                });
            }
        }
    }
}

/// Bound names rendered with their binding form: `p`, `@p`, `f(@p)`, or
/// `a via f(@(a, b))`.
fn binding_forms(pattern: &Pattern, out: &mut BTreeSet<String>) {
    match &pattern.node {
        PatternKind::Wildcard | PatternKind::Lit(_) => {}
        PatternKind::Var(name) => {
            out.insert(name.clone());
        }
        PatternKind::At(name) => {
            out.insert(format!("@{name}"));
        }
        PatternKind::Constructor { args: items, .. } | PatternKind::Tuple(items) => {
            items.iter().for_each(|p| binding_forms(p, out))
        }
        PatternKind::Or(alternatives) => {
            if let Some(first) = alternatives.first() {
                binding_forms(first, out);
            }
        }
        PatternKind::As { pattern, name } => {
            binding_forms(pattern, out);
            out.insert(name.node.clone());
        }
        PatternKind::AtCall { fold, binder } => {
            let link = format!("{}(@{})", fold.node, binder.node);
            if binder.node.as_var().is_some() {
                out.insert(link);
            } else {
                for name in pattern_bindings(binder) {
                    out.insert(format!("{} via {link}", name.node));
                }
            }
        }
    }
}

fn reject_at_outside_fold(pattern: &Pattern, errors: &mut Vec<FoldError>) {
    if pattern.node.contains_at() {
        errors.push(FoldError::IllegalAtPatternPlacement {
            pattern: pattern.node.to_string(),
            reason: "`@` patterns are only allowed in fold clauses".into(),
            span: pattern.span,
        });
    }
}

/// Variables, wildcards, and tuples or `as`-bindings of those.
pub(crate) fn irrefutable(pattern: &Pattern) -> bool {
    match &pattern.node {
        PatternKind::Wildcard | PatternKind::Var(_) => true,
        PatternKind::Tuple(items) => items.iter().all(irrefutable),
        PatternKind::As { pattern, .. } => irrefutable(pattern),
        _ => false,
    }
}

/// Names bound by plain `@name` patterns.
fn at_binders(pattern: &Pattern) -> Vec<String> {
    let mut out = Vec::new();
    collect_at_binders(pattern, &mut out);
    out
}

fn collect_at_binders(pattern: &Pattern, out: &mut Vec<String>) {
    match &pattern.node {
        PatternKind::At(name) => out.push(name.clone()),
        PatternKind::Constructor { args: items, .. } | PatternKind::Tuple(items) => {
            items.iter().for_each(|p| collect_at_binders(p, out))
        }
        PatternKind::Or(alternatives) => {
            if let Some(first) = alternatives.first() {
                collect_at_binders(first, out);
            }
        }
        PatternKind::As { pattern, .. } => collect_at_binders(pattern, out),
        _ => {}
    }
}

fn binds(pattern: &Pattern, name: &str) -> bool {
    pattern_bindings(pattern).iter().any(|b| b.node == name)
}

/// Spans where `name` is used other than as the callee of a call.
fn value_uses(expr: &Expr, name: &str, out: &mut Vec<Span>) {
    match &expr.node {
        ExprKind::Var(v) if v == name => out.push(expr.span),
        ExprKind::Lit(_) | ExprKind::Var(_) => {}
        ExprKind::Call { func, args } => {
            if !matches!(&func.node, ExprKind::Var(v) if v == name) {
                value_uses(func, name, out);
            }
            args.iter().for_each(|a| value_uses(a, name, out));
        }
        ExprKind::Let {
            pattern,
            value,
            body,
        } => {
            value_uses(value, name, out);
            if !binds(pattern, name) {
                value_uses(body, name, out);
            }
        }
        ExprKind::Lambda { params, body } => {
            if !params.iter().any(|p| p.name.node == name) {
                value_uses(body, name, out);
            }
        }
        ExprKind::Match { scrutinee, arms } => {
            value_uses(scrutinee, name, out);
            for arm in arms {
                if !binds(&arm.pattern, name) {
                    value_uses(&arm.body, name, out);
                }
            }
        }
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            value_uses(condition, name, out);
            value_uses(then_branch, name, out);
            value_uses(else_branch, name, out);
        }
        ExprKind::BinaryOp { left, right, .. } => {
            value_uses(left, name, out);
            value_uses(right, name, out);
        }
        ExprKind::UnaryOp { operand, .. } => value_uses(operand, name, out),
        ExprKind::Tuple(items) | ExprKind::Constructor { args: items, .. } => {
            items.iter().for_each(|i| value_uses(i, name, out))
        }
        ExprKind::FieldAccess { expr, .. } => value_uses(expr, name, out),
        ExprKind::Fold(fold) => {
            value_uses(&fold.scrutinee, name, out);
            if let Some(seed) = &fold.seed {
                value_uses(seed, name, out);
            }
            for clause in &fold.clauses {
                if !binds(&clause.pattern, name) {
                    value_uses(&clause.body, name, out);
                }
            }
        }
        ExprKind::Unfold(unfold) => {
            value_uses(&unfold.seed, name, out);
            if !binds(&unfold.body.seed_pattern, name) {
                for field in &unfold.body.fields {
                    value_uses(&field.value, name, out);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Domains
// ---------------------------------------------------------------------------

/// The data definition behind a fold domain.
pub(crate) fn data_definition<'a>(
    registry: &'a TypeRegistry,
    domain: &Type,
    subject: &str,
    span: Span,
) -> Result<&'a TypeDefinition, FoldError> {
    match domain.head_name().and_then(|name| registry.get(name)) {
        Some(def) if !def.is_codata() => Ok(def),
        Some(def) => Err(FoldError::UndeterminedFoldDomain {
            subject: subject.to_string(),
            reason: format!(
                "`{}` is a codata type; folds consume data, observe codata with field access",
                def.name
            ),
            span,
        }),
        None => Err(FoldError::UndeterminedFoldDomain {
            subject: subject.to_string(),
            reason: format!("`{domain}` is not a data type"),
            span,
        }),
    }
}

fn codata_definition<'a>(
    registry: &'a TypeRegistry,
    codata: &Type,
    subject: &str,
    span: Span,
) -> Result<&'a TypeDefinition, FoldError> {
    match codata.head_name().and_then(|name| registry.get(name)) {
        Some(def) if def.is_codata() => Ok(def),
        _ => Err(FoldError::UndeterminedFoldDomain {
            subject: subject.to_string(),
            reason: format!("an unfold must produce a codata type, found `{codata}`"),
            span,
        }),
    }
}

/// The domain of an expression-level fold: its ascription, or the type of
/// the first constructor used by its clauses.
pub(crate) fn fold_expr_domain(registry: &TypeRegistry, fold: &FoldExpr) -> Result<Type, FoldError> {
    let undetermined = |reason: String| FoldError::UndeterminedFoldDomain {
        subject: "fold".into(),
        reason,
        span: fold.span,
    };
    if let Some(ascription) = &fold.ascription {
        return registry
            .resolve(&ascription.node, ParamScope::Implicit)
            .map_err(|err| undetermined(err.to_string()));
    }
    let constructor = fold.clauses.iter().find_map(|clause| {
        let value_half = match (&fold.seed, &clause.pattern.node) {
            (Some(_), PatternKind::Tuple(halves)) => halves.first()?,
            (Some(_), _) => return None,
            (None, _) => &clause.pattern,
        };
        first_constructor(value_half)
    });
    match constructor.and_then(|ctor| registry.type_of_constructor(ctor)) {
        Some(def) => Ok(def.self_type()),
        None => Err(undetermined(
            "no clause names a constructor; annotate the scrutinee, e.g. `fold(xs : List<int>) { .. }`"
                .into(),
        )),
    }
}

fn first_constructor(pattern: &Pattern) -> Option<&str> {
    match &pattern.node {
        PatternKind::Constructor { name, .. } => Some(name),
        PatternKind::As { pattern, .. } => first_constructor(pattern),
        PatternKind::Or(alternatives) => alternatives.iter().find_map(first_constructor),
        _ => None,
    }
}

/// The codata type of an expression-level unfold: its ascription, or the
/// unique codata type with exactly the clause's field names.
pub(crate) fn unfold_expr_codata(
    registry: &TypeRegistry,
    unfold: &UnfoldExpr,
) -> Result<Type, FoldError> {
    let undetermined = |reason: String| FoldError::UndeterminedFoldDomain {
        subject: "unfold".into(),
        reason,
        span: unfold.span,
    };
    if let Some(ascription) = &unfold.ascription {
        return registry
            .resolve(&ascription.node, ParamScope::Implicit)
            .map_err(|err| undetermined(err.to_string()));
    }
    let names: Vec<&str> = unfold
        .body
        .fields
        .iter()
        .map(|f| f.name.node.as_str())
        .collect();
    registry
        .codata_with_fields(names.iter().copied())
        .map(TypeDefinition::self_type)
        .ok_or_else(|| {
            undetermined(format!(
                "no unique codata type has fields {{{}}}; annotate it, e.g. `unfold(seed) : Stream<int> {{ .. }}`",
                names.join(", ")
            ))
        })
}

// ---------------------------------------------------------------------------
// Seed typing
// ---------------------------------------------------------------------------

fn seed_compatible(expected: &Type, found: &Type) -> bool {
    expected == found || match_type(expected, found, &mut BTreeMap::new())
}

fn bind_pattern_types(pattern: &Pattern, ty: &Type, env: &mut BTreeMap<String, Type>) {
    match (&pattern.node, ty) {
        (PatternKind::Var(name), _) => {
            env.insert(name.clone(), ty.clone());
        }
        (PatternKind::Tuple(items), Type::Tuple(types)) if items.len() == types.len() => {
            for (item, ty) in items.iter().zip(types) {
                bind_pattern_types(item, ty, env);
            }
        }
        (PatternKind::As { pattern, name }, _) => {
            env.insert(name.node.clone(), ty.clone());
            bind_pattern_types(pattern, ty, env);
        }
        _ => {}
    }
}

/// Shallow type synthesis for seed expressions. `None` means unknown.
pub(crate) fn synth(registry: &TypeRegistry, expr: &Expr, env: &BTreeMap<String, Type>) -> Option<Type> {
    match &expr.node {
        ExprKind::Lit(lit) => Some(match lit {
            Lit::Int(_) => Type::Int,
            Lit::Float(_) => Type::Float,
            Lit::Bool(_) => Type::Bool,
            Lit::String(_) => Type::String,
            Lit::Unit => Type::Unit,
        }),
        ExprKind::Var(name) => env.get(name).cloned(),
        ExprKind::Tuple(items) => items
            .iter()
            .map(|item| synth(registry, item, env))
            .collect::<Option<Vec<_>>>()
            .map(Type::Tuple),
        ExprKind::BinaryOp { op, left, right } => match op.node {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let l = synth(registry, left, env)?;
                let r = synth(registry, right, env)?;
                (l == r && matches!(l, Type::Int | Type::Float)).then_some(l)
            }
            BinOp::Concat => Some(Type::String),
            BinOp::Eq
            | BinOp::Neq
            | BinOp::Lt
            | BinOp::Lte
            | BinOp::Gt
            | BinOp::Gte
            | BinOp::And
            | BinOp::Or => Some(Type::Bool),
        },
        ExprKind::UnaryOp { op, operand } => match op.node {
            UnaryOp::Neg => synth(registry, operand, env),
            UnaryOp::Not => Some(Type::Bool),
        },
        ExprKind::If {
            then_branch,
            else_branch,
            ..
        } => {
            let then_ty = synth(registry, then_branch, env)?;
            (synth(registry, else_branch, env)? == then_ty).then_some(then_ty)
        }
        ExprKind::Constructor { name, args } => {
            let (def, variant) = registry.constructor(&name.node)?;
            if variant.components.len() != args.len() {
                return None;
            }
            let scope = ParamScope::Declared(&def.params);
            let mut subst = BTreeMap::new();
            for (arg, component) in args.iter().zip(&variant.components) {
                let pattern = registry.resolve(&component.node, scope).ok()?;
                if let Some(found) = synth(registry, arg, env)
                    && !match_type(&pattern, &found, &mut subst)
                {
                    return None;
                }
            }
            let ty = def.self_type().substitute(&subst);
            ty.params()
                .iter()
                .all(|p| !def.params.contains(p))
                .then_some(ty)
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "check_tests.rs"]
mod tests;
