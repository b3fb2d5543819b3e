//! Lowering of validated folds and unfolds into core recursive functions.
//!
//! `@p` at a recursive position becomes a fresh component variable and a
//! `let p = @this(component)` around the clause body. Named-fold patterns
//! `f(@p)` become ordinary calls to the global `f`. Accumulator folds take the
//! seed as a second parameter and bind `@r` to `fn(s) => @this(component, s)`.
//! Every unfold field becomes a suspension.

use std::sync::Arc;

use coal_ast::{
    Expr, ExprKind, LetDecl, Pattern, PatternKind, Span, pattern_bindings,
};
use coal_core::{
    CoreArm, CoreBinding, CoreExpr, CoreExprKind, CoreFunction, CorePattern, FunctionOrigin,
};
use coal_types::TypeRegistry;

use crate::FoldConfig;
use crate::check::{Checker, ValidatedFold, ValidatedUnfold};
use crate::error::FoldError;
use crate::trace::{FoldAction, Phase};

/// Parameter holding the value being folded.
const SCRUTINEE: &str = "x$";
/// Parameter holding the accumulator of an accumulator fold, or the seed of
/// an unfold whose seed pattern is not a plain variable.
const SEED: &str = "s$";

/// A binding introduced by an `@` pattern, materialised around the body.
enum Deferred {
    Recurse {
        name: String,
        span: Span,
    },
    Linked {
        fold: String,
        binder: Pattern,
        component: String,
        span: Span,
    },
}

fn component_var(name: &str) -> String {
    format!("{name}$c")
}

/// Lower a pattern, replacing `@` sub-patterns with component variables.
fn lower_pattern(pattern: &Pattern, deferred: &mut Vec<Deferred>) -> CorePattern {
    match &pattern.node {
        PatternKind::Wildcard => CorePattern::Wildcard,
        PatternKind::Var(name) => CorePattern::Var(name.clone()),
        PatternKind::Lit(lit) => CorePattern::Lit(lit.clone()),
        PatternKind::Constructor { name, args } => CorePattern::Ctor {
            name: name.clone(),
            args: args.iter().map(|a| lower_pattern(a, deferred)).collect(),
        },
        PatternKind::Tuple(items) => {
            CorePattern::Tuple(items.iter().map(|p| lower_pattern(p, deferred)).collect())
        }
        PatternKind::Or(alternatives) => {
            // Alternatives bind every name the same way, so they share
            // component variables and the first one's deferred bindings.
            let mut lowered = Vec::with_capacity(alternatives.len());
            for (i, alternative) in alternatives.iter().enumerate() {
                let mut own = Vec::new();
                lowered.push(lower_pattern(alternative, &mut own));
                if i == 0 {
                    deferred.extend(own);
                }
            }
            CorePattern::Or(lowered)
        }
        PatternKind::As { pattern, name } => CorePattern::As {
            pattern: Box::new(lower_pattern(pattern, deferred)),
            name: name.node.clone(),
        },
        PatternKind::At(name) => {
            deferred.push(Deferred::Recurse {
                name: name.clone(),
                span: pattern.span,
            });
            CorePattern::Var(component_var(name))
        }
        PatternKind::AtCall { fold, binder } => {
            let Some(first) = pattern_bindings(binder).into_iter().next() else {
                return CorePattern::Wildcard;
            };
            let component = match binder.node.as_var() {
                Some(name) => component_var(name),
                None => format!("{}$c${}", fold.node, first.node),
            };
            deferred.push(Deferred::Linked {
                fold: fold.node.clone(),
                binder: (**binder).clone(),
                component: component.clone(),
                span: pattern.span,
            });
            CorePattern::Var(component)
        }
    }
}

/// Lowers validated definitions and the expressions inside them.
pub struct Lowerer<'c, 'r> {
    checker: &'c mut Checker<'r>,
    locals: Vec<String>,
}

impl<'c, 'r> Lowerer<'c, 'r> {
    pub fn new(checker: &'c mut Checker<'r>) -> Self {
        Self {
            checker,
            locals: Vec::new(),
        }
    }

    pub fn lower_fold(&mut self, fold: &ValidatedFold) -> Result<CoreFunction, Vec<FoldError>> {
        let (params, body) = self.fold_body(fold)?;
        let domain = fold.domain.to_string();
        let origin = if fold.accumulator {
            FunctionOrigin::AccumulatorFold { domain }
        } else {
            FunctionOrigin::Fold { domain }
        };
        self.checker.tracer().record(
            Phase::Lower,
            FoldAction::EmitFunction,
            &fold.name,
            format!("({})", params.join(", ")),
            Some(fold.span),
        );
        Ok(CoreFunction {
            name: fold.name.clone(),
            params,
            body,
            origin,
            span: fold.span,
        })
    }

    pub fn lower_unfold(
        &mut self,
        unfold: &ValidatedUnfold,
    ) -> Result<CoreFunction, Vec<FoldError>> {
        let (params, body) = self.unfold_body(unfold)?;
        self.checker.tracer().record(
            Phase::Lower,
            FoldAction::EmitFunction,
            &unfold.name,
            format!("({})", params.join(", ")),
            Some(unfold.span),
        );
        Ok(CoreFunction {
            name: unfold.name.clone(),
            params,
            body,
            origin: FunctionOrigin::Unfold {
                codata: unfold.codata.to_string(),
            },
            span: unfold.span,
        })
    }

    pub fn lower_binding(&mut self, decl: &LetDecl) -> Result<CoreBinding, Vec<FoldError>> {
        Ok(CoreBinding {
            name: decl.name.node.clone(),
            value: self.expr(&decl.value)?,
            span: decl.span,
        })
    }

    fn fold_body(&mut self, fold: &ValidatedFold) -> Result<(Vec<String>, CoreExpr), Vec<FoldError>> {
        let span = fold.span;
        let (params, scrutinee) = if fold.accumulator {
            (
                vec![SCRUTINEE.to_string(), SEED.to_string()],
                CoreExprKind::Tuple(vec![
                    CoreExpr::var(SCRUTINEE, span),
                    CoreExpr::var(SEED, span),
                ]),
            )
        } else {
            (
                vec![SCRUTINEE.to_string()],
                CoreExprKind::Var(SCRUTINEE.to_string()),
            )
        };

        let mut arms = Vec::with_capacity(fold.clauses.len());
        let mut errors = Vec::new();
        for clause in &fold.clauses {
            let mut deferred = Vec::new();
            let pattern = lower_pattern(&clause.pattern, &mut deferred);
            let body = self.scoped(&clause.pattern, |this| this.expr(&clause.body));
            match body {
                Ok(body) => arms.push(CoreArm {
                    pattern,
                    body: self.bind_deferred(fold, deferred, body),
                }),
                Err(more) => errors.extend(more),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        let body = CoreExpr::new(
            CoreExprKind::Match {
                scrutinee: Box::new(CoreExpr::new(scrutinee, span)),
                arms,
            },
            span,
        );
        Ok((params, body))
    }

    /// Wrap `body` in the bindings produced by the clause's `@` patterns,
    /// leftmost binding outermost.
    fn bind_deferred(
        &mut self,
        fold: &ValidatedFold,
        deferred: Vec<Deferred>,
        mut body: CoreExpr,
    ) -> CoreExpr {
        for binding in deferred.into_iter().rev() {
            body = match binding {
                Deferred::Recurse { name, span } => {
                    let component = CoreExpr::var(component_var(&name), span);
                    let value = if fold.accumulator {
                        let call = CoreExpr::new(
                            CoreExprKind::SelfCall {
                                function: fold.name.clone(),
                                args: vec![component, CoreExpr::var(SEED, span)],
                            },
                            span,
                        );
                        CoreExpr::new(
                            CoreExprKind::Lambda {
                                params: vec![SEED.to_string()],
                                body: Arc::new(call),
                            },
                            span,
                        )
                    } else {
                        CoreExpr::new(
                            CoreExprKind::SelfCall {
                                function: fold.name.clone(),
                                args: vec![component],
                            },
                            span,
                        )
                    };
                    self.checker.tracer().record(
                        Phase::Lower,
                        FoldAction::LowerSelfCall,
                        &fold.name,
                        format!("@{name}"),
                        Some(span),
                    );
                    CoreExpr::let_in(name, value, body)
                }
                Deferred::Linked {
                    fold: target,
                    binder,
                    component,
                    span,
                } => {
                    self.checker.tracer().record(
                        Phase::Lower,
                        FoldAction::LowerNamedCall,
                        &fold.name,
                        format!("{target}(@{})", binder.node),
                        Some(span),
                    );
                    let value = CoreExpr::call(
                        CoreExpr::global(target, span),
                        vec![CoreExpr::var(component, span)],
                        span,
                    );
                    match binder.node.as_var() {
                        Some(name) => CoreExpr::let_in(name, value, body),
                        None => {
                            let body_span = body.span;
                            CoreExpr::new(
                                CoreExprKind::Match {
                                    scrutinee: Box::new(value),
                                    arms: vec![CoreArm {
                                        pattern: lower_pattern(&binder, &mut Vec::new()),
                                        body,
                                    }],
                                },
                                body_span,
                            )
                        }
                    }
                }
            };
        }
        body
    }

    fn unfold_body(
        &mut self,
        unfold: &ValidatedUnfold,
    ) -> Result<(Vec<String>, CoreExpr), Vec<FoldError>> {
        let span = unfold.span;
        let seed_pattern = &unfold.body.seed_pattern;
        let codata = self.scoped(seed_pattern, |this| -> Result<CoreExpr, Vec<FoldError>> {
            let mut fields = Vec::with_capacity(unfold.fields.len());
            for name in &unfold.fields {
                let Some(field) = unfold.body.fields.iter().find(|f| f.name.node == *name) else {
                    continue;
                };
                let mut value = this.expr(&field.value)?;
                if field.corecursive {
                    this.checker.tracer().record(
                        Phase::Lower,
                        FoldAction::LowerSelfCall,
                        &unfold.name,
                        format!("@{name}"),
                        Some(field.span),
                    );
                    value = CoreExpr::new(
                        CoreExprKind::SelfCall {
                            function: unfold.name.clone(),
                            args: vec![value],
                        },
                        field.span,
                    );
                }
                this.checker.tracer().record(
                    Phase::Lower,
                    FoldAction::LowerThunk,
                    &unfold.name,
                    name.clone(),
                    Some(field.span),
                );
                fields.push((name.clone(), CoreExpr::thunk(value)));
            }
            Ok(CoreExpr::new(
                CoreExprKind::Codata {
                    type_name: unfold.codata_name().to_string(),
                    fields,
                },
                span,
            ))
        })?;

        Ok(match seed_pattern.node.as_var() {
            Some(seed) => (vec![seed.to_string()], codata),
            None => (
                vec![SEED.to_string()],
                CoreExpr::new(
                    CoreExprKind::Match {
                        scrutinee: Box::new(CoreExpr::var(SEED, span)),
                        arms: vec![CoreArm {
                            pattern: lower_pattern(seed_pattern, &mut Vec::new()),
                            body: codata,
                        }],
                    },
                    span,
                ),
            ),
        })
    }

    /// Run `f` with the names bound by `pattern` in scope.
    fn scoped<T>(&mut self, pattern: &Pattern, f: impl FnOnce(&mut Self) -> T) -> T {
        let depth = self.locals.len();
        self.locals
            .extend(pattern_bindings(pattern).into_iter().map(|name| name.node));
        let result = f(self);
        self.locals.truncate(depth);
        result
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.iter().any(|local| local == name)
    }

    pub fn expr(&mut self, expr: &Expr) -> Result<CoreExpr, Vec<FoldError>> {
        let span = expr.span;
        let kind = match &expr.node {
            ExprKind::Lit(lit) => CoreExprKind::Lit(lit.clone()),
            ExprKind::Var(name) if self.is_local(name) => CoreExprKind::Var(name.clone()),
            ExprKind::Var(name) => CoreExprKind::Global(name.clone()),
            ExprKind::Let {
                pattern,
                value,
                body,
            } => {
                let value = self.expr(value)?;
                let body = self.scoped(pattern, |this| this.expr(body))?;
                match pattern.node.as_var() {
                    Some(name) => CoreExprKind::Let {
                        name: name.to_string(),
                        value: Box::new(value),
                        body: Box::new(body),
                    },
                    None => CoreExprKind::Match {
                        scrutinee: Box::new(value),
                        arms: vec![CoreArm {
                            pattern: lower_pattern(pattern, &mut Vec::new()),
                            body,
                        }],
                    },
                }
            }
            ExprKind::Lambda { params, body } => {
                let names: Vec<String> = params.iter().map(|p| p.name.node.clone()).collect();
                let depth = self.locals.len();
                self.locals.extend(names.iter().cloned());
                let body = self.expr(body);
                self.locals.truncate(depth);
                CoreExprKind::Lambda {
                    params: names,
                    body: Arc::new(body?),
                }
            }
            ExprKind::Call { func, args } => CoreExprKind::Call {
                func: Box::new(self.expr(func)?),
                args: self.exprs(args)?,
            },
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => CoreExprKind::If {
                condition: Box::new(self.expr(condition)?),
                then_branch: Box::new(self.expr(then_branch)?),
                else_branch: Box::new(self.expr(else_branch)?),
            },
            ExprKind::Match { scrutinee, arms } => {
                let scrutinee = self.expr(scrutinee)?;
                let mut lowered = Vec::with_capacity(arms.len());
                for arm in arms {
                    lowered.push(CoreArm {
                        pattern: lower_pattern(&arm.pattern, &mut Vec::new()),
                        body: self.scoped(&arm.pattern, |this| this.expr(&arm.body))?,
                    });
                }
                CoreExprKind::Match {
                    scrutinee: Box::new(scrutinee),
                    arms: lowered,
                }
            }
            ExprKind::BinaryOp { op, left, right } => CoreExprKind::Binary {
                op: op.node,
                left: Box::new(self.expr(left)?),
                right: Box::new(self.expr(right)?),
            },
            ExprKind::UnaryOp { op, operand } => CoreExprKind::Unary {
                op: op.node,
                operand: Box::new(self.expr(operand)?),
            },
            ExprKind::Tuple(items) => CoreExprKind::Tuple(self.exprs(items)?),
            ExprKind::Constructor { name, args } => CoreExprKind::Ctor {
                name: name.node.clone(),
                args: self.exprs(args)?,
            },
            ExprKind::FieldAccess { expr, field } => CoreExprKind::FieldAccess {
                expr: Box::new(self.expr(expr)?),
                field: field.node.clone(),
            },
            ExprKind::Fold(fold) => {
                let validated = self.checker.check_fold_expr(fold)?;
                let (params, body) = self.fold_body(&validated)?;
                let mut args = vec![self.expr(&fold.scrutinee)?];
                if let Some(seed) = &fold.seed {
                    args.push(self.expr(seed)?);
                }
                local_recursion(validated.name, params, body, args, span)
            }
            ExprKind::Unfold(unfold) => {
                let validated = self.checker.check_unfold_expr(unfold)?;
                let (params, body) = self.unfold_body(&validated)?;
                let args = vec![self.expr(&unfold.seed)?];
                local_recursion(validated.name, params, body, args, span)
            }
        };
        Ok(CoreExpr::new(kind, span))
    }

    fn exprs(&mut self, exprs: &[Expr]) -> Result<Vec<CoreExpr>, Vec<FoldError>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }
}

/// `(rec name(params) => body)(args)`
fn local_recursion(
    name: String,
    params: Vec<String>,
    body: CoreExpr,
    args: Vec<CoreExpr>,
    span: Span,
) -> CoreExprKind {
    CoreExprKind::Call {
        func: Box::new(CoreExpr::new(
            CoreExprKind::RecFn {
                name,
                params,
                body: Arc::new(body),
            },
            span,
        )),
        args,
    }
}

/// Lower one validated fold on its own.
pub fn lower_fold(
    fold: &ValidatedFold,
    registry: &TypeRegistry,
) -> Result<CoreFunction, Vec<FoldError>> {
    let mut checker = Checker::new(registry, FoldConfig::default());
    Lowerer::new(&mut checker).lower_fold(fold)
}

/// Lower one validated unfold on its own.
pub fn lower_unfold(
    unfold: &ValidatedUnfold,
    registry: &TypeRegistry,
) -> Result<CoreFunction, Vec<FoldError>> {
    let mut checker = Checker::new(registry, FoldConfig::default());
    Lowerer::new(&mut checker).lower_unfold(unfold)
}
