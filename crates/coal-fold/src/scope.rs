//! Binding-scope rule.
//!
//! A name bound by `let p = e1 in e2` is visible in `e2` only. A top-level
//! declaration is visible to later declarations only, and never inside its
//! own definition. Self-reference is reserved for `@` inside folds and
//! unfolds, which the lowering pass turns into `SelfCall` nodes.
//!
//! Lookup order: locals, then earlier top-level names, then names currently
//! being defined (an [`FoldError::IllegalSelfReference`]), then
//! [`FoldError::UnboundName`].

use std::collections::BTreeMap;

use coal_ast::{Decl, DeclKind, Expr, ExprKind, Module, Pattern, Span, pattern_bindings};
use coal_types::TypeRegistry;

use crate::error::FoldError;
use crate::trace::{FoldAction, Phase, Tracer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Local,
    Defining,
}

/// Checks declarations of one module in order.
pub struct ScopeChecker<'r> {
    registry: &'r TypeRegistry,
    /// Every fold, unfold and `let` of the module, first definition only.
    declared: BTreeMap<String, Span>,
    /// Top-level names already in scope.
    globals: BTreeMap<String, Span>,
    stack: Vec<(String, Binding)>,
    errors: Vec<FoldError>,
}

impl<'r> ScopeChecker<'r> {
    pub fn new(module: &Module, registry: &'r TypeRegistry) -> Self {
        let mut declared = BTreeMap::new();
        for decl in &module.declarations {
            if is_value_decl(decl) {
                let name = decl.node.name();
                declared.entry(name.node.clone()).or_insert(name.span);
            }
        }
        Self {
            registry,
            declared,
            globals: BTreeMap::new(),
            stack: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Check one declaration, then bring its name into scope for the
    /// declarations after it.
    pub fn check_decl(&mut self, decl: &Decl, tracer: &mut Tracer) -> Vec<FoldError> {
        if !is_value_decl(decl) {
            return Vec::new();
        }
        let name = decl.node.name();
        if let Some(previous) = self.globals.get(&name.node) {
            self.errors.push(FoldError::DuplicateDefinition {
                name: name.node.clone(),
                span: name.span,
                previous: *previous,
            });
        }

        self.stack.push((name.node.clone(), Binding::Defining));
        match &decl.node {
            DeclKind::Fold(fold) => {
                for clause in &fold.clauses {
                    self.with_pattern(&clause.pattern, |this| this.expr(&clause.body));
                }
            }
            DeclKind::Unfold(unfold) => {
                self.with_pattern(&unfold.body.seed_pattern, |this| {
                    for field in &unfold.body.fields {
                        this.expr(&field.value);
                    }
                });
            }
            DeclKind::Let(binding) => self.expr(&binding.value),
            DeclKind::TypeDef(_) | DeclKind::CodataDef(_) => {}
        }
        self.stack.pop();

        self.globals.entry(name.node.clone()).or_insert(name.span);
        let errors = std::mem::take(&mut self.errors);
        for err in &errors {
            tracer.record(
                Phase::Scope,
                FoldAction::RejectName,
                &name.node,
                err.to_string(),
                Some(err.span()),
            );
        }
        errors
    }

    fn with_pattern(&mut self, pattern: &Pattern, body: impl FnOnce(&mut Self)) {
        let names = pattern_bindings(pattern);
        let depth = self.stack.len();
        self.stack
            .extend(names.into_iter().map(|name| (name.node, Binding::Local)));
        body(self);
        self.stack.truncate(depth);
    }

    fn lookup(&mut self, name: &str, span: Span) {
        let bound = |kind: Binding| {
            self.stack
                .iter()
                .any(|(bound, binding)| bound == name && *binding == kind)
        };
        if bound(Binding::Local) || self.globals.contains_key(name) {
            return;
        }
        if bound(Binding::Defining) {
            self.errors.push(FoldError::IllegalSelfReference {
                name: name.to_string(),
                span,
            });
            return;
        }
        self.errors.push(FoldError::UnboundName {
            what: "name",
            name: name.to_string(),
            defined_later: self.declared.contains_key(name),
            span,
        });
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.node {
            ExprKind::Lit(_) => {}
            ExprKind::Var(name) => self.lookup(name, expr.span),
            ExprKind::Let {
                pattern,
                value,
                body,
            } => {
                let names = pattern_bindings(pattern);
                let depth = self.stack.len();
                self.stack.extend(
                    names
                        .iter()
                        .map(|name| (name.node.clone(), Binding::Defining)),
                );
                self.expr(value);
                self.stack.truncate(depth);
                self.with_pattern(pattern, |this| this.expr(body));
            }
            ExprKind::Lambda { params, body } => {
                let depth = self.stack.len();
                self.stack.extend(
                    params
                        .iter()
                        .map(|param| (param.name.node.clone(), Binding::Local)),
                );
                self.expr(body);
                self.stack.truncate(depth);
            }
            ExprKind::Call { func, args } => {
                self.expr(func);
                args.iter().for_each(|arg| self.expr(arg));
            }
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition);
                self.expr(then_branch);
                self.expr(else_branch);
            }
            ExprKind::Match { scrutinee, arms } => {
                self.expr(scrutinee);
                for arm in arms {
                    self.with_pattern(&arm.pattern, |this| this.expr(&arm.body));
                }
            }
            ExprKind::BinaryOp { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::UnaryOp { operand, .. } => self.expr(operand),
            ExprKind::Tuple(items) => items.iter().for_each(|item| self.expr(item)),
            ExprKind::Constructor { name, args } => {
                self.constructor(name.node.as_str(), args.len(), expr.span);
                args.iter().for_each(|arg| self.expr(arg));
            }
            ExprKind::FieldAccess { expr, .. } => self.expr(expr),
            ExprKind::Fold(fold) => {
                self.expr(&fold.scrutinee);
                if let Some(seed) = &fold.seed {
                    self.expr(seed);
                }
                for clause in &fold.clauses {
                    self.with_pattern(&clause.pattern, |this| this.expr(&clause.body));
                }
            }
            ExprKind::Unfold(unfold) => {
                self.expr(&unfold.seed);
                self.with_pattern(&unfold.body.seed_pattern, |this| {
                    for field in &unfold.body.fields {
                        this.expr(&field.value);
                    }
                });
            }
        }
    }

    fn constructor(&mut self, name: &str, arity: usize, span: Span) {
        match self.registry.constructor(name) {
            None => self.errors.push(FoldError::UnboundName {
                what: "constructor",
                name: name.to_string(),
                defined_later: false,
                span,
            }),
            Some((_, variant)) if variant.components.len() != arity => {
                self.errors.push(FoldError::ConstructorArity {
                    constructor: name.to_string(),
                    expected: variant.components.len(),
                    found: arity,
                    span,
                })
            }
            Some(_) => {}
        }
    }
}

fn is_value_decl(decl: &Decl) -> bool {
    matches!(
        decl.node,
        DeclKind::Fold(_) | DeclKind::Unfold(_) | DeclKind::Let(_)
    )
}

/// Check every declaration of `module` in order.
pub fn check_scopes(module: &Module, registry: &TypeRegistry) -> Vec<FoldError> {
    let mut checker = ScopeChecker::new(module, registry);
    let mut tracer = Tracer::new(false);
    module
        .declarations
        .iter()
        .flat_map(|decl| checker.check_decl(decl, &mut tracer))
        .collect()
}
