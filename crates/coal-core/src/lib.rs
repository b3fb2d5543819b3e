//! Lowered core IR for Coal.
//!
//! Folds and unfolds are lowered into ordinary (recursive) functions over
//! this IR. Recursion only appears through [`CoreExprKind::SelfCall`], named
//! folds are referenced as [`CoreExprKind::Global`], and every codata field is
//! an explicit [`CoreExprKind::Thunk`] suspension.

use std::fmt;
use std::sync::Arc;

use coal_ast::{BinOp, Lit, Span, UnaryOp};

pub mod eval;

pub use eval::{EvalConfig, EvalError, Evaluator, Value, evaluate, with_eval_stack};

#[derive(Debug, Clone, PartialEq)]
pub struct CoreModule {
    pub items: Vec<CoreItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoreItem {
    Function(CoreFunction),
    Binding(CoreBinding),
}

impl CoreModule {
    pub fn functions(&self) -> impl Iterator<Item = &CoreFunction> {
        self.items.iter().filter_map(|item| match item {
            CoreItem::Function(function) => Some(function),
            CoreItem::Binding(_) => None,
        })
    }

    pub fn bindings(&self) -> impl Iterator<Item = &CoreBinding> {
        self.items.iter().filter_map(|item| match item {
            CoreItem::Binding(binding) => Some(binding),
            CoreItem::Function(_) => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&CoreFunction> {
        self.functions().find(|f| f.name == name)
    }
}

/// What a generated function was lowered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionOrigin {
    /// A fold consuming `domain`.
    Fold { domain: String },
    /// A two-argument fold consuming `domain` while threading a seed.
    AccumulatorFold { domain: String },
    /// An unfold producing `codata`.
    Unfold { codata: String },
}

/// A generated top-level function.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreFunction {
    pub name: String,
    pub params: Vec<String>,
    pub body: CoreExpr,
    pub origin: FunctionOrigin,
    pub span: Span,
}

/// A top-level value binding, evaluated in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreBinding {
    pub name: String,
    pub value: CoreExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoreExpr {
    pub kind: CoreExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoreExprKind {
    Lit(Lit),
    /// A local variable.
    Var(String),
    /// A top-level function or binding.
    Global(String),
    Ctor {
        name: String,
        args: Vec<CoreExpr>,
    },
    Tuple(Vec<CoreExpr>),
    Binary {
        op: BinOp,
        left: Box<CoreExpr>,
        right: Box<CoreExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<CoreExpr>,
    },
    Call {
        func: Box<CoreExpr>,
        args: Vec<CoreExpr>,
    },
    Lambda {
        params: Vec<String>,
        body: Arc<CoreExpr>,
    },
    /// `let name = value in body`; the name is not visible in `value`.
    Let {
        name: String,
        value: Box<CoreExpr>,
        body: Box<CoreExpr>,
    },
    Match {
        scrutinee: Box<CoreExpr>,
        arms: Vec<CoreArm>,
    },
    If {
        condition: Box<CoreExpr>,
        then_branch: Box<CoreExpr>,
        else_branch: Box<CoreExpr>,
    },
    /// Recursive call to the enclosing fold or unfold `function`.
    SelfCall {
        function: String,
        args: Vec<CoreExpr>,
    },
    /// A codata value; each field holds a [`CoreExprKind::Thunk`].
    Codata {
        type_name: String,
        fields: Vec<(String, CoreExpr)>,
    },
    /// A suspended computation, evaluated at most once when observed.
    Thunk(Arc<CoreExpr>),
    FieldAccess {
        expr: Box<CoreExpr>,
        field: String,
    },
    /// A local recursive function; `SelfCall { function: name }` inside
    /// `body` refers to it.
    RecFn {
        name: String,
        params: Vec<String>,
        body: Arc<CoreExpr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoreArm {
    pub pattern: CorePattern,
    pub body: CoreExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorePattern {
    Wildcard,
    Var(String),
    Lit(Lit),
    Ctor { name: String, args: Vec<CorePattern> },
    Tuple(Vec<CorePattern>),
    Or(Vec<CorePattern>),
    As { pattern: Box<CorePattern>, name: String },
}

impl CoreExpr {
    pub fn new(kind: CoreExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn var(name: impl Into<String>, span: Span) -> Self {
        Self::new(CoreExprKind::Var(name.into()), span)
    }

    pub fn global(name: impl Into<String>, span: Span) -> Self {
        Self::new(CoreExprKind::Global(name.into()), span)
    }

    pub fn call(func: CoreExpr, args: Vec<CoreExpr>, span: Span) -> Self {
        Self::new(
            CoreExprKind::Call {
                func: Box::new(func),
                args,
            },
            span,
        )
    }

    pub fn let_in(name: impl Into<String>, value: CoreExpr, body: CoreExpr) -> Self {
        let span = body.span;
        Self::new(
            CoreExprKind::Let {
                name: name.into(),
                value: Box::new(value),
                body: Box::new(body),
            },
            span,
        )
    }

    pub fn thunk(expr: CoreExpr) -> Self {
        let span = expr.span;
        Self::new(CoreExprKind::Thunk(Arc::new(expr)), span)
    }

    /// Count `SelfCall` nodes in this expression (including nested bodies).
    pub fn self_call_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |e| {
            if matches!(e.kind, CoreExprKind::SelfCall { .. }) {
                count += 1;
            }
        });
        count
    }

    /// Visit this expression and every sub-expression, pre-order.
    pub fn walk(&self, visit: &mut impl FnMut(&CoreExpr)) {
        visit(self);
        match &self.kind {
            CoreExprKind::Lit(_) | CoreExprKind::Var(_) | CoreExprKind::Global(_) => {}
            CoreExprKind::Ctor { args, .. } | CoreExprKind::SelfCall { args, .. } => {
                args.iter().for_each(|a| a.walk(visit));
            }
            CoreExprKind::Tuple(items) => items.iter().for_each(|i| i.walk(visit)),
            CoreExprKind::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            CoreExprKind::Unary { operand, .. } => operand.walk(visit),
            CoreExprKind::Call { func, args } => {
                func.walk(visit);
                args.iter().for_each(|a| a.walk(visit));
            }
            CoreExprKind::Lambda { body, .. } | CoreExprKind::RecFn { body, .. } => {
                body.walk(visit)
            }
            CoreExprKind::Thunk(body) => body.walk(visit),
            CoreExprKind::Let { value, body, .. } => {
                value.walk(visit);
                body.walk(visit);
            }
            CoreExprKind::Match { scrutinee, arms } => {
                scrutinee.walk(visit);
                arms.iter().for_each(|arm| arm.body.walk(visit));
            }
            CoreExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.walk(visit);
                then_branch.walk(visit);
                else_branch.walk(visit);
            }
            CoreExprKind::Codata { fields, .. } => {
                fields.iter().for_each(|(_, value)| value.walk(visit))
            }
            CoreExprKind::FieldAccess { expr, .. } => expr.walk(visit),
        }
    }
}

// ---------------------------------------------------------------------------
// Printing
// ---------------------------------------------------------------------------

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for CorePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorePattern::Wildcard => write!(f, "_"),
            CorePattern::Var(name) => write!(f, "{name}"),
            CorePattern::Lit(lit) => write!(f, "{lit}"),
            CorePattern::Ctor { name, args } if args.is_empty() => write!(f, "{name}"),
            CorePattern::Ctor { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            CorePattern::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
            CorePattern::Or(alternatives) => {
                for (i, alt) in alternatives.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{alt}")?;
                }
                Ok(())
            }
            CorePattern::As { pattern, name } => write!(f, "{pattern} as {name}"),
        }
    }
}

impl fmt::Display for CoreExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CoreExprKind::Lit(lit) => write!(f, "{lit}"),
            CoreExprKind::Var(name) | CoreExprKind::Global(name) => write!(f, "{name}"),
            CoreExprKind::Ctor { name, args } if args.is_empty() => write!(f, "{name}"),
            CoreExprKind::Ctor { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            CoreExprKind::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
            CoreExprKind::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            CoreExprKind::Unary { op, operand } => match op {
                UnaryOp::Neg => write!(f, "(-{operand})"),
                UnaryOp::Not => write!(f, "(not {operand})"),
            },
            CoreExprKind::Call { func, args } => {
                write!(f, "{func}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            CoreExprKind::Lambda { params, body } => {
                write!(f, "(fn({}) => {body})", params.join(", "))
            }
            CoreExprKind::Let { name, value, body } => {
                write!(f, "let {name} = {value} in {body}")
            }
            CoreExprKind::Match { scrutinee, arms } => {
                write!(f, "match {scrutinee} {{")?;
                for arm in arms {
                    write!(f, " | {} => {}", arm.pattern, arm.body)?;
                }
                write!(f, " }}")
            }
            CoreExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "if {condition} then {then_branch} else {else_branch}"),
            CoreExprKind::SelfCall { function, args } => {
                write!(f, "@{function}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            CoreExprKind::Codata { type_name, fields } => {
                write!(f, "{type_name} {{ ")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
                write!(f, " }}")
            }
            CoreExprKind::Thunk(body) => write!(f, "thunk({body})"),
            CoreExprKind::FieldAccess { expr, field } => write!(f, "{expr}.{field}"),
            CoreExprKind::RecFn { name, params, body } => {
                write!(f, "(rec {name}({}) => {body})", params.join(", "))
            }
        }
    }
}

impl fmt::Display for CoreFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match &self.origin {
            FunctionOrigin::Fold { .. } | FunctionOrigin::AccumulatorFold { .. } => "fold",
            FunctionOrigin::Unfold { .. } => "unfold",
        };
        write!(
            f,
            "{keyword} {}({}) =\n  {}",
            self.name,
            self.params.join(", "),
            self.body
        )
    }
}

impl fmt::Display for CoreModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match item {
                CoreItem::Function(function) => write!(f, "{function}")?,
                CoreItem::Binding(binding) => write!(f, "let {} = {}", binding.name, binding.value)?,
            }
        }
        Ok(())
    }
}
