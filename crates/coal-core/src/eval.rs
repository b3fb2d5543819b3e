//! Reference evaluator for the lowered core IR.
//!
//! `nat` values are machine integers: `Zero` is `0` and `Succ(n)` is `n + 1`.
//! Codata fields are memoised suspensions that are forced on observation.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use coal_ast::{BinOp, Lit, UnaryOp};

use crate::{CoreExpr, CoreExprKind, CoreFunction, CoreItem, CoreModule, CorePattern};

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(Rc<str>),
    Unit,
    Ctor { name: String, args: Vec<Value> },
    Tuple(Vec<Value>),
    Closure(Rc<Closure>),
    /// A top-level generated function, referenced by name.
    Function(String),
    Codata(Rc<CodataValue>),
}

#[derive(Debug)]
pub struct Closure {
    params: Vec<String>,
    body: Arc<CoreExpr>,
    env: Env,
    /// Set for local recursive functions; `SelfCall` to this name targets
    /// the closure itself.
    self_name: Option<String>,
}

#[derive(Debug)]
pub struct CodataValue {
    pub type_name: String,
    fields: Vec<(String, Rc<Thunk>)>,
}

impl CodataValue {
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}

#[derive(Debug)]
struct Thunk {
    state: RefCell<ThunkState>,
}

#[derive(Debug)]
enum ThunkState {
    Pending { expr: Arc<CoreExpr>, env: Env },
    Forcing,
    Forced(Value),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Unit => "unit",
            Value::Ctor { .. } => "constructor",
            Value::Tuple(_) => "tuple",
            Value::Closure(_) | Value::Function(_) => "function",
            Value::Codata(_) => "codata",
        }
    }

    /// Structural equality over first-order values.
    fn equals(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a == b),
            (Value::Float(a), Value::Float(b)) => Some(a == b),
            (Value::Bool(a), Value::Bool(b)) => Some(a == b),
            (Value::String(a), Value::String(b)) => Some(a == b),
            (Value::Unit, Value::Unit) => Some(true),
            (
                Value::Ctor { name: a, args: a_args },
                Value::Ctor { name: b, args: b_args },
            ) => {
                if a != b || a_args.len() != b_args.len() {
                    return Some(false);
                }
                let mut all = true;
                for (x, y) in a_args.iter().zip(b_args) {
                    all &= x.equals(y)?;
                }
                Some(all)
            }
            (Value::Tuple(a), Value::Tuple(b)) if a.len() == b.len() => {
                let mut all = true;
                for (x, y) in a.iter().zip(b) {
                    all &= x.equals(y)?;
                }
                Some(all)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Unit => write!(f, "()"),
            Value::Ctor { name, args } if args.is_empty() => write!(f, "{name}"),
            Value::Ctor { name, args } => {
                write!(f, "{name}(")?;
                write_values(f, args)?;
                write!(f, ")")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                write_values(f, items)?;
                write!(f, ")")
            }
            Value::Closure(_) => write!(f, "<fn>"),
            Value::Function(name) => write!(f, "<fn {name}>"),
            Value::Codata(codata) => write!(f, "<{}>", codata.type_name),
        }
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{value}")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Environments
// ---------------------------------------------------------------------------

/// Persistent local environment: later bindings shadow earlier ones.
#[derive(Debug, Clone, Default)]
struct Env(Option<Rc<Frame>>);

#[derive(Debug)]
struct Frame {
    name: String,
    value: Value,
    next: Env,
}

impl Env {
    fn bind(&self, name: impl Into<String>, value: Value) -> Env {
        Env(Some(Rc::new(Frame {
            name: name.into(),
            value,
            next: self.clone(),
        })))
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        let mut current = self.0.as_deref();
        while let Some(frame) = current {
            if frame.name == name {
                return Some(&frame.value);
            }
            current = frame.next.0.as_deref();
        }
        None
    }
}

/// Environment key under which a local recursive function is bound. `@` can
/// never appear in a source identifier.
fn self_slot(name: &str) -> String {
    format!("@{name}")
}

// ---------------------------------------------------------------------------
// Errors and configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("unbound variable `{name}`")]
    UnboundVariable { name: String },
    #[error("unknown global `{name}`")]
    UnknownGlobal { name: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow in `{op}`")]
    Overflow { op: &'static str },
    #[error("no match arm matched value `{value}`")]
    MatchFailure { value: String },
    #[error("type error: expected {expected}, found {found}")]
    TypeError {
        expected: &'static str,
        found: &'static str,
    },
    #[error("`{function}` expects {expected} argument(s), got {found}")]
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("codata value `{type_name}` has no field `{field}`")]
    UnknownField { type_name: String, field: String },
    #[error("field `{field}` depends on itself")]
    CyclicThunk { field: String },
    #[error("evaluation exceeded the maximum call depth of {limit}")]
    DepthExceeded { limit: usize },
    #[error("failed to start the evaluation thread: {reason}")]
    ThreadSpawn { reason: String },
}

#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Maximum nesting of calls before evaluation is aborted.
    pub max_depth: usize,
    /// Stack reserved by [`with_eval_stack`] for the evaluation thread.
    pub stack_size: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        // 64 KiB of stack per nested call.
        Self {
            max_depth: 4_000,
            stack_size: 256 * 1024 * 1024,
        }
    }
}

/// Run `f` on a dedicated thread with `config.stack_size` bytes of stack.
///
/// Each nested call costs several native frames, so deep folds exhaust the
/// default stack long before `max_depth` is reached.
pub fn with_eval_stack<T, F>(config: &EvalConfig, f: F) -> Result<T, EvalError>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("coal-eval".into())
            .stack_size(config.stack_size)
            .spawn_scoped(scope, f)
            .map_err(|err| EvalError::ThreadSpawn {
                reason: err.to_string(),
            })?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(payload) => std::panic::resume_unwind(payload),
        }
    })
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Evaluate every binding of `module` in order and return the value of `entry`.
pub fn evaluate(module: &CoreModule, entry: &str) -> Result<Value, EvalError> {
    let mut evaluator = Evaluator::new(module, EvalConfig::default());
    evaluator.run_bindings()?;
    evaluator.global(entry)
}

pub struct Evaluator<'m> {
    functions: BTreeMap<&'m str, &'m CoreFunction>,
    module: &'m CoreModule,
    globals: BTreeMap<String, Value>,
    config: EvalConfig,
    depth: usize,
    forced: usize,
}

impl<'m> Evaluator<'m> {
    pub fn new(module: &'m CoreModule, config: EvalConfig) -> Self {
        let functions = module
            .functions()
            .map(|function| (function.name.as_str(), function))
            .collect();
        Self {
            functions,
            module,
            globals: BTreeMap::new(),
            config,
            depth: 0,
            forced: 0,
        }
    }

    /// Number of suspensions forced so far.
    pub fn forced_count(&self) -> usize {
        self.forced
    }

    /// Evaluate top-level bindings in declaration order.
    pub fn run_bindings(&mut self) -> Result<(), EvalError> {
        for item in &self.module.items {
            if let CoreItem::Binding(binding) = item {
                let value = self.eval(&binding.value, &Env::default())?;
                self.globals.insert(binding.name.clone(), value);
            }
        }
        Ok(())
    }

    /// Look up an evaluated binding or a generated function.
    pub fn global(&self, name: &str) -> Result<Value, EvalError> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if self.functions.contains_key(name) {
            return Ok(Value::Function(name.to_string()));
        }
        Err(EvalError::UnknownGlobal {
            name: name.to_string(),
        })
    }

    /// Evaluate a closed expression against the module's globals.
    pub fn eval_closed(&mut self, expr: &CoreExpr) -> Result<Value, EvalError> {
        self.eval(expr, &Env::default())
    }

    /// Apply a function value to arguments.
    pub fn apply(&mut self, func: &Value, args: Vec<Value>) -> Result<Value, EvalError> {
        if self.depth >= self.config.max_depth {
            return Err(EvalError::DepthExceeded {
                limit: self.config.max_depth,
            });
        }
        self.depth += 1;
        let result = self.apply_inner(func, args);
        self.depth -= 1;
        result
    }

    fn apply_inner(&mut self, func: &Value, args: Vec<Value>) -> Result<Value, EvalError> {
        match func {
            Value::Closure(closure) => {
                check_arity("<fn>", closure.params.len(), args.len())?;
                let mut env = closure.env.clone();
                if let Some(name) = &closure.self_name {
                    env = env.bind(self_slot(name), func.clone());
                }
                for (param, arg) in closure.params.iter().zip(args) {
                    env = env.bind(param.clone(), arg);
                }
                self.eval(&closure.body, &env)
            }
            Value::Function(name) => {
                let function = *self.functions.get(name.as_str()).ok_or_else(|| {
                    EvalError::UnknownGlobal { name: name.clone() }
                })?;
                check_arity(&function.name, function.params.len(), args.len())?;
                let mut env = Env::default();
                for (param, arg) in function.params.iter().zip(args) {
                    env = env.bind(param.clone(), arg);
                }
                self.eval(&function.body, &env)
            }
            other => Err(EvalError::TypeError {
                expected: "function",
                found: other.type_name(),
            }),
        }
    }

    /// Observe a codata field, forcing its suspension at most once.
    pub fn observe(&mut self, value: &Value, field: &str) -> Result<Value, EvalError> {
        let Value::Codata(codata) = value else {
            return Err(EvalError::TypeError {
                expected: "codata",
                found: value.type_name(),
            });
        };
        let thunk = codata
            .fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, thunk)| Rc::clone(thunk))
            .ok_or_else(|| EvalError::UnknownField {
                type_name: codata.type_name.clone(),
                field: field.to_string(),
            })?;
        self.force(&thunk, field)
    }

    fn force(&mut self, thunk: &Thunk, field: &str) -> Result<Value, EvalError> {
        let state = std::mem::replace(&mut *thunk.state.borrow_mut(), ThunkState::Forcing);
        match state {
            ThunkState::Forced(value) => {
                *thunk.state.borrow_mut() = ThunkState::Forced(value.clone());
                Ok(value)
            }
            ThunkState::Forcing => Err(EvalError::CyclicThunk {
                field: field.to_string(),
            }),
            ThunkState::Pending { expr, env } => {
                self.forced += 1;
                match self.eval(&expr, &env) {
                    Ok(value) => {
                        *thunk.state.borrow_mut() = ThunkState::Forced(value.clone());
                        Ok(value)
                    }
                    Err(err) => {
                        *thunk.state.borrow_mut() = ThunkState::Pending { expr, env };
                        Err(err)
                    }
                }
            }
        }
    }

    fn eval(&mut self, expr: &CoreExpr, env: &Env) -> Result<Value, EvalError> {
        match &expr.kind {
            CoreExprKind::Lit(lit) => Ok(match lit {
                Lit::Int(n) => Value::Int(*n),
                Lit::Float(x) => Value::Float(*x),
                Lit::Bool(b) => Value::Bool(*b),
                Lit::String(s) => Value::String(Rc::from(s.as_str())),
                Lit::Unit => Value::Unit,
            }),
            CoreExprKind::Var(name) => {
                env.lookup(name)
                    .cloned()
                    .ok_or_else(|| EvalError::UnboundVariable { name: name.clone() })
            }
            CoreExprKind::Global(name) => self.global(name),
            CoreExprKind::Ctor { name, args } => {
                let args = self.eval_all(args, env)?;
                construct(name, args)
            }
            CoreExprKind::Tuple(items) => Ok(Value::Tuple(self.eval_all(items, env)?)),
            CoreExprKind::Binary { op, left, right } => match op {
                BinOp::And => match self.eval(left, env)? {
                    Value::Bool(false) => Ok(Value::Bool(false)),
                    Value::Bool(true) => self.eval(right, env),
                    other => Err(type_error("bool", &other)),
                },
                BinOp::Or => match self.eval(left, env)? {
                    Value::Bool(true) => Ok(Value::Bool(true)),
                    Value::Bool(false) => self.eval(right, env),
                    other => Err(type_error("bool", &other)),
                },
                _ => {
                    let l = self.eval(left, env)?;
                    let r = self.eval(right, env)?;
                    binary(*op, l, r)
                }
            },
            CoreExprKind::Unary { op, operand } => match (op, self.eval(operand, env)?) {
                (UnaryOp::Neg, Value::Int(n)) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or(EvalError::Overflow { op: "-" }),
                (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, other) => Err(type_error("number", &other)),
                (UnaryOp::Not, other) => Err(type_error("bool", &other)),
            },
            CoreExprKind::Call { func, args } => {
                let func = self.eval(func, env)?;
                let args = self.eval_all(args, env)?;
                self.apply(&func, args)
            }
            CoreExprKind::Lambda { params, body } => Ok(Value::Closure(Rc::new(Closure {
                params: params.clone(),
                body: Arc::clone(body),
                env: env.clone(),
                self_name: None,
            }))),
            CoreExprKind::RecFn { name, params, body } => Ok(Value::Closure(Rc::new(Closure {
                params: params.clone(),
                body: Arc::clone(body),
                env: env.clone(),
                self_name: Some(name.clone()),
            }))),
            CoreExprKind::Let { name, value, body } => {
                let value = self.eval(value, env)?;
                self.eval(body, &env.bind(name.clone(), value))
            }
            CoreExprKind::Match { scrutinee, arms } => {
                let value = self.eval(scrutinee, env)?;
                for arm in arms {
                    let mut arm_env = env.clone();
                    if match_pattern(&arm.pattern, &value, &mut arm_env) {
                        return self.eval(&arm.body, &arm_env);
                    }
                }
                Err(EvalError::MatchFailure {
                    value: value.to_string(),
                })
            }
            CoreExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => match self.eval(condition, env)? {
                Value::Bool(true) => self.eval(then_branch, env),
                Value::Bool(false) => self.eval(else_branch, env),
                other => Err(type_error("bool", &other)),
            },
            CoreExprKind::SelfCall { function, args } => {
                let args = self.eval_all(args, env)?;
                let target = match env.lookup(&self_slot(function)) {
                    Some(local) => local.clone(),
                    None => self.global(function)?,
                };
                self.apply(&target, args)
            }
            CoreExprKind::Codata { type_name, fields } => {
                let mut thunks = Vec::with_capacity(fields.len());
                for (name, value) in fields {
                    let state = match &value.kind {
                        CoreExprKind::Thunk(body) => ThunkState::Pending {
                            expr: Arc::clone(body),
                            env: env.clone(),
                        },
                        _ => ThunkState::Forced(self.eval(value, env)?),
                    };
                    thunks.push((
                        name.clone(),
                        Rc::new(Thunk {
                            state: RefCell::new(state),
                        }),
                    ));
                }
                Ok(Value::Codata(Rc::new(CodataValue {
                    type_name: type_name.clone(),
                    fields: thunks,
                })))
            }
            // A suspension outside a codata field is evaluated immediately.
            CoreExprKind::Thunk(body) => self.eval(body, env),
            CoreExprKind::FieldAccess { expr, field } => {
                let value = self.eval(expr, env)?;
                self.observe(&value, field)
            }
        }
    }

    fn eval_all(&mut self, exprs: &[CoreExpr], env: &Env) -> Result<Vec<Value>, EvalError> {
        exprs.iter().map(|e| self.eval(e, env)).collect()
    }
}

fn check_arity(function: &str, expected: usize, found: usize) -> Result<(), EvalError> {
    if expected == found {
        Ok(())
    } else {
        Err(EvalError::ArityMismatch {
            function: function.to_string(),
            expected,
            found,
        })
    }
}

fn type_error(expected: &'static str, found: &Value) -> EvalError {
    EvalError::TypeError {
        expected,
        found: found.type_name(),
    }
}

/// Build a constructor value, using the integer representation for `nat`.
fn construct(name: &str, mut args: Vec<Value>) -> Result<Value, EvalError> {
    match (name, args.as_slice()) {
        ("Zero", []) => Ok(Value::Int(0)),
        ("Succ", [Value::Int(n)]) => n
            .checked_add(1)
            .map(Value::Int)
            .ok_or(EvalError::Overflow { op: "Succ" }),
        ("Succ", [other]) => Err(type_error("nat", other)),
        _ => Ok(Value::Ctor {
            name: name.to_string(),
            args: std::mem::take(&mut args),
        }),
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value, EvalError> {
    use Value::{Float, Int};
    match (op, &left, &right) {
        (BinOp::Add, Int(a), Int(b)) => a.checked_add(*b).map(Int).ok_or(EvalError::Overflow { op: "+" }),
        (BinOp::Sub, Int(a), Int(b)) => a.checked_sub(*b).map(Int).ok_or(EvalError::Overflow { op: "-" }),
        (BinOp::Mul, Int(a), Int(b)) => a.checked_mul(*b).map(Int).ok_or(EvalError::Overflow { op: "*" }),
        (BinOp::Div | BinOp::Mod, Int(_), Int(0)) => Err(EvalError::DivisionByZero),
        (BinOp::Div, Int(a), Int(b)) => a.checked_div(*b).map(Int).ok_or(EvalError::Overflow { op: "/" }),
        (BinOp::Mod, Int(a), Int(b)) => a.checked_rem(*b).map(Int).ok_or(EvalError::Overflow { op: "%" }),
        (BinOp::Add, Float(a), Float(b)) => Ok(Float(a + b)),
        (BinOp::Sub, Float(a), Float(b)) => Ok(Float(a - b)),
        (BinOp::Mul, Float(a), Float(b)) => Ok(Float(a * b)),
        (BinOp::Div, Float(a), Float(b)) => Ok(Float(a / b)),
        (BinOp::Mod, Float(a), Float(b)) => Ok(Float(a % b)),
        (BinOp::Concat, Value::String(a), Value::String(b)) => {
            Ok(Value::String(Rc::from(format!("{a}{b}").as_str())))
        }
        (BinOp::Eq | BinOp::Neq, _, _) => {
            let equal = left.equals(&right).ok_or(EvalError::TypeError {
                expected: "comparable values",
                found: left.type_name(),
            })?;
            Ok(Value::Bool(if op == BinOp::Eq { equal } else { !equal }))
        }
        (BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte, _, _) => {
            let ordering = match (&left, &right) {
                (Int(a), Int(b)) => a.partial_cmp(b),
                (Float(a), Float(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                _ => None,
            }
            .ok_or(EvalError::TypeError {
                expected: "ordered values",
                found: left.type_name(),
            })?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Lte => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        (BinOp::Concat, _, _) => Err(type_error("string", &left)),
        _ => Err(type_error("number", &left)),
    }
}

fn match_pattern(pattern: &CorePattern, value: &Value, env: &mut Env) -> bool {
    match (pattern, value) {
        (CorePattern::Wildcard, _) => true,
        (CorePattern::Var(name), _) => {
            *env = env.bind(name.clone(), value.clone());
            true
        }
        (CorePattern::Lit(lit), _) => matches!(
            (lit, value),
            (Lit::Int(a), Value::Int(b)) if a == b
        ) || matches!(
            (lit, value),
            (Lit::Bool(a), Value::Bool(b)) if a == b
        ) || matches!(
            (lit, value),
            (Lit::String(a), Value::String(b)) if a.as_str() == &**b
        ) || matches!(
            (lit, value),
            (Lit::Float(a), Value::Float(b)) if a == b
        ) || matches!((lit, value), (Lit::Unit, Value::Unit)),
        (CorePattern::Ctor { name, args }, Value::Int(n)) => match (name.as_str(), args.as_slice()) {
            ("Zero", []) => *n == 0,
            ("Succ", [inner]) if *n > 0 => match_pattern(inner, &Value::Int(n - 1), env),
            _ => false,
        },
        (
            CorePattern::Ctor { name, args },
            Value::Ctor {
                name: value_name,
                args: values,
            },
        ) => {
            name == value_name
                && args.len() == values.len()
                && args
                    .iter()
                    .zip(values)
                    .all(|(p, v)| match_pattern(p, v, env))
        }
        (CorePattern::Tuple(items), Value::Tuple(values)) => {
            items.len() == values.len()
                && items
                    .iter()
                    .zip(values)
                    .all(|(p, v)| match_pattern(p, v, env))
        }
        (CorePattern::Or(alternatives), _) => {
            for alternative in alternatives {
                let mut alt_env = env.clone();
                if match_pattern(alternative, value, &mut alt_env) {
                    *env = alt_env;
                    return true;
                }
            }
            false
        }
        (CorePattern::As { pattern, name }, _) => {
            if match_pattern(pattern, value, env) {
                *env = env.bind(name.clone(), value.clone());
                true
            } else {
                false
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use coal_ast::Span;

    use super::*;
    use crate::{CoreArm, CoreBinding, FunctionOrigin};

    fn e(kind: CoreExprKind) -> CoreExpr {
        CoreExpr::new(kind, Span::synthetic())
    }

    fn int(n: i64) -> CoreExpr {
        e(CoreExprKind::Lit(Lit::Int(n)))
    }

    fn var(name: &str) -> CoreExpr {
        CoreExpr::var(name, Span::synthetic())
    }

    fn bin(op: BinOp, left: CoreExpr, right: CoreExpr) -> CoreExpr {
        e(CoreExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn nat(n: usize) -> CoreExpr {
        let mut expr = e(CoreExprKind::Ctor {
            name: "Zero".into(),
            args: vec![],
        });
        for _ in 0..n {
            expr = e(CoreExprKind::Ctor {
                name: "Succ".into(),
                args: vec![expr],
            });
        }
        expr
    }

    /// fold factorial(n) = match n { | Zero => 1 | Succ(c) as m => let p = @factorial(c) in m * p }
    fn factorial_module(n: usize) -> CoreModule {
        let body = e(CoreExprKind::Match {
            scrutinee: Box::new(var("n")),
            arms: vec![
                CoreArm {
                    pattern: CorePattern::Ctor {
                        name: "Zero".into(),
                        args: vec![],
                    },
                    body: int(1),
                },
                CoreArm {
                    pattern: CorePattern::As {
                        pattern: Box::new(CorePattern::Ctor {
                            name: "Succ".into(),
                            args: vec![CorePattern::Var("c".into())],
                        }),
                        name: "m".into(),
                    },
                    body: CoreExpr::let_in(
                        "p",
                        e(CoreExprKind::SelfCall {
                            function: "factorial".into(),
                            args: vec![var("c")],
                        }),
                        bin(BinOp::Mul, var("m"), var("p")),
                    ),
                },
            ],
        });
        CoreModule {
            items: vec![
                CoreItem::Function(CoreFunction {
                    name: "factorial".into(),
                    params: vec!["n".into()],
                    body,
                    origin: FunctionOrigin::Fold {
                        domain: "nat".into(),
                    },
                    span: Span::synthetic(),
                }),
                CoreItem::Binding(CoreBinding {
                    name: "main".into(),
                    value: CoreExpr::call(
                        CoreExpr::global("factorial", Span::synthetic()),
                        vec![nat(n)],
                        Span::synthetic(),
                    ),
                    span: Span::synthetic(),
                }),
            ],
        }
    }

    #[test]
    fn factorial_of_five() {
        let value = evaluate(&factorial_module(5), "main").unwrap();
        assert_eq!(value.to_string(), "120");
    }

    #[test]
    fn nat_constructors_are_integers() {
        let module = CoreModule { items: vec![] };
        let mut evaluator = Evaluator::new(&module, EvalConfig::default());
        assert_eq!(evaluator.eval_closed(&nat(3)).unwrap().to_string(), "3");
    }

    #[test]
    fn division_by_zero_is_reported() {
        let module = CoreModule { items: vec![] };
        let mut evaluator = Evaluator::new(&module, EvalConfig::default());
        let err = evaluator
            .eval_closed(&bin(BinOp::Div, int(1), int(0)))
            .unwrap_err();
        assert_eq!(err, EvalError::DivisionByZero);
    }

    /// rec go(n) => if n == 0 then 0 else @go(n - 1)
    fn countdown() -> CoreExpr {
        e(CoreExprKind::RecFn {
            name: "go".into(),
            params: vec!["n".into()],
            body: Arc::new(e(CoreExprKind::If {
                condition: Box::new(bin(BinOp::Eq, var("n"), int(0))),
                then_branch: Box::new(int(0)),
                else_branch: Box::new(e(CoreExprKind::SelfCall {
                    function: "go".into(),
                    args: vec![bin(BinOp::Sub, var("n"), int(1))],
                })),
            })),
        })
    }

    #[test]
    fn local_recursive_function_counts_down() {
        let module = CoreModule { items: vec![] };
        let mut evaluator = Evaluator::new(&module, EvalConfig::default());
        let value = evaluator
            .eval_closed(&CoreExpr::call(countdown(), vec![int(10)], Span::synthetic()))
            .unwrap();
        assert_eq!(value.to_string(), "0");
    }

    #[test]
    fn eval_stack_holds_the_default_depth() {
        let config = EvalConfig::default();
        let limit = config.max_depth;
        let half = (limit / 2) as i64;
        let (deep, runaway) = with_eval_stack(&config, || {
            let module = CoreModule { items: vec![] };
            let mut evaluator = Evaluator::new(&module, EvalConfig::default());
            let mut run = |n: i64| {
                evaluator
                    .eval_closed(&CoreExpr::call(countdown(), vec![int(n)], Span::synthetic()))
                    .map(|value| value.to_string())
            };
            (run(half), run(half * 4))
        })
        .unwrap();
        assert_eq!(deep, Ok("0".to_string()));
        assert_eq!(runaway, Err(EvalError::DepthExceeded { limit }));
    }

    #[test]
    fn thunks_are_forced_once() {
        // let s = Pair { a = thunk(1 + 1) } in (s.a, s.a)
        let codata = e(CoreExprKind::Codata {
            type_name: "Pair".into(),
            fields: vec![("a".into(), CoreExpr::thunk(bin(BinOp::Add, int(1), int(1))))],
        });
        let access = || {
            e(CoreExprKind::FieldAccess {
                expr: Box::new(var("s")),
                field: "a".into(),
            })
        };
        let expr = CoreExpr::let_in("s", codata, e(CoreExprKind::Tuple(vec![access(), access()])));
        let module = CoreModule { items: vec![] };
        let mut evaluator = Evaluator::new(&module, EvalConfig::default());
        let value = evaluator.eval_closed(&expr).unwrap();
        assert_eq!(value.to_string(), "(2, 2)");
        assert_eq!(evaluator.forced_count(), 1);
    }

    #[test]
    fn unobserved_field_is_never_forced() {
        let codata = e(CoreExprKind::Codata {
            type_name: "Pair".into(),
            fields: vec![
                ("ok".into(), CoreExpr::thunk(int(7))),
                ("boom".into(), CoreExpr::thunk(bin(BinOp::Div, int(1), int(0)))),
            ],
        });
        let expr = e(CoreExprKind::FieldAccess {
            expr: Box::new(codata),
            field: "ok".into(),
        });
        let module = CoreModule { items: vec![] };
        let mut evaluator = Evaluator::new(&module, EvalConfig::default());
        assert_eq!(evaluator.eval_closed(&expr).unwrap().to_string(), "7");
    }

    #[test]
    fn depth_limit_stops_runaway_recursion() {
        let spin = e(CoreExprKind::RecFn {
            name: "spin".into(),
            params: vec!["n".into()],
            body: Arc::new(e(CoreExprKind::SelfCall {
                function: "spin".into(),
                args: vec![var("n")],
            })),
        });
        let module = CoreModule { items: vec![] };
        let config = EvalConfig {
            max_depth: 64,
            ..EvalConfig::default()
        };
        let mut evaluator = Evaluator::new(&module, config);
        let err = evaluator
            .eval_closed(&CoreExpr::call(spin, vec![int(0)], Span::synthetic()))
            .unwrap_err();
        assert_eq!(err, EvalError::DepthExceeded { limit: 64 });
    }

    #[test]
    fn or_pattern_binds_from_matching_alternative() {
        let mut env = Env::default();
        let pattern = CorePattern::Or(vec![
            CorePattern::Ctor {
                name: "Zero".into(),
                args: vec![],
            },
            CorePattern::Ctor {
                name: "Succ".into(),
                args: vec![CorePattern::Var("k".into())],
            },
        ]);
        assert!(match_pattern(&pattern, &Value::Int(4), &mut env));
        assert_eq!(env.lookup("k").map(|v| v.to_string()), Some("3".into()));
    }
}
