//! Exhaustiveness checking for fold clauses.
//!
//! The fold checker only needs an answer to "which values do these patterns
//! miss?". [`MatrixOracle`] answers it with the usefulness algorithm over a
//! pattern matrix: constructors are enumerated from the registered data
//! types, and `@` patterns count as wildcards.

use std::collections::BTreeSet;

use coal_ast::{Lit, Pattern, PatternKind};
use coal_types::{ParamScope, Type, TypeResolver};

/// Answers exhaustiveness questions for the fold checker.
pub trait ExhaustivenessOracle {
    /// Patterns not covered by `patterns` against a scrutinee of type
    /// `scrutinee`, rendered as source-like witnesses. Empty means exhaustive.
    fn missing_patterns(&self, scrutinee: &Type, patterns: &[&Pattern]) -> Vec<String>;
}

/// Witnesses reported per check.
const MAX_WITNESSES: usize = 4;

/// Default oracle, backed by a [`TypeResolver`].
pub struct MatrixOracle<'r, R: TypeResolver + ?Sized> {
    resolver: &'r R,
}

impl<'r, R: TypeResolver + ?Sized> MatrixOracle<'r, R> {
    pub fn new(resolver: &'r R) -> Self {
        Self { resolver }
    }
}

impl<R: TypeResolver + ?Sized> ExhaustivenessOracle for MatrixOracle<'_, R> {
    fn missing_patterns(&self, scrutinee: &Type, patterns: &[&Pattern]) -> Vec<String> {
        let mut rows: Vec<Vec<Pat>> = patterns.iter().map(|p| vec![lower(p)]).collect();
        let types = [scrutinee.clone()];
        let mut missing = Vec::new();
        while missing.len() < MAX_WITNESSES {
            let Some(mut witness) = self.uncovered(&rows, &types) else {
                break;
            };
            let Some(head) = witness.pop() else {
                break;
            };
            missing.push(head.to_string());
            rows.push(vec![head.into_pat()]);
        }
        missing
    }
}

// ---------------------------------------------------------------------------
// Pattern matrix
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Ctor {
    Named(String),
    Bool(bool),
    Unit,
    Tuple(usize),
    /// A literal of a type with infinitely many values.
    Lit(String),
}

#[derive(Debug, Clone)]
enum Pat {
    Wild,
    Ctor(Ctor, Vec<Pat>),
    Or(Vec<Pat>),
}

fn lower(pattern: &Pattern) -> Pat {
    match &pattern.node {
        PatternKind::Wildcard
        | PatternKind::Var(_)
        | PatternKind::At(_)
        | PatternKind::AtCall { .. } => Pat::Wild,
        PatternKind::Lit(Lit::Bool(b)) => Pat::Ctor(Ctor::Bool(*b), vec![]),
        PatternKind::Lit(Lit::Unit) => Pat::Ctor(Ctor::Unit, vec![]),
        PatternKind::Lit(lit) => Pat::Ctor(Ctor::Lit(lit.to_string()), vec![]),
        PatternKind::Constructor { name, args } => {
            Pat::Ctor(Ctor::Named(name.clone()), args.iter().map(lower).collect())
        }
        PatternKind::Tuple(items) => {
            Pat::Ctor(Ctor::Tuple(items.len()), items.iter().map(lower).collect())
        }
        PatternKind::Or(alternatives) => Pat::Or(alternatives.iter().map(lower).collect()),
        PatternKind::As { pattern, .. } => lower(pattern),
    }
}

/// A value shape not matched by any row.
#[derive(Debug, Clone)]
enum Witness {
    Wild,
    Ctor(Ctor, Vec<Witness>),
}

impl Witness {
    fn into_pat(self) -> Pat {
        match self {
            Witness::Wild => Pat::Wild,
            Witness::Ctor(ctor, args) => {
                Pat::Ctor(ctor, args.into_iter().map(Witness::into_pat).collect())
            }
        }
    }
}

fn write_args(f: &mut std::fmt::Formatter<'_>, args: &[Witness]) -> std::fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl std::fmt::Display for Witness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Witness::Wild => write!(f, "_"),
            Witness::Ctor(Ctor::Named(name), args) if args.is_empty() => write!(f, "{name}"),
            Witness::Ctor(Ctor::Named(name), args) => {
                write!(f, "{name}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            Witness::Ctor(Ctor::Tuple(_), args) => {
                write!(f, "(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            Witness::Ctor(Ctor::Bool(b), _) => write!(f, "{b}"),
            Witness::Ctor(Ctor::Unit, _) => write!(f, "()"),
            Witness::Ctor(Ctor::Lit(text), _) => write!(f, "{text}"),
        }
    }
}

/// Expand or-patterns in the first column.
fn expand_first(rows: &[Vec<Pat>]) -> Vec<Vec<Pat>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        expand_row(row, &mut out);
    }
    out
}

fn expand_row(row: &[Pat], out: &mut Vec<Vec<Pat>>) {
    match row.first() {
        Some(Pat::Or(alternatives)) => {
            for alternative in alternatives {
                let mut expanded = Vec::with_capacity(row.len());
                expanded.push(alternative.clone());
                expanded.extend_from_slice(&row[1..]);
                expand_row(&expanded, out);
            }
        }
        _ => out.push(row.to_vec()),
    }
}

fn specialize(rows: &[Vec<Pat>], ctor: &Ctor, arity: usize) -> Vec<Vec<Pat>> {
    rows.iter()
        .filter_map(|row| {
            let (head, rest) = row.split_first()?;
            let mut out = match head {
                Pat::Wild => vec![Pat::Wild; arity],
                Pat::Ctor(c, args) if c == ctor && args.len() == arity => args.clone(),
                _ => return None,
            };
            out.extend_from_slice(rest);
            Some(out)
        })
        .collect()
}

fn default_rows(rows: &[Vec<Pat>]) -> Vec<Vec<Pat>> {
    rows.iter()
        .filter_map(|row| match row.split_first() {
            Some((Pat::Wild, rest)) => Some(rest.to_vec()),
            _ => None,
        })
        .collect()
}

impl<R: TypeResolver + ?Sized> MatrixOracle<'_, R> {
    /// The complete constructor signature of `ty`, with argument types, or
    /// `None` when the type has no finite constructor set.
    fn signature(&self, ty: &Type) -> Option<Vec<(Ctor, Vec<Type>)>> {
        match ty {
            Type::Bool => Some(vec![
                (Ctor::Bool(true), vec![]),
                (Ctor::Bool(false), vec![]),
            ]),
            Type::Unit => Some(vec![(Ctor::Unit, vec![])]),
            Type::Tuple(items) => Some(vec![(Ctor::Tuple(items.len()), items.clone())]),
            Type::Named { name, .. } => {
                let def = self.resolver.lookup(name)?;
                if def.is_codata() {
                    return None;
                }
                let subst = def.instantiate(ty);
                let scope = ParamScope::Declared(&def.params);
                Some(
                    def.variants()
                        .iter()
                        .map(|variant| {
                            let args = variant
                                .components
                                .iter()
                                .map(|component| {
                                    self.resolver
                                        .resolve(&component.node, scope)
                                        .map(|t| t.substitute(&subst))
                                        // Unresolvable components only admit wildcards.
                                        .unwrap_or_else(|_| Type::Param("?".into()))
                                })
                                .collect();
                            (Ctor::Named(variant.name.clone()), args)
                        })
                        .collect(),
                )
            }
            _ => None,
        }
    }

    /// A vector of values (one per column) matched by no row, if any.
    fn uncovered(&self, rows: &[Vec<Pat>], types: &[Type]) -> Option<Vec<Witness>> {
        let Some((first_ty, rest_tys)) = types.split_first() else {
            return rows.is_empty().then(Vec::new);
        };
        let rows = expand_first(rows);
        let heads: BTreeSet<&Ctor> = rows
            .iter()
            .filter_map(|row| match row.first() {
                Some(Pat::Ctor(ctor, _)) => Some(ctor),
                _ => None,
            })
            .collect();

        let signature = self.signature(first_ty);
        if let Some(signature) = &signature
            && signature.iter().all(|(ctor, _)| heads.contains(ctor))
        {
            for (ctor, arg_tys) in signature {
                let arity = arg_tys.len();
                let specialized = specialize(&rows, ctor, arity);
                let mut column_types = arg_tys.clone();
                column_types.extend_from_slice(rest_tys);
                if let Some(mut witness) = self.uncovered(&specialized, &column_types) {
                    let rest = witness.split_off(arity);
                    let mut out = vec![Witness::Ctor(ctor.clone(), witness)];
                    out.extend(rest);
                    return Some(out);
                }
            }
            return None;
        }

        let mut witness = self.uncovered(&default_rows(&rows), rest_tys)?;
        let head = signature
            .as_ref()
            .and_then(|signature| signature.iter().find(|(ctor, _)| !heads.contains(ctor)))
            .map(|(ctor, args)| Witness::Ctor(ctor.clone(), vec![Witness::Wild; args.len()]))
            .unwrap_or(Witness::Wild);
        witness.insert(0, head);
        Some(witness)
    }
}
