//! AST node definitions and source spans for Coal.
//!
//! This crate defines the abstract syntax tree produced by the parser and
//! consumed by the fold/unfold passes. Every node carries a [`Span`] for
//! source location tracking.

use std::fmt;

/// Identifies a source file in the compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// A byte offset range within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Self { file, start, end }
    }

    /// Create a span that covers both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        debug_assert_eq!(
            self.file, other.file,
            "cannot merge spans from different files"
        );
        Span {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// A synthetic span for compiler-generated nodes.
    pub fn synthetic() -> Self {
        Self {
            file: FileId(u32::MAX),
            start: 0,
            end: 0,
        }
    }
}

/// A value paired with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}

// ---------------------------------------------------------------------------
// Literal values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Unit,
}

impl fmt::Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lit::Int(n) => write!(f, "{n}"),
            Lit::Float(x) => write!(f, "{x:?}"),
            Lit::Bool(b) => write!(f, "{b}"),
            Lit::String(s) => write!(f, "{s:?}"),
            Lit::Unit => write!(f, "()"),
        }
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Literal value.
    Lit(Lit),

    /// Variable reference.
    Var(String),

    /// Let binding: `let pattern = value in body`.
    ///
    /// Names bound by `pattern` are visible in `body` only, never in `value`.
    Let {
        pattern: Pattern,
        value: Box<Expr>,
        body: Box<Expr>,
    },

    /// Lambda: `fn(x, y) => body`.
    Lambda { params: Vec<Param>, body: Box<Expr> },

    /// Function application: `func(args)`.
    Call { func: Box<Expr>, args: Vec<Expr> },

    /// If expression: `if cond then a else b`.
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },

    /// Match expression: `match scrutinee { | pat => body }`.
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },

    /// Binary operator: `left op right`.
    BinaryOp {
        op: Spanned<BinOp>,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Unary operator: `op operand`.
    UnaryOp {
        op: Spanned<UnaryOp>,
        operand: Box<Expr>,
    },

    /// Tuple: `(a, b, c)`.
    Tuple(Vec<Expr>),

    /// Constructor application: `Succ(n)`, `Nil`.
    Constructor {
        name: Spanned<String>,
        args: Vec<Expr>,
    },

    /// Codata observation: `stream.head`.
    FieldAccess {
        expr: Box<Expr>,
        field: Spanned<String>,
    },

    /// Expression-level fold: `fold(scrutinee) { | pat => body }`.
    Fold(Box<FoldExpr>),

    /// Expression-level unfold: `unfold(seed) { s => field = e, @field = e }`.
    Unfold(Box<UnfoldExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Spanned<String>,
    pub annotation: Option<Spanned<TypeAnnotation>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Concat => "++",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

// ---------------------------------------------------------------------------
// Folds and unfolds
// ---------------------------------------------------------------------------

/// A fold clause: `| pattern => body`.
///
/// In the accumulator form the pattern is a pair `(data, seed)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldClause {
    pub pattern: Pattern,
    pub body: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldExpr {
    pub scrutinee: Expr,
    /// Optional `fold(e : T)` ascription of the scrutinee type.
    pub ascription: Option<Spanned<TypeAnnotation>>,
    /// Accumulator seed of the two-argument form `fold(e, seed)`.
    pub seed: Option<Expr>,
    pub clauses: Vec<FoldClause>,
    pub span: Span,
}

/// One field clause of an unfold: `head = e` or `@tail = e`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnfoldField {
    pub name: Spanned<String>,
    /// `true` for `@field = seed`, which feeds `value` back into the generator.
    pub corecursive: bool,
    pub value: Expr,
    pub span: Span,
}

/// The body shared by named and expression-level unfolds: `s => f = e, ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnfoldBody {
    pub seed_pattern: Pattern,
    pub fields: Vec<UnfoldField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnfoldExpr {
    pub seed: Expr,
    /// Optional `unfold(e) : Stream<int>` ascription of the produced codata.
    pub ascription: Option<Spanned<TypeAnnotation>>,
    pub body: UnfoldBody,
    pub span: Span,
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

pub type Pattern = Spanned<PatternKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    /// Matches anything, binds nothing.
    Wildcard,

    /// Binds the matched value to a name.
    Var(String),

    /// Matches a literal value.
    Lit(Lit),

    /// Matches a data constructor: `Succ(p)`, `Nil`.
    Constructor { name: String, args: Vec<Pattern> },

    /// Matches a tuple: `(a, b)`.
    Tuple(Vec<Pattern>),

    /// Matches if any sub-pattern matches: `Zero | Succ(Zero)`.
    Or(Vec<Pattern>),

    /// Binds the whole value AND destructures: `pattern as name`.
    As {
        pattern: Box<Pattern>,
        name: Spanned<String>,
    },

    /// `@name`: binds the result of recursing on the matched component.
    At(String),

    /// `fold_name(@pattern)`: binds the result of a named fold applied to
    /// the matched component.
    AtCall {
        fold: Spanned<String>,
        binder: Box<Pattern>,
    },
}

impl PatternKind {
    /// Returns the variable name if this is a simple `Var` pattern.
    pub fn as_var(&self) -> Option<&str> {
        match self {
            PatternKind::Var(name) => Some(name.as_str()),
            _ => None,
        }
    }

    /// Whether this pattern (or any sub-pattern) uses `@`.
    pub fn contains_at(&self) -> bool {
        match self {
            PatternKind::At(_) | PatternKind::AtCall { .. } => true,
            PatternKind::Wildcard | PatternKind::Var(_) | PatternKind::Lit(_) => false,
            PatternKind::Constructor { args, .. } => args.iter().any(|a| a.node.contains_at()),
            PatternKind::Tuple(items) | PatternKind::Or(items) => {
                items.iter().any(|p| p.node.contains_at())
            }
            PatternKind::As { pattern, .. } => pattern.node.contains_at(),
        }
    }
}

/// Names bound by a pattern, in left-to-right order.
///
/// Or-patterns contribute the names of their first alternative; the pattern
/// checker separately enforces that all alternatives agree.
pub fn pattern_bindings(pattern: &Pattern) -> Vec<Spanned<String>> {
    let mut out = Vec::new();
    collect_pattern_bindings(pattern, &mut out);
    out
}

fn collect_pattern_bindings(pattern: &Pattern, out: &mut Vec<Spanned<String>>) {
    match &pattern.node {
        PatternKind::Wildcard | PatternKind::Lit(_) => {}
        PatternKind::Var(name) | PatternKind::At(name) => {
            out.push(Spanned::new(name.clone(), pattern.span));
        }
        PatternKind::Constructor { args, .. } => {
            for a in args {
                collect_pattern_bindings(a, out);
            }
        }
        PatternKind::Tuple(items) => {
            for p in items {
                collect_pattern_bindings(p, out);
            }
        }
        PatternKind::Or(alternatives) => {
            if let Some(first) = alternatives.first() {
                collect_pattern_bindings(first, out);
            }
        }
        PatternKind::As { pattern, name } => {
            collect_pattern_bindings(pattern, out);
            out.push(name.clone());
        }
        PatternKind::AtCall { binder, .. } => collect_pattern_bindings(binder, out),
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::Wildcard => write!(f, "_"),
            PatternKind::Var(name) => write!(f, "{name}"),
            PatternKind::Lit(lit) => write!(f, "{lit}"),
            PatternKind::Constructor { name, args } => {
                write!(f, "{name}")?;
                if !args.is_empty() {
                    write!(f, "(")?;
                    write_joined(f, args.iter().map(|a| &a.node), ", ")?;
                    write!(f, ")")?;
                }
                Ok(())
            }
            PatternKind::Tuple(items) => {
                write!(f, "(")?;
                write_joined(f, items.iter().map(|p| &p.node), ", ")?;
                write!(f, ")")
            }
            PatternKind::Or(alternatives) => {
                write_joined(f, alternatives.iter().map(|p| &p.node), " | ")
            }
            PatternKind::As { pattern, name } => write!(f, "{} as {}", pattern.node, name.node),
            PatternKind::At(name) => write!(f, "@{name}"),
            PatternKind::AtCall { fold, binder } => write!(f, "{}(@{})", fold.node, binder.node),
        }
    }
}

fn write_joined<'a, T: fmt::Display + 'a>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = &'a T>,
    sep: &str,
) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Type annotations
// ---------------------------------------------------------------------------

/// A syntactic type annotation. Semantic types live in `coal-types`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAnnotation {
    Named(String),
    Applied(String, Vec<TypeAnnotation>),
    Tuple(Vec<TypeAnnotation>),
    Function(Vec<TypeAnnotation>, Box<TypeAnnotation>),
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeAnnotation::Named(name) => write!(f, "{name}"),
            TypeAnnotation::Applied(name, args) => {
                write!(f, "{name}<")?;
                write_joined(f, args.iter(), ", ")?;
                write!(f, ">")
            }
            TypeAnnotation::Tuple(items) => {
                write!(f, "(")?;
                write_joined(f, items.iter(), ", ")?;
                write!(f, ")")
            }
            TypeAnnotation::Function(params, ret) => {
                write!(f, "(")?;
                write_joined(f, params.iter(), ", ")?;
                write!(f, ") -> {ret}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level declarations
// ---------------------------------------------------------------------------

pub type Decl = Spanned<DeclKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    /// Data type: `type nat = Zero | Succ(nat)`.
    TypeDef(TypeDef),

    /// Codata type: `codata Stream<T> = { head: T, tail: Stream<T> }`.
    CodataDef(CodataDef),

    /// Named fold: `fold name : Domain -> Codomain { | pat => body }`.
    Fold(FoldDecl),

    /// Named unfold: `unfold name : Seed -> Codata { s => field = e }`.
    Unfold(UnfoldDecl),

    /// Top-level value: `let name = expr`.
    Let(LetDecl),
}

impl DeclKind {
    /// The name this declaration introduces.
    pub fn name(&self) -> &Spanned<String> {
        match self {
            DeclKind::TypeDef(def) => &def.name,
            DeclKind::CodataDef(def) => &def.name,
            DeclKind::Fold(decl) => &decl.name,
            DeclKind::Unfold(decl) => &decl.name,
            DeclKind::Let(decl) => &decl.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: Spanned<String>,
    pub doc: Option<String>,
    pub params: Vec<Spanned<String>>,
    pub variants: Vec<TypeVariant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeVariant {
    pub name: Spanned<String>,
    pub fields: Vec<Spanned<TypeAnnotation>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodataDef {
    pub name: Spanned<String>,
    pub doc: Option<String>,
    pub params: Vec<Spanned<String>>,
    pub fields: Vec<CodataField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodataField {
    pub name: Spanned<String>,
    pub annotation: Spanned<TypeAnnotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldDecl {
    pub name: Spanned<String>,
    pub doc: Option<String>,
    /// `nat` for a plain fold, `(List<int>, int)` for the accumulator form.
    pub domain: Spanned<TypeAnnotation>,
    pub codomain: Spanned<TypeAnnotation>,
    pub clauses: Vec<FoldClause>,
    pub span: Span,
}

impl FoldDecl {
    /// Whether this fold takes an accumulator seed next to its scrutinee.
    pub fn is_accumulator(&self) -> bool {
        matches!(&self.domain.node, TypeAnnotation::Tuple(items) if items.len() == 2)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnfoldDecl {
    pub name: Spanned<String>,
    pub doc: Option<String>,
    pub domain: Spanned<TypeAnnotation>,
    pub codomain: Spanned<TypeAnnotation>,
    pub body: UnfoldBody,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LetDecl {
    pub name: Spanned<String>,
    pub doc: Option<String>,
    pub value: Expr,
    pub span: Span,
}

/// A complete source file / module.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub declarations: Vec<Decl>,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp<T>(node: T) -> Spanned<T> {
        Spanned::new(node, Span::synthetic())
    }

    #[test]
    fn span_merge_covers_both() {
        let a = Span::new(FileId(0), 4, 9);
        let b = Span::new(FileId(0), 1, 6);
        assert_eq!(a.merge(b), Span::new(FileId(0), 1, 9));
    }

    #[test]
    fn pattern_bindings_in_order() {
        // Succ(@p) as m
        let pat = sp(PatternKind::As {
            pattern: Box::new(sp(PatternKind::Constructor {
                name: "Succ".into(),
                args: vec![sp(PatternKind::At("p".into()))],
            })),
            name: sp("m".to_string()),
        });
        let names: Vec<_> = pattern_bindings(&pat).into_iter().map(|n| n.node).collect();
        assert_eq!(names, vec!["p".to_string(), "m".to_string()]);
        assert!(pat.node.contains_at());
    }

    #[test]
    fn at_call_binder_is_bound() {
        // Array(encode_json_array(@values))
        let pat = sp(PatternKind::Constructor {
            name: "Array".into(),
            args: vec![sp(PatternKind::AtCall {
                fold: sp("encode_json_array".to_string()),
                binder: Box::new(sp(PatternKind::Var("values".into()))),
            })],
        });
        let names: Vec<_> = pattern_bindings(&pat).into_iter().map(|n| n.node).collect();
        assert_eq!(names, vec!["values".to_string()]);
        assert_eq!(pat.node.to_string(), "Array(encode_json_array(@values))");
    }

    #[test]
    fn type_annotation_display() {
        let ann = TypeAnnotation::Function(
            vec![TypeAnnotation::Applied(
                "List".into(),
                vec![TypeAnnotation::Named("JsonValue".into())],
            )],
            Box::new(TypeAnnotation::Tuple(vec![
                TypeAnnotation::Named("string".into()),
                TypeAnnotation::Named("int".into()),
            ])),
        );
        assert_eq!(ann.to_string(), "(List<JsonValue>) -> (string, int)");
    }

    #[test]
    fn accumulator_fold_detection() {
        let decl = FoldDecl {
            name: sp("sum".to_string()),
            doc: None,
            domain: sp(TypeAnnotation::Tuple(vec![
                TypeAnnotation::Applied("List".into(), vec![TypeAnnotation::Named("int".into())]),
                TypeAnnotation::Named("int".into()),
            ])),
            codomain: sp(TypeAnnotation::Named("int".into())),
            clauses: vec![],
            span: Span::synthetic(),
        };
        assert!(decl.is_accumulator());
    }
}
