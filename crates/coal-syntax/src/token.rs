//! Token types produced by the Coal lexer.

use coal_ast::Span;

/// A token with its kind and source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// The kind of a lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // -- Literals --
    Int(i64),
    Float(f64),
    String(String),

    // -- Identifiers --
    /// Lowercase-initial identifier: `factorial`, `nat`, `acc`
    Ident(String),
    /// PascalCase identifier: `Succ`, `Stream`, `JsonValue`
    UpperIdent(String),
    /// `_`
    Underscore,

    // -- Keywords --
    TypeKw,
    Codata,
    Fold,
    Unfold,
    Let,
    In,
    Fn,
    If,
    Then,
    Else,
    Match,
    True,
    False,
    And,
    Or,
    Not,
    As,

    // -- Operators --
    Plus,     // +
    PlusPlus, // ++
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    EqEq,     // ==
    BangEq,   // !=
    Lt,       // <
    LtEq,     // <=
    Gt,       // >
    GtEq,     // >=

    // -- Assignment / arrows --
    Eq,       // =
    Arrow,    // ->
    FatArrow, // =>

    // -- Delimiters --
    LParen, // (
    RParen, // )
    LBrace, // {
    RBrace, // }

    // -- Punctuation --
    Colon, // :
    Comma, // ,
    Dot,   // .
    Pipe,  // |
    At,    // @

    // -- Structural --
    /// Doc comment line: `--| ...` (without the `--|` prefix).
    DocComment(String),
    Eof,
}

impl TokenKind {
    /// Whether this token can only begin a top-level declaration.
    pub fn starts_declaration(&self) -> bool {
        matches!(
            self,
            TokenKind::TypeKw | TokenKind::Codata | TokenKind::Fold | TokenKind::Unfold
        )
    }
}
