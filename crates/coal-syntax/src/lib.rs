//! Lexer and recursive descent parser for Coal source code.
//!
//! This crate takes source text and produces an AST defined in `coal-ast`.
//! The parser uses Pratt-style precedence climbing for binary operators.

pub mod lexer;
pub mod parser;
pub mod token;

use coal_ast::{Expr, FileId, Module, Pattern, Spanned, TypeAnnotation};
use coal_diag::Diagnostic;

pub use lexer::lex;
pub use parser::{parse_expr, parse_module, parse_pattern, parse_type};
pub use token::{Token, TokenKind};

/// Parse an expression directly from source text.
pub fn parse_expr_source(source: &str, file: FileId) -> Result<Expr, Vec<Diagnostic>> {
    let tokens = lex(source, file)?.0;
    parse_expr(tokens, file)
}

/// Parse a module directly from source text.
pub fn parse_module_source(source: &str, file: FileId) -> Result<Module, Vec<Diagnostic>> {
    let tokens = lex(source, file)?.0;
    parse_module(tokens, file)
}

/// Parse a type annotation directly from source text.
pub fn parse_type_source(
    source: &str,
    file: FileId,
) -> Result<Spanned<TypeAnnotation>, Vec<Diagnostic>> {
    let tokens = lex(source, file)?.0;
    parse_type(tokens, file)
}

/// Parse a pattern directly from source text.
pub fn parse_pattern_source(source: &str, file: FileId) -> Result<Pattern, Vec<Diagnostic>> {
    let tokens = lex(source, file)?.0;
    parse_pattern(tokens, file)
}
