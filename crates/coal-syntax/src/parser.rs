//! Recursive descent parser with Pratt-style precedence climbing for Coal.

use coal_ast::*;
use coal_diag::{Category, Diagnostic, SourceLocation};

use crate::token::{Token, TokenKind};

/// Parse an expression from a token stream.
pub fn parse_expr(tokens: Vec<Token>, file: FileId) -> Result<Expr, Vec<Diagnostic>> {
    let mut parser = Parser::new(tokens, file);
    let expr = parser.expression();
    if expr.is_some() && !parser.at_eof() {
        parser.error_at_current("unexpected token after expression");
    }
    parser.finish(expr, "expected expression")
}

/// Parse a standalone type annotation from a token stream.
pub fn parse_type(
    tokens: Vec<Token>,
    file: FileId,
) -> Result<Spanned<TypeAnnotation>, Vec<Diagnostic>> {
    let mut parser = Parser::new(tokens, file);
    let ann = parser.type_annotation();
    if ann.is_some() && !parser.at_eof() {
        parser.error_at_current("unexpected token after type annotation");
    }
    parser.finish(ann, "expected type annotation")
}

/// Parse a standalone pattern from a token stream.
pub fn parse_pattern(tokens: Vec<Token>, file: FileId) -> Result<Pattern, Vec<Diagnostic>> {
    let mut parser = Parser::new(tokens, file);
    let pattern = parser.pattern();
    if pattern.is_some() && !parser.at_eof() {
        parser.error_at_current("unexpected token after pattern");
    }
    parser.finish(pattern, "expected pattern")
}

/// Parse a module (sequence of declarations) from tokens.
pub fn parse_module(tokens: Vec<Token>, file: FileId) -> Result<Module, Vec<Diagnostic>> {
    let mut parser = Parser::new(tokens, file);
    let module = parser.module();
    if parser.errors.is_empty() {
        Ok(module)
    } else {
        Err(parser.errors)
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Binding power of prefix `-` and `not`.
const UNARY_BP: u8 = 13;
/// Binding power of postfix calls and field observation.
const POSTFIX_BP: u8 = 15;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: FileId,
    errors: Vec<Diagnostic>,
    /// Span of the most recently consumed token.
    last: Span,
}

impl Parser {
    fn new(tokens: Vec<Token>, file: FileId) -> Self {
        Self {
            tokens,
            pos: 0,
            file,
            errors: Vec::new(),
            last: Span::new(file, 0, 0),
        }
    }

    fn finish<T>(self, value: Option<T>, missing: &str) -> Result<T, Vec<Diagnostic>> {
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        value.ok_or_else(|| vec![Diagnostic::error(Category::Syntax, missing)])
    }

    // -- Module-level parsing --

    fn module(&mut self) -> Module {
        let start = self.current_span();
        let mut declarations: Vec<Decl> = Vec::new();
        while !self.at_eof() {
            let errors_before = self.errors.len();
            match self.declaration() {
                Some(decl) => declarations.push(decl),
                None => {
                    if self.errors.len() == errors_before {
                        self.error_at_current("expected declaration");
                    }
                    self.synchronize();
                }
            }
        }
        let end = self.current_span();
        Module {
            declarations,
            span: start.merge(end),
        }
    }

    /// Skip to the next token that can begin a declaration.
    fn synchronize(&mut self) {
        if !self.at_eof() {
            self.advance();
        }
        while !self.at_eof() {
            match self.peek_kind() {
                Some(kind) if kind.starts_declaration() => break,
                Some(TokenKind::Let | TokenKind::DocComment(_)) => break,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn declaration(&mut self) -> Option<Decl> {
        let doc = self.consume_doc_comment_block();
        let start = self.current_span();
        let kind = match self.peek_kind() {
            Some(TokenKind::TypeKw) => {
                self.advance();
                DeclKind::TypeDef(self.type_def(doc)?)
            }
            Some(TokenKind::Codata) => {
                self.advance();
                DeclKind::CodataDef(self.codata_def(doc)?)
            }
            Some(TokenKind::Fold) => {
                self.advance();
                DeclKind::Fold(self.fold_decl(doc, start)?)
            }
            Some(TokenKind::Unfold) => {
                self.advance();
                DeclKind::Unfold(self.unfold_decl(doc, start)?)
            }
            Some(TokenKind::Let) => {
                self.advance();
                DeclKind::Let(self.let_decl(doc, start)?)
            }
            _ => {
                self.error_at_current(
                    "expected `type`, `codata`, `fold`, `unfold`, or `let` declaration",
                );
                return None;
            }
        };
        Some(Spanned::new(kind, start.merge(self.last)))
    }

    /// `type nat = Zero | Succ(nat)` (after `type`).
    fn type_def(&mut self, doc: Option<String>) -> Option<TypeDef> {
        let name = self.expect_any_ident("expected type name")?;
        let params = self.type_params()?;
        self.expect(&TokenKind::Eq, "expected `=` after type name")?;
        self.match_token(&TokenKind::Pipe);
        let mut variants = vec![self.variant()?];
        while self.match_token(&TokenKind::Pipe) {
            variants.push(self.variant()?);
        }
        Some(TypeDef {
            name,
            doc,
            params,
            variants,
        })
    }

    fn variant(&mut self) -> Option<TypeVariant> {
        let name = self.expect_upper_ident("expected constructor name")?;
        let mut fields = Vec::new();
        if self.match_token(&TokenKind::LParen) {
            loop {
                fields.push(self.type_annotation()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "expected `)` after constructor fields")?;
        }
        Some(TypeVariant { name, fields })
    }

    /// `codata Stream<T> = { head: T, tail: Stream<T> }` (after `codata`).
    fn codata_def(&mut self, doc: Option<String>) -> Option<CodataDef> {
        let name = self.expect_any_ident("expected codata type name")?;
        let params = self.type_params()?;
        self.expect(&TokenKind::Eq, "expected `=` after codata type name")?;
        self.expect(&TokenKind::LBrace, "expected `{` to open codata fields")?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let field_name = self.expect_ident("expected codata field name")?;
            self.expect(&TokenKind::Colon, "expected `:` after field name")?;
            let annotation = self.type_annotation()?;
            fields.push(CodataField {
                name: field_name,
                annotation,
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "expected `}` to close codata fields")?;
        Some(CodataDef {
            name,
            doc,
            params,
            fields,
        })
    }

    fn type_params(&mut self) -> Option<Vec<Spanned<String>>> {
        let mut params = Vec::new();
        if self.match_token(&TokenKind::Lt) {
            loop {
                params.push(self.expect_any_ident("expected type parameter name")?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Gt, "expected `>` after type parameters")?;
        }
        Some(params)
    }

    /// `fold name : Domain -> Codomain { clauses }` (after `fold`).
    fn fold_decl(&mut self, doc: Option<String>, start: Span) -> Option<FoldDecl> {
        let name = self.expect_ident("expected fold name")?;
        self.expect(&TokenKind::Colon, "expected `:` after fold name")?;
        let domain = self.type_atom()?;
        self.expect(&TokenKind::Arrow, "expected `->` between fold domain and result type")?;
        let codomain = self.type_annotation()?;
        let clauses = self.clause_block("fold")?;
        Some(FoldDecl {
            name,
            doc,
            domain,
            codomain,
            clauses,
            span: start.merge(self.last),
        })
    }

    /// `unfold name : Seed -> Codata { s => fields }` (after `unfold`).
    fn unfold_decl(&mut self, doc: Option<String>, start: Span) -> Option<UnfoldDecl> {
        let name = self.expect_ident("expected unfold name")?;
        self.expect(&TokenKind::Colon, "expected `:` after unfold name")?;
        let domain = self.type_atom()?;
        self.expect(&TokenKind::Arrow, "expected `->` between seed type and codata type")?;
        let codomain = self.type_annotation()?;
        let body = self.unfold_body()?;
        Some(UnfoldDecl {
            name,
            doc,
            domain,
            codomain,
            body,
            span: start.merge(self.last),
        })
    }

    /// `let name = expr` (after `let`).
    fn let_decl(&mut self, doc: Option<String>, start: Span) -> Option<LetDecl> {
        let name = self.expect_ident("expected name after `let`")?;
        self.expect(&TokenKind::Eq, "expected `=` after let name")?;
        let value = self.expression()?;
        Some(LetDecl {
            name,
            doc,
            value,
            span: start.merge(self.last),
        })
    }

    /// `{ | pat => body ... }`, shared by folds and matches.
    fn clause_block(&mut self, what: &str) -> Option<Vec<FoldClause>> {
        self.expect(&TokenKind::LBrace, &format!("expected `{{` to open {what} clauses"))?;
        let mut clauses = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let start = self.current_span();
            self.expect(&TokenKind::Pipe, &format!("expected `|` to start a {what} clause"))?;
            let pattern = self.pattern()?;
            self.expect(&TokenKind::FatArrow, "expected `=>` after clause pattern")?;
            let body = self.expression()?;
            clauses.push(FoldClause {
                span: start.merge(body.span),
                pattern,
                body,
            });
        }
        self.advance(); // consume '}'
        Some(clauses)
    }

    /// `{ s => head = e, @tail = e }`
    fn unfold_body(&mut self) -> Option<UnfoldBody> {
        self.expect(&TokenKind::LBrace, "expected `{` to open unfold body")?;
        let seed_pattern = self.pattern()?;
        self.expect(&TokenKind::FatArrow, "expected `=>` after unfold seed pattern")?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let start = self.current_span();
            let corecursive = self.match_token(&TokenKind::At);
            let name = self.expect_ident("expected codata field name")?;
            self.expect(&TokenKind::Eq, "expected `=` after field name")?;
            let value = self.expression()?;
            fields.push(UnfoldField {
                span: start.merge(value.span),
                name,
                corecursive,
                value,
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "expected `}` to close unfold body")?;
        Some(UnfoldBody {
            seed_pattern,
            fields,
        })
    }

    // -- Types --

    /// A full type, including function types `(a, b) -> c` and `a -> b`.
    fn type_annotation(&mut self) -> Option<Spanned<TypeAnnotation>> {
        let (atom, paren_items) = self.type_atom_inner()?;
        if self.match_token(&TokenKind::Arrow) {
            let params = paren_items.unwrap_or_else(|| vec![atom.node.clone()]);
            let ret = self.type_annotation()?;
            let span = atom.span.merge(ret.span);
            return Some(Spanned::new(
                TypeAnnotation::Function(params, Box::new(ret.node)),
                span,
            ));
        }
        Some(atom)
    }

    /// A type without a top-level arrow.
    fn type_atom(&mut self) -> Option<Spanned<TypeAnnotation>> {
        self.type_atom_inner().map(|(atom, _)| atom)
    }

    /// Returns the atom and, when it was parenthesised, its raw item list.
    fn type_atom_inner(&mut self) -> Option<(Spanned<TypeAnnotation>, Option<Vec<TypeAnnotation>>)> {
        let start = self.current_span();
        match self.peek_kind() {
            Some(TokenKind::LParen) => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        items.push(self.type_annotation()?.node);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "expected `)` to close type")?;
                let span = start.merge(self.last);
                let ann = match items.as_slice() {
                    [] => TypeAnnotation::Named("unit".into()),
                    [single] => single.clone(),
                    _ => TypeAnnotation::Tuple(items.clone()),
                };
                Some((Spanned::new(ann, span), Some(items)))
            }
            Some(TokenKind::Ident(_) | TokenKind::UpperIdent(_)) => {
                let name = self.expect_any_ident("expected type name")?;
                if self.match_token(&TokenKind::Lt) {
                    let mut args = Vec::new();
                    loop {
                        args.push(self.type_annotation()?.node);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::Gt, "expected `>` to close type arguments")?;
                    let span = name.span.merge(self.last);
                    Some((
                        Spanned::new(TypeAnnotation::Applied(name.node, args), span),
                        None,
                    ))
                } else {
                    Some((name.map(TypeAnnotation::Named), None))
                }
            }
            _ => {
                self.error_at_current("expected type");
                None
            }
        }
    }

    // -- Patterns --

    /// `p | q | ...`
    fn pattern(&mut self) -> Option<Pattern> {
        let first = self.as_pattern()?;
        if !self.check(&TokenKind::Pipe) {
            return Some(first);
        }
        let mut alternatives = vec![first];
        while self.match_token(&TokenKind::Pipe) {
            alternatives.push(self.as_pattern()?);
        }
        let span = alternatives[0].span.merge(self.last);
        Some(Spanned::new(PatternKind::Or(alternatives), span))
    }

    /// `p as name`
    fn as_pattern(&mut self) -> Option<Pattern> {
        let mut pattern = self.primary_pattern()?;
        while self.match_token(&TokenKind::As) {
            let name = self.expect_ident("expected name after `as`")?;
            let span = pattern.span.merge(name.span);
            pattern = Spanned::new(
                PatternKind::As {
                    pattern: Box::new(pattern),
                    name,
                },
                span,
            );
        }
        Some(pattern)
    }

    fn primary_pattern(&mut self) -> Option<Pattern> {
        let start = self.current_span();
        let kind = match self.peek_kind().cloned() {
            Some(TokenKind::Underscore) => {
                self.advance();
                PatternKind::Wildcard
            }
            Some(TokenKind::At) => {
                self.advance();
                let name = self.expect_ident("expected a name after `@`")?;
                PatternKind::At(name.node)
            }
            Some(TokenKind::Ident(name)) => {
                let tok = self.advance();
                if self.check(&TokenKind::LParen) {
                    if !self.peek_at(1).is_some_and(|t| t.kind == TokenKind::At) {
                        self.advance();
                        self.error_at_current(
                            "expected `@` inside a named-fold pattern, e.g. `encode(@xs)`",
                        );
                        return None;
                    }
                    self.advance(); // consume '('
                    self.advance(); // consume '@'
                    let binder = self.primary_pattern()?;
                    self.expect(&TokenKind::RParen, "expected `)` after named-fold binder")?;
                    PatternKind::AtCall {
                        fold: Spanned::new(name, tok.span),
                        binder: Box::new(binder),
                    }
                } else {
                    PatternKind::Var(name)
                }
            }
            Some(TokenKind::UpperIdent(name)) => {
                self.advance();
                let mut args = Vec::new();
                if self.match_token(&TokenKind::LParen) {
                    loop {
                        args.push(self.pattern()?);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen, "expected `)` after constructor patterns")?;
                }
                PatternKind::Constructor { name, args }
            }
            Some(TokenKind::Minus) => {
                self.advance();
                match self.peek_kind().cloned() {
                    Some(TokenKind::Int(n)) => {
                        self.advance();
                        PatternKind::Lit(Lit::Int(-n))
                    }
                    Some(TokenKind::Float(x)) => {
                        self.advance();
                        PatternKind::Lit(Lit::Float(-x))
                    }
                    _ => {
                        self.error_at_current("expected number after `-` in pattern");
                        return None;
                    }
                }
            }
            Some(TokenKind::LParen) => {
                self.advance();
                if self.match_token(&TokenKind::RParen) {
                    PatternKind::Lit(Lit::Unit)
                } else {
                    let mut items = Vec::new();
                    let mut trailing_comma = false;
                    loop {
                        items.push(self.pattern()?);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                        if self.check(&TokenKind::RParen) {
                            trailing_comma = true;
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen, "expected `)` to close pattern")?;
                    if items.len() == 1 && !trailing_comma {
                        let inner = items.remove(0);
                        return Some(Spanned::new(inner.node, start.merge(self.last)));
                    }
                    PatternKind::Tuple(items)
                }
            }
            Some(kind) => match literal_of(&kind) {
                Some(lit) => {
                    self.advance();
                    PatternKind::Lit(lit)
                }
                None => {
                    self.error_at_current("expected pattern");
                    return None;
                }
            },
            None => {
                self.error_at_current("expected pattern");
                return None;
            }
        };
        Some(Spanned::new(kind, start.merge(self.last)))
    }

    // -- Expressions --

    fn expression(&mut self) -> Option<Expr> {
        self.pratt_expr(0)
    }

    fn pratt_expr(&mut self, min_bp: u8) -> Option<Expr> {
        let mut lhs = self.unary_or_primary()?;

        loop {
            // Postfix: `.field`, `(args)`
            if self.postfix_bp().is_some_and(|bp| bp >= min_bp) {
                lhs = self.parse_postfix(lhs)?;
                continue;
            }

            let Some((l_bp, r_bp)) = self.infix_bp() else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            let op_token = self.advance();
            let Some(op) = token_to_binop(&op_token.kind) else {
                break;
            };
            let rhs = self.pratt_expr(r_bp)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Spanned::new(
                ExprKind::BinaryOp {
                    op: Spanned::new(op, op_token.span),
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
                span,
            );
        }

        Some(lhs)
    }

    fn unary_or_primary(&mut self) -> Option<Expr> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Not) => UnaryOp::Not,
            _ => return self.primary(),
        };
        let tok = self.advance();
        let operand = self.pratt_expr(UNARY_BP)?;
        let span = tok.span.merge(operand.span);
        Some(Spanned::new(
            ExprKind::UnaryOp {
                op: Spanned::new(op, tok.span),
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self, lhs: Expr) -> Option<Expr> {
        if self.match_token(&TokenKind::Dot) {
            let field = self.expect_ident("expected field name after `.`")?;
            let span = lhs.span.merge(field.span);
            return Some(Spanned::new(
                ExprKind::FieldAccess {
                    expr: Box::new(lhs),
                    field,
                },
                span,
            ));
        }
        self.expect(&TokenKind::LParen, "expected `(`")?;
        let args = self.call_args()?;
        let span = lhs.span.merge(self.last);
        Some(Spanned::new(
            ExprKind::Call {
                func: Box::new(lhs),
                args,
            },
            span,
        ))
    }

    /// Arguments after an opening `(`, through the closing `)`.
    fn call_args(&mut self) -> Option<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "expected `)` after arguments")?;
        Some(args)
    }

    fn primary(&mut self) -> Option<Expr> {
        let start = self.current_span();
        let kind = match self.peek_kind().cloned() {
            Some(TokenKind::Ident(name)) => {
                self.advance();
                ExprKind::Var(name)
            }
            Some(TokenKind::UpperIdent(name)) => {
                let tok = self.advance();
                let args = if self.match_token(&TokenKind::LParen) {
                    self.call_args()?
                } else {
                    Vec::new()
                };
                ExprKind::Constructor {
                    name: Spanned::new(name, tok.span),
                    args,
                }
            }
            Some(TokenKind::LParen) => {
                self.advance();
                if self.match_token(&TokenKind::RParen) {
                    ExprKind::Lit(Lit::Unit)
                } else {
                    let mut items = vec![self.expression()?];
                    let mut trailing_comma = false;
                    while self.match_token(&TokenKind::Comma) {
                        if self.check(&TokenKind::RParen) {
                            trailing_comma = true;
                            break;
                        }
                        items.push(self.expression()?);
                    }
                    self.expect(&TokenKind::RParen, "expected `)`")?;
                    if items.len() == 1 && !trailing_comma {
                        let inner = items.remove(0);
                        return Some(Spanned::new(inner.node, start.merge(self.last)));
                    }
                    ExprKind::Tuple(items)
                }
            }
            Some(TokenKind::Let) => {
                self.advance();
                let pattern = self.pattern()?;
                self.expect(&TokenKind::Eq, "expected `=` in let binding")?;
                let value = self.expression()?;
                self.expect(&TokenKind::In, "expected `in` after let value")?;
                let body = self.expression()?;
                ExprKind::Let {
                    pattern,
                    value: Box::new(value),
                    body: Box::new(body),
                }
            }
            Some(TokenKind::Fn) => {
                self.advance();
                self.expect(&TokenKind::LParen, "expected `(` after `fn`")?;
                let mut params = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        let name = self.expect_ident("expected parameter name")?;
                        let annotation = if self.match_token(&TokenKind::Colon) {
                            Some(self.type_annotation()?)
                        } else {
                            None
                        };
                        params.push(Param { name, annotation });
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "expected `)` after parameters")?;
                self.expect(&TokenKind::FatArrow, "expected `=>` after lambda parameters")?;
                let body = self.expression()?;
                ExprKind::Lambda {
                    params,
                    body: Box::new(body),
                }
            }
            Some(TokenKind::If) => {
                self.advance();
                let condition = self.expression()?;
                self.expect(&TokenKind::Then, "expected `then` after if condition")?;
                let then_branch = self.expression()?;
                self.expect(&TokenKind::Else, "expected `else` branch")?;
                let else_branch = self.expression()?;
                ExprKind::If {
                    condition: Box::new(condition),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                }
            }
            Some(TokenKind::Match) => {
                self.advance();
                let scrutinee = self.expression()?;
                let arms = self
                    .clause_block("match")?
                    .into_iter()
                    .map(|c| MatchArm {
                        pattern: c.pattern,
                        body: c.body,
                    })
                    .collect();
                ExprKind::Match {
                    scrutinee: Box::new(scrutinee),
                    arms,
                }
            }
            Some(TokenKind::Fold) => {
                self.advance();
                ExprKind::Fold(Box::new(self.fold_expr(start)?))
            }
            Some(TokenKind::Unfold) => {
                self.advance();
                ExprKind::Unfold(Box::new(self.unfold_expr(start)?))
            }
            Some(TokenKind::DocComment(_)) => {
                self.error_at_current("doc comments must precede a declaration");
                return None;
            }
            Some(kind) => match literal_of(&kind) {
                Some(lit) => {
                    self.advance();
                    ExprKind::Lit(lit)
                }
                None => {
                    self.error_at_current("expected expression");
                    return None;
                }
            },
            None => {
                self.error_at_current("expected expression");
                return None;
            }
        };
        Some(Spanned::new(kind, start.merge(self.last)))
    }

    /// `fold(e [: T] [, seed]) { clauses }` (after `fold`).
    fn fold_expr(&mut self, start: Span) -> Option<FoldExpr> {
        self.expect(&TokenKind::LParen, "expected `(` after `fold`")?;
        let scrutinee = self.expression()?;
        let ascription = if self.match_token(&TokenKind::Colon) {
            Some(self.type_annotation()?)
        } else {
            None
        };
        let seed = if self.match_token(&TokenKind::Comma) {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::RParen, "expected `)` after fold scrutinee")?;
        let clauses = self.clause_block("fold")?;
        Some(FoldExpr {
            scrutinee,
            ascription,
            seed,
            clauses,
            span: start.merge(self.last),
        })
    }

    /// `unfold(seed) [: Codata] { s => fields }` (after `unfold`).
    fn unfold_expr(&mut self, start: Span) -> Option<UnfoldExpr> {
        self.expect(&TokenKind::LParen, "expected `(` after `unfold`")?;
        let seed = self.expression()?;
        self.expect(&TokenKind::RParen, "expected `)` after unfold seed")?;
        let ascription = if self.match_token(&TokenKind::Colon) {
            Some(self.type_annotation()?)
        } else {
            None
        };
        let body = self.unfold_body()?;
        Some(UnfoldExpr {
            seed,
            ascription,
            body,
            span: start.merge(self.last),
        })
    }

    fn infix_bp(&self) -> Option<(u8, u8)> {
        match self.peek_kind()? {
            TokenKind::Or => Some((1, 2)),
            TokenKind::And => Some((3, 4)),
            TokenKind::EqEq | TokenKind::BangEq => Some((5, 6)),
            TokenKind::Lt | TokenKind::LtEq | TokenKind::Gt | TokenKind::GtEq => Some((7, 8)),
            TokenKind::Plus | TokenKind::PlusPlus | TokenKind::Minus => Some((9, 10)),
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Some((11, 12)),
            _ => None,
        }
    }

    fn postfix_bp(&self) -> Option<u8> {
        match self.peek_kind()? {
            TokenKind::Dot | TokenKind::LParen => Some(POSTFIX_BP),
            _ => None,
        }
    }

    // -- Token stream helpers --

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    /// Peek at a token relative to the current position.
    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or(Span::new(self.file, 0, 0))
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Eof) | None)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind()
            .is_some_and(|k| std::mem::discriminant(k) == std::mem::discriminant(kind))
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Token {
        let tok = match self.tokens.get(self.pos) {
            Some(tok) => tok.clone(),
            None => Token {
                kind: TokenKind::Eof,
                span: self.last,
            },
        };
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        if tok.kind != TokenKind::Eof {
            self.last = tok.span;
        }
        tok
    }

    /// Consume a leading `--|` doc-comment block and return normalized text.
    fn consume_doc_comment_block(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        while let Some(TokenKind::DocComment(line)) = self.peek_kind() {
            lines.push(line.clone());
            self.advance();
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    fn expect(&mut self, kind: &TokenKind, msg: &str) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            self.error_at_current(msg);
            None
        }
    }

    fn expect_ident(&mut self, msg: &str) -> Option<Spanned<String>> {
        if let Some(TokenKind::Ident(name)) = self.peek_kind() {
            let name = name.clone();
            let tok = self.advance();
            Some(Spanned::new(name, tok.span))
        } else {
            self.error_at_current(msg);
            None
        }
    }

    /// Accept either a lowercase Ident or an UpperIdent (type names).
    fn expect_any_ident(&mut self, msg: &str) -> Option<Spanned<String>> {
        match self.peek_kind() {
            Some(TokenKind::Ident(name)) | Some(TokenKind::UpperIdent(name)) => {
                let name = name.clone();
                let tok = self.advance();
                Some(Spanned::new(name, tok.span))
            }
            _ => {
                self.error_at_current(msg);
                None
            }
        }
    }

    fn expect_upper_ident(&mut self, msg: &str) -> Option<Spanned<String>> {
        if let Some(TokenKind::UpperIdent(name)) = self.peek_kind() {
            let name = name.clone();
            let tok = self.advance();
            Some(Spanned::new(name, tok.span))
        } else {
            self.error_at_current(msg);
            None
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        let span = self.current_span();
        self.errors
            .push(Diagnostic::error(Category::Syntax, msg).at(SourceLocation {
                file_id: self.file.0,
                start: span.start,
                end: span.end,
            }));
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn literal_of(kind: &TokenKind) -> Option<Lit> {
    match kind {
        TokenKind::Int(n) => Some(Lit::Int(*n)),
        TokenKind::Float(x) => Some(Lit::Float(*x)),
        TokenKind::String(s) => Some(Lit::String(s.clone())),
        TokenKind::True => Some(Lit::Bool(true)),
        TokenKind::False => Some(Lit::Bool(false)),
        _ => None,
    }
}

fn token_to_binop(kind: &TokenKind) -> Option<BinOp> {
    match kind {
        TokenKind::Plus => Some(BinOp::Add),
        TokenKind::PlusPlus => Some(BinOp::Concat),
        TokenKind::Minus => Some(BinOp::Sub),
        TokenKind::Star => Some(BinOp::Mul),
        TokenKind::Slash => Some(BinOp::Div),
        TokenKind::Percent => Some(BinOp::Mod),
        TokenKind::EqEq => Some(BinOp::Eq),
        TokenKind::BangEq => Some(BinOp::Neq),
        TokenKind::Lt => Some(BinOp::Lt),
        TokenKind::LtEq => Some(BinOp::Lte),
        TokenKind::Gt => Some(BinOp::Gt),
        TokenKind::GtEq => Some(BinOp::Gte),
        TokenKind::And => Some(BinOp::And),
        TokenKind::Or => Some(BinOp::Or),
        _ => None,
    }
}
