//! Hand-written lexer for Coal source code.

use coal_ast::{FileId, Span};
use coal_diag::{Category, Diagnostic, SourceLocation};

use crate::token::{Token, TokenKind};

/// Lex source text into a sequence of tokens.
///
/// Returns `Ok((tokens, warnings))` on success; the last token is always
/// `Eof`. Returns `Err` with diagnostics only when there are actual errors.
pub fn lex(source: &str, file: FileId) -> Result<(Vec<Token>, Vec<Diagnostic>), Vec<Diagnostic>> {
    let mut lexer = Lexer {
        text: source,
        file,
        pos: 0,
        tokens: Vec::new(),
        diagnostics: Vec::new(),
    };
    while let Some(start) = lexer.next_token_start() {
        lexer.token(start);
    }
    let end = source.len();
    lexer.push(TokenKind::Eof, end, end);

    if coal_diag::has_errors(&lexer.diagnostics) {
        Err(lexer.diagnostics)
    } else {
        Ok((lexer.tokens, lexer.diagnostics))
    }
}

/// Fixed spellings, longest first so `++` wins over `+`.
const PUNCTUATION: &[(&str, TokenKind)] = &[
    ("++", TokenKind::PlusPlus),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::BangEq),
    ("<=", TokenKind::LtEq),
    (">=", TokenKind::GtEq),
    ("->", TokenKind::Arrow),
    ("=>", TokenKind::FatArrow),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("=", TokenKind::Eq),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    (":", TokenKind::Colon),
    (",", TokenKind::Comma),
    (".", TokenKind::Dot),
    ("|", TokenKind::Pipe),
    ("@", TokenKind::At),
];

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "_" => TokenKind::Underscore,
        "type" => TokenKind::TypeKw,
        "codata" => TokenKind::Codata,
        "fold" => TokenKind::Fold,
        "unfold" => TokenKind::Unfold,
        "let" => TokenKind::Let,
        "in" => TokenKind::In,
        "fn" => TokenKind::Fn,
        "if" => TokenKind::If,
        "then" => TokenKind::Then,
        "else" => TokenKind::Else,
        "match" => TokenKind::Match,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "as" => TokenKind::As,
        _ => return None,
    })
}

struct Lexer<'src> {
    text: &'src str,
    file: FileId,
    pos: usize,
    tokens: Vec<Token>,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    fn rest(&self) -> &'src str {
        &self.text[self.pos..]
    }

    fn slice(&self, start: usize) -> &'src str {
        &self.text[start..self.pos]
    }

    fn current(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) -> &'src str {
        let start = self.pos;
        while self.current().is_some_and(&pred) {
            self.bump();
        }
        self.slice(start)
    }

    /// Skip whitespace and comments; `None` at end of input.
    ///
    /// `--` starts a line comment. `--|` lines are kept as doc comments.
    fn next_token_start(&mut self) -> Option<usize> {
        loop {
            self.eat_while(char::is_whitespace);
            if !self.rest().starts_with("--") {
                break;
            }
            let start = self.pos;
            self.pos += 2;
            let doc = self.rest().strip_prefix('|').is_some();
            let line = self.eat_while(|c| c != '\n');
            if doc {
                let content = line[1..].strip_prefix(' ').unwrap_or(&line[1..]).trim_end().to_string();
                self.push(TokenKind::DocComment(content), start, self.pos);
            }
        }
        (self.pos < self.text.len()).then_some(self.pos)
    }

    fn token(&mut self, start: usize) {
        let Some(ch) = self.current() else {
            return;
        };
        match ch {
            '"' => self.string(start),
            '0'..='9' => self.number(start),
            'a'..='z' | '_' => {
                let word = self.eat_while(is_ident_char);
                if word == "rec" {
                    self.error(
                        start,
                        "`rec` is not supported; Coal recursion goes through `fold` and `unfold`",
                    );
                    return;
                }
                let kind = keyword(word).unwrap_or_else(|| TokenKind::Ident(word.to_string()));
                self.push(kind, start, self.pos);
            }
            'A'..='Z' => {
                let word = self.eat_while(is_ident_char).to_string();
                self.push(TokenKind::UpperIdent(word), start, self.pos);
            }
            _ => {
                let matched = PUNCTUATION
                    .iter()
                    .find(|(spelling, _)| self.rest().starts_with(spelling));
                match matched {
                    Some((spelling, kind)) => {
                        self.pos += spelling.len();
                        self.push(kind.clone(), start, self.pos);
                    }
                    None => {
                        self.bump();
                        let message = match ch {
                            '!' => "unexpected character '!'; use 'not' instead".to_string(),
                            '&' => "unexpected character '&'; use 'and' instead".to_string(),
                            other => format!("unexpected character '{other}'"),
                        };
                        self.error(start, message);
                    }
                }
            }
        }
    }

    fn string(&mut self, start: usize) {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => {
                    self.error(start, "unterminated string literal");
                    return;
                }
                Some('"') => break,
                Some('\\') => match self.bump() {
                    None => {
                        self.error(start, "unterminated string literal");
                        return;
                    }
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c @ ('\\' | '"')) => value.push(c),
                    Some(other) => {
                        let at = self.pos - other.len_utf8();
                        self.error(at, format!("unknown escape sequence '\\{other}'"));
                    }
                },
                Some(c) => value.push(c),
            }
        }
        self.push(TokenKind::String(value), start, self.pos);
    }

    fn number(&mut self, start: usize) {
        self.eat_while(|c| c.is_ascii_digit());
        let fraction = self
            .rest()
            .strip_prefix('.')
            .is_some_and(|after| after.starts_with(|c: char| c.is_ascii_digit()));
        if fraction {
            self.pos += 1;
            self.eat_while(|c| c.is_ascii_digit());
        }
        let text = self.slice(start);
        let kind = if fraction {
            text.parse().map(TokenKind::Float).map_err(|_| "float")
        } else {
            text.parse().map(TokenKind::Int).map_err(|_| "integer")
        };
        match kind {
            Ok(kind) => self.push(kind, start, self.pos),
            Err(what) => {
                let message = format!("invalid {what} literal: {text}");
                self.error(start, message);
            }
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        let span = Span::new(self.file, start as u32, end as u32);
        self.tokens.push(Token { kind, span });
    }

    fn error(&mut self, start: usize, message: impl Into<String>) {
        let location = SourceLocation {
            file_id: self.file.0,
            start: start as u32,
            end: self.pos as u32,
        };
        self.diagnostics
            .push(Diagnostic::error(Category::Syntax, message).at(location));
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_kinds(source: &str) -> Vec<TokenKind> {
        let mut kinds: Vec<_> = lex(source, FileId(0))
            .unwrap()
            .0
            .into_iter()
            .map(|t| t.kind)
            .collect();
        if kinds.last() == Some(&TokenKind::Eof) {
            kinds.pop();
        }
        kinds
    }

    #[test]
    fn single_int() {
        assert_eq!(lex_kinds("42"), vec![TokenKind::Int(42)]);
    }

    #[test]
    fn int_dot_no_digit_is_int_then_dot() {
        assert_eq!(
            lex_kinds("42.head"),
            vec![
                TokenKind::Int(42),
                TokenKind::Dot,
                TokenKind::Ident("head".into()),
            ]
        );
    }

    #[test]
    fn single_float() {
        assert_eq!(lex_kinds("1.5"), vec![TokenKind::Float(1.5)]);
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            lex_kinds(r#""a\nb\\c\"""#),
            vec![TokenKind::String("a\nb\\c\"".into())]
        );
    }

    #[test]
    fn keywords() {
        assert_eq!(
            lex_kinds("type codata fold unfold let in fn if then else match as _"),
            vec![
                TokenKind::TypeKw,
                TokenKind::Codata,
                TokenKind::Fold,
                TokenKind::Unfold,
                TokenKind::Let,
                TokenKind::In,
                TokenKind::Fn,
                TokenKind::If,
                TokenKind::Then,
                TokenKind::Else,
                TokenKind::Match,
                TokenKind::As,
                TokenKind::Underscore,
            ]
        );
    }

    #[test]
    fn at_patterns() {
        assert_eq!(
            lex_kinds("Succ(@p) encode(@xs)"),
            vec![
                TokenKind::UpperIdent("Succ".into()),
                TokenKind::LParen,
                TokenKind::At,
                TokenKind::Ident("p".into()),
                TokenKind::RParen,
                TokenKind::Ident("encode".into()),
                TokenKind::LParen,
                TokenKind::At,
                TokenKind::Ident("xs".into()),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn operators() {
        assert_eq!(
            lex_kinds("+ ++ - * / % == != < <= > >= = -> =>"),
            vec![
                TokenKind::Plus,
                TokenKind::PlusPlus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::Lt,
                TokenKind::LtEq,
                TokenKind::Gt,
                TokenKind::GtEq,
                TokenKind::Eq,
                TokenKind::Arrow,
                TokenKind::FatArrow,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_docs_kept() {
        assert_eq!(
            lex_kinds("-- plain\n--| Computes n!\nfold"),
            vec![
                TokenKind::DocComment("Computes n!".into()),
                TokenKind::Fold,
            ]
        );
    }

    #[test]
    fn spans_are_byte_offsets() {
        let (tokens, _) = lex("let x", FileId(3)).unwrap();
        assert_eq!(tokens[1].span, Span::new(FileId(3), 4, 5));
        assert_eq!(tokens[2].kind, TokenKind::Eof);
    }

    #[test]
    fn rec_keyword_is_rejected() {
        let errs = lex("rec", FileId(0)).unwrap_err();
        assert!(errs[0].message.contains("fold"));
    }

    #[test]
    fn unterminated_string_is_error() {
        let errs = lex("\"abc", FileId(0)).unwrap_err();
        assert!(errs[0].message.contains("unterminated"));
    }

    #[test]
    fn unexpected_unicode_character() {
        let errs = lex("λ", FileId(0)).unwrap_err();
        assert_eq!(errs[0].message, "unexpected character 'λ'");
    }
}
