//! Lexer for mapping expressions using Logos

use logos::Logos;
use std::fmt;

/// Token type for the restricted expression grammar.
///
/// Keyword literals accept both JSON spellings (`true`, `false`, `null`) and
/// the Python spellings (`True`, `False`, `None`) used by the configuration
/// dialect this grammar descends from.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    // === Keywords ===
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("in")]
    In,
    #[token("if")]
    If,
    #[token("else")]
    Else,

    #[token("true")]
    #[token("True")]
    True,
    #[token("false")]
    #[token("False")]
    False,
    #[token("null")]
    #[token("None")]
    Null,

    // === Operators ===
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,

    #[token(".")]
    Dot,

    // === Delimiters ===
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,

    // === Literals ===
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    String(String),

    // === Identifier ===
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| Some(lex.slice().to_string()))]
    Ident(String),

    // === Special ===
    Error(String),
    Eof,
}

/// Strips the surrounding quotes and resolves escape sequences.
/// Unknown escapes are kept verbatim, backslash included.
fn unescape(quoted: &str) -> Option<String> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('0') => out.push('\0'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => return None,
        }
    }
    Some(out)
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::In => write!(f, "in"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Null => write!(f, "null"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::Dot => write!(f, "."),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Integer(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Error(s) => write!(f, "{}", s),
            Token::Eof => write!(f, "end of expression"),
        }
    }
}

/// Spanned token with position information
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

/// Lexer wrapper that produces spanned tokens
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    peeked: Option<SpannedToken>,
    eof_emitted: bool,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            peeked: None,
            eof_emitted: false,
        }
    }

    pub fn peek(&mut self) -> Option<&SpannedToken> {
        if self.peeked.is_none() {
            self.peeked = self.next_token();
        }
        self.peeked.as_ref()
    }

    fn next_token(&mut self) -> Option<SpannedToken> {
        match self.inner.next() {
            Some(Ok(token)) => {
                let span = self.inner.span();
                Some(SpannedToken {
                    token,
                    start: span.start,
                    end: span.end,
                })
            }
            Some(Err(_)) => {
                let span = self.inner.span();
                Some(SpannedToken {
                    token: Token::Error(self.inner.slice().to_string()),
                    start: span.start,
                    end: span.end,
                })
            }
            None if !self.eof_emitted => {
                self.eof_emitted = true;
                let pos = self.inner.span().end;
                Some(SpannedToken {
                    token: Token::Eof,
                    start: pos,
                    end: pos,
                })
            }
            None => None,
        }
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = SpannedToken;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(peeked) = self.peeked.take() {
            return Some(peeked);
        }
        self.next_token()
    }
}

/// Tokenize an expression string into a vector of spanned tokens
pub fn tokenize(source: &str) -> Vec<SpannedToken> {
    Lexer::new(source).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        let tokens: Vec<_> = tokenize("and or not in if else")
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(
            tokens,
            vec![
                Token::And,
                Token::Or,
                Token::Not,
                Token::In,
                Token::If,
                Token::Else,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_literals() {
        let tokens: Vec<_> = tokenize("42 3.14 \"hello\" true null")
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(
            tokens,
            vec![
                Token::Integer(42),
                Token::Float(3.14),
                Token::String("hello".to_string()),
                Token::True,
                Token::Null,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_python_spellings() {
        let tokens: Vec<_> = tokenize("True False None")
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(
            tokens,
            vec![Token::True, Token::False, Token::Null, Token::Eof]
        );
    }

    #[test]
    fn test_operators() {
        let tokens: Vec<_> = tokenize("+ - * / % == != <= >=")
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(
            tokens,
            vec![
                Token::Plus,
                Token::Minus,
                Token::Star,
                Token::Slash,
                Token::Percent,
                Token::EqEq,
                Token::NotEq,
                Token::Le,
                Token::Ge,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_single_quoted_strings() {
        let tokens: Vec<_> = tokenize("'it works'").into_iter().map(|t| t.token).collect();
        assert_eq!(
            tokens,
            vec![Token::String("it works".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens: Vec<_> = tokenize(r#""line\nbreak \"quoted\" tab\there""#)
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(
            tokens,
            vec![
                Token::String("line\nbreak \"quoted\" tab\there".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_unknown_escape_kept_verbatim() {
        let tokens: Vec<_> = tokenize(r#""back\slash""#)
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(
            tokens,
            vec![Token::String("back\\slash".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_member_call_expression() {
        let tokens: Vec<_> = tokenize("datetime.now()")
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("datetime".to_string()),
                Token::Dot,
                Token::Ident("now".to_string()),
                Token::LParen,
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        let tokens: Vec<_> = tokenize("order_id note")
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("order_id".to_string()),
                Token::Ident("note".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_unrecognized_input() {
        let tokens: Vec<_> = tokenize("amount @ 2").into_iter().map(|t| t.token).collect();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("amount".to_string()),
                Token::Error("@".to_string()),
                Token::Integer(2),
                Token::Eof,
            ]
        );
    }
}
