//! Recursive descent parser for mapping expressions
//!
//! Hand-written with one function per precedence level, Python-flavored:
//! conditional, `or`, `and`, `not`, a single non-chained comparison or
//! membership test, additive, multiplicative, unary minus, then postfix
//! member/index/call, then primary.

use super::ast::{BinOp, Expr, UnaryOp};
use super::error::{ParseError, ParseResult};
use super::lexer::{Lexer, SpannedToken, Token};

/// Parse an expression string into an AST
pub fn parse(source: &str) -> ParseResult<Expr> {
    let mut parser = Parser::new(source);
    if parser.is_at_end() {
        return Err(ParseError::Empty);
    }
    let expr = parser.parse_expression()?;
    if let Token::Error(fragment) = &parser.current.token {
        return Err(ParseError::InvalidToken {
            position: parser.current.start,
            fragment: fragment.clone(),
        });
    }
    parser.consume(&Token::Eof, "end of expression")?;
    Ok(expr)
}

/// Parser state
struct Parser<'source> {
    lexer: Lexer<'source>,
    current: SpannedToken,
    previous: SpannedToken,
}

impl<'source> Parser<'source> {
    fn new(source: &'source str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next().unwrap_or(SpannedToken {
            token: Token::Eof,
            start: 0,
            end: 0,
        });
        Self {
            lexer,
            current: current.clone(),
            previous: current,
        }
    }

    fn advance(&mut self) {
        self.previous = self.current.clone();
        self.current = self.lexer.next().unwrap_or(SpannedToken {
            token: Token::Eof,
            start: self.previous.end,
            end: self.previous.end,
        });
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(&self.current.token) == std::mem::discriminant(token)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current.token, Token::Eof)
    }

    fn consume(&mut self, expected: &Token, msg: &str) -> ParseResult<SpannedToken> {
        if self.check(expected) {
            let tok = self.current.clone();
            self.advance();
            Ok(tok)
        } else {
            Err(ParseError::UnexpectedToken {
                position: self.current.start,
                expected: msg.to_string(),
                found: format!("{}", self.current.token),
            })
        }
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    // ========================================================================
    // Precedence levels
    // ========================================================================

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.parse_conditional()
    }

    /// `value if condition else alternative`, right-associative
    fn parse_conditional(&mut self) -> ParseResult<Expr> {
        let value = self.parse_or()?;
        if self.match_token(&Token::If) {
            let condition = self.parse_or()?;
            self.consume(&Token::Else, "else")?;
            let else_branch = self.parse_conditional()?;
            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                then_branch: Box::new(value),
                else_branch: Box::new(else_branch),
            });
        }
        Ok(value)
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        while self.match_token(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not()?;
        while self.match_token(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.match_token(&Token::Not) {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    /// A single comparison or membership test; chaining (`a < b < c`) is not
    /// part of the grammar.
    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let left = self.parse_additive()?;
        let op = match &self.current.token {
            Token::EqEq => BinOp::Eq,
            Token::NotEq => BinOp::NotEq,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            Token::In => BinOp::In,
            Token::Not => {
                self.advance();
                self.consume(&Token::In, "in")?;
                let right = self.parse_additive()?;
                return Ok(Expr::Binary {
                    op: BinOp::NotIn,
                    left: Box::new(left),
                    right: Box::new(right),
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match &self.current.token {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match &self.current.token {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.match_token(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    /// Postfix member access, index access, and calls
    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.match_token(&Token::Dot) {
                let field = match &self.current.token {
                    Token::Ident(name) => name.clone(),
                    other => {
                        return Err(ParseError::UnexpectedToken {
                            position: self.current.start,
                            expected: "field name".to_string(),
                            found: format!("{}", other),
                        });
                    }
                };
                self.advance();
                expr = Expr::Member {
                    object: Box::new(expr),
                    field,
                };
            } else if self.match_token(&Token::LBracket) {
                let index = self.parse_expression()?;
                self.consume(&Token::RBracket, "]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.check(&Token::LParen) {
                expr = self.parse_call(expr)?;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Calls are restricted to function names: `name(...)` or
    /// `namespace.name(...)`. Anything else as a call target is rejected
    /// here rather than at evaluation time.
    fn parse_call(&mut self, target: Expr) -> ParseResult<Expr> {
        let function = match target {
            Expr::Ident(name) => name,
            Expr::Member { object, field } => match *object {
                Expr::Ident(namespace) => format!("{}.{}", namespace, field),
                _ => {
                    return Err(ParseError::InvalidCallTarget {
                        position: self.current.start,
                    });
                }
            },
            _ => {
                return Err(ParseError::InvalidCallTarget {
                    position: self.current.start,
                });
            }
        };
        self.consume(&Token::LParen, "(")?;
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.match_token(&Token::Comma) {
                    break;
                }
            }
        }
        self.consume(&Token::RParen, ")")?;
        Ok(Expr::Call { function, args })
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let expr = match self.current.token.clone() {
            Token::Null => Expr::Null,
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Integer(n) => Expr::Int(n),
            Token::Float(x) => Expr::Float(x),
            Token::String(s) => Expr::Str(s),
            Token::Ident(name) => Expr::Ident(name),
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.consume(&Token::RParen, ")")?;
                return Ok(inner);
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expression()?);
                        if !self.match_token(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.consume(&Token::RBracket, "]")?;
                return Ok(Expr::List(items));
            }
            Token::Eof => return Err(ParseError::UnexpectedEof),
            Token::Error(fragment) => {
                return Err(ParseError::InvalidToken {
                    position: self.current.start,
                    fragment,
                });
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    position: self.current.start,
                    expected: "an expression".to_string(),
                    found: format!("{}", other),
                });
            }
        };
        self.advance();
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Expr {
        parse(source).unwrap_or_else(|e| panic!("failed to parse `{}`: {}", source, e))
    }

    fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn ident(name: &str) -> Expr {
        Expr::Ident(name.to_string())
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        assert_eq!(
            parse_ok("1 + 2 * 3"),
            binary(
                BinOp::Add,
                Expr::Int(1),
                binary(BinOp::Mul, Expr::Int(2), Expr::Int(3)),
            )
        );
    }

    #[test]
    fn test_parentheses_override_precedence() {
        assert_eq!(
            parse_ok("(1 + 2) * 3"),
            binary(
                BinOp::Mul,
                binary(BinOp::Add, Expr::Int(1), Expr::Int(2)),
                Expr::Int(3),
            )
        );
    }

    #[test]
    fn test_comparison_binds_tighter_than_boolean() {
        assert_eq!(
            parse_ok("a > 1 and b < 2"),
            binary(
                BinOp::And,
                binary(BinOp::Gt, ident("a"), Expr::Int(1)),
                binary(BinOp::Lt, ident("b"), Expr::Int(2)),
            )
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        assert_eq!(
            parse_ok("a or b and c"),
            binary(
                BinOp::Or,
                ident("a"),
                binary(BinOp::And, ident("b"), ident("c")),
            )
        );
    }

    #[test]
    fn test_not_applies_to_whole_comparison() {
        assert_eq!(
            parse_ok("not a == b"),
            Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(binary(BinOp::Eq, ident("a"), ident("b"))),
            }
        );
    }

    #[test]
    fn test_membership() {
        assert_eq!(
            parse_ok("status in ['open', 'held']"),
            binary(
                BinOp::In,
                ident("status"),
                Expr::List(vec![
                    Expr::Str("open".to_string()),
                    Expr::Str("held".to_string()),
                ]),
            )
        );
        assert_eq!(
            parse_ok("status not in closed"),
            binary(BinOp::NotIn, ident("status"), ident("closed"))
        );
    }

    #[test]
    fn test_conditional_expression() {
        assert_eq!(
            parse_ok("a if flag else b"),
            Expr::Conditional {
                condition: Box::new(ident("flag")),
                then_branch: Box::new(ident("a")),
                else_branch: Box::new(ident("b")),
            }
        );
    }

    #[test]
    fn test_conditional_is_right_associative() {
        let parsed = parse_ok("a if x else b if y else c");
        match parsed {
            Expr::Conditional { else_branch, .. } => {
                assert!(matches!(*else_branch, Expr::Conditional { .. }));
            }
            other => panic!("expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_member_and_index_access() {
        assert_eq!(
            parse_ok("user.address[0]"),
            Expr::Index {
                object: Box::new(Expr::Member {
                    object: Box::new(ident("user")),
                    field: "address".to_string(),
                }),
                index: Box::new(Expr::Int(0)),
            }
        );
    }

    #[test]
    fn test_bare_call() {
        assert_eq!(
            parse_ok("md5(email)"),
            Expr::Call {
                function: "md5".to_string(),
                args: vec![ident("email")],
            }
        );
    }

    #[test]
    fn test_namespaced_call_joins_dotted_name() {
        assert_eq!(
            parse_ok("datetime.now()"),
            Expr::Call {
                function: "datetime.now".to_string(),
                args: vec![],
            }
        );
    }

    #[test]
    fn test_call_with_multiple_args() {
        assert_eq!(
            parse_ok("min(a, b, 3)"),
            Expr::Call {
                function: "min".to_string(),
                args: vec![ident("a"), ident("b"), Expr::Int(3)],
            }
        );
    }

    #[test]
    fn test_deep_member_call_target_is_rejected() {
        let err = parse("a.b.c()").unwrap_err();
        assert!(matches!(err, ParseError::InvalidCallTarget { .. }));
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(
            parse_ok("-amount + 1"),
            binary(
                BinOp::Add,
                Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(ident("amount")),
                },
                Expr::Int(1),
            )
        );
    }

    #[test]
    fn test_empty_expression() {
        assert!(matches!(parse(""), Err(ParseError::Empty)));
        assert!(matches!(parse("   "), Err(ParseError::Empty)));
    }

    #[test]
    fn test_trailing_input_is_rejected() {
        let err = parse("a + 1 b").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));
    }

    #[test]
    fn test_unrecognized_character() {
        let err = parse("amount @ 2").unwrap_err();
        assert!(matches!(err, ParseError::InvalidToken { .. }));
    }

    #[test]
    fn test_missing_closing_paren() {
        let err = parse("md5(email").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));
    }

    #[test]
    fn test_python_literals() {
        assert_eq!(
            parse_ok("None if True else False"),
            Expr::Conditional {
                condition: Box::new(Expr::Bool(true)),
                then_branch: Box::new(Expr::Null),
                else_branch: Box::new(Expr::Bool(false)),
            }
        );
    }
}
