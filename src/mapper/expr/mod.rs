//! The expression sandbox: a restricted, deterministic evaluator for
//! user-authored mapping expressions.
//!
//! Expressions compile once into an AST ([`Expression::compile`]) and are
//! evaluated many times against per-record bindings
//! ([`Expression::evaluate`]). The grammar covers literals, arithmetic,
//! comparison, membership, boolean logic, conditionals, member/index access,
//! and calls to allow-listed function names. There is no assignment, no loop
//! construct, and no way to reach host state that was not explicitly
//! injected through the [`Scope`].

pub mod ast;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::{BinOp, Expr, UnaryOp};
pub use error::{EvalError, EvalResult, ParseError, ParseResult};
pub use eval::{Scope, evaluate, truthy, type_name};

use serde_json::Value;

/// A mapping expression compiled to its AST form.
///
/// Compilation happens at configuration-resolution time; evaluation is
/// stateless, so one compiled expression can be shared across threads and
/// evaluated concurrently.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parses `source` into a compiled expression.
    pub fn compile(source: &str) -> ParseResult<Self> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// The original expression text, kept for error messages.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the compiled expression against `scope`.
    pub fn evaluate(&self, scope: &Scope) -> EvalResult<Value> {
        eval::evaluate(&self.ast, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::functions::FunctionRegistry;
    use serde_json::json;

    #[test]
    fn test_compile_once_evaluate_many() {
        let expr = Expression::compile("amount * 2").unwrap();
        let functions = FunctionRegistry::defaults();
        for amount in [1i64, 5, 250] {
            let record = json!({"amount": amount}).as_object().cloned().unwrap();
            let scope = Scope::new(&record, &functions);
            assert_eq!(expr.evaluate(&scope).unwrap(), json!(amount * 2));
        }
    }

    #[test]
    fn test_source_text_is_retained() {
        let expr = Expression::compile("upper(first) + ' ' + upper(last)").unwrap();
        assert_eq!(expr.source(), "upper(first) + ' ' + upper(last)");
    }

    #[test]
    fn test_compile_rejects_invalid_syntax() {
        assert!(Expression::compile("amount >").is_err());
        assert!(Expression::compile("").is_err());
    }
}
