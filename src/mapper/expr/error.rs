//! Expression error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing an expression string.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParseError {
    #[error("Unexpected token at position {position}: expected {expected}, found {found}")]
    UnexpectedToken {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("Unexpected end of expression")]
    UnexpectedEof,

    #[error("Unrecognized input at position {position}: {fragment}")]
    InvalidToken { position: usize, fragment: String },

    #[error("Empty expression")]
    Empty,

    #[error("Call target at position {position} must be a function name or a namespaced function name")]
    InvalidCallTarget { position: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised while evaluating a compiled expression against a record.
///
/// Messages are lowercase; the stream map layer embeds them as the reason
/// inside an error that names the stream and the expression text.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvalError {
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("no field '{0}' in value")]
    UnknownField(String),

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("type error: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("arithmetic produced a non-finite number")]
    NonFiniteNumber,

    #[error("repetition produces an oversized result")]
    OversizedResult,

    #[error("{function}() expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },
}

impl EvalError {
    /// Shorthand for a type error with a formatted message.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        EvalError::TypeMismatch(message.into())
    }
}

pub type EvalResult<T> = Result<T, EvalError>;
