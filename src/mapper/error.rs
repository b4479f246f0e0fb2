use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the stream map engine
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum MapperError {
    /// Malformed stream map configuration; always fatal to registration
    #[error("Stream map configuration error: {0}")]
    Config(String),

    /// Expression evaluation failure for a single record
    #[error("Failed to evaluate expression `{expression}` for stream '{stream}': {reason}")]
    Expression {
        stream: String,
        expression: String,
        reason: String,
    },

    /// JSON serialization/deserialization errors
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl MapperError {
    /// Creates a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        MapperError::Config(message.into())
    }

    /// Creates an expression error carrying the stream name and expression text
    pub fn expression<S, E, R>(stream: S, expression: E, reason: R) -> Self
    where
        S: Into<String>,
        E: Into<String>,
        R: ToString,
    {
        MapperError::Expression {
            stream: stream.into(),
            expression: expression.into(),
            reason: reason.to_string(),
        }
    }

    /// Convert from serde_json::Error
    pub fn from_serde(err: serde_json::Error) -> Self {
        MapperError::Deserialization(err.to_string())
    }
}

/// Type alias for Result with MapperError
pub type Result<T> = std::result::Result<T, MapperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = MapperError::config("stream map value for 'orders' must be an object");
        assert_eq!(
            err.to_string(),
            "Stream map configuration error: stream map value for 'orders' must be an object"
        );
    }

    #[test]
    fn test_expression_error_names_stream_and_expression() {
        let err = MapperError::expression("orders", "amount > 100", "unknown identifier 'amount'");
        let rendered = err.to_string();
        assert!(rendered.contains("orders"), "missing stream name: {rendered}");
        assert!(
            rendered.contains("amount > 100"),
            "missing expression text: {rendered}"
        );
        assert!(
            rendered.contains("unknown identifier"),
            "missing reason: {rendered}"
        );
    }

    #[test]
    fn test_from_serde() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = MapperError::from_serde(parse_err);
        assert!(matches!(err, MapperError::Deserialization(_)));
    }

    #[test]
    fn test_error_serialization_round_trip() {
        let err = MapperError::expression("users", "md5(email)", "unknown function 'md5'");
        let encoded = serde_json::to_string(&err).unwrap();
        let decoded: MapperError = serde_json::from_str(&encoded).unwrap();
        assert_eq!(err.to_string(), decoded.to_string());
    }
}
