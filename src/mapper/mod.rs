pub mod config;
pub mod error;
pub mod expr;
pub mod functions;
pub mod registry;
pub mod stream_map;

// Re-export key types for easier access
pub use config::{
    FieldRule, FlatteningOptions, KeyPropertiesOverride, MapRule, MapperConfig, ProjectionRule,
};
pub use error::{MapperError, Result};
pub use expr::{EvalError, Expression, ParseError, Scope};
pub use functions::{BuiltinFn, Clock, FunctionRegistry};
pub use registry::{MappedRecord, StreamDefinition, StreamMapRegistry};
pub use stream_map::{ApplyResult, StreamMap};
