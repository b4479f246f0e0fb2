/*!
# streammap-rs

A stream map registry and expression engine for inline record transforms in
streaming ETL pipelines.

## Overview

Streammap-rs sits between an extractor and a loader and reshapes records in
flight. A declarative configuration object describes, per stream, how records
are renamed, duplicated into aliased streams, filtered, and transformed field
by field with small sandboxed expressions. The registry compiles that
configuration once per stream schema and then applies it to records at
throughput, with no per-record parsing.

## Key Components

* **StreamMapRegistry**: Owns the compiled maps per stream; hosts register
  stream schemas and transform records through it
* **StreamMap**: One compiled transformation from a source stream to an
  output stream (identity, removal, or custom projection)
* **MapperConfig**: The parsed `stream_maps` configuration, including the
  `stream_map_config` bindings bag and pass-through flattening options
* **Expression**: A mapping expression compiled to an AST, evaluated against
  per-record bindings
* **FunctionRegistry**: The closed table of functions expressions may call

## Built-in Functions

Expressions can call a fixed baseline of value helpers (`abs`, `len`, `min`,
`max`, `round`, `int`, `float`, `str`, `bool`, `lower`, `upper`, `title`,
`trim`) plus `md5`, `os`, and the `datetime` namespace (`datetime.now`,
`datetime.utcnow`, `datetime.today`, `datetime.timestamp`,
`datetime.date_add`). There is no general host-language access: unknown
names fail evaluation before any argument is evaluated.

## Usage Example

```rust,no_run
use streammap_rs::{MapperConfig, StreamMapRegistry};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration in the plugin settings shape
    let config = MapperConfig::from_value(&json!({
        "stream_maps": {
            "customers": {
                "email": null,
                "email_hash": "md5(email)",
                "__filter__": "active"
            }
        }
    }))?;

    let mut registry = StreamMapRegistry::new(config)?;

    // Announce the stream once; maps compile here
    registry.register_raw_stream_schema(
        "customers",
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "email": {"type": "string"},
                "active": {"type": "boolean"}
            }
        }),
        Some(vec!["id".to_string()]),
    )?;

    // Then transform each record as it arrives
    let record = json!({"id": 1, "email": "jane@example.com", "active": true});
    for mapped in registry.transform("customers", record.as_object().unwrap())? {
        println!(
            "{} -> {}",
            mapped.stream,
            serde_json::Value::Object(mapped.record)
        );
    }

    Ok(())
}
```

## Error Handling

Configuration faults (malformed rules, bad expression syntax, dropping a key
property) surface as `MapperError::Config` and are fatal to construction or
registration. Per-record evaluation failures surface as
`MapperError::Expression`, naming the stream and the expression text:

```rust,no_run
use streammap_rs::{MapperConfig, MapperError, Result, StreamMapRegistry};
use serde_json::json;

fn main() -> Result<()> {
    let config = MapperConfig::from_value(&json!({
        "stream_maps": {"orders": {"total": "amount * config.rate"}}
    }))?;
    let mut registry = StreamMapRegistry::new(config)?;
    registry.register_raw_stream_schema("orders", json!({"type": "object"}), None)?;

    let record = json!({"amount": "not a number"});
    match registry.transform("orders", record.as_object().unwrap()) {
        Ok(mapped) => println!("{} record(s) emitted", mapped.len()),
        Err(MapperError::Expression {
            stream,
            expression,
            reason,
        }) => {
            eprintln!("expression `{expression}` failed for '{stream}': {reason}");
        }
        Err(other) => return Err(other),
    }

    Ok(())
}
```

## Testing with a Fixed Clock

The `datetime` builtins read an injectable clock, so tests can pin time:

```rust,no_run
use streammap_rs::{Clock, MapperConfig, StreamMapRegistry};
use chrono::{TimeZone, Utc};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = MapperConfig::from_value(&json!({
        "stream_maps": {"events": {"seen_at": "datetime.now()"}}
    }))?;
    let clock = Clock::Fixed(Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap());
    let mut registry = StreamMapRegistry::with_clock(config, clock)?;
    registry.register_raw_stream_schema("events", json!({"type": "object"}), None)?;
    Ok(())
}
```
*/

pub mod mapper;

// Re-export all public APIs for easier access
pub use mapper::config::{
    FieldRule, FlatteningOptions, KeyPropertiesOverride, MapRule, MapperConfig, ProjectionRule,
};
pub use mapper::error::{MapperError, Result};
pub use mapper::expr::{EvalError, Expression, ParseError, Scope};
pub use mapper::functions::{BuiltinFn, Clock, FunctionRegistry};
pub use mapper::registry::{MappedRecord, StreamDefinition, StreamMapRegistry};
pub use mapper::stream_map::{ApplyResult, StreamMap};
