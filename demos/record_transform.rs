//! # Record Transform Example
//!
//! This example demonstrates stream map transforms using streammap-rs.
//!
//! It shows four configured behaviors:
//! 1. Streams without a map pass records through unchanged
//! 2. PII scrubbing: hash an email, drop the raw value, filter inactive rows
//! 3. An aliased projection that emits the same stream twice
//! 4. A removal sentinel that drops a stream entirely
//!
//! Run with: `cargo run --example record_transform`

use serde_json::{Map, Value, json};
use streammap_rs::{MapperConfig, StreamMapRegistry};

/// Helper to turn a JSON object literal into the record shape the
/// registry consumes.
fn record(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Record Transform Example");
    println!("========================\n");

    let config = MapperConfig::from_json(
        r#"
    {
        "stream_maps": {
            "customers": {
                "email_hash": "md5(config.hash_seed + email)",
                "email": null,
                "__filter__": "active"
            },
            "orders_archive": {
                "__source__": "orders",
                "__alias__": "orders_archive",
                "archived": "true"
            },
            "internal_audit": "__NULL__"
        },
        "stream_map_config": {
            "hash_seed": "demo-"
        }
    }
    "#,
    )?;

    let mut registry = StreamMapRegistry::new(config)?;

    registry.register_raw_stream_schema(
        "products",
        json!({"type": "object", "properties": {"sku": {"type": "string"}}}),
        Some(vec!["sku".to_string()]),
    )?;
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
    registry.register_raw_stream_schema(
        "orders",
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "amount": {"type": "number"}
            }
        }),
        Some(vec!["id".to_string()]),
    )?;
    registry.register_raw_stream_schema(
        "internal_audit",
        json!({"type": "object"}),
        None,
    )?;

    // --- Scenario 1: unconfigured stream passes through ---
    println!("Scenario 1: 'products' has no map, records pass through");
    println!("--------------------------------------------------------");

    let input = record(json!({"sku": "SKU-1", "name": "Widget", "price": 9.5}));
    for mapped in registry.transform("products", &input)? {
        println!("  [{}] {}", mapped.stream, Value::Object(mapped.record));
    }

    // --- Scenario 2: PII scrubbing with a filter ---
    println!("\nScenario 2: 'customers' hashes email and keeps active rows");
    println!("--------------------------------------------------------");

    let active = record(json!({"id": 1, "email": "alice@example.com", "active": true}));
    for mapped in registry.transform("customers", &active)? {
        println!("  [{}] {}", mapped.stream, Value::Object(mapped.record));
    }

    let inactive = record(json!({"id": 2, "email": "bob@example.com", "active": false}));
    let suppressed = registry.transform("customers", &inactive)?;
    println!("  inactive row emitted {} record(s)", suppressed.len());

    // --- Scenario 3: aliased projection fans out ---
    println!("\nScenario 3: 'orders' emits itself plus 'orders_archive'");
    println!("--------------------------------------------------------");

    let order = record(json!({"id": 77, "amount": 129.0}));
    for mapped in registry.transform("orders", &order)? {
        println!("  [{}] {}", mapped.stream, Value::Object(mapped.record));
    }

    // --- Scenario 4: removal sentinel drops the stream ---
    println!("\nScenario 4: 'internal_audit' is removed by \"__NULL__\"");
    println!("--------------------------------------------------------");

    let audit = record(json!({"event": "login", "user": "alice"}));
    let dropped = registry.transform("internal_audit", &audit)?;
    println!("  audit row emitted {} record(s)", dropped.len());

    println!("\nRecord transform example completed!");

    Ok(())
}
