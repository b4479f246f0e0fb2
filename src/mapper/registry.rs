//! Stream map registry.
//!
//! The registry owns the parsed configuration and, per registered stream,
//! the ordered list of compiled maps. Hosts drive it with two calls:
//! [`register_raw_stream_schema`](StreamMapRegistry::register_raw_stream_schema)
//! whenever a stream's schema is announced, and
//! [`transform`](StreamMapRegistry::transform) for each record. Mutation
//! takes `&mut self` and lookups take `&self`; a host that shares the
//! registry across threads wraps it in `RwLock` and clones `Arc<StreamMap>`
//! handles out of it.

use crate::mapper::config::{FILTER_OPTION, FieldRule, MapRule, MapperConfig, NULL_STRING};
use crate::mapper::error::{MapperError, Result};
use crate::mapper::functions::{Clock, FunctionRegistry};
use crate::mapper::stream_map::{ApplyResult, StreamMap, compile_expression};
use log::{debug, info};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// The schema and key properties a stream registered with.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDefinition {
    pub name: String,
    pub schema: Arc<Value>,
    pub key_properties: Option<Vec<String>>,
}

/// One output record from [`StreamMapRegistry::transform`], tagged with its
/// output stream and that stream's key properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedRecord {
    pub stream: Arc<str>,
    pub record: Map<String, Value>,
    pub key_properties: Option<Vec<String>>,
}

/// Owns every compiled stream map, keyed by source stream name.
///
/// Each stream's list holds its primary map at index 0 (identity unless the
/// configuration replaces or removes it) followed by alias projections in
/// configuration declaration order.
#[derive(Debug)]
pub struct StreamMapRegistry {
    config: MapperConfig,
    map_config: Arc<Value>,
    functions: Arc<FunctionRegistry>,
    definitions: HashMap<String, StreamDefinition>,
    stream_maps: HashMap<String, Vec<Arc<StreamMap>>>,
}

impl StreamMapRegistry {
    /// Creates a registry over the given configuration, reading time from
    /// the system clock.
    ///
    /// Every configured expression is parsed here, so malformed syntax fails
    /// at startup instead of on the first matching stream registration.
    pub fn new(config: MapperConfig) -> Result<Self> {
        Self::with_clock(config, Clock::System)
    }

    /// Same as [`new`](Self::new) with an injected clock for the `datetime`
    /// builtins.
    pub fn with_clock(config: MapperConfig, clock: Clock) -> Result<Self> {
        validate_expressions(&config)?;
        let map_config = Arc::new(Value::Object(config.stream_map_config.clone()));
        Ok(Self {
            config,
            map_config,
            functions: Arc::new(FunctionRegistry::standard(clock)),
            definitions: HashMap::new(),
            stream_maps: HashMap::new(),
        })
    }

    /// The function table stream maps evaluate against.
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Registers (or re-registers) a raw stream and compiles its maps.
    ///
    /// Re-registering an unchanged `(schema, key_properties)` pair returns
    /// early with the compiled maps untouched. A changed pair discards the
    /// stream's maps and recompiles against the new shape; that is logged at
    /// info level and is not an error. On a configuration error nothing is
    /// installed and any previous state for the stream stays in effect.
    pub fn register_raw_stream_schema(
        &mut self,
        stream_name: &str,
        schema: Value,
        key_properties: Option<Vec<String>>,
    ) -> Result<()> {
        if let Some(existing) = self.definitions.get(stream_name) {
            if *existing.schema == schema && existing.key_properties == key_properties {
                debug!(
                    "Stream '{}' re-registered with an unchanged schema; keeping compiled maps",
                    stream_name
                );
                return Ok(());
            }
            info!(
                "Schema or key properties changed for stream '{}'; discarding its compiled maps",
                stream_name
            );
        }

        let schema = Arc::new(schema);
        let mut maps = vec![Arc::new(StreamMap::identity(
            stream_name,
            Arc::clone(&schema),
            key_properties.clone(),
            self.config.flattening.clone(),
        ))];

        for (map_key, rule) in &self.config.stream_maps {
            match rule {
                MapRule::Remove => {
                    if map_key != stream_name {
                        continue;
                    }
                    info!(
                        "Removal transform set as primary map for stream '{}'",
                        stream_name
                    );
                    maps[0] = Arc::new(StreamMap::remove(
                        stream_name,
                        Arc::clone(&schema),
                        self.config.flattening.clone(),
                    ));
                }
                MapRule::Invalid(value) => {
                    return Err(MapperError::config(format!(
                        "unexpected value for stream map '{map_key}': expected an object, null, \
                         or \"{NULL_STRING}\", got {value}"
                    )));
                }
                MapRule::Projection(projection) => {
                    let source = projection.source.as_deref().unwrap_or(map_key);
                    if source != stream_name {
                        // Deferred: compiles when its source stream registers.
                        continue;
                    }
                    let alias = projection.alias.as_deref().unwrap_or(map_key);
                    let map = Arc::new(StreamMap::custom(
                        stream_name,
                        alias,
                        projection,
                        Arc::clone(&self.map_config),
                        Arc::clone(&schema),
                        key_properties.clone(),
                        self.config.flattening.clone(),
                        Arc::clone(&self.functions),
                    )?);
                    if source == map_key {
                        // The entry keyed by the stream's own name is the
                        // primary map.
                        maps[0] = map;
                    } else {
                        maps.push(map);
                    }
                }
            }
        }

        debug!(
            "Compiled {} stream map(s) for stream '{}'",
            maps.len(),
            stream_name
        );
        self.definitions.insert(
            stream_name.to_string(),
            StreamDefinition {
                name: stream_name.to_string(),
                schema,
                key_properties,
            },
        );
        self.stream_maps.insert(stream_name.to_string(), maps);
        Ok(())
    }

    /// Compiled maps for `stream_name`, primary map first. Empty when the
    /// stream was never registered: unknown streams have no maps, not a
    /// pass-through default.
    pub fn stream_maps(&self, stream_name: &str) -> &[Arc<StreamMap>] {
        self.stream_maps
            .get(stream_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The schema and key properties `stream_name` registered with.
    pub fn stream_definition(&self, stream_name: &str) -> Option<&StreamDefinition> {
        self.definitions.get(stream_name)
    }

    /// Names of every registered stream, in no particular order.
    pub fn registered_streams(&self) -> impl Iterator<Item = &str> + '_ {
        self.definitions.keys().map(String::as_str)
    }

    /// Applies every map registered for `stream_name` to `record`,
    /// collecting the emitted records in map order. Filtered and removed
    /// records are simply absent from the result; an expression failure
    /// aborts the call with the stream and expression named in the error.
    pub fn transform(
        &self,
        stream_name: &str,
        record: &Map<String, Value>,
    ) -> Result<Vec<MappedRecord>> {
        let mut mapped = Vec::new();
        for map in self.stream_maps(stream_name) {
            match map.apply(record)? {
                ApplyResult::Emit { stream, record } => mapped.push(MappedRecord {
                    stream,
                    record,
                    key_properties: map.key_properties().map(<[String]>::to_vec),
                }),
                ApplyResult::Suppressed | ApplyResult::Removed => {}
            }
        }
        Ok(mapped)
    }
}

/// Startup syntax pass: parse every configured expression once so bad
/// syntax fails construction rather than some later registration. The
/// compile inside `StreamMap::custom` still guards the same errors.
fn validate_expressions(config: &MapperConfig) -> Result<()> {
    for (map_key, rule) in &config.stream_maps {
        let MapRule::Projection(projection) = rule else {
            continue;
        };
        let alias = projection.alias.as_deref().unwrap_or(map_key);
        if let Some(text) = &projection.filter {
            compile_expression(alias, FILTER_OPTION, text)?;
        }
        for (field, field_rule) in &projection.fields {
            if let FieldRule::Expr(text) = field_rule {
                compile_expression(alias, field, text)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry(settings: Value) -> StreamMapRegistry {
        let config = MapperConfig::from_value(&settings).expect("settings fixture must parse");
        StreamMapRegistry::new(config).expect("registry fixture must build")
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "amount": {"type": "integer"}
            }
        })
    }

    fn record(value: Value) -> Map<String, Value> {
        value
            .as_object()
            .cloned()
            .expect("record fixture must be an object")
    }

    #[test]
    fn test_unknown_stream_has_no_maps() {
        let reg = registry(json!({}));
        assert!(reg.stream_maps("never_seen").is_empty());
        assert!(reg.stream_definition("never_seen").is_none());
        let out = reg.transform("never_seen", &record(json!({"id": 1}))).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_registration_seeds_identity_at_index_zero() {
        let mut reg = registry(json!({}));
        reg.register_raw_stream_schema("orders", schema(), Some(vec!["id".to_string()]))
            .unwrap();
        let maps = reg.stream_maps("orders");
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].stream_alias(), "orders");
        assert_eq!(maps[0].key_properties(), Some(&["id".to_string()][..]));
        let definition = reg.stream_definition("orders").unwrap();
        assert_eq!(definition.name, "orders");
        assert_eq!(definition.key_properties, Some(vec!["id".to_string()]));
    }

    #[test]
    fn test_same_key_projection_replaces_primary() {
        let mut reg = registry(json!({
            "stream_maps": {"orders": {"__alias__": "orders_renamed"}}
        }));
        reg.register_raw_stream_schema("orders", schema(), None)
            .unwrap();
        let maps = reg.stream_maps("orders");
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].stream_alias(), "orders_renamed");
        assert_eq!(maps[0].source_stream(), "orders");
    }

    #[test]
    fn test_sourced_projections_append_in_declaration_order() {
        let mut reg = registry(json!({
            "stream_maps": {
                "copy_two": {"__source__": "orders"},
                "copy_one": {"__source__": "orders"}
            }
        }));
        reg.register_raw_stream_schema("orders", schema(), None)
            .unwrap();
        let aliases: Vec<&str> = reg
            .stream_maps("orders")
            .iter()
            .map(|map| map.stream_alias())
            .collect();
        assert_eq!(aliases, vec!["orders", "copy_two", "copy_one"]);
    }

    #[test]
    fn test_reregistration_with_same_shape_is_idempotent() {
        let mut reg = registry(json!({}));
        reg.register_raw_stream_schema("orders", schema(), None)
            .unwrap();
        let before = Arc::clone(&reg.stream_maps("orders")[0]);
        reg.register_raw_stream_schema("orders", schema(), None)
            .unwrap();
        assert!(Arc::ptr_eq(&before, &reg.stream_maps("orders")[0]));
    }

    #[test]
    fn test_schema_drift_recompiles() {
        let mut reg = registry(json!({}));
        reg.register_raw_stream_schema("orders", schema(), None)
            .unwrap();
        let stale = Arc::clone(&reg.stream_maps("orders")[0]);

        let widened = json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}, "note": {"type": "string"}}
        });
        reg.register_raw_stream_schema("orders", widened.clone(), None)
            .unwrap();

        let fresh = &reg.stream_maps("orders")[0];
        assert!(!Arc::ptr_eq(&stale, fresh));
        assert_eq!(fresh.raw_schema(), &widened);
        // The stale handle still works against its original shape.
        assert_eq!(stale.raw_schema(), &schema());
        assert!(stale.apply(&record(json!({"id": 1}))).is_ok());
    }

    #[test]
    fn test_key_property_change_alone_recompiles() {
        let mut reg = registry(json!({}));
        reg.register_raw_stream_schema("orders", schema(), None)
            .unwrap();
        let before = Arc::clone(&reg.stream_maps("orders")[0]);
        reg.register_raw_stream_schema("orders", schema(), Some(vec!["id".to_string()]))
            .unwrap();
        assert!(!Arc::ptr_eq(&before, &reg.stream_maps("orders")[0]));
        assert_eq!(
            reg.stream_maps("orders")[0].key_properties(),
            Some(&["id".to_string()][..])
        );
    }

    #[test]
    fn test_remove_sentinel_replaces_primary() {
        let mut reg = registry(json!({"stream_maps": {"orders": "__NULL__"}}));
        reg.register_raw_stream_schema("orders", schema(), Some(vec!["id".to_string()]))
            .unwrap();
        let maps = reg.stream_maps("orders");
        assert_eq!(maps.len(), 1);
        assert_eq!(
            maps[0].apply(&record(json!({"id": 1}))).unwrap(),
            ApplyResult::Removed
        );
        assert!(reg.transform("orders", &record(json!({"id": 1}))).unwrap().is_empty());
    }

    #[test]
    fn test_remove_sentinel_for_other_stream_is_noop() {
        let mut reg = registry(json!({"stream_maps": {"orders": null}}));
        reg.register_raw_stream_schema("users", schema(), None)
            .unwrap();
        let out = reg.transform("users", &record(json!({"id": 5}))).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].stream.as_ref(), "users");
    }

    #[test]
    fn test_invalid_rule_fails_every_registration() {
        let mut reg = registry(json!({"stream_maps": {"orders": 42}}));
        let err = reg
            .register_raw_stream_schema("orders", schema(), None)
            .unwrap_err();
        assert!(err.to_string().contains("'orders'"), "error: {err}");
        assert!(err.to_string().contains("42"), "error: {err}");

        // The bad entry poisons other registrations too: it would otherwise
        // sit in the configuration unreported forever.
        let err = reg
            .register_raw_stream_schema("users", schema(), None)
            .unwrap_err();
        assert!(matches!(err, MapperError::Config(_)));
        assert!(reg.stream_maps("users").is_empty());
    }

    #[test]
    fn test_failed_registration_retains_previous_state() {
        // Compiles fine without key properties.
        let mut reg = registry(json!({"stream_maps": {"orders": {"id": null}}}));
        reg.register_raw_stream_schema("orders", schema(), None)
            .unwrap();
        let before = Arc::clone(&reg.stream_maps("orders")[0]);

        // Re-registering with "id" as a key property trips the key-drop
        // guard; the earlier compiled state must survive.
        let err = reg
            .register_raw_stream_schema("orders", schema(), Some(vec!["id".to_string()]))
            .unwrap_err();
        assert!(matches!(err, MapperError::Config(_)));
        assert!(Arc::ptr_eq(&before, &reg.stream_maps("orders")[0]));
        assert_eq!(
            reg.stream_definition("orders").unwrap().key_properties,
            None
        );
    }

    #[test]
    fn test_deferred_projection_compiles_when_source_registers() {
        let mut reg = registry(json!({
            "stream_maps": {
                "archive": {"__source__": "orders", "cents": "amount * 100"}
            }
        }));
        reg.register_raw_stream_schema("users", schema(), None)
            .unwrap();
        assert_eq!(reg.stream_maps("users").len(), 1);

        reg.register_raw_stream_schema("orders", schema(), None)
            .unwrap();
        let maps = reg.stream_maps("orders");
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[1].stream_alias(), "archive");
    }

    #[test]
    fn test_construction_rejects_bad_expression_syntax() {
        let config = MapperConfig::from_value(&json!({
            "stream_maps": {"orders": {"broken": "amount >"}}
        }))
        .unwrap();
        let err = StreamMapRegistry::new(config).unwrap_err();
        match err {
            MapperError::Config(message) => {
                assert!(message.contains("amount >"), "message: {message}");
            }
            other => panic!("expected a configuration error, got {other}"),
        }
    }

    #[test]
    fn test_transform_fans_out_in_map_order() {
        let mut reg = registry(json!({
            "stream_maps": {
                "orders_archive": {"__source__": "orders", "archived": "true"}
            }
        }));
        reg.register_raw_stream_schema("orders", schema(), Some(vec!["id".to_string()]))
            .unwrap();
        let out = reg
            .transform("orders", &record(json!({"id": 1, "amount": 10})))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].stream.as_ref(), "orders");
        assert_eq!(out[0].key_properties, Some(vec!["id".to_string()]));
        assert_eq!(out[1].stream.as_ref(), "orders_archive");
        assert_eq!(out[1].record.get("archived"), Some(&json!(true)));
    }

    #[test]
    fn test_registered_streams_lists_names() {
        let mut reg = registry(json!({}));
        reg.register_raw_stream_schema("a", schema(), None).unwrap();
        reg.register_raw_stream_schema("b", schema(), None).unwrap();
        let mut names: Vec<&str> = reg.registered_streams().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a", "b"]);
    }
}
