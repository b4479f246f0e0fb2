//! Compiled stream maps.
//!
//! A [`StreamMap`] binds one source stream to one output stream and holds
//! everything needed to process records: the compiled filter and field
//! expressions, the resolved key properties, and the schema the map was
//! compiled against. Compilation happens once, at registration; applying a
//! map to a record is read-only and thread-safe.

use crate::mapper::config::{
    FieldRule, FlatteningOptions, KEY_PROPERTIES_OPTION, KeyPropertiesOverride, ProjectionRule,
};
use crate::mapper::error::{MapperError, Result};
use crate::mapper::expr::{EvalError, Expression, Scope, truthy};
use crate::mapper::functions::FunctionRegistry;
use log::debug;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Outcome of applying a stream map to one record.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyResult {
    /// The transformed record, bound for the named output stream.
    Emit {
        stream: Arc<str>,
        record: Map<String, Value>,
    },
    /// The record failed the map's `__filter__` expression.
    Suppressed,
    /// The map removes every record of its stream.
    Removed,
}

/// A compiled transformation from one source stream to one output stream.
#[derive(Debug)]
pub struct StreamMap {
    source_stream: Arc<str>,
    stream_alias: Arc<str>,
    raw_schema: Arc<Value>,
    raw_key_properties: Option<Vec<String>>,
    transformed_key_properties: Option<Vec<String>>,
    flattening: Option<FlatteningOptions>,
    transform: Transform,
}

#[derive(Debug)]
enum Transform {
    /// Pass every record through unchanged.
    Identity,
    /// Drop every record.
    Remove,
    /// Filter and reshape records field by field.
    Custom(CustomTransform),
}

#[derive(Debug)]
struct CustomTransform {
    /// False once `__else__: null` switched the map to drop fields that
    /// have no explicit rule.
    include_by_default: bool,
    filter: Option<Expression>,
    fields: Vec<CompiledField>,
    /// The `stream_map_config` bag, bound as `config` in every scope.
    map_config: Arc<Value>,
    functions: Arc<FunctionRegistry>,
}

#[derive(Debug)]
struct CompiledField {
    name: String,
    rule: CompiledFieldRule,
}

#[derive(Debug)]
enum CompiledFieldRule {
    Drop,
    Expr(Expression),
}

impl StreamMap {
    /// The default map seeded for every stream: same name out as in, records
    /// and key properties untouched.
    pub fn identity(
        stream_name: &str,
        raw_schema: Arc<Value>,
        key_properties: Option<Vec<String>>,
        flattening: Option<FlatteningOptions>,
    ) -> Self {
        Self {
            source_stream: Arc::from(stream_name),
            stream_alias: Arc::from(stream_name),
            raw_schema,
            raw_key_properties: key_properties.clone(),
            transformed_key_properties: key_properties,
            flattening,
            transform: Transform::Identity,
        }
    }

    /// A removal map: suppresses the whole stream. Carries no key properties
    /// since it never emits.
    pub fn remove(
        stream_name: &str,
        raw_schema: Arc<Value>,
        flattening: Option<FlatteningOptions>,
    ) -> Self {
        Self {
            source_stream: Arc::from(stream_name),
            stream_alias: Arc::from(stream_name),
            raw_schema,
            raw_key_properties: None,
            transformed_key_properties: None,
            flattening,
            transform: Transform::Remove,
        }
    }

    /// Compiles a projection rule against a source stream's schema and key
    /// properties. Fails with a configuration error when an expression does
    /// not parse or when a field rule would silently drop a key property.
    #[allow(clippy::too_many_arguments)]
    pub fn custom(
        source_stream: &str,
        stream_alias: &str,
        rule: &ProjectionRule,
        map_config: Arc<Value>,
        raw_schema: Arc<Value>,
        key_properties: Option<Vec<String>>,
        flattening: Option<FlatteningOptions>,
        functions: Arc<FunctionRegistry>,
    ) -> Result<Self> {
        let transformed_key_properties = match &rule.key_properties {
            KeyPropertiesOverride::Inherit => key_properties.clone(),
            KeyPropertiesOverride::Clear => None,
            KeyPropertiesOverride::Replace(keys) => Some(keys.clone()),
        };

        let filter = match &rule.filter {
            Some(text) => Some(compile_expression(stream_alias, "__filter__", text)?),
            None => None,
        };

        let mut fields = Vec::with_capacity(rule.fields.len());
        for (name, field_rule) in &rule.fields {
            let compiled = match field_rule {
                FieldRule::Drop => {
                    let is_key = transformed_key_properties
                        .as_ref()
                        .is_some_and(|keys| keys.iter().any(|key| key == name));
                    if is_key {
                        return Err(MapperError::config(format!(
                            "removing key property '{name}' is not permitted in stream map \
                             '{stream_alias}'; use '{KEY_PROPERTIES_OPTION}' to declare a new \
                             key list, or null to emit without key properties"
                        )));
                    }
                    CompiledFieldRule::Drop
                }
                FieldRule::Expr(text) => {
                    CompiledFieldRule::Expr(compile_expression(stream_alias, name, text)?)
                }
            };
            fields.push(CompiledField {
                name: name.clone(),
                rule: compiled,
            });
        }

        Ok(Self {
            source_stream: Arc::from(source_stream),
            stream_alias: Arc::from(stream_alias),
            raw_schema,
            raw_key_properties: key_properties,
            transformed_key_properties,
            flattening,
            transform: Transform::Custom(CustomTransform {
                include_by_default: !rule.exclude_unmapped,
                filter,
                fields,
                map_config,
                functions,
            }),
        })
    }

    /// The stream this map reads records from.
    pub fn source_stream(&self) -> &str {
        &self.source_stream
    }

    /// The stream name this map emits records under.
    pub fn stream_alias(&self) -> &str {
        &self.stream_alias
    }

    /// The source schema this map was compiled against.
    pub fn raw_schema(&self) -> &Value {
        &self.raw_schema
    }

    /// Key properties of the source stream at compilation time.
    pub fn raw_key_properties(&self) -> Option<&[String]> {
        self.raw_key_properties.as_deref()
    }

    /// Key properties of the emitted stream, after any
    /// `__key_properties__` override.
    pub fn key_properties(&self) -> Option<&[String]> {
        self.transformed_key_properties.as_deref()
    }

    /// Flattening settings carried for the host.
    pub fn flattening_options(&self) -> Option<&FlatteningOptions> {
        self.flattening.as_ref()
    }

    /// Applies the map to one record.
    ///
    /// Every expression reads the original input record; output fields
    /// produced earlier in the same map are never visible to later ones.
    pub fn apply(&self, record: &Map<String, Value>) -> Result<ApplyResult> {
        match &self.transform {
            Transform::Remove => Ok(ApplyResult::Removed),
            Transform::Identity => Ok(ApplyResult::Emit {
                stream: Arc::clone(&self.stream_alias),
                record: record.clone(),
            }),
            Transform::Custom(custom) => self.apply_custom(custom, record),
        }
    }

    fn apply_custom(
        &self,
        custom: &CustomTransform,
        record: &Map<String, Value>,
    ) -> Result<ApplyResult> {
        let whole = Value::Object(record.clone());
        let base: [(&str, &Value); 3] = [
            ("_", &whole),
            ("record", &whole),
            ("config", custom.map_config.as_ref()),
        ];

        if let Some(filter) = &custom.filter {
            let scope = Scope::with_named(record, &base, &custom.functions);
            let verdict = filter
                .evaluate(&scope)
                .map_err(|err| self.evaluation_error(filter, err))?;
            if !truthy(&verdict) {
                debug!(
                    "Filter '{}' dropped a record bound for stream '{}'",
                    filter.source(),
                    self.stream_alias
                );
                return Ok(ApplyResult::Suppressed);
            }
        }

        let mut output = if custom.include_by_default {
            record.clone()
        } else {
            Map::new()
        };
        for field in &custom.fields {
            match &field.rule {
                CompiledFieldRule::Drop => {
                    // shift_remove keeps the order of the remaining fields;
                    // plain remove is a swap under `preserve_order`.
                    output.shift_remove(&field.name);
                }
                CompiledFieldRule::Expr(expr) => {
                    let mut named: Vec<(&str, &Value)> = base.to_vec();
                    // `self` exists only when the output field name is
                    // present in the input record.
                    if let Some(current) = record.get(&field.name) {
                        named.push(("self", current));
                    }
                    let scope = Scope::with_named(record, &named, &custom.functions);
                    let value = expr
                        .evaluate(&scope)
                        .map_err(|err| self.evaluation_error(expr, err))?;
                    output.insert(field.name.clone(), value);
                }
            }
        }

        Ok(ApplyResult::Emit {
            stream: Arc::clone(&self.stream_alias),
            record: output,
        })
    }

    fn evaluation_error(&self, expr: &Expression, err: EvalError) -> MapperError {
        MapperError::expression(self.source_stream.as_ref(), expr.source(), err)
    }
}

pub(crate) fn compile_expression(stream_alias: &str, target: &str, text: &str) -> Result<Expression> {
    Expression::compile(text).map_err(|err| {
        MapperError::config(format!(
            "invalid expression `{text}` for '{target}' in stream map '{stream_alias}': {err}"
        ))
    })
}
