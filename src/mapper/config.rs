//! Declarative stream map configuration.
//!
//! Parses the plugin-level settings object into a typed model. All shape and
//! reserved-key type validation happens here, once, so the registry and the
//! compiled stream maps downstream never re-interpret raw JSON. What a rule
//! MEANS for a given stream (replace, append, remove, defer) is resolved
//! later, at schema registration time.

use crate::mapper::error::{MapperError, Result};
use crate::mapper::expr::type_name;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved key overriding which stream a rule binds to.
pub const SOURCE_OPTION: &str = "__source__";
/// Reserved key overriding the output stream name.
pub const ALIAS_OPTION: &str = "__alias__";
/// Reserved key holding a boolean expression that gates record emission.
pub const FILTER_OPTION: &str = "__filter__";
/// Reserved key controlling the fallback for fields without an explicit rule.
pub const ELSE_OPTION: &str = "__else__";
/// Reserved key overriding the output stream's key properties.
pub const KEY_PROPERTIES_OPTION: &str = "__key_properties__";
/// String sentinel equivalent to `null`: marks a stream or field for removal.
pub const NULL_STRING: &str = "__NULL__";

/// Plugin-level mapper settings, parsed from the host's configuration JSON.
#[derive(Debug, Clone, Default)]
pub struct MapperConfig {
    /// `(name, rule)` pairs from `stream_maps`, in declaration order. The
    /// order decides output ordering when several rules bind one stream.
    pub stream_maps: Vec<(String, MapRule)>,
    /// The `stream_map_config` bag, exposed to expressions as `config`.
    /// Opaque here: any JSON object is accepted.
    pub stream_map_config: Map<String, Value>,
    /// Flattening settings carried through to the host. `None` when
    /// flattening is disabled. This engine never flattens records itself.
    pub flattening: Option<FlatteningOptions>,
}

impl MapperConfig {
    /// Parses a configuration from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json_str).map_err(MapperError::from_serde)?;
        Self::from_value(&value)
    }

    /// Parses a configuration from an already-deserialized settings object.
    ///
    /// Unrecognized top-level settings are ignored: the same object usually
    /// carries host-side options this engine has no business rejecting.
    pub fn from_value(input: &Value) -> Result<Self> {
        let settings = input
            .as_object()
            .ok_or_else(|| MapperError::config("plugin settings must be a JSON object"))?;

        let mut stream_maps = Vec::new();
        match settings.get("stream_maps") {
            None | Some(Value::Null) => {}
            Some(Value::Object(entries)) => {
                for (name, raw_rule) in entries {
                    stream_maps.push((name.clone(), MapRule::parse(name, raw_rule)?));
                }
            }
            Some(other) => {
                return Err(MapperError::config(format!(
                    "'stream_maps' must be an object, got {}",
                    type_name(other)
                )));
            }
        }

        let stream_map_config = match settings.get("stream_map_config") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(MapperError::config(format!(
                    "'stream_map_config' must be an object, got {}",
                    type_name(other)
                )));
            }
        };

        Ok(Self {
            stream_maps,
            stream_map_config,
            flattening: parse_flattening(settings)?,
        })
    }

    /// The parsed rule registered under `name`, if any.
    pub fn rule(&self, name: &str) -> Option<&MapRule> {
        self.stream_maps
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, rule)| rule)
    }
}

/// One entry of `stream_maps`, classified once at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum MapRule {
    /// `null` or `"__NULL__"`: removes the named stream's records when the
    /// entry is keyed to that stream, a no-op otherwise.
    Remove,
    /// A mapping of field rules plus reserved-key options.
    Projection(ProjectionRule),
    /// Anything else. Kept verbatim; surfaced as a configuration error by
    /// the first registration that walks the rules.
    Invalid(Value),
}

impl MapRule {
    fn parse(name: &str, raw: &Value) -> Result<MapRule> {
        match raw {
            Value::Null => Ok(MapRule::Remove),
            Value::String(s) if s == NULL_STRING => Ok(MapRule::Remove),
            Value::Object(body) => ProjectionRule::parse(name, body).map(MapRule::Projection),
            other => Ok(MapRule::Invalid(other.clone())),
        }
    }
}

/// A field-level projection: reserved-key options plus per-field rules in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectionRule {
    /// `__source__` override. Defaults to the configuration key itself.
    pub source: Option<String>,
    /// `__alias__` override. Defaults to the configuration key itself.
    pub alias: Option<String>,
    /// `__filter__` expression text, compiled at registration time.
    pub filter: Option<String>,
    /// True when `__else__: null` switched the projection to drop every
    /// field that has no explicit rule. The default keeps them.
    pub exclude_unmapped: bool,
    /// `__key_properties__` override for the output stream.
    pub key_properties: KeyPropertiesOverride,
    /// Remaining `(field, rule)` pairs in declaration order.
    pub fields: Vec<(String, FieldRule)>,
}

impl ProjectionRule {
    fn parse(name: &str, body: &Map<String, Value>) -> Result<ProjectionRule> {
        let mut rule = ProjectionRule::default();
        for (key, value) in body {
            match key.as_str() {
                SOURCE_OPTION => rule.source = Some(expect_string_option(name, key, value)?),
                ALIAS_OPTION => rule.alias = Some(expect_string_option(name, key, value)?),
                FILTER_OPTION => rule.filter = Some(expect_string_option(name, key, value)?),
                ELSE_OPTION => match value {
                    Value::Null => rule.exclude_unmapped = true,
                    Value::String(s) if s == NULL_STRING => rule.exclude_unmapped = true,
                    other => {
                        return Err(MapperError::config(format!(
                            "operation '{ELSE_OPTION}={other}' in stream map '{name}' is not \
                             supported, only '{ELSE_OPTION}=null' is"
                        )));
                    }
                },
                KEY_PROPERTIES_OPTION => {
                    rule.key_properties = parse_key_properties(name, value)?;
                }
                _ => rule
                    .fields
                    .push((key.clone(), FieldRule::parse(name, key, value)?)),
            }
        }
        Ok(rule)
    }
}

/// What `__key_properties__` does to the output stream's key fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum KeyPropertiesOverride {
    /// Key absent: inherit the source stream's key properties.
    #[default]
    Inherit,
    /// `__key_properties__: null`: emit with no key properties at all.
    Clear,
    /// Replace the key properties with the given field names.
    Replace(Vec<String>),
}

/// The rule attached to one output field inside a projection.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    /// `null` or `"__NULL__"`: remove the field from the output record.
    Drop,
    /// An expression producing the field's value.
    Expr(String),
}

impl FieldRule {
    fn parse(stream: &str, field: &str, value: &Value) -> Result<FieldRule> {
        match value {
            Value::Null => Ok(FieldRule::Drop),
            Value::String(s) if s == NULL_STRING => Ok(FieldRule::Drop),
            Value::String(expr) => Ok(FieldRule::Expr(expr.clone())),
            other => Err(MapperError::config(format!(
                "unexpected value type '{}' for field '{}' in stream map '{}': expected an \
                 expression string, null, or \"{}\"",
                type_name(other),
                field,
                stream,
                NULL_STRING
            ))),
        }
    }
}

/// Flattening settings for nested record structures. Parsed and carried for
/// the host; this engine treats them as opaque metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatteningOptions {
    pub enabled: bool,
    pub max_depth: u32,
    pub separator: String,
}

fn parse_flattening(settings: &Map<String, Value>) -> Result<Option<FlatteningOptions>> {
    let enabled = match settings.get("flattening_enabled") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            return Err(MapperError::config(format!(
                "'flattening_enabled' must be a boolean, got {}",
                type_name(other)
            )));
        }
    };
    if !enabled {
        return Ok(None);
    }
    let max_depth = settings
        .get("flattening_max_depth")
        .ok_or_else(|| {
            MapperError::config("'flattening_max_depth' is required when flattening is enabled")
        })?
        .as_u64()
        .ok_or_else(|| {
            MapperError::config("'flattening_max_depth' must be a non-negative integer")
        })?;
    Ok(Some(FlatteningOptions {
        enabled: true,
        max_depth: max_depth as u32,
        separator: "__".to_string(),
    }))
}

fn expect_string_option(stream: &str, key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(MapperError::config(format!(
            "'{}' in stream map '{}' must be a string, got {}",
            key,
            stream,
            type_name(other)
        ))),
    }
}

fn parse_key_properties(stream: &str, value: &Value) -> Result<KeyPropertiesOverride> {
    match value {
        Value::Null => Ok(KeyPropertiesOverride::Clear),
        Value::Array(items) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => keys.push(s.clone()),
                    other => {
                        return Err(MapperError::config(format!(
                            "'{}' in stream map '{}' must be an array of field names, found {}",
                            KEY_PROPERTIES_OPTION,
                            stream,
                            type_name(other)
                        )));
                    }
                }
            }
            Ok(KeyPropertiesOverride::Replace(keys))
        }
        other => Err(MapperError::config(format!(
            "'{}' in stream map '{}' must be an array of field names or null, got {}",
            KEY_PROPERTIES_OPTION,
            stream,
            type_name(other)
        ))),
    }
}
