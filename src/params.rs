//! Parameter metadata and coercion.
//!
//! `params_info` declares a semantic type per parameter. Coercion turns the
//! loosely typed request values into the `SqlValue` each placeholder binds.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{ExecutionError, Result};
use crate::template::RawParams;
use crate::value::{JsonValue, SqlValue};

/// Bound parameters keyed by placeholder name.
pub type TypedParams = BTreeMap<String, SqlValue>;

/// Declared semantic type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamType {
    #[default]
    String,
    Date,
    Integer,
    Float,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Date => "date",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
        }
    }

    /// Unknown tags are treated as plain strings.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "date" => ParamType::Date,
            "integer" => ParamType::Integer,
            "float" => ParamType::Float,
            _ => ParamType::String,
        }
    }
}

impl Serialize for ParamType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ParamType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Option::<JsonValue>::deserialize(deserializer)?;
        Ok(match value {
            Some(JsonValue::String(tag)) => ParamType::from_tag(&tag),
            _ => ParamType::String,
        })
    }
}

/// Metadata for one parameter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
}

impl ParameterSpec {
    pub fn new(param_type: ParamType) -> Self {
        Self {
            param_type,
            ..Default::default()
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

/// Parameter name → metadata.
///
/// Deserializing skips entries that are not objects or do not parse.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct ParameterSpecs(HashMap<String, ParameterSpec>);

impl ParameterSpecs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.0.insert(name.into(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the JSON text column a query version stores.
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

impl<'de> Deserialize<'de> for ParameterSpecs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Option::<JsonValue>::deserialize(deserializer)?;
        let object = match value {
            Some(JsonValue::Object(object)) => object,
            None | Some(JsonValue::Null) => return Ok(Self::default()),
            Some(_) => return Err(D::Error::custom("parameter metadata must be an object")),
        };

        let specs = object
            .into_iter()
            .filter(|(_, entry)| entry.is_object())
            .filter_map(|(name, entry)| {
                serde_json::from_value::<ParameterSpec>(entry)
                    .ok()
                    .map(|spec| (name, spec))
            })
            .collect();
        Ok(Self(specs))
    }
}

/// Convert filtered request params into bound values.
///
/// Stops at the first parameter that does not fit its declared type.
pub fn coerce(params: &RawParams, specs: Option<&ParameterSpecs>) -> Result<TypedParams> {
    let mut typed = TypedParams::new();
    for (name, value) in params {
        let param_type = specs
            .and_then(|specs| specs.get(name))
            .map(|spec| spec.param_type)
            .unwrap_or_default();
        typed.insert(name.clone(), coerce_value(name, value, param_type)?);
    }
    Ok(typed)
}

/// Coerce one value to a declared type.
pub fn coerce_value(name: &str, value: &JsonValue, param_type: ParamType) -> Result<SqlValue> {
    match param_type {
        ParamType::String => Ok(SqlValue::from_json(value.clone())),
        ParamType::Date => coerce_date(name, value),
        ParamType::Integer => coerce_integer(value)
            .map(SqlValue::Int)
            .ok_or_else(|| invalid(name, "integer")),
        ParamType::Float => coerce_float(value)
            .map(SqlValue::Float)
            .ok_or_else(|| invalid(name, "float")),
    }
}

fn invalid(name: &str, expected: &'static str) -> ExecutionError {
    ExecutionError::InvalidParameterFormat {
        name: name.to_string(),
        expected,
    }
}

/// Accepted date layout, as reported back to callers.
const DATE_FORMAT: &str = "YYYY-MM-DD";

fn coerce_date(name: &str, value: &JsonValue) -> Result<SqlValue> {
    match value {
        JsonValue::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(SqlValue::Date)
            .map_err(|_| invalid(name, DATE_FORMAT)),
        // Only strings are converted
        other => Ok(SqlValue::from_json(other.clone())),
    }
}

fn coerce_integer(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::String(s) => s.trim().parse::<i64>().ok(),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            if n.is_u64() {
                return None;
            }
            let f = n.as_f64()?;
            let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
            (f.fract() == 0.0 && in_range).then_some(f as i64)
        }
        _ => None,
    }
}

fn coerce_float(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        JsonValue::Number(n) => n.as_f64(),
        _ => None,
    }
}
