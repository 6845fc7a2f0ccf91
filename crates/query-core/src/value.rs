//! Structured document values
//!
//! Documents, sort keys and DISTINCT keys are all represented by [`Value`], a closed
//! union over the kinds a partition can return. Numbers keep their integer or float
//! subtype but compare and hash by numeric value.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Kind tag of a [`Value`], in cross-kind sort order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Binary,
    Guid,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Binary => "binary",
            ValueKind::Guid => "guid",
        };
        write!(f, "{}", name)
    }
}

/// A numeric value with its original subtype
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    /// Canonical form: integral floats that fit in an `i64` become `Int`, and
    /// negative zero becomes `Int(0)`.
    pub fn canonical(self) -> Number {
        match self {
            Number::Int(_) => self,
            Number::Float(f) => {
                // 2^63 is exactly representable; i64::MAX is not
                if f.fract() == 0.0
                    && f >= -9_223_372_036_854_775_808.0
                    && f < 9_223_372_036_854_775_808.0
                {
                    Number::Int(f as i64)
                } else {
                    Number::Float(f)
                }
            }
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        match self.canonical() {
            Number::Int(i) => Some(i),
            Number::Float(_) => None,
        }
    }

    /// Total numeric order. `NaN` sorts above every other number.
    pub fn total_cmp(&self, other: &Number) -> Ordering {
        match (self.canonical(), other.canonical()) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            (Number::Float(a), Number::Float(b)) => a.total_cmp(&b),
            (Number::Int(a), Number::Float(b)) => cmp_int_float(a, b),
            (Number::Float(a), Number::Int(b)) => cmp_int_float(b, a).reverse(),
        }
    }
}

/// `f` is canonical, so it is fractional, non-finite or beyond the `i64` range and can
/// never equal `i`. A tie in `f64` only happens when `i` rounds up to 2^63.
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    match (i as f64).total_cmp(&f) {
        Ordering::Equal => Ordering::Less,
        ordering => ordering,
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Number {
    fn from(v: i64) -> Self {
        Number::Int(v)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::Float(v)
    }
}

/// A structured document value
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    /// Properties in insertion order
    Object(Vec<(String, Value)>),
    Binary(Vec<u8>),
    Guid(Uuid),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
            Value::Binary(_) => ValueKind::Binary,
            Value::Guid(_) => ValueKind::Guid,
        }
    }

    /// Build an object from `(name, value)` pairs
    pub fn object<K: Into<String>>(properties: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(properties.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(Number::as_i64)
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up an object property by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(properties) => properties
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Total order used for ORDER BY: values of different kinds order by
    /// [`ValueKind`], values of the same kind by content.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Object(a), Value::Object(b)) => {
                let a = sorted_properties(a);
                let b = sorted_properties(b);
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (Value::Guid(a), Value::Guid(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => self.kind().cmp(&other.kind()),
        }
    }
}

fn sorted_properties(properties: &[(String, Value)]) -> Vec<(&str, &Value)> {
    let mut sorted: Vec<(&str, &Value)> = properties
        .iter()
        .map(|(key, value)| (key.as_str(), value))
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(Number::Int(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(Number::Float(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Number(Number::Int(i))
                } else {
                    // u64 beyond i64::MAX and every non-integral number
                    Value::Number(Number::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(Number::Int(i)) => serde_json::Value::from(*i),
            Value::Number(Number::Float(f)) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Object(properties) => serde_json::Value::Object(
                properties
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
            Value::Binary(bytes) => serde_json::Value::String(URL_SAFE_NO_PAD.encode(bytes)),
            Value::Guid(guid) => serde_json::Value::String(guid.to_string()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(Number::Int(i)) => serializer.serialize_i64(*i),
            Value::Number(Number::Float(f)) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Number(Number::Float(_)) => serializer.serialize_unit(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(properties) => {
                let mut map = serializer.serialize_map(Some(properties.len()))?;
                for (key, value) in properties {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Binary(bytes) => serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes)),
            Value::Guid(guid) => serializer.serialize_str(&guid.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => write!(f, "{}", text),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_canonical_forms() {
        assert_eq!(Number::Float(-0.0).canonical().as_i64(), Some(0));
        assert_eq!(Number::Float(3.0).canonical().as_i64(), Some(3));
        assert!(Number::Float(3.5).canonical().as_i64().is_none());
        assert_eq!(Number::Int(2), Number::Float(2.0));
        assert_ne!(Number::Int(2), Number::Float(2.5));
    }

    #[test]
    fn test_cross_kind_order() {
        let mut values = vec![
            Value::from("a"),
            Value::from(1i64),
            Value::Null,
            Value::Array(vec![]),
            Value::Bool(false),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        let kinds: Vec<ValueKind> = values.iter().map(Value::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ValueKind::Null,
                ValueKind::Bool,
                ValueKind::Number,
                ValueKind::String,
                ValueKind::Array
            ]
        );
    }

    #[test]
    fn test_mixed_number_order() {
        assert_eq!(Value::from(1i64).total_cmp(&Value::from(1.5)), Ordering::Less);
        assert_eq!(Value::from(2.0).total_cmp(&Value::from(2i64)), Ordering::Equal);
        assert_eq!(Value::from(-0.0).total_cmp(&Value::from(0.0)), Ordering::Equal);
    }

    #[test]
    fn test_object_equality_ignores_property_order() {
        let a = Value::from(json!({"a": 1, "b": [true, null]}));
        let b = Value::object([
            ("b", Value::Array(vec![Value::Bool(true), Value::Null])),
            ("a", Value::from(1i64)),
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_json_conversion() {
        let value = Value::from(json!({"id": "x", "n": 2.5, "tags": ["a"]}));
        assert_eq!(value.get("id").and_then(Value::as_str), Some("x"));
        assert_eq!(value.get("n").and_then(Value::as_number), Some(Number::Float(2.5)));

        let back = serde_json::to_value(&value).unwrap();
        assert_eq!(back, json!({"id": "x", "n": 2.5, "tags": ["a"]}));
    }

    #[test]
    fn test_binary_and_guid_serialize_as_strings() {
        let guid = Uuid::nil();
        assert_eq!(
            serde_json::to_string(&Value::Guid(guid)).unwrap(),
            "\"00000000-0000-0000-0000-000000000000\""
        );
        assert_eq!(serde_json::to_string(&Value::Binary(vec![0xff])).unwrap(), "\"_w\"");
    }
}
