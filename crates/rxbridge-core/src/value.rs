//! Typed value codec.
//!
//! Handlers work with [`Native`] values; the wire carries [`Value`], a closed
//! tagged union with exactly one populated variant. Encoding is total: every
//! `Native` maps onto some variant, with composites going through JSON.
//! Decoding never fails: a `json` payload that does not parse comes back as
//! the raw text.
//!
//! ```text
//! {"s":"great"}  {"b":true}  {"i64":3}  {"f64":0.5}  {"bin":"00ff"}  {"json":"null"}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// JSON literal used for absent values.
const NULL_JSON: &str = "null";

/// Wire representation of a single value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    S(String),
    B(bool),
    I64(i64),
    F64(#[serde(with = "f64_wire")] f64),
    Bin(#[serde(with = "hex_bytes")] Vec<u8>),
    Json(String),
}

impl Value {
    /// Name of the populated variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::S(_) => "s",
            Value::B(_) => "b",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::Bin(_) => "bin",
            Value::Json(_) => "json",
        }
    }
}

/// Named wire values, as carried by invoke inputs/outputs and control payloads.
pub type ValueMap = BTreeMap<String, Value>;

/// A dynamically-typed value as seen by handler code.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Native {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Arrays, objects and integers that do not fit in an `i64`.
    Json(serde_json::Value),
}

/// Named native values: handler input and output, log fields, event data.
pub type Fields = BTreeMap<String, Native>;

impl Native {
    pub fn is_null(&self) -> bool {
        matches!(self, Native::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Native::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Native::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Native::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Native::Float(f) => Some(*f),
            Native::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Native::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Look up a key when this value is a JSON object.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        match self {
            Native::Json(v) => v.get(key),
            _ => None,
        }
    }

    /// Convert into plain JSON. Bytes become an array of numbers and
    /// non-finite floats become `null`.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Native::Null => serde_json::Value::Null,
            Native::Bool(b) => serde_json::Value::Bool(b),
            Native::Int(i) => serde_json::Value::from(i),
            Native::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Native::Text(s) => serde_json::Value::String(s),
            Native::Bytes(b) => serde_json::Value::from(b),
            Native::Json(v) => v,
        }
    }
}

impl fmt::Display for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Native::Null => write!(f, "null"),
            Native::Bool(b) => write!(f, "{}", b),
            Native::Int(i) => write!(f, "{}", i),
            Native::Float(x) => write!(f, "{}", x),
            Native::Text(s) => write!(f, "{}", s),
            Native::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Native::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<serde_json::Value> for Native {
    /// Scalars land in their primitive variant; booleans are matched before
    /// numbers so they never become integers.
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Native::Null,
            serde_json::Value::Bool(b) => Native::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Native::Int(i)
                } else if n.is_f64() {
                    n.as_f64().map(Native::Float).unwrap_or(Native::Null)
                } else {
                    // u64 beyond i64::MAX: keep the exact digits in JSON
                    Native::Json(serde_json::Value::Number(n))
                }
            }
            serde_json::Value::String(s) => Native::Text(s),
            composite => Native::Json(composite),
        }
    }
}

impl From<bool> for Native {
    fn from(value: bool) -> Self {
        Native::Bool(value)
    }
}

impl From<i64> for Native {
    fn from(value: i64) -> Self {
        Native::Int(value)
    }
}

impl From<i32> for Native {
    fn from(value: i32) -> Self {
        Native::Int(value.into())
    }
}

impl From<u32> for Native {
    fn from(value: u32) -> Self {
        Native::Int(value.into())
    }
}

impl From<usize> for Native {
    fn from(value: usize) -> Self {
        match i64::try_from(value) {
            Ok(i) => Native::Int(i),
            Err(_) => Native::Json(serde_json::Value::from(value)),
        }
    }
}

impl From<f64> for Native {
    fn from(value: f64) -> Self {
        Native::Float(value)
    }
}

impl From<&str> for Native {
    fn from(value: &str) -> Self {
        Native::Text(value.to_string())
    }
}

impl From<String> for Native {
    fn from(value: String) -> Self {
        Native::Text(value)
    }
}

impl From<Vec<u8>> for Native {
    fn from(value: Vec<u8>) -> Self {
        Native::Bytes(value)
    }
}

impl From<&[u8]> for Native {
    fn from(value: &[u8]) -> Self {
        Native::Bytes(value.to_vec())
    }
}

impl<T: Into<Native>> From<Option<T>> for Native {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Native::Null)
    }
}

/// Encode a native value onto the wire.
pub fn encode(value: &Native) -> Value {
    match value {
        Native::Null => Value::Json(NULL_JSON.to_string()),
        Native::Bytes(b) => Value::Bin(b.clone()),
        Native::Text(s) => Value::S(s.clone()),
        Native::Bool(b) => Value::B(*b),
        Native::Int(i) => Value::I64(*i),
        Native::Float(f) => Value::F64(*f),
        Native::Json(v @ (serde_json::Value::Array(_) | serde_json::Value::Object(_))) => {
            Value::Json(v.to_string())
        }
        // Scalars built directly as JSON still take their primitive variant.
        Native::Json(v) => match Native::from(v.clone()) {
            Native::Json(n) => Value::Json(n.to_string()),
            scalar => encode(&scalar),
        },
    }
}

/// Decode a wire value. Unparseable JSON degrades to the raw string.
pub fn decode(value: &Value) -> Native {
    match value {
        Value::S(s) => Native::Text(s.clone()),
        Value::B(b) => Native::Bool(*b),
        Value::I64(i) => Native::Int(*i),
        Value::F64(f) => Native::Float(*f),
        Value::Bin(b) => Native::Bytes(b.clone()),
        Value::Json(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(parsed) => Native::from(parsed),
            Err(_) => Native::Text(raw.clone()),
        },
    }
}

/// Encode any serializable Rust value.
///
/// Values serde cannot express as JSON (for example maps with non-string
/// keys) are encoded as the JSON string of their debug form.
pub fn encode_serializable<T>(value: &T) -> Value
where
    T: Serialize + fmt::Debug + ?Sized,
{
    match serde_json::to_value(value) {
        Ok(json) => encode(&Native::from(json)),
        Err(_) => Value::Json(serde_json::Value::String(format!("{:?}", value)).to_string()),
    }
}

pub fn encode_fields(fields: &Fields) -> ValueMap {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), encode(v)))
        .collect()
}

pub fn decode_fields(values: &ValueMap) -> Fields {
    values
        .iter()
        .map(|(k, v)| (k.clone(), decode(v)))
        .collect()
}

/// Binary payloads travel as lowercase hex strings inside JSON frames.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(serde::de::Error::custom)
    }
}

/// JSON has no literal for non-finite floats, so they travel as the strings
/// `"NaN"`, `"Infinity"` and `"-Infinity"`. Finite values stay numbers.
mod f64_wire {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    const NAN: &str = "NaN";
    const INFINITY: &str = "Infinity";
    const NEG_INFINITY: &str = "-Infinity";

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str(NAN)
        } else if value.is_infinite() {
            serializer.serialize_str(if *value > 0.0 { INFINITY } else { NEG_INFINITY })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(F64Visitor)
    }

    struct F64Visitor;

    impl<'de> Visitor<'de> for F64Visitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of \"NaN\", \"Infinity\", \"-Infinity\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            match v {
                NAN => Ok(f64::NAN),
                INFINITY => Ok(f64::INFINITY),
                NEG_INFINITY => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}
