// queryground-core/src/extjson/value.rs
// Closed tagged representation of extended-JSON values

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde_json::Value as JsonValue;

use crate::error::{Result, SandboxError};

/// A 12-byte document identifier, rendered as 24 hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub [u8; 12]);

impl ObjectId {
    /// Parse from a 24-char hex string
    pub fn parse_str(s: &str) -> Result<ObjectId> {
        if s.len() != 24 {
            return Err(SandboxError::Decode(format!(
                "invalid ObjectId: \"{}\" is not a 24 char hex string",
                s
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|_| SandboxError::Decode(format!("invalid ObjectId: \"{}\"", s)))?;
        let mut id = [0u8; 12];
        id.copy_from_slice(&bytes);
        Ok(ObjectId(id))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// An extended-JSON value.
///
/// This is a closed set: every typed literal the codec understands maps
/// to exactly one variant, and each variant has exactly one canonical
/// and one shell serializer (see `encode`).
///
/// Objects keep their key order so that decoding and re-encoding a
/// document never reorders fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtValue {
    Null,
    Undefined,
    MinKey,
    MaxKey,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    ObjectId(ObjectId),
    /// A point in time with its original UTC offset preserved
    DateTime(DateTime<FixedOffset>),
    Timestamp {
        t: u32,
        i: u32,
    },
    Binary {
        subtype: u8,
        data: Vec<u8>,
    },
    Regex {
        pattern: String,
        options: String,
    },
    Array(Vec<ExtValue>),
    Object(Vec<(String, ExtValue)>),
}

impl ExtValue {
    /// Empty document `{}`
    pub fn empty_object() -> ExtValue {
        ExtValue::Object(Vec::new())
    }

    pub fn as_object(&self) -> Option<&[(String, ExtValue)]> {
        match self {
            ExtValue::Object(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ExtValue]> {
        match self {
            ExtValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExtValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ExtValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view across Int32 / Int64 / Double
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ExtValue::Int32(n) => Some(*n as f64),
            ExtValue::Int64(n) => Some(*n as f64),
            ExtValue::Double(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ExtValue::Int32(n) => Some(*n as i64),
            ExtValue::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Field lookup on an object value
    pub fn get(&self, key: &str) -> Option<&ExtValue> {
        match self {
            ExtValue::Object(entries) => {
                entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Mutable access to a top-level field of an object value
    pub fn get_mut(&mut self, key: &str) -> Option<&mut ExtValue> {
        match self {
            ExtValue::Object(entries) => {
                entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Insert or replace a field on an object value. No-op on other types.
    pub fn set(&mut self, key: &str, value: ExtValue) {
        if let ExtValue::Object(entries) = self {
            if let Some(entry) = entries.iter_mut().find(|(k, _)| k == key) {
                entry.1 = value;
            } else {
                entries.push((key.to_string(), value));
            }
        }
    }

    /// Remove a field from an object value, returning it if present
    pub fn remove(&mut self, key: &str) -> Option<ExtValue> {
        if let ExtValue::Object(entries) = self {
            if let Some(pos) = entries.iter().position(|(k, _)| k == key) {
                return Some(entries.remove(pos).1);
            }
        }
        None
    }

    /// Human-readable type name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ExtValue::Null => "null",
            ExtValue::Undefined => "undefined",
            ExtValue::MinKey => "minKey",
            ExtValue::MaxKey => "maxKey",
            ExtValue::Bool(_) => "bool",
            ExtValue::Int32(_) => "int",
            ExtValue::Int64(_) => "long",
            ExtValue::Double(_) => "double",
            ExtValue::String(_) => "string",
            ExtValue::ObjectId(_) => "objectId",
            ExtValue::DateTime(_) => "date",
            ExtValue::Timestamp { .. } => "timestamp",
            ExtValue::Binary { .. } => "binData",
            ExtValue::Regex { .. } => "regex",
            ExtValue::Array(_) => "array",
            ExtValue::Object(_) => "object",
        }
    }

    /// Convert a plain JSON value (for example a generator's output)
    /// into an extended value. Integral numbers become Int64.
    pub fn from_json(value: &JsonValue) -> ExtValue {
        match value {
            JsonValue::Null => ExtValue::Null,
            JsonValue::Bool(b) => ExtValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ExtValue::Int64(i)
                } else {
                    ExtValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => ExtValue::String(s.clone()),
            JsonValue::Array(items) => {
                ExtValue::Array(items.iter().map(ExtValue::from_json).collect())
            }
            JsonValue::Object(map) => ExtValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), ExtValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Build a fixed-offset datetime from epoch milliseconds, always UTC
pub(crate) fn datetime_from_millis(millis: i64) -> DateTime<FixedOffset> {
    // out-of-range millis fall back to the epoch
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
        .fixed_offset()
}
