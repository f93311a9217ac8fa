// queryground-core/src/extjson/registry.rs
// Pluggable decode rules for the extended-JSON dialect
//
// Two kinds of rules are registered here, both resolved once at startup:
//
// - named-call rewrites: `ObjectId("...")` and friends are rewritten by
//   a textual pre-pass into their keyed-object form, so the generic
//   parser only ever sees one syntax per type
// - keyed decoders: objects containing a reserved `$`-key are converted
//   into the matching `ExtValue` variant after generic parsing

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate};
use lazy_static::lazy_static;

use crate::error::{Result, SandboxError};
use crate::extjson::value::{datetime_from_millis, ExtValue, ObjectId};

/// Rewrites the raw arguments of a named call into normalized keyed-object
/// JSON text. Arguments arrive trimmed, split on top-level commas.
pub type CallRewrite = fn(&[&str]) -> Result<String>;

/// Converts a parsed object holding a reserved key into a typed value
pub type KeyedDecoder = fn(&[(String, ExtValue)]) -> Result<ExtValue>;

lazy_static! {
    /// identifier -> rewrite rule for `name(...)` tokens
    pub static ref NAMED_CALLS: HashMap<&'static str, CallRewrite> = {
        let mut m: HashMap<&'static str, CallRewrite> = HashMap::new();
        m.insert("ObjectId", rewrite_object_id);
        m.insert("ISODate", rewrite_date);
        m.insert("new Date", rewrite_date);
        m.insert("Timestamp", rewrite_timestamp);
        m.insert("BinData", rewrite_bin_data);
        m.insert("NumberInt", rewrite_number_int);
        m.insert("NumberLong", rewrite_number_long);
        m
    };

    /// bare identifier -> constant keyed-object form
    pub static ref NAMED_CONSTS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("undefined", r#"{"$undefined":true}"#);
        m.insert("MinKey", r#"{"$minKey":1}"#);
        m.insert("MaxKey", r#"{"$maxKey":1}"#);
        m
    };

    /// reserved key -> typed decoder
    pub static ref KEYED_DECODERS: HashMap<&'static str, KeyedDecoder> = {
        let mut m: HashMap<&'static str, KeyedDecoder> = HashMap::new();
        m.insert("$oid", jdec_object_id);
        m.insert("$date", jdec_date);
        m.insert("$timestamp", jdec_timestamp);
        m.insert("$binary", jdec_binary);
        m.insert("$regex", jdec_regex);
        m.insert("$numberLong", jdec_number_long);
        m.insert("$numberInt", jdec_number_int);
        m.insert("$undefined", jdec_undefined);
        m.insert("$minKey", jdec_min_key);
        m.insert("$maxKey", jdec_max_key);
        m
    };
}

// ============================================================================
// NAMED-CALL REWRITES
// ============================================================================

fn expect_arity(name: &str, args: &[&str], n: usize) -> Result<()> {
    if args.len() != n {
        return Err(SandboxError::Decode(format!(
            "{}() expects {} argument(s), got {}",
            name,
            n,
            args.len()
        )));
    }
    Ok(())
}

fn rewrite_object_id(args: &[&str]) -> Result<String> {
    expect_arity("ObjectId", args, 1)?;
    Ok(format!(r#"{{"$oid":{}}}"#, args[0]))
}

fn rewrite_date(args: &[&str]) -> Result<String> {
    expect_arity("Date", args, 1)?;
    Ok(format!(r#"{{"$date":{}}}"#, args[0]))
}

fn rewrite_timestamp(args: &[&str]) -> Result<String> {
    expect_arity("Timestamp", args, 2)?;
    Ok(format!(
        r#"{{"$timestamp":{{"t":{},"i":{}}}}}"#,
        args[0], args[1]
    ))
}

fn rewrite_bin_data(args: &[&str]) -> Result<String> {
    expect_arity("BinData", args, 2)?;
    // subtype is a bare number in shell syntax, the keyed form wants a string
    Ok(format!(r#"{{"$binary":{},"$type":"{}"}}"#, args[1], args[0]))
}

fn rewrite_number_int(args: &[&str]) -> Result<String> {
    expect_arity("NumberInt", args, 1)?;
    Ok(format!(r#"{{"$numberInt":{}}}"#, args[0]))
}

fn rewrite_number_long(args: &[&str]) -> Result<String> {
    expect_arity("NumberLong", args, 1)?;
    Ok(format!(r#"{{"$numberLong":{}}}"#, args[0]))
}

// ============================================================================
// KEYED DECODERS
// ============================================================================

fn jdec_object_id(entries: &[(String, ExtValue)]) -> Result<ExtValue> {
    match lookup(entries, "$oid") {
        Some(ExtValue::String(s)) => Ok(ExtValue::ObjectId(ObjectId::parse_str(s)?)),
        Some(other) => Err(SandboxError::Decode(format!(
            "invalid $oid value of type {}",
            other.type_name()
        ))),
        None => unreachable!("decoder dispatched on $oid"),
    }
}

const DATE_ONLY_FORMAT: &str = "%Y-%m-%d";

fn jdec_date(entries: &[(String, ExtValue)]) -> Result<ExtValue> {
    match lookup(entries, "$date") {
        Some(ExtValue::String(s)) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(ExtValue::DateTime(dt));
            }
            if let Ok(d) = NaiveDate::parse_from_str(s, DATE_ONLY_FORMAT) {
                let millis = d
                    .and_hms_opt(0, 0, 0)
                    .map(|ndt| ndt.and_utc().timestamp_millis())
                    .unwrap_or(0);
                return Ok(ExtValue::DateTime(datetime_from_millis(millis)));
            }
            Err(SandboxError::Decode(format!("cannot parse date: \"{}\"", s)))
        }
        // numeric payload is epoch milliseconds
        Some(v) => match v.as_i64() {
            Some(millis) => Ok(ExtValue::DateTime(datetime_from_millis(millis))),
            None => match v.get("$numberLong").and_then(|n| n.as_i64()) {
                Some(millis) => Ok(ExtValue::DateTime(datetime_from_millis(millis))),
                None => Err(SandboxError::Decode(format!(
                    "cannot parse date from {}",
                    v.type_name()
                ))),
            },
        },
        None => unreachable!("decoder dispatched on $date"),
    }
}

fn jdec_timestamp(entries: &[(String, ExtValue)]) -> Result<ExtValue> {
    let payload = lookup(entries, "$timestamp")
        .ok_or_else(|| SandboxError::Decode("invalid $timestamp object".to_string()))?;
    let t = payload.get("t").and_then(|v| v.as_i64());
    let i = payload.get("i").and_then(|v| v.as_i64());
    match (t, i) {
        (Some(t), Some(i)) if t >= 0 && i >= 0 => Ok(ExtValue::Timestamp {
            t: t as u32,
            i: i as u32,
        }),
        _ => Err(SandboxError::Decode(
            "invalid $timestamp object: expected {t, i} with positive values".to_string(),
        )),
    }
}

fn jdec_binary(entries: &[(String, ExtValue)]) -> Result<ExtValue> {
    let data = match lookup(entries, "$binary") {
        Some(ExtValue::String(b64)) => BASE64
            .decode(b64)
            .map_err(|e| SandboxError::Decode(format!("invalid $binary payload: {}", e)))?,
        _ => {
            return Err(SandboxError::Decode(
                "invalid $binary object: payload must be a base64 string".to_string(),
            ))
        }
    };

    let subtype = match lookup(entries, "$type") {
        None => 0i64,
        Some(ExtValue::String(s)) => parse_subtype(s)?,
        Some(v) => v.as_i64().ok_or_else(|| {
            SandboxError::Decode(format!("invalid $type in binary object: {}", v.type_name()))
        })?,
    };

    if !(0..=255).contains(&subtype) {
        return Err(SandboxError::Decode(format!(
            "invalid type in binary object: {}",
            subtype
        )));
    }

    Ok(ExtValue::Binary {
        subtype: subtype as u8,
        data,
    })
}

/// Subtype strings come in both `"0x2"` and `"2"` spellings
fn parse_subtype(s: &str) -> Result<i64> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else {
        s.parse::<i64>()
    };
    parsed.map_err(|_| SandboxError::Decode(format!("invalid type in binary object: \"{}\"", s)))
}

fn jdec_regex(entries: &[(String, ExtValue)]) -> Result<ExtValue> {
    let pattern = match lookup(entries, "$regex") {
        Some(ExtValue::String(p)) => p.clone(),
        _ => {
            return Err(SandboxError::Decode(
                "invalid $regex object: pattern must be a string".to_string(),
            ))
        }
    };
    let options = match lookup(entries, "$options") {
        None => String::new(),
        Some(ExtValue::String(o)) => o.clone(),
        _ => {
            return Err(SandboxError::Decode(
                "invalid $regex object: options must be a string".to_string(),
            ))
        }
    };
    Ok(ExtValue::Regex { pattern, options })
}

fn jdec_number_long(entries: &[(String, ExtValue)]) -> Result<ExtValue> {
    match lookup(entries, "$numberLong") {
        Some(v) => Ok(ExtValue::Int64(parse_integer(v, "$numberLong")?)),
        None => unreachable!("decoder dispatched on $numberLong"),
    }
}

fn jdec_number_int(entries: &[(String, ExtValue)]) -> Result<ExtValue> {
    match lookup(entries, "$numberInt") {
        Some(v) => {
            let n = parse_integer(v, "$numberInt")?;
            i32::try_from(n)
                .map(ExtValue::Int32)
                .map_err(|_| SandboxError::Decode(format!("$numberInt out of range: {}", n)))
        }
        None => unreachable!("decoder dispatched on $numberInt"),
    }
}

/// Integer payloads may be bare numbers or quoted strings
fn parse_integer(v: &ExtValue, tag: &str) -> Result<i64> {
    match v {
        ExtValue::Int32(n) => Ok(*n as i64),
        ExtValue::Int64(n) => Ok(*n),
        ExtValue::String(s) => s
            .parse::<i64>()
            .map_err(|_| SandboxError::Decode(format!("invalid {} value: \"{}\"", tag, s))),
        other => Err(SandboxError::Decode(format!(
            "invalid {} value of type {}",
            tag,
            other.type_name()
        ))),
    }
}

fn jdec_undefined(entries: &[(String, ExtValue)]) -> Result<ExtValue> {
    match lookup(entries, "$undefined") {
        Some(ExtValue::Bool(true)) => Ok(ExtValue::Undefined),
        _ => Err(SandboxError::Decode("invalid $undefined object".to_string())),
    }
}

fn jdec_min_key(entries: &[(String, ExtValue)]) -> Result<ExtValue> {
    match lookup(entries, "$minKey").and_then(|v| v.as_i64()) {
        Some(1) => Ok(ExtValue::MinKey),
        _ => Err(SandboxError::Decode("invalid $minKey object".to_string())),
    }
}

fn jdec_max_key(entries: &[(String, ExtValue)]) -> Result<ExtValue> {
    match lookup(entries, "$maxKey").and_then(|v| v.as_i64()) {
        Some(1) => Ok(ExtValue::MaxKey),
        _ => Err(SandboxError::Decode("invalid $maxKey object".to_string())),
    }
}

fn lookup<'a>(entries: &'a [(String, ExtValue)], key: &str) -> Option<&'a ExtValue> {
    entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// Apply the keyed decoders to a freshly parsed object. Returns the
/// typed value when a reserved key matches, the untouched object
/// otherwise. Malformed payloads for a reserved key are hard errors so
/// bad input never degrades into a plain document silently.
pub fn convert_keyed_object(entries: Vec<(String, ExtValue)>) -> Result<ExtValue> {
    for (key, _) in &entries {
        if let Some(decoder) = KEYED_DECODERS.get(key.as_str()) {
            return decoder(&entries);
        }
    }
    Ok(ExtValue::Object(entries))
}
