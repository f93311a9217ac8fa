// queryground-core/src/extjson/encode.rs
// Type-directed encoding, one serializer per type and profile

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, FixedOffset, Offset};

use crate::extjson::value::ExtValue;

/// Encoder profile.
///
/// `Canonical` is the fully keyed, machine round-trippable form used
/// for storage; `Shell` is the human form shown to callers, using
/// named-call syntax for typed literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Canonical,
    Shell,
}

/// Encode a value as compact (whitespace-free) extended JSON
pub fn encode(value: &ExtValue, profile: Profile) -> String {
    let mut out = String::new();
    write_value(&mut out, value, profile);
    out
}

fn write_value(out: &mut String, value: &ExtValue, profile: Profile) {
    match value {
        ExtValue::Null => out.push_str("null"),
        ExtValue::Bool(true) => out.push_str("true"),
        ExtValue::Bool(false) => out.push_str("false"),
        ExtValue::Double(n) => write_double(out, *n),
        ExtValue::String(s) => write_string(out, s),
        ExtValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item, profile);
            }
            out.push(']');
        }
        ExtValue::Object(entries) => {
            out.push('{');
            for (i, (key, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, v, profile);
            }
            out.push('}');
        }
        typed => match profile {
            Profile::Canonical => write_canonical(out, typed),
            Profile::Shell => write_shell(out, typed),
        },
    }
}

// ============================================================================
// CANONICAL PROFILE
// ============================================================================

/// Largest integer a generic JSON double can hold exactly. Bigger
/// values are rendered as quoted strings so nothing is lost downstream.
const MAX_SAFE_INTEGER: i64 = 1 << 53;

/// `$numberInt` payloads follow the same quoting rule with a narrower
/// threshold, kept for byte-compatibility with saved pages.
const MAX_UNQUOTED_INT32: i32 = 1 << 21;

fn write_canonical(out: &mut String, value: &ExtValue) {
    match value {
        ExtValue::Int32(n) => {
            if *n <= MAX_UNQUOTED_INT32 {
                out.push_str(&format!("{{\"$numberInt\":{}}}", n));
            } else {
                out.push_str(&format!("{{\"$numberInt\":\"{}\"}}", n));
            }
        }
        ExtValue::Int64(n) => {
            if *n <= MAX_SAFE_INTEGER {
                out.push_str(&format!("{{\"$numberLong\":{}}}", n));
            } else {
                out.push_str(&format!("{{\"$numberLong\":\"{}\"}}", n));
            }
        }
        ExtValue::ObjectId(oid) => {
            out.push_str(&format!("{{\"$oid\":\"{}\"}}", oid.to_hex()));
        }
        ExtValue::DateTime(dt) => {
            out.push_str(&format!("{{\"$date\":\"{}\"}}", format_datetime(dt)));
        }
        ExtValue::Timestamp { t, i } => {
            out.push_str(&format!("{{\"$timestamp\":{{\"t\":{},\"i\":{}}}}}", t, i));
        }
        ExtValue::Binary { subtype, data } => {
            out.push_str(&format!(
                "{{\"$binary\":\"{}\",\"$type\":\"0x{:x}\"}}",
                BASE64.encode(data),
                subtype
            ));
        }
        ExtValue::Regex { pattern, options } => {
            out.push_str("{\"$regex\":");
            write_string(out, pattern);
            out.push_str(",\"$options\":");
            write_string(out, options);
            out.push('}');
        }
        ExtValue::Undefined => out.push_str("{\"$undefined\":true}"),
        ExtValue::MinKey => out.push_str("{\"$minKey\":1}"),
        ExtValue::MaxKey => out.push_str("{\"$maxKey\":1}"),
        _ => unreachable!("generic values handled by write_value"),
    }
}

// ============================================================================
// SHELL PROFILE
// ============================================================================

fn write_shell(out: &mut String, value: &ExtValue) {
    match value {
        ExtValue::Int32(n) => out.push_str(&format!("NumberInt({})", n)),
        ExtValue::Int64(n) => out.push_str(&format!("{}", n)),
        ExtValue::ObjectId(oid) => out.push_str(&format!("ObjectId(\"{}\")", oid.to_hex())),
        ExtValue::DateTime(dt) => out.push_str(&format!("ISODate(\"{}\")", format_datetime(dt))),
        ExtValue::Timestamp { t, i } => out.push_str(&format!("Timestamp({},{})", t, i)),
        ExtValue::Binary { subtype, data } => {
            out.push_str(&format!("BinData({},\"{}\")", subtype, BASE64.encode(data)));
        }
        ExtValue::Regex { .. } => {
            // same keyed form in both profiles, the shell `/.../` syntax
            // is not decodable by this codec
            write_canonical(out, value);
        }
        ExtValue::Undefined => out.push_str("undefined"),
        ExtValue::MinKey => out.push_str("MinKey"),
        ExtValue::MaxKey => out.push_str("MaxKey"),
        _ => unreachable!("generic values handled by write_value"),
    }
}

// ============================================================================
// SCALAR FORMATTING
// ============================================================================

fn write_double(out: &mut String, n: f64) {
    if n.is_nan() || n.is_infinite() {
        out.push_str("null");
    } else {
        out.push_str(&format!("{}", n));
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Millisecond precision, trailing fraction zeros trimmed, `Z` suffix
/// for UTC and `+hh:mm` otherwise.
pub(crate) fn format_datetime(dt: &DateTime<FixedOffset>) -> String {
    let mut s = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    let millis = dt.timestamp_subsec_millis();
    if millis != 0 {
        let frac = format!(".{:03}", millis);
        s.push_str(frac.trim_end_matches('0'));
    }
    if dt.offset().fix().local_minus_utc() == 0 {
        s.push('Z');
    } else {
        s.push_str(&dt.format("%:z").to_string());
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extjson::decode::decode;
    use crate::extjson::value::ObjectId;
    use chrono::TimeZone;

    fn shell(v: &ExtValue) -> String {
        encode(v, Profile::Shell)
    }

    #[test]
    fn test_shell_literals() {
        let oid = ObjectId::parse_str("5a934e000102030405000000").unwrap();
        assert_eq!(
            shell(&ExtValue::ObjectId(oid)),
            "ObjectId(\"5a934e000102030405000000\")"
        );
        assert_eq!(shell(&ExtValue::Timestamp { t: 1, i: 2 }), "Timestamp(1,2)");
        assert_eq!(
            shell(&ExtValue::Binary {
                subtype: 2,
                data: b"foo".to_vec()
            }),
            "BinData(2,\"Zm9v\")"
        );
        assert_eq!(shell(&ExtValue::Undefined), "undefined");
        assert_eq!(shell(&ExtValue::Int64(10)), "10");
        assert_eq!(shell(&ExtValue::Int32(26)), "NumberInt(26)");
    }

    #[test]
    fn test_shell_dates() {
        let utc = chrono::Utc
            .with_ymd_and_hms(2016, 5, 15, 1, 2, 3)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(4))
            .unwrap()
            .fixed_offset();
        assert_eq!(shell(&ExtValue::DateTime(utc)), "ISODate(\"2016-05-15T01:02:03.004Z\")");

        let cet = chrono::FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2016, 5, 15, 1, 2, 3)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(4))
            .unwrap();
        assert_eq!(
            shell(&ExtValue::DateTime(cet)),
            "ISODate(\"2016-05-15T01:02:03.004+01:00\")"
        );
    }

    #[test]
    fn test_whole_second_date_has_no_fraction() {
        let utc = chrono::Utc
            .with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
            .unwrap()
            .fixed_offset();
        assert_eq!(shell(&ExtValue::DateTime(utc)), "ISODate(\"2000-01-01T00:00:00Z\")");
    }

    #[test]
    fn test_canonical_integer_quoting() {
        let below = ExtValue::Int64(10);
        let above = ExtValue::Int64((1 << 53) + 1);
        assert_eq!(encode(&below, Profile::Canonical), "{\"$numberLong\":10}");
        assert_eq!(
            encode(&above, Profile::Canonical),
            "{\"$numberLong\":\"9007199254740993\"}"
        );
    }

    #[test]
    fn test_round_trip_canonical() {
        let samples = vec![
            ExtValue::Null,
            ExtValue::Bool(true),
            ExtValue::Int32(26),
            ExtValue::Int64(9007199254740993),
            ExtValue::Double(2.5),
            ExtValue::String("O'Neil \"quoted\"".to_string()),
            ExtValue::ObjectId(ObjectId::parse_str("5a934e000102030405000000").unwrap()),
            ExtValue::Timestamp { t: 1, i: 2 },
            ExtValue::Binary {
                subtype: 4,
                data: vec![1, 2, 3],
            },
            ExtValue::Regex {
                pattern: "^a+b".to_string(),
                options: "i".to_string(),
            },
            ExtValue::Undefined,
            ExtValue::MinKey,
            ExtValue::MaxKey,
            ExtValue::DateTime(
                chrono::Utc
                    .with_ymd_and_hms(2016, 5, 15, 1, 2, 3)
                    .unwrap()
                    .fixed_offset(),
            ),
        ];
        for v in samples {
            let doc = ExtValue::Object(vec![("k".to_string(), v)]);
            let encoded = encode(&doc, Profile::Canonical);
            let decoded = decode(encoded.as_bytes()).unwrap();
            assert_eq!(decoded, doc, "round trip failed for {}", encoded);
        }
    }

    #[test]
    fn test_shell_output_is_decodable() {
        let doc = ExtValue::Object(vec![
            (
                "_id".to_string(),
                ExtValue::ObjectId(ObjectId::parse_str("5a934e000102030405000000").unwrap()),
            ),
            ("n".to_string(), ExtValue::Int32(5)),
            ("u".to_string(), ExtValue::Undefined),
        ]);
        let encoded = encode(&doc, Profile::Shell);
        assert_eq!(decode(encoded.as_bytes()).unwrap(), doc);
    }
}
