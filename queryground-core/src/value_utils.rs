// queryground-core/src/value_utils.rs
//! Shared helpers for working with extended values: nested field access
//! with dot notation and cross-type comparison for filters and sorts.

use std::cmp::Ordering;

use crate::error::{Result, SandboxError};
use crate::extjson::ExtValue;

/// Get a nested value with dot notation support.
///
/// Supports simple fields (`"name"`), nested objects (`"address.city"`)
/// and array indexing (`"items.0.name"`).
pub fn get_nested_value<'a>(doc: &'a ExtValue, path: &str) -> Option<&'a ExtValue> {
    if !path.contains('.') {
        return doc.get(path);
    }

    let mut value = doc;
    for part in path.split('.') {
        match value {
            ExtValue::Object(_) => value = value.get(part)?,
            ExtValue::Array(items) => {
                if let Ok(index) = part.parse::<usize>() {
                    value = items.get(index)?;
                } else {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(value)
}

/// Mutable counterpart of [`get_nested_value`], same path rules
pub fn get_nested_value_mut<'a>(doc: &'a mut ExtValue, path: &str) -> Option<&'a mut ExtValue> {
    match path.split_once('.') {
        None => step_mut(doc, path),
        Some((head, rest)) => get_nested_value_mut(step_mut(doc, head)?, rest),
    }
}

fn step_mut<'a>(value: &'a mut ExtValue, part: &str) -> Option<&'a mut ExtValue> {
    match value {
        ExtValue::Object(_) => value.get_mut(part),
        ExtValue::Array(items) => part.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

/// Set a value at a dotted path, creating intermediate objects as
/// needed. Descending through an existing scalar is an error, like the
/// server's "Cannot create field" failure.
pub fn set_nested_value(doc: &mut ExtValue, path: &str, value: ExtValue) -> Result<()> {
    match path.split_once('.') {
        None => match doc {
            ExtValue::Object(_) => {
                doc.set(path, value);
                Ok(())
            }
            ExtValue::Array(items) => {
                let idx = path.parse::<usize>().ok().filter(|&i| i < items.len());
                match idx {
                    Some(i) => {
                        items[i] = value;
                        Ok(())
                    }
                    None => Err(cannot_create(path, "array")),
                }
            }
            other => Err(cannot_create(path, other.type_name())),
        },
        Some((head, rest)) => match doc {
            ExtValue::Object(entries) => {
                let pos = match entries.iter().position(|(k, _)| k == head) {
                    Some(pos) => pos,
                    None => {
                        entries.push((head.to_string(), ExtValue::empty_object()));
                        entries.len() - 1
                    }
                };
                set_nested_value(&mut entries[pos].1, rest, value)
            }
            ExtValue::Array(items) => {
                let idx = head.parse::<usize>().ok().filter(|&i| i < items.len());
                match idx {
                    Some(i) => set_nested_value(&mut items[i], rest, value),
                    None => Err(cannot_create(head, "array")),
                }
            }
            other => Err(cannot_create(head, other.type_name())),
        },
    }
}

/// Remove the value at a dotted path, returning it if present. A
/// missing intermediate segment is simply a no-op.
pub fn remove_nested_value(doc: &mut ExtValue, path: &str) -> Option<ExtValue> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => remove_nested_value(step_mut(doc, head)?, rest),
    }
}

fn cannot_create(part: &str, type_name: &str) -> SandboxError {
    SandboxError::Execution(format!(
        "Cannot create field '{}' in element of type {}",
        part, type_name
    ))
}

/// Rank used to order values of different types, loosely following the
/// document-store comparison order. Numeric types share a rank so that
/// `1`, `NumberInt(1)` and `1.0` compare equal.
fn type_rank(v: &ExtValue) -> u8 {
    match v {
        ExtValue::MinKey => 0,
        ExtValue::Undefined => 1,
        ExtValue::Null => 2,
        ExtValue::Int32(_) | ExtValue::Int64(_) | ExtValue::Double(_) => 3,
        ExtValue::String(_) => 4,
        ExtValue::Object(_) => 5,
        ExtValue::Array(_) => 6,
        ExtValue::Binary { .. } => 7,
        ExtValue::ObjectId(_) => 8,
        ExtValue::Bool(_) => 9,
        ExtValue::DateTime(_) => 10,
        ExtValue::Timestamp { .. } => 11,
        ExtValue::Regex { .. } => 12,
        ExtValue::MaxKey => 13,
    }
}

/// Total order over extended values, used by `$sort` and the range
/// operators.
pub fn compare_values(a: &ExtValue, b: &ExtValue) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }

    match (a, b) {
        // numeric comparison prefers exact integer math when possible
        (x, y) if ra == 3 => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i.cmp(&j),
            _ => x
                .as_f64()
                .unwrap_or(f64::NAN)
                .total_cmp(&y.as_f64().unwrap_or(f64::NAN)),
        },
        (ExtValue::String(x), ExtValue::String(y)) => x.cmp(y),
        (ExtValue::Bool(x), ExtValue::Bool(y)) => x.cmp(y),
        (ExtValue::DateTime(x), ExtValue::DateTime(y)) => x.cmp(y),
        (ExtValue::ObjectId(x), ExtValue::ObjectId(y)) => x.0.cmp(&y.0),
        (ExtValue::Timestamp { t: t1, i: i1 }, ExtValue::Timestamp { t: t2, i: i2 }) => {
            t1.cmp(t2).then(i1.cmp(i2))
        }
        (
            ExtValue::Binary {
                subtype: s1,
                data: d1,
            },
            ExtValue::Binary {
                subtype: s2,
                data: d2,
            },
        ) => d1.len().cmp(&d2.len()).then(s1.cmp(s2)).then(d1.cmp(d2)),
        (
            ExtValue::Regex {
                pattern: p1,
                options: o1,
            },
            ExtValue::Regex {
                pattern: p2,
                options: o2,
            },
        ) => p1.cmp(p2).then(o1.cmp(o2)),
        (ExtValue::Array(x), ExtValue::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ord = compare_values(xi, yi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (ExtValue::Object(x), ExtValue::Object(y)) => {
            for ((kx, vx), (ky, vy)) in x.iter().zip(y.iter()) {
                let ord = kx.cmp(ky).then_with(|| compare_values(vx, vy));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        // same-rank singletons (null, undefined, minKey, maxKey)
        _ => Ordering::Equal,
    }
}

/// Value equality with numeric coercion (`1 == 1.0 == NumberInt(1)`)
pub fn values_equal(a: &ExtValue, b: &ExtValue) -> bool {
    type_rank(a) == type_rank(b) && compare_values(a, b) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extjson::decode;

    fn dec(s: &str) -> ExtValue {
        decode(s.as_bytes()).unwrap()
    }

    #[test]
    fn test_nested_access() {
        let doc = dec(r#"{"address": {"city": "NYC"}, "items": [{"name": "a"}]}"#);
        assert_eq!(
            get_nested_value(&doc, "address.city"),
            Some(&ExtValue::String("NYC".to_string()))
        );
        assert_eq!(
            get_nested_value(&doc, "items.0.name"),
            Some(&ExtValue::String("a".to_string()))
        );
        assert_eq!(get_nested_value(&doc, "items.x"), None);
        assert_eq!(get_nested_value(&doc, "missing.path"), None);
    }

    #[test]
    fn test_nested_set_creates_intermediate_objects() {
        let mut doc = dec(r#"{"_id":1}"#);
        set_nested_value(&mut doc, "address.city", ExtValue::String("LA".to_string())).unwrap();
        assert_eq!(doc, dec(r#"{"_id":1,"address":{"city":"LA"}}"#));

        // existing nested fields are overwritten in place
        set_nested_value(&mut doc, "address.city", ExtValue::String("NYC".to_string())).unwrap();
        assert_eq!(doc, dec(r#"{"_id":1,"address":{"city":"NYC"}}"#));
    }

    #[test]
    fn test_nested_set_through_array_index() {
        let mut doc = dec(r#"{"items":[{"qty":1},{"qty":2}]}"#);
        set_nested_value(&mut doc, "items.1.qty", ExtValue::Int64(5)).unwrap();
        assert_eq!(doc, dec(r#"{"items":[{"qty":1},{"qty":5}]}"#));
    }

    #[test]
    fn test_nested_set_into_scalar_fails() {
        let mut doc = dec(r#"{"k":1}"#);
        let err = set_nested_value(&mut doc, "k.sub", ExtValue::Null).unwrap_err();
        assert!(err.to_string().contains("Cannot create field"));
    }

    #[test]
    fn test_nested_remove() {
        let mut doc = dec(r#"{"a":{"b":1,"c":2}}"#);
        assert_eq!(remove_nested_value(&mut doc, "a.b"), Some(ExtValue::Int64(1)));
        assert_eq!(doc, dec(r#"{"a":{"c":2}}"#));
        // missing paths are a no-op
        assert_eq!(remove_nested_value(&mut doc, "x.y"), None);
    }

    #[test]
    fn test_numeric_coercion() {
        assert!(values_equal(&dec("1"), &dec("1.0")));
        assert!(values_equal(&dec("NumberInt(5)"), &dec("5")));
        assert!(!values_equal(&dec("1"), &dec("\"1\"")));
    }

    #[test]
    fn test_cross_type_ordering_is_stable() {
        let null = ExtValue::Null;
        let num = ExtValue::Int64(3);
        let s = ExtValue::String("a".to_string());
        assert_eq!(compare_values(&null, &num), Ordering::Less);
        assert_eq!(compare_values(&num, &s), Ordering::Less);
        assert_eq!(compare_values(&ExtValue::MinKey, &null), Ordering::Less);
        assert_eq!(compare_values(&s, &ExtValue::MaxKey), Ordering::Less);
    }

    #[test]
    fn test_large_integer_comparison_is_exact() {
        let a = ExtValue::Int64(9007199254740993);
        let b = ExtValue::Int64(9007199254740992);
        assert_eq!(compare_values(&a, &b), Ordering::Greater);
    }
}
