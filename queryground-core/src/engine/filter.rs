// queryground-core/src/engine/filter.rs
// Filter matching for find(), $match and update selectors

use regex::Regex;

use crate::error::{Result, SandboxError};
use crate::extjson::ExtValue;
use crate::value_utils::{compare_values, get_nested_value, values_equal};

/// Check whether `doc` matches `filter`.
///
/// A filter is a conjunction of field conditions plus the logical
/// operators `$and`, `$or`, `$nor` and `$not`. A field condition is
/// either a literal value (implicit equality), a regex value, or an
/// operator document like `{"$gt": 5, "$lt": 10}`.
pub fn matches_filter(doc: &ExtValue, filter: &ExtValue) -> Result<bool> {
    let entries = filter.as_object().ok_or_else(|| {
        SandboxError::Execution(format!(
            "filter must be a document, got {}",
            filter.type_name()
        ))
    })?;

    for (key, condition) in entries {
        let matched = match key.as_str() {
            "$and" => logical_list(doc, condition, key)?
                .iter()
                .all(|&m| m),
            "$or" => logical_list(doc, condition, key)?
                .iter()
                .any(|&m| m),
            "$nor" => !logical_list(doc, condition, key)?
                .iter()
                .any(|&m| m),
            _ => field_matches(doc, key, condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical_list(doc: &ExtValue, condition: &ExtValue, op: &str) -> Result<Vec<bool>> {
    let clauses = condition.as_array().ok_or_else(|| {
        SandboxError::Execution(format!("{} requires an array of filters", op))
    })?;
    if clauses.is_empty() {
        return Err(SandboxError::Execution(format!(
            "{} requires a non-empty array",
            op
        )));
    }
    clauses
        .iter()
        .map(|clause| matches_filter(doc, clause))
        .collect()
}

fn field_matches(doc: &ExtValue, path: &str, condition: &ExtValue) -> Result<bool> {
    let field = get_nested_value(doc, path);

    if let Some(ops) = operator_document(condition) {
        let mut all = true;
        for (op, operand) in ops {
            all = all && apply_operator(field, op, operand)?;
        }
        return Ok(all);
    }

    match condition {
        ExtValue::Regex { pattern, options } => regex_matches(field, pattern, options),
        literal => Ok(field.map(|v| equals_or_contains(v, literal)).unwrap_or(false)),
    }
}

/// A condition is an operator document when every key starts with `$`
fn operator_document(condition: &ExtValue) -> Option<&[(String, ExtValue)]> {
    let entries = condition.as_object()?;
    if !entries.is_empty() && entries.iter().all(|(k, _)| k.starts_with('$')) {
        Some(entries)
    } else {
        None
    }
}

/// Implicit equality also matches any element of an array field
fn equals_or_contains(field: &ExtValue, literal: &ExtValue) -> bool {
    if values_equal(field, literal) {
        return true;
    }
    if let ExtValue::Array(items) = field {
        return items.iter().any(|item| values_equal(item, literal));
    }
    false
}

fn apply_operator(field: Option<&ExtValue>, op: &str, operand: &ExtValue) -> Result<bool> {
    match op {
        "$exists" => {
            let wanted = operand.as_bool().unwrap_or(false);
            Ok(field.is_some() == wanted)
        }
        "$eq" => Ok(field.map(|v| equals_or_contains(v, operand)).unwrap_or(false)),
        "$ne" => Ok(!field.map(|v| equals_or_contains(v, operand)).unwrap_or(false)),
        "$gt" => Ok(compare(field, operand, |o| o == std::cmp::Ordering::Greater)),
        "$gte" => Ok(compare(field, operand, |o| o != std::cmp::Ordering::Less)),
        "$lt" => Ok(compare(field, operand, |o| o == std::cmp::Ordering::Less)),
        "$lte" => Ok(compare(field, operand, |o| o != std::cmp::Ordering::Greater)),
        "$in" => in_list(field, operand, "$in"),
        "$nin" => Ok(!in_list(field, operand, "$nin")?),
        "$not" => {
            let field_doc = field.cloned().unwrap_or(ExtValue::Null);
            // $not wraps an operator document applied to the same field
            let inner = ExtValue::Object(vec![("v".to_string(), operand.clone())]);
            let wrapper = ExtValue::Object(vec![("v".to_string(), field_doc)]);
            Ok(!matches_filter(&wrapper, &inner)?)
        }
        "$regex" => match operand {
            ExtValue::String(pattern) => regex_matches(field, pattern, ""),
            ExtValue::Regex { pattern, options } => regex_matches(field, pattern, options),
            other => Err(SandboxError::Execution(format!(
                "$regex requires a string, got {}",
                other.type_name()
            ))),
        },
        "$options" => Ok(true), // consumed together with $regex
        "$size" => {
            let wanted = operand.as_i64().unwrap_or(-1);
            Ok(matches!(field, Some(ExtValue::Array(items)) if items.len() as i64 == wanted))
        }
        other => Err(SandboxError::Execution(format!(
            "unknown operator: {}",
            other
        ))),
    }
}

fn compare<F>(field: Option<&ExtValue>, operand: &ExtValue, check: F) -> bool
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    match field {
        // range operators only apply within comparable types
        Some(v) if comparable(v, operand) => check(compare_values(v, operand)),
        _ => false,
    }
}

fn comparable(a: &ExtValue, b: &ExtValue) -> bool {
    a.as_f64().is_some() && b.as_f64().is_some()
        || std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn in_list(field: Option<&ExtValue>, operand: &ExtValue, op: &str) -> Result<bool> {
    let candidates = operand.as_array().ok_or_else(|| {
        SandboxError::Execution(format!("{} requires an array", op))
    })?;
    Ok(match field {
        Some(v) => candidates.iter().any(|c| equals_or_contains(v, c)),
        None => false,
    })
}

/// Regex matching with shell-style options; only `i`, `m`, `s` and `x`
/// translate to inline flags, the rest are ignored.
fn regex_matches(field: Option<&ExtValue>, pattern: &str, options: &str) -> Result<bool> {
    let text = match field {
        Some(ExtValue::String(s)) => s,
        _ => return Ok(false),
    };
    let flags: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();
    let full = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    };
    let re = Regex::new(&full)
        .map_err(|e| SandboxError::Execution(format!("invalid regex '{}': {}", pattern, e)))?;
    Ok(re.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extjson::decode;

    fn dec(s: &str) -> ExtValue {
        decode(s.as_bytes()).unwrap()
    }

    fn check(doc: &str, filter: &str) -> bool {
        matches_filter(&dec(doc), &dec(filter)).unwrap()
    }

    #[test]
    fn test_implicit_equality() {
        assert!(check(r#"{"name":"Alice"}"#, r#"{"name":"Alice"}"#));
        assert!(!check(r#"{"name":"Bob"}"#, r#"{"name":"Alice"}"#));
        assert!(check(r#"{"k":1}"#, r#"{"k":1.0}"#));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert!(check(r#"{"anything":1}"#, "{}"));
    }

    #[test]
    fn test_comparison_operators() {
        assert!(check(r#"{"age":25}"#, r#"{"age":{"$gte":18,"$lt":30}}"#));
        assert!(!check(r#"{"age":15}"#, r#"{"age":{"$gte":18}}"#));
        assert!(!check(r#"{"age":"x"}"#, r#"{"age":{"$gt":18}}"#));
    }

    #[test]
    fn test_in_nin() {
        assert!(check(r#"{"city":"NYC"}"#, r#"{"city":{"$in":["NYC","LA"]}}"#));
        assert!(check(r#"{"city":"SF"}"#, r#"{"city":{"$nin":["NYC","LA"]}}"#));
    }

    #[test]
    fn test_exists() {
        assert!(check(r#"{"email":"e"}"#, r#"{"email":{"$exists":true}}"#));
        assert!(check(r#"{"name":"a"}"#, r#"{"email":{"$exists":false}}"#));
    }

    #[test]
    fn test_logical_operators() {
        assert!(check(
            r#"{"age":25,"city":"NYC"}"#,
            r#"{"$and":[{"age":{"$gte":18}},{"city":"NYC"}]}"#
        ));
        assert!(check(
            r#"{"age":70}"#,
            r#"{"$or":[{"age":{"$lt":18}},{"age":{"$gt":65}}]}"#
        ));
        assert!(check(
            r#"{"age":30}"#,
            r#"{"$nor":[{"age":{"$lt":18}},{"age":{"$gt":65}}]}"#
        ));
    }

    #[test]
    fn test_not() {
        assert!(check(r#"{"k":5}"#, r#"{"k":{"$not":{"$gt":10}}}"#));
        assert!(!check(r#"{"k":15}"#, r#"{"k":{"$not":{"$gt":10}}}"#));
    }

    #[test]
    fn test_array_contains() {
        assert!(check(r#"{"tags":["a","b"]}"#, r#"{"tags":"a"}"#));
        assert!(check(r#"{"tags":["a","b"]}"#, r#"{"tags":{"$size":2}}"#));
    }

    #[test]
    fn test_regex_value_and_operator() {
        assert!(check(
            r#"{"k":"Hello"}"#,
            r#"{"k":{"$regex":"^h","$options":"i"}}"#
        ));
        assert!(!check(r#"{"k":"world"}"#, r#"{"k":{"$regex":"^h"}}"#));
    }

    #[test]
    fn test_nested_path() {
        assert!(check(
            r#"{"address":{"city":"NYC"}}"#,
            r#"{"address.city":"NYC"}"#
        ));
    }

    #[test]
    fn test_typed_values_match() {
        assert!(check(
            r#"{"_id":ObjectId("5a934e000102030405000001")}"#,
            r#"{"_id":ObjectId("5a934e000102030405000001")}"#
        ));
        assert!(!check(
            r#"{"_id":ObjectId("5a934e000102030405000001")}"#,
            r#"{"_id":ObjectId("5a934e000102030405000002")}"#
        ));
    }

    #[test]
    fn test_unknown_operator_is_an_error() {
        let res = matches_filter(&dec(r#"{"k":1}"#), &dec(r#"{"k":{"$near":1}}"#));
        assert!(res.is_err());
    }
}
