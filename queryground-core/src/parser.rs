// queryground-core/src/parser.rs
// Parser for shell-like query statements
//
// find, aggregate and update queries are supported, with or without
// explain(). Once the explain() part is stripped, the statement has to
// look like
//
//   db.<collection>.<find|aggregate|update>( <args> )
//
// for example:
//
//   db.collection.find({k:1})
//   db.collection.aggregate([{$project:{_id:0}}])
//   db.collection.update({k:1},{$set:{n:1}},{upsert:true})
//   db.collection.find({k:1}).explain()
//   db.collection.explain("executionStats").find({k:1})
//
// Input is pre-filtered on the caller side, but nothing here may panic
// on pathological input.

use crate::error::{Result, SandboxError};
use crate::extjson::{decode, ExtValue};

const INVALID_QUERY: &str =
    "query must match db.coll.find(...) or db.coll.aggregate(...) or db.coll.update()";

/// Explain verbosity used when the argument is empty or too short to
/// hold a quoted word
pub const DEFAULT_EXPLAIN_MODE: &str = "queryPlanner";

/// Supported query methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Find,
    Aggregate,
    Update,
}

impl Method {
    fn parse(name: &str) -> Result<Method> {
        match name {
            "find" => Ok(Method::Find),
            "aggregate" => Ok(Method::Aggregate),
            "update" => Ok(Method::Update),
            other => Err(SandboxError::Syntax(format!("invalid method: '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Find => "find",
            Method::Aggregate => "aggregate",
            Method::Update => "update",
        }
    }
}

/// A fully parsed statement, consumed within a single request
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    pub collection: String,
    pub method: Method,
    /// Decoded positional arguments; shape depends on the method.
    /// Method-specific arity padding happens at execution time.
    pub stages: Vec<ExtValue>,
    pub explain: Option<String>,
}

/// Parse one statement into (collection, method, stages, explain mode)
pub fn parse_query(query: &[u8]) -> Result<ParsedStatement> {
    let (query, explain) = strip_explain(query);

    let parts: Vec<&[u8]> = splitn_bytes(&query, b'.', 3);
    if parts.len() != 3 {
        return Err(SandboxError::Syntax(INVALID_QUERY.to_string()));
    }

    let collection = String::from_utf8_lossy(parts[1]).into_owned();

    // last part holds the method and its arguments, e.g. find({k:1})
    let tail = parts[2];
    let start = tail.iter().position(|&c| c == b'(');
    let end = tail.iter().rposition(|&c| c == b')');
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => return Err(SandboxError::Syntax(INVALID_QUERY.to_string())),
    };

    let method = Method::parse(&String::from_utf8_lossy(&tail[..start]))?;
    // surface decode failures with the query-error prefix
    let stages = decode_stages(&tail[start + 1..end])
        .map_err(|err| SandboxError::Syntax(err.to_string()))?;

    Ok(ParsedStatement {
        collection,
        method,
        stages,
        explain,
    })
}

/// Remove the `.explain(...)` part wherever it appears in the statement
/// and extract its verbosity argument.
fn strip_explain(query: &[u8]) -> (Vec<u8>, Option<String>) {
    let needle = b".explain(";
    let start = match find_subslice(query, needle) {
        Some(pos) => pos,
        None => return (query.to_vec(), None),
    };
    let end = match query[start..].iter().position(|&c| c == b')') {
        Some(pos) => start + pos,
        None => return (query.to_vec(), None),
    };

    let raw_mode = &query[start + needle.len()..end];
    let mut stripped = query[..start].to_vec();
    stripped.extend_from_slice(&query[end + 1..]);

    let mode = if raw_mode.len() < 2 {
        DEFAULT_EXPLAIN_MODE.to_string()
    } else {
        // remove the enclosing quotes
        String::from_utf8_lossy(&raw_mode[1..raw_mode.len() - 1]).into_owned()
    };

    (stripped, Some(mode))
}

/// Decode the raw argument bytes into an ordered stage list.
///
/// A comma-separated positional list like `find(filter, projection)` is
/// wrapped in `[...]` so everything decodes uniformly as an array.
fn decode_stages(raw: &[u8]) -> Result<Vec<ExtValue>> {
    if raw.is_empty() {
        return Ok(vec![ExtValue::empty_object(), ExtValue::empty_object()]);
    }

    let wrapped;
    let bytes = if raw[0] != b'[' {
        let mut b = Vec::with_capacity(raw.len() + 2);
        b.push(b'[');
        b.extend_from_slice(raw);
        b.push(b']');
        wrapped = b;
        &wrapped[..]
    } else {
        raw
    };

    match decode(bytes)? {
        ExtValue::Array(stages) => Ok(stages),
        other => Ok(vec![other]),
    }
}

/// Drop any aggregation stage that could write outside the sandbox
/// (`$out`, `$merge`). The rest of the list is left untouched.
pub fn sanitize_aggregation_stages(stages: Vec<ExtValue>) -> Vec<ExtValue> {
    stages
        .into_iter()
        .filter(|stage| {
            stage.get("$out").is_none() && stage.get("$merge").is_none()
        })
        .collect()
}

fn splitn_bytes(haystack: &[u8], sep: u8, limit: usize) -> Vec<&[u8]> {
    let mut parts = Vec::new();
    let mut rest = haystack;
    while parts.len() + 1 < limit {
        match rest.iter().position(|&c| c == sep) {
            Some(pos) => {
                parts.push(&rest[..pos]);
                rest = &rest[pos + 1..];
            }
            None => break,
        }
    }
    parts.push(rest);
    parts
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(q: &str) -> ParsedStatement {
        parse_query(q.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_basic_find() {
        let stmt = parse("db.collection.find({k:1})");
        assert_eq!(stmt.collection, "collection");
        assert_eq!(stmt.method, Method::Find);
        assert_eq!(stmt.stages.len(), 1);
        assert_eq!(stmt.explain, None);
    }

    #[test]
    fn test_parse_empty_args_become_two_empty_stages() {
        let stmt = parse("db.collection.find()");
        assert_eq!(
            stmt.stages,
            vec![ExtValue::empty_object(), ExtValue::empty_object()]
        );
    }

    #[test]
    fn test_parse_positional_args() {
        let stmt = parse("db.collection.find({k:1}, {_id:0})");
        assert_eq!(stmt.stages.len(), 2);
        assert_eq!(stmt.stages[1].get("_id"), Some(&ExtValue::Int64(0)));
    }

    #[test]
    fn test_parse_aggregate_pipeline() {
        let stmt = parse("db.collection.aggregate([{$match:{k:1}},{$project:{_id:0}}])");
        assert_eq!(stmt.method, Method::Aggregate);
        assert_eq!(stmt.stages.len(), 2);
    }

    #[test]
    fn test_parse_update_three_args() {
        let stmt = parse("db.collection.update({k:1},{$set:{n:1}},{upsert:true})");
        assert_eq!(stmt.method, Method::Update);
        assert_eq!(stmt.stages.len(), 3);
    }

    #[test]
    fn test_explain_at_the_end() {
        let stmt = parse(r#"db.c.find().explain("executionStats")"#);
        assert_eq!(stmt.method, Method::Find);
        assert_eq!(stmt.explain.as_deref(), Some("executionStats"));
        // stage list is the empty-args default
        assert_eq!(stmt.stages.len(), 2);
    }

    #[test]
    fn test_explain_before_the_method() {
        let stmt = parse(r#"db.collection.explain("allPlansExecution").find({k:1})"#);
        assert_eq!(stmt.explain.as_deref(), Some("allPlansExecution"));
        assert_eq!(stmt.method, Method::Find);
        assert_eq!(stmt.stages.len(), 1);
    }

    #[test]
    fn test_explain_default_verbosity() {
        let stmt = parse("db.c.find().explain()");
        assert_eq!(stmt.explain.as_deref(), Some(DEFAULT_EXPLAIN_MODE));
    }

    #[test]
    fn test_wrong_dot_count_is_syntax_error() {
        assert!(parse_query(b"dbcollection.find()").is_err());
        assert!(parse_query(b"db.find()").is_err());
    }

    #[test]
    fn test_missing_parens_is_syntax_error() {
        assert!(parse_query(b"db.collection.find").is_err());
        assert!(parse_query(b"db.collection.find)(").is_err());
    }

    #[test]
    fn test_unknown_method_is_syntax_error() {
        assert!(parse_query(b"db.collection.drop()").is_err());
    }

    #[test]
    fn test_sanitize_removes_out_and_merge_only() {
        let stages = vec![
            decode(br#"{"$match":{"k":1}}"#).unwrap(),
            decode(br#"{"$out":"other"}"#).unwrap(),
            decode(br#"{"$project":{"_id":0}}"#).unwrap(),
            decode(br#"{"$merge":{"into":"other"}}"#).unwrap(),
        ];
        let sanitized = sanitize_aggregation_stages(stages);
        assert_eq!(sanitized.len(), 2);
        assert!(sanitized[0].get("$match").is_some());
        assert!(sanitized[1].get("$project").is_some());
    }

    #[test]
    fn test_collection_name_with_digits() {
        let stmt = parse("db.col123.find()");
        assert_eq!(stmt.collection, "col123");
    }
}
