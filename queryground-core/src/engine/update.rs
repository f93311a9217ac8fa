// queryground-core/src/engine/update.rs
// Update document application: operator documents and full replacement

use crate::engine::filter::matches_filter;
use crate::engine::UpdateOpts;
use crate::error::{Result, SandboxError};
use crate::extjson::{ExtValue, ObjectId};
use crate::value_utils::{
    get_nested_value, get_nested_value_mut, remove_nested_value, set_nested_value,
};

/// Outcome of applying an update to one collection
#[derive(Debug)]
pub struct UpdateOutcome {
    pub matched: usize,
    pub modified: usize,
    pub upserted: Option<ExtValue>,
}

/// Apply an update statement in place over `docs`. Matching documents are
/// rewritten; with upsert enabled and no match, a new document is appended
/// with a synthesized _id.
pub fn apply_update(
    docs: &mut Vec<ExtValue>,
    filter: &ExtValue,
    update: &ExtValue,
    opts: &UpdateOpts,
) -> Result<UpdateOutcome> {
    let operator_update = is_operator_update(update)?;

    let mut matched = 0;
    let mut modified = 0;
    for doc in docs.iter_mut() {
        if !matches_filter(doc, filter)? {
            continue;
        }
        matched += 1;
        let updated = if operator_update {
            apply_operators(doc, update)?
        } else {
            replace_document(doc, update)
        };
        if updated {
            modified += 1;
        }
        if !opts.multi {
            break;
        }
    }

    let mut upserted = None;
    if matched == 0 && opts.upsert {
        let doc = build_upserted(filter, update, operator_update)?;
        upserted = doc.get("_id").cloned();
        docs.push(doc);
    }

    Ok(UpdateOutcome {
        matched,
        modified,
        upserted,
    })
}

/// An update document either holds only $-operators or none at all.
/// Mixing the two forms is rejected, like the real server does.
fn is_operator_update(update: &ExtValue) -> Result<bool> {
    let entries = update.as_object().ok_or_else(|| {
        SandboxError::Execution("update must be a document".to_string())
    })?;
    let operators = entries.iter().filter(|(k, _)| k.starts_with('$')).count();
    if operators == 0 {
        Ok(false)
    } else if operators == entries.len() {
        Ok(true)
    } else {
        Err(SandboxError::Execution(
            "update document can't mix operator and replacement fields".to_string(),
        ))
    }
}

fn apply_operators(doc: &mut ExtValue, update: &ExtValue) -> Result<bool> {
    let mut changed = false;
    let entries = match update.as_object() {
        Some(e) => e.to_vec(),
        None => return Ok(false),
    };
    for (op, fields) in &entries {
        let fields = fields.as_object().ok_or_else(|| {
            SandboxError::Execution(format!("{} expects a document", op))
        })?;
        for (field, value) in fields {
            changed |= apply_one(doc, op, field, value)?;
        }
    }
    Ok(changed)
}

// field may be a dotted path, all operators resolve it the same way
// the filters do
fn apply_one(doc: &mut ExtValue, op: &str, field: &str, value: &ExtValue) -> Result<bool> {
    match op {
        "$set" => {
            let current = get_nested_value(doc, field);
            if current == Some(value) {
                return Ok(false);
            }
            set_nested_value(doc, field, value.clone())?;
            Ok(true)
        }
        "$unset" => Ok(remove_nested_value(doc, field).is_some()),
        "$inc" => {
            let amount = value.as_f64().ok_or_else(|| {
                SandboxError::Execution(format!(
                    "cannot increment with non-numeric argument: {{{}: {}}}",
                    field,
                    value.type_name()
                ))
            })?;
            let next = match get_nested_value(doc, field) {
                None => value.clone(),
                Some(current) => {
                    let base = current.as_f64().ok_or_else(|| {
                        SandboxError::Execution(format!(
                            "cannot apply $inc to a value of non-numeric type in field '{}'",
                            field
                        ))
                    })?;
                    numeric_sum(current, value, base + amount)
                }
            };
            set_nested_value(doc, field, next)?;
            Ok(true)
        }
        "$push" => {
            match get_nested_value(doc, field) {
                Some(ExtValue::Array(_)) => {}
                Some(_) => {
                    return Err(SandboxError::Execution(format!(
                        "the field '{}' must be an array",
                        field
                    )))
                }
                None => set_nested_value(doc, field, ExtValue::Array(Vec::new()))?,
            }
            if let Some(ExtValue::Array(items)) = get_nested_value_mut(doc, field) {
                items.push(value.clone());
            }
            Ok(true)
        }
        other => Err(SandboxError::Execution(format!(
            "unknown modifier: {}",
            other
        ))),
    }
}

/// Keep integer representation when both operands are integral
fn numeric_sum(current: &ExtValue, amount: &ExtValue, result: f64) -> ExtValue {
    let both_integral = matches!(current, ExtValue::Int32(_) | ExtValue::Int64(_))
        && matches!(amount, ExtValue::Int32(_) | ExtValue::Int64(_));
    if both_integral {
        ExtValue::Int64(result as i64)
    } else {
        ExtValue::Double(result)
    }
}

/// Replacement semantics: the _id is immutable, everything else is
/// swapped for the new document.
fn replace_document(doc: &mut ExtValue, replacement: &ExtValue) -> bool {
    let id = doc.get("_id").cloned();
    let mut next = replacement.clone();
    if let Some(id) = id {
        match next.get("_id") {
            Some(_) => {}
            None => {
                if let ExtValue::Object(entries) = &mut next {
                    entries.insert(0, ("_id".to_string(), id));
                }
            }
        }
    }
    if *doc == next {
        return false;
    }
    *doc = next;
    true
}

/// Upserted documents start from the equality conditions of the filter,
/// then the update is applied on top.
fn build_upserted(
    filter: &ExtValue,
    update: &ExtValue,
    operator_update: bool,
) -> Result<ExtValue> {
    let mut doc = ExtValue::empty_object();
    if let Some(entries) = filter.as_object() {
        for (key, value) in entries {
            if key.starts_with('$') {
                continue;
            }
            let is_operator_cond = value
                .as_object()
                .map(|e| e.iter().any(|(k, _)| k.starts_with('$')))
                .unwrap_or(false);
            if !is_operator_cond {
                set_nested_value(&mut doc, key, value.clone())?;
            }
        }
    }
    if operator_update {
        apply_operators(&mut doc, update)?;
    } else {
        doc = update.clone();
    }
    if doc.get("_id").is_none() {
        if let ExtValue::Object(entries) = &mut doc {
            entries.insert(0, ("_id".to_string(), ExtValue::ObjectId(upserted_id())));
        }
    }
    Ok(doc)
}

// Upserted ids share the fixed prefix of generated ids but start from a
// counter far above anything a dataset build can produce, so they never
// collide with seeded documents.
const UPSERT_COUNTER_BASE: u32 = 0x0080_0000;
use std::sync::atomic::{AtomicU32, Ordering};
static UPSERT_COUNTER: AtomicU32 = AtomicU32::new(UPSERT_COUNTER_BASE);

fn upserted_id() -> ObjectId {
    let n = UPSERT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut bytes = [0x5a, 0x93, 0x4e, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0, 0, 0];
    bytes[9] = (n >> 16) as u8;
    bytes[10] = (n >> 8) as u8;
    bytes[11] = n as u8;
    ObjectId(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extjson::decode;

    fn dec(s: &str) -> ExtValue {
        decode(s.as_bytes()).unwrap()
    }

    fn run(
        docs: &mut Vec<ExtValue>,
        filter: &str,
        update: &str,
        multi: bool,
        upsert: bool,
    ) -> UpdateOutcome {
        apply_update(
            docs,
            &dec(filter),
            &dec(update),
            &UpdateOpts { multi, upsert },
        )
        .unwrap()
    }

    #[test]
    fn test_set_single_document() {
        let mut docs = vec![dec(r#"{"_id":1,"k":1}"#), dec(r#"{"_id":2,"k":1}"#)];
        let out = run(&mut docs, r#"{"k":1}"#, r#"{"$set":{"k":9}}"#, false, false);
        assert_eq!(out.matched, 1);
        assert_eq!(out.modified, 1);
        assert_eq!(docs[0], dec(r#"{"_id":1,"k":9}"#));
        assert_eq!(docs[1], dec(r#"{"_id":2,"k":1}"#));
    }

    #[test]
    fn test_set_multi() {
        let mut docs = vec![dec(r#"{"_id":1,"k":1}"#), dec(r#"{"_id":2,"k":1}"#)];
        let out = run(&mut docs, r#"{"k":1}"#, r#"{"$set":{"k":9}}"#, true, false);
        assert_eq!(out.modified, 2);
    }

    #[test]
    fn test_set_same_value_counts_matched_not_modified() {
        let mut docs = vec![dec(r#"{"_id":1,"k":1}"#)];
        let out = run(&mut docs, r#"{}"#, r#"{"$set":{"k":1}}"#, true, false);
        assert_eq!(out.matched, 1);
        assert_eq!(out.modified, 0);
    }

    #[test]
    fn test_set_dotted_path_updates_nested_field() {
        let mut docs = vec![dec(r#"{"_id":1,"address":{"city":"NYC"}}"#)];
        let out = run(
            &mut docs,
            r#"{"_id":1}"#,
            r#"{"$set":{"address.city":"LA"}}"#,
            false,
            false,
        );
        assert_eq!(out.modified, 1);
        assert_eq!(docs[0], dec(r#"{"_id":1,"address":{"city":"LA"}}"#));
    }

    #[test]
    fn test_set_dotted_path_creates_intermediate_objects() {
        let mut docs = vec![dec(r#"{"_id":1}"#)];
        run(&mut docs, r#"{}"#, r#"{"$set":{"a.b.c":1}}"#, false, false);
        assert_eq!(docs[0], dec(r#"{"_id":1,"a":{"b":{"c":1}}}"#));
    }

    #[test]
    fn test_unset_and_inc_dotted_path() {
        let mut docs = vec![dec(r#"{"_id":1,"a":{"n":3,"old":true}}"#)];
        run(
            &mut docs,
            r#"{}"#,
            r#"{"$inc":{"a.n":2},"$unset":{"a.old":""}}"#,
            false,
            false,
        );
        assert_eq!(docs[0], dec(r#"{"_id":1,"a":{"n":5}}"#));
    }

    #[test]
    fn test_push_dotted_path() {
        let mut docs = vec![dec(r#"{"_id":1,"a":{"tags":["x"]}}"#)];
        run(&mut docs, r#"{}"#, r#"{"$push":{"a.tags":"y"}}"#, false, false);
        assert_eq!(docs[0], dec(r#"{"_id":1,"a":{"tags":["x","y"]}}"#));
    }

    #[test]
    fn test_set_dotted_path_through_scalar_fails() {
        let mut docs = vec![dec(r#"{"_id":1,"a":1}"#)];
        let err = apply_update(
            &mut docs,
            &dec(r#"{}"#),
            &dec(r#"{"$set":{"a.b":1}}"#),
            &UpdateOpts {
                multi: false,
                upsert: false,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("Cannot create field 'b'"));
    }

    #[test]
    fn test_inc_and_unset() {
        let mut docs = vec![dec(r#"{"_id":1,"k":3,"old":true}"#)];
        run(
            &mut docs,
            r#"{}"#,
            r#"{"$inc":{"k":2},"$unset":{"old":""}}"#,
            false,
            false,
        );
        assert_eq!(docs[0], dec(r#"{"_id":1,"k":5}"#));
    }

    #[test]
    fn test_inc_non_numeric_field_fails() {
        let mut docs = vec![dec(r#"{"_id":1,"k":"s"}"#)];
        let err = apply_update(
            &mut docs,
            &dec("{}"),
            &dec(r#"{"$inc":{"k":1}}"#),
            &UpdateOpts { multi: false, upsert: false },
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_push_creates_array() {
        let mut docs = vec![dec(r#"{"_id":1}"#)];
        run(&mut docs, r#"{}"#, r#"{"$push":{"tags":"a"}}"#, false, false);
        run(&mut docs, r#"{}"#, r#"{"$push":{"tags":"b"}}"#, false, false);
        assert_eq!(docs[0], dec(r#"{"_id":1,"tags":["a","b"]}"#));
    }

    #[test]
    fn test_replacement_keeps_id() {
        let mut docs = vec![dec(r#"{"_id":1,"k":1,"other":true}"#)];
        run(&mut docs, r#"{"k":1}"#, r#"{"name":"new"}"#, false, false);
        assert_eq!(docs[0], dec(r#"{"_id":1,"name":"new"}"#));
    }

    #[test]
    fn test_upsert_inserts_from_filter_and_update() {
        let mut docs = vec![dec(r#"{"_id":1,"k":1}"#)];
        let out = run(&mut docs, r#"{"k":99}"#, r#"{"$set":{"v":5}}"#, false, true);
        assert_eq!(out.matched, 0);
        assert!(out.upserted.is_some());
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].get("k"), Some(&ExtValue::Int64(99)));
        assert_eq!(docs[1].get("v"), Some(&ExtValue::Int64(5)));
        assert!(matches!(docs[1].get("_id"), Some(ExtValue::ObjectId(_))));
    }

    #[test]
    fn test_mixed_update_document_rejected() {
        let mut docs = vec![dec(r#"{"_id":1}"#)];
        let err = apply_update(
            &mut docs,
            &dec("{}"),
            &dec(r#"{"$set":{"k":1},"plain":2}"#),
            &UpdateOpts { multi: false, upsert: false },
        );
        assert!(err.is_err());
    }
}
