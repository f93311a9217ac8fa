// queryground-core/src/builder.rs
// Deterministic dataset building

use std::collections::BTreeMap;

use crate::engine::DocumentStore;
use crate::error::{Result, SandboxError};
use crate::extjson::{decode, ExtValue, ObjectId};
use crate::generator::DatasetGenerator;
use crate::limits::Limits;
use crate::page::Mode;

/// Error message when the configuration matches neither accepted shape
pub const INVALID_CONFIG: &str = r#"expecting an array of documents like

[
  {_id: 1, k: "one"},
  {_id: 2, k: "two"}
]

or a list of collections like:

db = {
  collection1: [
    {_id: 1, k: "one"},
    {_id: 2, k: "two"}
  ],
  collection2: [
    {_id: 1, v: 1}
  ]
}"#;

// multi-collection configs start with "db={" once compacted; the
// decodable part starts after "db="
const MULTI_COLLECTION_PREFIX: &[u8] = b"db={";
const MULTI_COLLECTION_SKIP: usize = 3;

/// Build the dataset described by `config` into database `db`.
///
/// The database is dropped before population so reruns start clean, and
/// dropped again if any insert fails so a failed build never leaves
/// partial state behind. Returns the sorted collection names.
pub fn build(
    engine: &dyn DocumentStore,
    db: &str,
    mode: Mode,
    config: &[u8],
    generator: Option<&dyn DatasetGenerator>,
    limits: &Limits,
) -> Result<Vec<String>> {
    let collections = match mode {
        Mode::DocumentSet => parse_document_set(config)?,
        Mode::GeneratorConfig => match generator {
            Some(generator) => generator.generate(config)?,
            None => {
                return Err(SandboxError::ConfigFormat(
                    "no dataset generator is configured".to_string(),
                ))
            }
        },
    };

    if collections.len() > limits.max_collections {
        return Err(SandboxError::CapExceeded(format!(
            "max number of collection in a database is {}, but was {}",
            limits.max_collections,
            collections.len()
        )));
    }

    // clean any potentially remaining data
    engine.drop_database(db)?;
    fill_database(engine, db, collections, limits.max_docs_per_collection)
}

/// Parse a document-set config into named collections. A bare array
/// populates the implicit `collection`, a `db={...}` object names each
/// collection explicitly.
fn parse_document_set(config: &[u8]) -> Result<BTreeMap<String, Vec<ExtValue>>> {
    let mut collections = BTreeMap::new();
    if config.first() == Some(&b'[') {
        let docs = document_array(&decode_config(config)?)?;
        collections.insert("collection".to_string(), docs);
    } else if config.starts_with(MULTI_COLLECTION_PREFIX) {
        let value = decode_config(&config[MULTI_COLLECTION_SKIP..])?;
        let entries = value
            .as_object()
            .ok_or_else(|| SandboxError::ConfigFormat(INVALID_CONFIG.to_string()))?;
        for (name, docs) in entries {
            collections.insert(name.clone(), document_array(docs)?);
        }
    } else {
        return Err(SandboxError::ConfigFormat(INVALID_CONFIG.to_string()));
    }
    Ok(collections)
}

// decode failures on a config are configuration errors, not query ones
fn decode_config(bytes: &[u8]) -> Result<ExtValue> {
    decode(bytes).map_err(|err| match err {
        SandboxError::Decode(detail) => SandboxError::ConfigFormat(detail),
        other => other,
    })
}

fn document_array(value: &ExtValue) -> Result<Vec<ExtValue>> {
    let items = value
        .as_array()
        .ok_or_else(|| SandboxError::ConfigFormat(INVALID_CONFIG.to_string()))?;
    for item in items {
        if item.as_object().is_none() {
            return Err(SandboxError::ConfigFormat(INVALID_CONFIG.to_string()));
        }
    }
    Ok(items.to_vec())
}

fn fill_database(
    engine: &dyn DocumentStore,
    db: &str,
    collections: BTreeMap<String, Vec<ExtValue>>,
    max_docs: usize,
) -> Result<Vec<String>> {
    let names: Vec<String> = collections.keys().cloned().collect();

    // BTreeMap iteration is lexicographic, so the id counter advances
    // in the same order on every run and reruns of a config yield
    // byte-identical ids
    let mut base: u32 = 0;
    for (name, mut docs) in collections {
        if docs.is_empty() {
            continue;
        }
        docs.truncate(max_docs);

        for (i, doc) in docs.iter_mut().enumerate() {
            if doc.get("_id").is_none() {
                if let ExtValue::Object(entries) = doc {
                    entries.insert(
                        0,
                        (
                            "_id".to_string(),
                            ExtValue::ObjectId(seeded_object_id(base + i as u32)),
                        ),
                    );
                }
            }
        }
        let inserted = docs.len() as u32;

        if let Err(err) = engine.insert_many(db, &name, docs) {
            // a collection can end up partially created when a write in
            // the middle of the batch fails, so drop the whole database
            // right away instead of leaking half a dataset
            engine.drop_database(db)?;
            let detail = match err {
                SandboxError::Execution(msg) => msg,
                other => other.to_string(),
            };
            return Err(SandboxError::BuildFailure(detail));
        }
        base += inserted;
    }
    Ok(names)
}

/// Deterministic stand-in for a freshly generated ObjectId: a fixed
/// timestamp/machine/pid prefix and a 3-byte big-endian counter.
fn seeded_object_id(n: u32) -> ObjectId {
    ObjectId([
        0x5a, // seconds of 2018-02-26T00:00:00Z, big endian
        0x93,
        0x4e,
        0x00,
        0x01, // machine bytes
        0x02,
        0x03,
        0x04, // pid bytes
        0x05,
        (n >> 16) as u8, // counter, big endian
        (n >> 8) as u8,
        n as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Command, MemoryEngine};
    use std::time::Duration;

    const MAX_TIME: Duration = Duration::from_secs(5);

    fn find_all(engine: &MemoryEngine, db: &str, collection: &str) -> Vec<ExtValue> {
        engine
            .run_command(
                db,
                collection,
                Command::Find {
                    filter: ExtValue::empty_object(),
                    projection: ExtValue::empty_object(),
                },
                MAX_TIME,
            )
            .unwrap()
    }

    fn build_set(engine: &MemoryEngine, config: &str) -> Result<Vec<String>> {
        build(
            engine,
            "dbhash",
            Mode::DocumentSet,
            config.as_bytes(),
            None,
            &Limits::default(),
        )
    }

    #[test]
    fn test_build_single_collection() {
        let engine = MemoryEngine::new();
        let names = build_set(&engine, r#"[{"_id":1},{"_id":2}]"#).unwrap();
        assert_eq!(names, vec!["collection"]);
        assert_eq!(find_all(&engine, "dbhash", "collection").len(), 2);
    }

    #[test]
    fn test_build_multiple_collections_sorted() {
        let engine = MemoryEngine::new();
        let names = build_set(&engine, r#"db={"zebra":[{"_id":1}],"alpha":[{"_id":1}]}"#).unwrap();
        assert_eq!(names, vec!["alpha", "zebra"]);
    }

    #[test]
    fn test_invalid_shape_rejected() {
        let engine = MemoryEngine::new();
        let err = build_set(&engine, r#"{"not":"an array"}"#).unwrap_err();
        assert!(matches!(err, SandboxError::ConfigFormat(_)));
        assert!(err.to_string().contains("expecting an array of documents"));
    }

    #[test]
    fn test_non_document_items_rejected() {
        let engine = MemoryEngine::new();
        let err = build_set(&engine, r#"[1,2,3]"#).unwrap_err();
        assert!(matches!(err, SandboxError::ConfigFormat(_)));
    }

    #[test]
    fn test_seeded_ids_carry_across_collections() {
        let engine = MemoryEngine::new();
        build_set(&engine, r#"db={"a":[{"k":1},{"k":2}],"b":[{"k":3}]}"#).unwrap();

        let a = find_all(&engine, "dbhash", "a");
        let b = find_all(&engine, "dbhash", "b");
        let id = |doc: &ExtValue| match doc.get("_id") {
            Some(ExtValue::ObjectId(oid)) => oid.to_hex(),
            other => panic!("expected an ObjectId, got {:?}", other),
        };
        assert_eq!(id(&a[0]), "5a934e000102030405000000");
        assert_eq!(id(&a[1]), "5a934e000102030405000001");
        assert_eq!(id(&b[0]), "5a934e000102030405000002");
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let engine = MemoryEngine::new();
        let config = r#"[{"k":1},{"k":2}]"#;
        build_set(&engine, config).unwrap();
        let first = find_all(&engine, "dbhash", "collection");
        build_set(&engine, config).unwrap();
        let second = find_all(&engine, "dbhash", "collection");
        assert_eq!(first, second);
    }

    #[test]
    fn test_documents_truncated_to_cap() {
        let engine = MemoryEngine::new();
        let docs: Vec<String> = (0..150).map(|i| format!(r#"{{"k":{}}}"#, i)).collect();
        let config = format!("[{}]", docs.join(","));
        build_set(&engine, &config).unwrap();
        assert_eq!(
            find_all(&engine, "dbhash", "collection").len(),
            Limits::default().max_docs_per_collection
        );
    }

    #[test]
    fn test_custom_limits_cap_documents_and_collections() {
        let limits = Limits {
            max_collections: 1,
            max_docs_per_collection: 2,
            ..Limits::default()
        };

        let engine = MemoryEngine::new();
        build(
            &engine,
            "dbhash",
            Mode::DocumentSet,
            br#"[{"k":1},{"k":2},{"k":3}]"#,
            None,
            &limits,
        )
        .unwrap();
        assert_eq!(find_all(&engine, "dbhash", "collection").len(), 2);

        let err = build(
            &engine,
            "dbhash",
            Mode::DocumentSet,
            br#"db={"a":[{"k":1}],"b":[{"k":1}]}"#,
            None,
            &limits,
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("max number of collection in a database is 1, but was 2"));
    }

    #[test]
    fn test_too_many_collections_is_a_hard_error() {
        let engine = MemoryEngine::new();
        let entries: Vec<String> = (0..11).map(|i| format!(r#""c{:02}":[{{"k":1}}]"#, i)).collect();
        let config = format!("db={{{}}}", entries.join(","));
        let err = build_set(&engine, &config).unwrap_err();
        assert!(matches!(err, SandboxError::CapExceeded(_)));
        assert!(err.to_string().contains("max number of collection"));
    }

    #[test]
    fn test_failed_build_leaves_no_partial_state() {
        let engine = MemoryEngine::new();
        let err = build_set(&engine, r#"[{"_id":1},{"_id":1}]"#).unwrap_err();
        assert!(matches!(err, SandboxError::BuildFailure(_)));
        assert!(engine.database_names().is_empty());
    }

    #[test]
    fn test_generator_mode_without_generator() {
        let engine = MemoryEngine::new();
        let err = build(
            &engine,
            "dbhash",
            Mode::GeneratorConfig,
            b"[]",
            None,
            &Limits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::ConfigFormat(_)));
    }

    #[test]
    fn test_generator_output_gets_caps_and_seeding() {
        use crate::generator::testutil::StaticGenerator;
        let mut collections = BTreeMap::new();
        collections.insert(
            "events".to_string(),
            vec![ExtValue::Object(vec![("k".to_string(), ExtValue::Int64(1))])],
        );
        let generator = StaticGenerator { collections };

        let engine = MemoryEngine::new();
        let names = build(
            &engine,
            "dbhash",
            Mode::GeneratorConfig,
            b"{}",
            Some(&generator),
            &Limits::default(),
        )
        .unwrap();
        assert_eq!(names, vec!["events"]);
        let docs = find_all(&engine, "dbhash", "events");
        assert!(matches!(docs[0].get("_id"), Some(ExtValue::ObjectId(_))));
    }
}
