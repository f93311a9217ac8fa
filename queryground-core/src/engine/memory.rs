// queryground-core/src/engine/memory.rs
// In-memory DocumentStore implementation

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::engine::filter::matches_filter;
use crate::engine::pipeline::{parse_find_projection, project_document, Pipeline};
use crate::engine::update::apply_update;
use crate::engine::{Command, DocumentStore};
use crate::error::{Result, SandboxError};
use crate::extjson::ExtValue;

type Collections = HashMap<String, Vec<ExtValue>>;

/// Reference [`DocumentStore`] keeping every database in process memory.
///
/// Documents preserve insertion order, which is what makes sandbox
/// results deterministic for unsorted queries.
#[derive(Default)]
pub struct MemoryEngine {
    databases: RwLock<HashMap<String, Collections>>,
}

impl MemoryEngine {
    pub fn new() -> MemoryEngine {
        MemoryEngine::default()
    }

    /// Number of collections across all databases, exposed for tests
    /// and stats reporting.
    pub fn collection_count(&self) -> usize {
        self.databases.read().values().map(|c| c.len()).sum()
    }
}

impl DocumentStore for MemoryEngine {
    fn insert_many(&self, db: &str, collection: &str, docs: Vec<ExtValue>) -> Result<()> {
        let mut databases = self.databases.write();
        let stored = databases
            .entry(db.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        // ordered insert: stop at the first duplicate, keeping
        // everything written so far
        for doc in docs {
            if let Some(id) = doc.get("_id") {
                if stored.iter().any(|d| d.get("_id") == Some(id)) {
                    return Err(SandboxError::Execution(format!(
                        "E11000 duplicate key error collection: {}.{} index: _id_",
                        db, collection
                    )));
                }
            }
            stored.push(doc);
        }
        Ok(())
    }

    fn drop_database(&self, db: &str) -> Result<()> {
        self.databases.write().remove(db);
        Ok(())
    }

    fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn run_command(
        &self,
        db: &str,
        collection: &str,
        command: Command,
        max_time: Duration,
    ) -> Result<Vec<ExtValue>> {
        let started = Instant::now();
        let result = match command {
            Command::Find { filter, projection } => {
                let docs = self.snapshot(db, collection);
                let projection = parse_find_projection(&projection)?;
                let mut out = Vec::new();
                for doc in docs {
                    if matches_filter(&doc, &filter)? {
                        out.push(match &projection {
                            Some(fields) => project_document(&doc, fields),
                            None => doc,
                        });
                    }
                }
                out
            }
            Command::Aggregate { pipeline } => {
                let docs = self.snapshot(db, collection);
                Pipeline::parse(&pipeline)?.run(docs)?
            }
            Command::Update {
                filter,
                update,
                opts,
            } => {
                let mut databases = self.databases.write();
                let stored = databases
                    .entry(db.to_string())
                    .or_default()
                    .entry(collection.to_string())
                    .or_default();
                apply_update(stored, &filter, &update, &opts)?;
                // the playground shows the full collection after an
                // update, not a write result document
                stored.clone()
            }
        };
        if started.elapsed() > max_time {
            return Err(SandboxError::Execution(
                "operation exceeded time limit".to_string(),
            ));
        }
        Ok(result)
    }
}

impl MemoryEngine {
    fn snapshot(&self, db: &str, collection: &str) -> Vec<ExtValue> {
        self.databases
            .read()
            .get(db)
            .and_then(|c| c.get(collection))
            .cloned()
            .unwrap_or_default()
    }
}
