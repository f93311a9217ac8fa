// queryground-core/src/engine/mod.rs
//! Document-store engine contract.
//!
//! The sandbox pipeline only needs a thin slice of a document store:
//! bulk inserts, whole-database drops and find/aggregate/update
//! commands. The [`DocumentStore`] trait captures exactly that, and
//! [`MemoryEngine`] is the reference in-memory implementation used by
//! tests and the CLI.

pub mod filter;
pub mod memory;
pub mod pipeline;
pub mod update;

use std::time::Duration;

use crate::error::Result;
use crate::extjson::ExtValue;

pub use memory::MemoryEngine;

/// Options of an update command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOpts {
    /// update every matching document instead of the first one
    pub multi: bool,
    /// insert a new document when nothing matches
    pub upsert: bool,
}

impl UpdateOpts {
    /// Extract `{multi, upsert}` from the third positional argument of
    /// an update query. Anything malformed counts as false.
    pub fn from_stage(stage: &ExtValue) -> UpdateOpts {
        UpdateOpts {
            multi: stage.get("multi").and_then(|v| v.as_bool()).unwrap_or(false),
            upsert: stage.get("upsert").and_then(|v| v.as_bool()).unwrap_or(false),
        }
    }
}

/// A command handed to the engine for one collection
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Find {
        filter: ExtValue,
        projection: ExtValue,
    },
    Aggregate {
        pipeline: Vec<ExtValue>,
    },
    Update {
        filter: ExtValue,
        update: ExtValue,
        opts: UpdateOpts,
    },
}

/// The external document-store collaborator.
///
/// Databases are partitioned by sandbox hash, so concurrent commands
/// against different databases never contend; build ordering is
/// serialized upstream by the cache.
pub trait DocumentStore: Send + Sync {
    /// Ordered bulk insert. Stops at the first failing document,
    /// leaving earlier writes in place; the builder drops the database
    /// on error to avoid partial state.
    fn insert_many(&self, db: &str, collection: &str, docs: Vec<ExtValue>) -> Result<()>;

    /// Drop a whole database and everything in it. Dropping a database
    /// that doesn't exist is not an error.
    fn drop_database(&self, db: &str) -> Result<()>;

    /// Names of the databases currently present
    fn database_names(&self) -> Vec<String>;

    /// Execute a command and return the matching documents.
    /// `max_time` is the query time budget; the engine must give up
    /// once it is exhausted.
    fn run_command(
        &self,
        db: &str,
        collection: &str,
        command: Command,
        max_time: Duration,
    ) -> Result<Vec<ExtValue>>;
}
