// queryground-core/src/run.rs
// Top-level query pipeline: parse, build, execute, format

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::builder;
use crate::engine::{Command, DocumentStore, UpdateOpts};
use crate::error::{Result, SandboxError};
use crate::extjson::{encode, ExtValue, Profile};
use crate::generator::DatasetGenerator;
use crate::limits::Limits;
use crate::log_debug;
use crate::page::Page;
use crate::parser::{parse_query, sanitize_aggregation_stages, Method, ParsedStatement};
use crate::sandbox::{CacheStats, SandboxCache};

/// Returned verbatim when a query matches nothing
pub const NO_DOC_FOUND: &str = "no document found";

/// The whole sandbox: one engine, one database cache, one optional
/// dataset generator.
pub struct Sandbox<E: DocumentStore> {
    engine: E,
    cache: SandboxCache,
    limits: Limits,
    generator: Option<Box<dyn DatasetGenerator>>,
}

impl<E: DocumentStore> Sandbox<E> {
    pub fn new(engine: E) -> Sandbox<E> {
        Sandbox {
            engine,
            cache: SandboxCache::new(),
            limits: Limits::default(),
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: Box<dyn DatasetGenerator>) -> Sandbox<E> {
        self.generator = Some(generator);
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Sandbox<E> {
        self.limits = limits;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Evict every database unused for longer than the retention window
    pub fn sweep(&self) -> usize {
        self.cache.sweep(&self.engine, self.limits.retention_window)
    }

    /// Run a page and return the formatted result.
    ///
    /// Read queries share one cached database per (config, mode) pair.
    /// Update queries get a unique throwaway database instead, dropped
    /// right after execution: a cached dataset must never observe the
    /// writes of another playground run.
    pub fn run(&self, page: &Page) -> Result<String> {
        let statement = parse_query(&page.query)?;
        log_debug!(
            "running {} on collection {} of database {}",
            statement.method.as_str(),
            statement.collection,
            page.db_hash()
        );

        if statement.method == Method::Update {
            let hash = unique_db_hash(page);
            // forced build: even an empty dataset gets a live entry so
            // the update can still upsert into it
            let outcome = self
                .cache
                .get_or_build(&hash, true, || self.build(&hash, page))
                .and_then(|_| self.execute(&hash, &statement));
            self.cache.discard(&self.engine, &hash);
            return outcome;
        }

        let hash = page.db_hash();
        let entry = self
            .cache
            .get_or_build(&hash, false, || self.build(&hash, page))?;

        // a query on a missing collection would quietly return nothing,
        // surface a clear error instead
        if !entry.has_collection(&statement.collection) {
            return Err(SandboxError::CollectionNotFound(statement.collection));
        }
        self.execute(&hash, &statement)
    }

    fn build(&self, hash: &str, page: &Page) -> Result<(Vec<String>, bool)> {
        let collections = builder::build(
            &self.engine,
            hash,
            page.mode,
            &page.config,
            self.generator.as_deref(),
            &self.limits,
        )?;
        // the engine only materializes a database once a document is
        // inserted, so its absence means the dataset is empty
        let empty = !self.engine.database_names().iter().any(|n| n == hash);
        Ok((collections, empty))
    }

    fn execute(&self, db: &str, statement: &ParsedStatement) -> Result<String> {
        let mut stages = statement.stages.clone();
        let command = match statement.method {
            Method::Find => {
                while stages.len() < 2 {
                    stages.push(ExtValue::empty_object());
                }
                let mut it = stages.into_iter();
                Command::Find {
                    filter: it.next().unwrap_or_else(ExtValue::empty_object),
                    projection: it.next().unwrap_or_else(ExtValue::empty_object),
                }
            }
            Method::Aggregate => Command::Aggregate {
                pipeline: sanitize_aggregation_stages(stages),
            },
            Method::Update => {
                while stages.len() < 3 {
                    stages.push(ExtValue::empty_object());
                }
                let opts = UpdateOpts::from_stage(&stages[2]);
                let mut it = stages.into_iter();
                Command::Update {
                    filter: it.next().unwrap_or_else(ExtValue::empty_object),
                    update: it.next().unwrap_or_else(ExtValue::empty_object),
                    opts,
                }
            }
        };

        let docs = self.engine.run_command(
            db,
            &statement.collection,
            command.clone(),
            self.limits.max_query_time(),
        )?;

        if let Some(verbosity) = &statement.explain {
            let report = explain_report(db, &statement.collection, &command, verbosity, &docs);
            return Ok(encode(&report, Profile::Shell));
        }
        if docs.is_empty() {
            return Ok(NO_DOC_FOUND.to_string());
        }
        Ok(encode(&ExtValue::Array(docs), Profile::Shell))
    }
}

impl<E: DocumentStore + 'static> Sandbox<E> {
    /// Spawn a background thread that sweeps expired databases every
    /// `limits.sweep_interval` until the returned handle is stopped.
    pub fn start_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let sandbox = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let interval = self.limits.sweep_interval;
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                thread::park_timeout(interval);
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                sandbox.sweep();
            }
        });
        SweeperHandle { stop, handle }
    }
}

/// Handle to the background sweeper thread. Dropping it without
/// calling `stop` leaves the thread running for the process lifetime,
/// which is what a server wants.
pub struct SweeperHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Ask the sweeper to exit and wait for it
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.thread().unpark();
        let _ = self.handle.join();
    }
}

// throwaway databases only need process-unique names
static THROWAWAY_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_db_hash(page: &Page) -> String {
    let n = THROWAWAY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}", page.db_hash(), n)
}

/// Shape of the explain output. The engine has a single access path,
/// so the report stays small: the parsed command under `queryPlanner`,
/// plus basic counters when a verbosity above "queryPlanner" asks for
/// execution stats.
fn explain_report(
    db: &str,
    collection: &str,
    command: &Command,
    verbosity: &str,
    docs: &[ExtValue],
) -> ExtValue {
    let mut planner = vec![(
        "namespace".to_string(),
        ExtValue::String(format!("{}.{}", db, collection)),
    )];
    match command {
        Command::Find { filter, projection } => {
            planner.push(("parsedQuery".to_string(), filter.clone()));
            if projection.as_object().map(|e| !e.is_empty()).unwrap_or(false) {
                planner.push(("projection".to_string(), projection.clone()));
            }
        }
        Command::Aggregate { pipeline } => {
            planner.push(("pipeline".to_string(), ExtValue::Array(pipeline.clone())));
        }
        Command::Update { filter, .. } => {
            planner.push(("parsedQuery".to_string(), filter.clone()));
        }
    }
    planner.push((
        "winningPlan".to_string(),
        ExtValue::Object(vec![(
            "stage".to_string(),
            ExtValue::String("COLLSCAN".to_string()),
        )]),
    ));

    let mut report = vec![("queryPlanner".to_string(), ExtValue::Object(planner))];
    if verbosity != "queryPlanner" {
        report.push((
            "executionStats".to_string(),
            ExtValue::Object(vec![
                ("executionSuccess".to_string(), ExtValue::Bool(true)),
                ("nReturned".to_string(), ExtValue::Int32(docs.len() as i32)),
            ]),
        ));
    }
    ExtValue::Object(report)
}
