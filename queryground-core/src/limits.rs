// queryground-core/src/limits.rs
// Resource caps and time budgets for sandbox databases

use std::time::Duration;

/// Max combined size of config + query for a single playground.
/// This value is the minimum we can set to avoid breaking already
/// saved playgrounds.
pub const MAX_BYTE_SIZE: usize = 350 * 1000;

/// Length of the external page id. Do not change this value.
pub const PAGE_ID_LENGTH: usize = 11;

/// Max number of collections to create at once.
pub const MAX_COLLECTIONS: usize = 10;

/// Max number of documents in a collection. Extra documents are
/// truncated, not rejected.
pub const MAX_DOCS_PER_COLLECTION: usize = 100;

/// How long an unused sandbox database is kept before the sweep
/// drops it.
pub const RETENTION_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Interval between two eviction sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Total request deadline.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(25);

/// I/O slack reserved for reading the request.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Resource limits applied to every sandbox build and query.
///
/// The defaults match production; tests lower the retention window to
/// exercise eviction without waiting.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_byte_size: usize,
    pub max_collections: usize,
    pub max_docs_per_collection: usize,
    pub retention_window: Duration,
    pub sweep_interval: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
}

impl Limits {
    /// Max time a query can run before being aborted by the engine.
    pub fn max_query_time(&self) -> Duration {
        self.write_timeout
            .checked_sub(self.read_timeout)
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_byte_size: MAX_BYTE_SIZE,
            max_collections: MAX_COLLECTIONS,
            max_docs_per_collection: MAX_DOCS_PER_COLLECTION,
            retention_window: RETENTION_WINDOW,
            sweep_interval: SWEEP_INTERVAL,
            write_timeout: WRITE_TIMEOUT,
            read_timeout: READ_TIMEOUT,
        }
    }
}
