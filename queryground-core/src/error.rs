// queryground-core/src/error.rs
// Error taxonomy for the sandbox pipeline

use thiserror::Error;

/// All errors are request-scoped: they are returned to the caller and
/// never abort the process.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Query statement doesn't match the `db.<coll>.<method>(...)` grammar
    #[error("error in query:\n  {0}")]
    Syntax(String),

    /// Malformed extended-JSON payload (bad hex length, unknown function,
    /// out-of-range binary subtype, ...)
    #[error("fail to parse content of query: {0}")]
    Decode(String),

    /// Config matches neither an array of documents nor the `db={...}` shape
    #[error("error in configuration:\n  {0}")]
    ConfigFormat(String),

    /// Too many collections, or the playground payload is too large
    #[error("{0}")]
    CapExceeded(String),

    /// Database population failed (e.g. duplicate _id on insert)
    #[error("error in configuration:\n  {0}")]
    BuildFailure(String),

    /// The execution engine rejected the command
    #[error("query failed: {0}")]
    Execution(String),

    /// Query targets a collection that was never created by the config
    #[error("collection \"{0}\" doesn't exist")]
    CollectionNotFound(String),

    /// JSON serialization error (interop with plain-JSON collaborators)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
