// queryground-core/src/lib.rs
// Pure Rust API - no server/transport dependencies

pub mod builder;
pub mod engine;
pub mod error;
pub mod extjson;
pub mod generator;
pub mod limits;
pub mod logging;
pub mod page;
pub mod parser;
pub mod run;
pub mod sandbox;
pub mod value_utils;


// Public exports
pub use engine::{Command, DocumentStore, MemoryEngine, UpdateOpts};
pub use error::{Result, SandboxError};
pub use extjson::{compact, decode, encode, ExtValue, ObjectId, Profile};
pub use generator::DatasetGenerator;
pub use limits::Limits;
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use page::{Mode, Page};
pub use parser::{parse_query, Method, ParsedStatement};
pub use run::{Sandbox, SweeperHandle, NO_DOC_FOUND};
pub use sandbox::{CacheStats, SandboxCache, SandboxEntry};
