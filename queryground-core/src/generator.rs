// queryground-core/src/generator.rs
// Dataset generator contract

use std::collections::BTreeMap;

use crate::error::Result;
use crate::extjson::ExtValue;

/// External collaborator turning a schema-style configuration into
/// named document sets.
///
/// The builder applies its usual caps and id seeding on top of the
/// generated output, so implementations only need to produce raw
/// documents. Generation must be deterministic for a given config:
/// the same bytes have to yield the same documents on every call,
/// otherwise cached databases and page results stop matching.
pub trait DatasetGenerator: Send + Sync {
    fn generate(&self, config: &[u8]) -> Result<BTreeMap<String, Vec<ExtValue>>>;
}
