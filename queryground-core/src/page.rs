// queryground-core/src/page.rs
// Caller-visible unit of work: a (mode, config, query) triple

use base64::engine::general_purpose::URL_SAFE as BASE64_URL;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{Result, SandboxError};
use crate::extjson::compact;
use crate::limits::{Limits, PAGE_ID_LENGTH};

pub const GENERATOR_LABEL: &str = "generator";
pub const SINGLE_COLLECTION_LABEL: &str = "single_collection";
pub const MULTIPLE_COLLECTION_LABEL: &str = "multiple_collection";
pub const UNKNOWN_LABEL: &str = "unknown";

/// How the config document is interpreted when building the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// config is a schema handed to a dataset generator
    GeneratorConfig,
    /// config is the literal document set
    DocumentSet,
}

impl Mode {
    pub const GENERATOR_NAME: &'static str = "generator";

    /// Tag byte used in the persisted record. Do not renumber.
    pub fn as_byte(self) -> u8 {
        match self {
            Mode::GeneratorConfig => 0,
            Mode::DocumentSet => 1,
        }
    }

    pub fn from_byte(b: u8) -> Result<Mode> {
        match b {
            0 => Ok(Mode::GeneratorConfig),
            1 => Ok(Mode::DocumentSet),
            other => Err(SandboxError::Decode(format!("unknown mode tag: {}", other))),
        }
    }
}

/// A playground page. Never mutated after construction; the derived
/// identifiers are pure functions of the content so identical triples
/// always share an id and a database.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub mode: Mode,
    /// configuration used to generate the sample database
    pub config: Vec<u8>,
    /// query to run against the collection / database
    pub query: Vec<u8>,
}

impl Page {
    /// Build a page from raw caller input. `mode_name` defaults to
    /// document-set unless it names the generator mode.
    pub fn new(mode_name: &str, config: &[u8], query: &[u8], limits: &Limits) -> Result<Page> {
        if config.len() + query.len() > limits.max_byte_size {
            return Err(SandboxError::CapExceeded(format!(
                "playground is too big: max size is {} bytes",
                limits.max_byte_size
            )));
        }
        let mode = if mode_name == Mode::GENERATOR_NAME {
            Mode::GeneratorConfig
        } else {
            Mode::DocumentSet
        };
        // compacting here keeps equivalent inputs on the same id and
        // database hash, and gives the rest of the pipeline the
        // whitespace-free form it expects (`db={` prefix detection)
        Ok(Page {
            mode,
            config: compact(config),
            query: compact(query),
        })
    }

    /// External, shareable identifier: digest of the whole content,
    /// base64url-encoded and truncated. Calling id() twice on the same
    /// page always returns the same value.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update([self.mode.as_byte()]);
        hasher.update(&self.query);
        hasher.update(&self.config);
        let sum = hasher.finalize();
        let encoded = BASE64_URL.encode(sum);
        encoded[..PAGE_ID_LENGTH].to_string()
    }

    /// Identifier of the sandbox database backing this page. Excludes
    /// the query on purpose: every page with the same config and mode
    /// shares one built dataset.
    pub fn db_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.config);
        hasher.update([self.mode.as_byte()]);
        let sum = hasher.finalize();
        hex::encode(&sum[..16])
    }

    /// Encode the page for the key/value store.
    ///
    /// v[0:4]  -> little-endian u32, position of the last config byte
    /// v[4]    -> the mode tag
    /// v[5:endConfig] -> the configuration
    /// v[endConfig:]  -> the query (runs to end of buffer)
    pub fn encode(&self) -> Vec<u8> {
        let end_config = 5 + self.config.len();
        let mut v = Vec::with_capacity(end_config + self.query.len());
        v.extend_from_slice(&(end_config as u32).to_le_bytes());
        v.push(self.mode.as_byte());
        v.extend_from_slice(&self.config);
        v.extend_from_slice(&self.query);
        v
    }

    /// Decode a persisted record. Purely a slice operation on the
    /// stored offsets.
    pub fn decode(v: &[u8]) -> Result<Page> {
        if v.len() < 5 {
            return Err(SandboxError::Decode(format!(
                "page record too short: {} bytes",
                v.len()
            )));
        }
        let end_config = u32::from_le_bytes([v[0], v[1], v[2], v[3]]) as usize;
        if end_config < 5 || end_config > v.len() {
            return Err(SandboxError::Decode(format!(
                "page record has invalid config offset: {}",
                end_config
            )));
        }
        Ok(Page {
            mode: Mode::from_byte(v[4])?,
            config: v[5..end_config].to_vec(),
            query: v[end_config..].to_vec(),
        })
    }

    /// Label for metrics, derived from the mode and the config shape
    pub fn label(&self) -> &'static str {
        match self.mode {
            Mode::GeneratorConfig => GENERATOR_LABEL,
            Mode::DocumentSet => {
                if self.config.starts_with(b"[") {
                    SINGLE_COLLECTION_LABEL
                } else if self.config.starts_with(b"db={") {
                    MULTIPLE_COLLECTION_LABEL
                } else {
                    UNKNOWN_LABEL
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::MAX_BYTE_SIZE;

    fn page(mode: &str, config: &str, query: &str) -> Page {
        Page::new(mode, config.as_bytes(), query.as_bytes(), &Limits::default()).unwrap()
    }

    #[test]
    fn test_id_is_deterministic_and_short() {
        let a = page("json", r#"[{"k":1}]"#, "db.collection.find()");
        let b = page("json", r#"[{"k":1}]"#, "db.collection.find()");
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().len(), PAGE_ID_LENGTH);
    }

    #[test]
    fn test_db_hash_ignores_query() {
        let a = page("json", r#"[{"k":1}]"#, "db.collection.find()");
        let b = page("json", r#"[{"k":1}]"#, "db.collection.find({k:1})");
        assert_eq!(a.db_hash(), b.db_hash());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_equivalent_inputs_share_an_id() {
        let a = page("json", "[ { k: 1 } ]", "db.collection.find( { k: 1 } )");
        let b = page("json", "[{k:1}]", "db.collection.find({k:1})");
        assert_eq!(a.id(), b.id());
        assert_eq!(a.db_hash(), b.db_hash());
    }

    #[test]
    fn test_multi_collection_prefix_survives_compaction() {
        let p = page("json", r#"db = { "c": [ {_id: 1} ] }"#, "db.c.find()");
        assert!(p.config.starts_with(b"db={"));
    }

    #[test]
    fn test_db_hash_depends_on_mode() {
        let a = page("json", r#"[{"k":1}]"#, "db.collection.find()");
        let b = page("generator", r#"[{"k":1}]"#, "db.collection.find()");
        assert_ne!(a.db_hash(), b.db_hash());
    }

    #[test]
    fn test_record_layout_is_bit_exact() {
        let p = page("json", r#"[{"k":1}]"#, "db.c.find()");
        let v = p.encode();
        let end_config = 5 + p.config.len();
        assert_eq!(&v[0..4], &(end_config as u32).to_le_bytes());
        assert_eq!(v[4], 1);
        assert_eq!(&v[5..end_config], p.config.as_slice());
        assert_eq!(&v[end_config..], p.query.as_slice());
        assert_eq!(Page::decode(&v).unwrap(), p);
    }

    #[test]
    fn test_decode_rejects_corrupt_records() {
        assert!(Page::decode(&[1, 2]).is_err());
        // offset beyond buffer
        let mut v = page("json", "[]", "q").encode();
        v[0] = 0xFF;
        v[1] = 0xFF;
        assert!(Page::decode(&v).is_err());
    }

    #[test]
    fn test_size_cap() {
        let big = vec![b'a'; MAX_BYTE_SIZE];
        let err = Page::new("json", &big, b"db.c.find()", &Limits::default()).unwrap_err();
        assert!(err.to_string().contains("350000"));
    }

    #[test]
    fn test_labels() {
        assert_eq!(page("json", "[{}]", "q").label(), SINGLE_COLLECTION_LABEL);
        assert_eq!(
            page("json", "db={\"c\":[]}", "q").label(),
            MULTIPLE_COLLECTION_LABEL
        );
        assert_eq!(page("json", "{}", "q").label(), UNKNOWN_LABEL);
        assert_eq!(page("generator", "[{}]", "q").label(), GENERATOR_LABEL);
    }
}
