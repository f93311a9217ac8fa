// queryground-core/src/extjson/mod.rs
//! Codec for the JSON superset used by the shell-like query language.
//!
//! On top of standard JSON the dialect accepts unquoted keys, trailing
//! commas, single-quoted strings and a fixed set of typed literals in
//! both named-call (`ObjectId("...")`) and keyed (`{"$oid":"..."}`)
//! spellings. Decoded values are a closed tagged enum, [`ExtValue`];
//! encoding is type-directed with two profiles, canonical and shell.

pub mod compact;
pub mod decode;
pub mod encode;
pub mod registry;
pub mod value;

pub use compact::compact;
pub use decode::decode;
pub use encode::{encode, Profile};
pub use value::{ExtValue, ObjectId};
