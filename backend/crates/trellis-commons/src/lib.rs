//! Shared data model for Trellis.
//!
//! This crate holds everything both sides of the wire agree on: the canonical
//! query record and its fingerprint, the whitelist file format, the validation
//! engine, the wire-protocol constants, and the row-set result envelope.
//! It deliberately carries no transport or runtime machinery.

pub mod errors;
pub mod protocol;
pub mod query;
pub mod rowset;
pub mod validate;
pub mod whitelist;

pub use errors::{ModelError, Result};
pub use query::fingerprint::Fingerprint;
pub use query::merge::{merge, MergeOutcome};
pub use query::params::{ParamSchema, ParamType};
pub use query::{Query, SourceRef};
pub use rowset::RowSet;
pub use validate::{validate, ParamMap, SharedErrors, ValidationErrors, Validator};
pub use whitelist::{Whitelist, WhitelistEntry};
