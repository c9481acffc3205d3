//! The canonical query record.

pub mod fingerprint;
pub mod merge;
pub mod params;

use fingerprint::Fingerprint;
use params::ParamSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A source location where a query is invoked.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    /// Source unit path, relative to the compiled root.
    pub unit: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.unit, self.line, self.column)
    }
}

/// Canonical representation of a query: normalized text with `$1..$n`
/// placeholders, the ordered parameter schema, validator symbol names, the
/// call sites that reference it, and the fragments it may embed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub fingerprint: Fingerprint,
    pub text: String,
    pub params: ParamSchema,
    #[serde(default)]
    pub validators: Vec<String>,
    #[serde(default)]
    pub referenced: Vec<SourceRef>,
    /// Fingerprints of fragments this query is allowed to embed.
    #[serde(default)]
    pub fragments: Vec<Fingerprint>,
}

impl Query {
    /// Build a compiled query; the fingerprint is derived from the canonical form.
    pub fn new(text: impl Into<String>, params: ParamSchema) -> Self {
        let text = text.into();
        let fingerprint = Fingerprint::compute(&text, &params);
        Query {
            fingerprint,
            text,
            params,
            validators: Vec::new(),
            referenced: Vec::new(),
            fragments: Vec::new(),
        }
    }

    /// Build an uncompiled query carrying the sentinel fingerprint. Executing
    /// one is refused on both sides of the wire.
    pub fn uncompiled(text: impl Into<String>) -> Self {
        Query {
            fingerprint: Fingerprint::invalid(),
            text: text.into(),
            params: ParamSchema::new(),
            validators: Vec::new(),
            referenced: Vec::new(),
            fragments: Vec::new(),
        }
    }

    /// A query is public when it has no session-bound parameter, so the
    /// server may admit it outside an authenticated context.
    pub fn is_public(&self) -> bool {
        !self.params.has_session_param()
    }

    /// Record a call site, keeping `referenced` sorted and deduplicated.
    pub fn add_reference(&mut self, site: SourceRef) {
        if let Err(pos) = self.referenced.binary_search(&site) {
            self.referenced.insert(pos, site);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use params::ParamType;

    fn query_with_param(ty: ParamType) -> Query {
        let mut params = ParamSchema::new();
        params.insert("who", ty).unwrap();
        Query::new("SELECT 1 WHERE x = $1", params)
    }

    #[test]
    fn test_public_bit() {
        assert!(query_with_param(ParamType::String).is_public());
        assert!(!query_with_param(ParamType::Session).is_public());
    }

    #[test]
    fn test_references_dedup() {
        let mut q = query_with_param(ParamType::Int);
        let site = SourceRef {
            unit: "app/main.ts".to_string(),
            line: 10,
            column: 4,
        };
        q.add_reference(site.clone());
        q.add_reference(site);
        assert_eq!(q.referenced.len(), 1);
    }

    #[test]
    fn test_uncompiled_sentinel() {
        let q = Query::uncompiled("SELECT broken");
        assert!(q.fingerprint.is_invalid());
    }
}
