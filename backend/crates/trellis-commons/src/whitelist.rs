//! The whitelist file: the set of fingerprints a server will execute.

use crate::errors::{ModelError, Result};
use crate::query::fingerprint::Fingerprint;
use crate::query::params::ParamSchema;
use crate::query::{Query, SourceRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One whitelist record per unique fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub fingerprint: Fingerprint,
    pub text: String,
    pub params: ParamSchema,
    #[serde(default)]
    pub validators: Vec<String>,
    /// Fragment fingerprints this entry may embed at execution time.
    #[serde(default)]
    pub fragments: Vec<Fingerprint>,
    /// True when the query has no session-bound parameter, so the server may
    /// admit it outside an authenticated context.
    pub public: bool,
    #[serde(default)]
    pub referenced: Vec<SourceRef>,
}

impl From<&Query> for WhitelistEntry {
    fn from(query: &Query) -> Self {
        WhitelistEntry {
            fingerprint: query.fingerprint.clone(),
            text: query.text.clone(),
            params: query.params.clone(),
            validators: query.validators.clone(),
            fragments: query.fragments.clone(),
            public: query.is_public(),
            referenced: query.referenced.clone(),
        }
    }
}

/// The full whitelist of one source tree, keyed by fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Whitelist {
    entries: BTreeMap<String, WhitelistEntry>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: WhitelistEntry) {
        self.entries
            .insert(entry.fingerprint.as_str().to_string(), entry);
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&WhitelistEntry> {
        self.entries.get(fingerprint.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WhitelistEntry> {
        self.entries.values()
    }

    /// A query is executable iff its fingerprint is present.
    pub fn is_executable(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint.as_str())
    }

    /// A parent-with-fragments combination is executable iff every fragment
    /// fingerprint is in the parent's declared allowed-fragment set.
    pub fn check_fragments(
        &self,
        parent: &Fingerprint,
        fragments: &[Fingerprint],
    ) -> Result<()> {
        let entry = self
            .get(parent)
            .ok_or_else(|| ModelError::NotWhitelisted(parent.as_str().to_string()))?;
        for fragment in fragments {
            if !entry.fragments.contains(fragment) {
                return Err(ModelError::FragmentNotAllowed {
                    parent: parent.as_str().to_string(),
                    fragment: fragment.as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| ModelError::io(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| ModelError::io(e.to_string()))
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let raw =
            serde_json::to_string_pretty(self).map_err(|e| ModelError::io(e.to_string()))?;
        fs::write(path, raw).map_err(|e| ModelError::io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::params::ParamType;

    fn sample_query() -> Query {
        let mut params = ParamSchema::new();
        params.insert("id", ParamType::Int).unwrap();
        Query::new("SELECT * FROM u WHERE id = $1", params)
    }

    #[test]
    fn test_executable_lookup() {
        let query = sample_query();
        let mut wl = Whitelist::new();
        wl.insert(WhitelistEntry::from(&query));

        assert!(wl.is_executable(&query.fingerprint));
        assert!(!wl.is_executable(&Fingerprint::invalid()));
    }

    #[test]
    fn test_fragment_gate() {
        let mut parent = sample_query();
        let fragment = Query::new("AND active", ParamSchema::new());
        parent.fragments.push(fragment.fingerprint.clone());

        let mut wl = Whitelist::new();
        wl.insert(WhitelistEntry::from(&parent));

        wl.check_fragments(&parent.fingerprint, &[fragment.fingerprint.clone()])
            .unwrap();

        let stranger = Query::new("AND deleted", ParamSchema::new());
        let err = wl
            .check_fragments(&parent.fingerprint, &[stranger.fingerprint.clone()])
            .unwrap_err();
        assert!(matches!(err, ModelError::FragmentNotAllowed { .. }));
    }

    #[test]
    fn test_public_flag_recorded() {
        let query = sample_query();
        let entry = WhitelistEntry::from(&query);
        assert!(entry.public);

        let mut params = ParamSchema::new();
        params.insert("u", ParamType::Session).unwrap();
        let private = Query::new("SELECT * FROM s WHERE u = $1", params);
        assert!(!WhitelistEntry::from(&private).public);
    }
}
