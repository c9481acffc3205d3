//! Merging of call sites that produce the same query.

use crate::error::{CompilerError, Result};
use std::collections::BTreeMap;
use trellis_commons::Query;

/// Accumulates one canonical query per fingerprint across all call sites.
#[derive(Debug, Default)]
pub struct SiteSet {
    queries: BTreeMap<String, Query>,
}

impl SiteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a call site's query into the set.
    ///
    /// A second site with the same fingerprint unions the referenced
    /// locations; differing validator sets are a hard error because the same
    /// query cannot have two validation regimes.
    pub fn add(&mut self, query: Query) -> Result<()> {
        let key = query.fingerprint.as_str().to_string();
        match self.queries.get_mut(&key) {
            None => {
                self.queries.insert(key, query);
            }
            Some(existing) => {
                if !same_validator_set(&existing.validators, &query.validators) {
                    return Err(CompilerError::ValidatorSetConflict {
                        fingerprint: key,
                        first: existing.validators.clone(),
                        second: query.validators,
                    });
                }
                for site in query.referenced {
                    existing.add_reference(site);
                }
                for fragment in query.fragments {
                    if !existing.fragments.contains(&fragment) {
                        existing.fragments.push(fragment);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Query> {
        self.queries.values()
    }
}

fn same_validator_set(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&str> = a.iter().map(String::as_str).collect();
    let mut b: Vec<&str> = b.iter().map(String::as_str).collect();
    a.sort_unstable();
    a.dedup();
    b.sort_unstable();
    b.dedup();
    a == b
}
