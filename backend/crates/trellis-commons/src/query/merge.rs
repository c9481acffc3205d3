//! Fragment composition: merging whitelisted fragments into a parent query.
//!
//! The compile-time merge preserves the parent's fingerprint; the participating
//! fragment fingerprints travel alongside the parameters so the server can
//! check each one against the parent's allowed-fragment set. Flattening of
//! fragment text into the parent (which strips the fingerprint) is a
//! server-only behavior and lives in the tenant runtime.

use crate::errors::Result;
use crate::query::Query;

/// Result of a fragment merge: the merged record plus the parameter renames
/// that were applied to resolve name collisions.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub query: Query,
    /// `(fragment_param, renamed_to)` pairs, one per collision.
    pub renames: Vec<(String, String)>,
}

/// Merge `fragments` into `parent`, fingerprint-preserving.
///
/// Parameters merge by name. A fragment parameter whose name collides with an
/// already-declared one is renamed by appending the first free integer >= 2,
/// and a warning is logged for each rename.
pub fn merge(parent: &Query, fragments: &[&Query]) -> Result<MergeOutcome> {
    let mut merged = parent.clone();
    let mut renames = Vec::new();

    for fragment in fragments {
        for (name, ty) in fragment.params.iter() {
            let final_name = if merged.params.contains(name) {
                let renamed = next_free_name(&merged, name);
                log::warn!(
                    "Fragment parameter {:?} collides with an existing parameter; renamed to {:?}",
                    name,
                    renamed
                );
                renames.push((name.to_string(), renamed.clone()));
                renamed
            } else {
                name.to_string()
            };
            merged.params.insert(&final_name, ty.clone())?;
        }

        for validator in &fragment.validators {
            if !merged.validators.contains(validator) {
                merged.validators.push(validator.clone());
            }
        }

        merged.fragments.push(fragment.fingerprint.clone());
    }

    Ok(MergeOutcome {
        query: merged,
        renames,
    })
}

fn next_free_name(query: &Query, base: &str) -> String {
    let mut suffix = 2u32;
    loop {
        let candidate = format!("{}{}", base, suffix);
        if !query.params.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
