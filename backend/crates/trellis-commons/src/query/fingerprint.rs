//! Query fingerprints: the public identity of a query on the wire.

use crate::query::params::ParamSchema;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of base64 characters kept from the SHA-256 digest.
const FINGERPRINT_LEN: usize = 30;

/// Sentinel fingerprint of a query the compiler did not recognize.
const INVALID: &str = "invalid";

/// A 30-character base64 prefix of the SHA-256 of a query's canonical form.
///
/// Identical canonical records yield identical fingerprints; the fingerprint
/// is what the client sends in place of the query text. The sentinel value
/// [`Fingerprint::invalid`] marks runtime-constructed queries that never went
/// through the compiler, and the empty fingerprint marks dynamic (unescaped)
/// fragments on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a canonical query record: the normalized
    /// text plus the ordered structural parameter slots. Slot names do not
    /// participate, so call sites differing only in slot naming merge.
    pub fn compute(text: &str, params: &ParamSchema) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update([0u8]);
        hasher.update(params.structural().as_bytes());
        let digest = hasher.finalize();
        let mut encoded = STANDARD.encode(digest);
        encoded.truncate(FINGERPRINT_LEN);
        Fingerprint(encoded)
    }

    /// Fingerprint a bare symbol, used as the target hash of server calls.
    pub fn of_symbol(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut encoded = STANDARD.encode(digest);
        encoded.truncate(FINGERPRINT_LEN);
        Fingerprint(encoded)
    }

    /// The sentinel fingerprint of an uncompiled query.
    pub fn invalid() -> Self {
        Fingerprint(INVALID.to_string())
    }

    /// The empty fingerprint of a dynamic (unescaped) server-side fragment.
    pub fn dynamic() -> Self {
        Fingerprint(String::new())
    }

    pub fn is_invalid(&self) -> bool {
        self.0 == INVALID
    }

    pub fn is_dynamic(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Fingerprint(s.to_string())
    }
}
