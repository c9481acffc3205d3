//! Shared error type for the Trellis data model.
//!
//! Kept dependency-free so every crate in the workspace can use it without
//! pulling in transport or runtime machinery.

use std::fmt;

/// Errors raised by the shared query/whitelist model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A parameter name was empty.
    EmptyParamName,

    /// A parameter name consisted only of digits.
    NumericParamName(String),

    /// A parameter was re-declared with an incompatible type.
    TypeConflict {
        name: String,
        existing: String,
        requested: String,
    },

    /// Two call sites produced the same fingerprint with different validator sets.
    ValidatorSetMismatch(String),

    /// A fingerprint was not present in the whitelist.
    NotWhitelisted(String),

    /// A fragment fingerprint is not in the parent's allowed-fragment set.
    FragmentNotAllowed { parent: String, fragment: String },

    /// An unknown parameter type tag was encountered.
    UnknownTypeTag(String),

    /// Serialization or file I/O failure around the whitelist file.
    Io(String),
}

impl ModelError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::EmptyParamName => write!(f, "Parameter name may not be empty"),
            ModelError::NumericParamName(name) => {
                write!(f, "Parameter name may not be digit-only: {:?}", name)
            }
            ModelError::TypeConflict {
                name,
                existing,
                requested,
            } => write!(
                f,
                "Parameter {:?} re-declared as {} but was already {}",
                name, requested, existing
            ),
            ModelError::ValidatorSetMismatch(fp) => write!(
                f,
                "Query {} is referenced with two different validator sets",
                fp
            ),
            ModelError::NotWhitelisted(fp) => write!(f, "Query {} is not whitelisted", fp),
            ModelError::FragmentNotAllowed { parent, fragment } => write!(
                f,
                "Fragment {} is not allowed inside query {}",
                fragment, parent
            ),
            ModelError::UnknownTypeTag(tag) => write!(f, "Unknown parameter type tag: {:?}", tag),
            ModelError::Io(msg) => write!(f, "Whitelist I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}

/// Result type alias using [`ModelError`].
pub type Result<T> = std::result::Result<T, ModelError>;
