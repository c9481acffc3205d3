//! Error types for the whitelist compiler.

use thiserror::Error;
use trellis_commons::ModelError;

/// Hard compiler failures. Unresolved call sites are warnings, not errors;
/// these variants abort the build.
#[derive(Error, Debug)]
pub enum CompilerError {
    #[error("Source root error: {0}")]
    SourceRoot(String),

    #[error("Malformed AST unit {path}: {message}")]
    MalformedUnit { path: String, message: String },

    #[error("{site}: {message}")]
    Template { site: String, message: String },

    #[error("Query {fingerprint} has conflicting validator sets ({first:?} vs {second:?})")]
    ValidatorSetConflict {
        fingerprint: String,
        first: Vec<String>,
        second: Vec<String>,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Whitelist output error: {0}")]
    Output(String),
}

/// Result type alias for compiler operations.
pub type Result<T> = std::result::Result<T, CompilerError>;
