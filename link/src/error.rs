//! Error types for trellis-link client operations.

use std::fmt;
use trellis_commons::protocol::ErrorType;
use trellis_commons::ValidationErrors;

/// Result type alias using [`LinkError`].
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur during trellis-link operations.
#[derive(Debug)]
pub enum LinkError {
    /// Network or HTTP discovery errors
    NetworkError(String),

    /// Invalid client settings (no servers and no discovery URL, blank hosts)
    ConfigurationError(String),

    /// JSON serialization/deserialization errors
    SerializationError(String),

    /// Websocket transport errors
    TransportError(String),

    /// Malformed inbound frame, binary frame, or unrecognized push
    ProtocolError(String),

    /// The request was terminated by transport loss or an explicit close
    ConnectionClosed,

    /// The query's fingerprint is the sentinel: the compiler never saw it
    UncompiledQuery,

    /// Validation failed, locally or reconstituted from the server
    Validation(ValidationErrors),

    /// A tagged error returned by the server
    Server { kind: ErrorType, message: String },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkError(msg) => write!(f, "Network error: {}", msg),
            Self::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            Self::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Self::TransportError(msg) => write!(f, "Transport error: {}", msg),
            Self::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::UncompiledQuery => {
                write!(f, "Query was not compiled into the whitelist")
            }
            Self::Validation(errors) => write!(f, "Validation failed: {}", errors),
            Self::Server { kind, message } => write!(f, "Server error ({:?}): {}", kind, message),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        Self::NetworkError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::TransportError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LinkError::NetworkError("connection refused".to_string());
        assert_eq!(err.to_string(), "Network error: connection refused");

        let err = LinkError::ConnectionClosed;
        assert_eq!(err.to_string(), "Connection closed");

        let err = LinkError::Server {
            kind: ErrorType::BadResult,
            message: "row decode failed".to_string(),
        };
        assert_eq!(err.to_string(), "Server error (BadResult): row decode failed");
    }
}
