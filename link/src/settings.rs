//! Client settings.

use crate::error::{LinkError, Result};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// Default lifetime of a discovered server list.
pub const DEFAULT_DISCOVERY_TTL_SECONDS: u64 = 60;

/// Environment variable carrying the compiler-injected application version.
pub const ENV_APP_VERSION: &str = "TRELLIS_APP_VERSION";
/// Environment variable carrying the compiler-injected account id.
pub const ENV_ACCOUNT_ID: &str = "TRELLIS_ACCOUNT_ID";

/// Wait policy used by both `drain` and the unload guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Do not wait / never guard.
    #[default]
    Never,
    /// Quiescent once transport-buffered bytes reach zero.
    WaitForSend,
    /// Quiescent once buffered bytes reach zero and no request is outstanding.
    WaitForAck,
}

/// Callback invoked when the server pushes a version change.
pub type VersionChangeHandler = Arc<dyn Fn() + Send + Sync>;

/// User-extensible reviver applied to every parsed inbound result value.
pub type JsonReviver = Arc<dyn Fn(JsonValue) -> JsonValue + Send + Sync>;

/// Session configuration.
#[derive(Clone, Default)]
pub struct Settings {
    /// Identifies the tenant to discovery and as a DNS fallback.
    pub account_id: Option<String>,
    /// Application version; a mismatch with the server triggers the
    /// version-change callback.
    pub version: Option<String>,
    /// HTTP endpoint returning the healthy server list.
    pub discovery_url: Option<String>,
    /// Cache lifetime for the discovered list.
    pub discovery_ttl_seconds: Option<u64>,
    /// Explicit host list; bypasses discovery and is shuffled on load.
    pub servers: Option<Vec<String>>,
    /// Unload-prevention policy.
    pub prevent_unload: WaitPolicy,
    /// Invoked on a server-push version mismatch.
    pub version_change_handler: Option<VersionChangeHandler>,
    /// Applied to inbound JSON results before envelope rehydration.
    pub json_reviver: Option<JsonReviver>,
}

impl Settings {
    /// Settings seeded from the compiler-injected environment globals.
    pub fn from_env() -> Self {
        Settings {
            account_id: std::env::var(ENV_ACCOUNT_ID).ok(),
            version: std::env::var(ENV_APP_VERSION).ok(),
            ..Settings::default()
        }
    }

    pub fn discovery_ttl_seconds(&self) -> u64 {
        self.discovery_ttl_seconds
            .unwrap_or(DEFAULT_DISCOVERY_TTL_SECONDS)
    }

    /// Validate the settings synchronously at session construction.
    ///
    /// Either a server list or a discovery URL must be present, and a server
    /// list must be non-empty with no blank hosts.
    pub fn validate(&self) -> Result<()> {
        match (&self.servers, &self.discovery_url) {
            (None, None) => Err(LinkError::ConfigurationError(
                "either `servers` or `discovery_url` must be configured".to_string(),
            )),
            (Some(servers), _) => {
                if servers.is_empty() {
                    return Err(LinkError::ConfigurationError(
                        "`servers` must not be empty".to_string(),
                    ));
                }
                if servers.iter().any(|s| s.trim().is_empty()) {
                    return Err(LinkError::ConfigurationError(
                        "`servers` must be a list of non-blank host strings".to_string(),
                    ));
                }
                Ok(())
            }
            (None, Some(_)) => Ok(()),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("account_id", &self.account_id)
            .field("version", &self.version)
            .field("discovery_url", &self.discovery_url)
            .field("discovery_ttl_seconds", &self.discovery_ttl_seconds)
            .field("servers", &self.servers)
            .field("prevent_unload", &self.prevent_unload)
            .field(
                "version_change_handler",
                &self.version_change_handler.as_ref().map(|_| "<fn>"),
            )
            .field("json_reviver", &self.json_reviver.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_servers_or_discovery() {
        let err = Settings::default().validate().unwrap_err();
        assert!(matches!(err, LinkError::ConfigurationError(_)));

        let ok = Settings {
            discovery_url: Some("https://disc.example.com/servers".to_string()),
            ..Settings::default()
        };
        ok.validate().unwrap();

        let ok = Settings {
            servers: Some(vec!["db-1.example.com".to_string()]),
            ..Settings::default()
        };
        ok.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_blank_hosts() {
        let bad = Settings {
            servers: Some(vec!["db-1.example.com".to_string(), "  ".to_string()]),
            ..Settings::default()
        };
        assert!(bad.validate().is_err());

        let empty = Settings {
            servers: Some(vec![]),
            ..Settings::default()
        };
        assert!(empty.validate().is_err());
    }
}
