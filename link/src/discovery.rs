//! Server discovery.
//!
//! A literal server list is shuffled on load. Otherwise an HTTP GET to the
//! discovery endpoint returns a JSON array of healthy hosts, cached for the
//! configured TTL; when discovery fails and an account id is configured, the
//! client falls back to the tenant's vendor DNS name.

use crate::error::{LinkError, Result};
use crate::settings::Settings;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::time::{Duration, Instant};

/// Vendor host suffix of the `wss://<accountId>.<vendor-host>` fallback.
pub const VENDOR_HOST: &str = "db.trellis.dev";

pub struct Discovery {
    servers: Option<Vec<String>>,
    discovery_url: Option<String>,
    account_id: Option<String>,
    ttl: Duration,
    http: reqwest::Client,
    cache: Mutex<Option<(Instant, Vec<String>)>>,
}

impl Discovery {
    pub fn new(settings: &Settings) -> Self {
        Discovery {
            servers: settings.servers.clone(),
            discovery_url: settings.discovery_url.clone(),
            account_id: settings.account_id.clone(),
            ttl: Duration::from_secs(settings.discovery_ttl_seconds()),
            http: reqwest::Client::new(),
            cache: Mutex::new(None),
        }
    }

    /// The healthy host list, most-preferred first.
    pub async fn hosts(&self) -> Result<Vec<String>> {
        if let Some(servers) = &self.servers {
            let mut shuffled = servers.clone();
            shuffled.shuffle(&mut rand::thread_rng());
            return Ok(shuffled);
        }

        if let Some((fetched_at, hosts)) = self.cache.lock().clone() {
            if fetched_at.elapsed() < self.ttl {
                log::debug!(
                    "[trellis-link] Using cached server list (age {:?})",
                    fetched_at.elapsed()
                );
                return Ok(hosts);
            }
        }

        if let Some(url) = &self.discovery_url {
            match self.fetch(url).await {
                Ok(hosts) if !hosts.is_empty() => {
                    *self.cache.lock() = Some((Instant::now(), hosts.clone()));
                    return Ok(hosts);
                }
                Ok(_) => {
                    log::warn!("[trellis-link] Discovery returned an empty server list");
                }
                Err(e) => {
                    log::warn!("[trellis-link] Discovery failed: {}", e);
                }
            }
        }

        if let Some(account_id) = &self.account_id {
            return Ok(vec![format!("{}.{}", account_id, VENDOR_HOST)]);
        }

        Err(LinkError::NetworkError(
            "no healthy servers could be discovered".to_string(),
        ))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<String>> {
        log::debug!("[trellis-link] Discovering servers from {}", url);
        let response = self.http.get(url).send().await?;
        let hosts = response.json::<Vec<String>>().await?;
        Ok(hosts)
    }

    /// Secure-websocket URL of a discovered host.
    pub fn ws_url(host: &str) -> String {
        format!("wss://{}", host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal_settings(servers: Vec<&str>) -> Settings {
        Settings {
            servers: Some(servers.into_iter().map(str::to_string).collect()),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_literal_list_is_preserved_modulo_order() {
        let discovery = Discovery::new(&literal_settings(vec!["a.example", "b.example", "c.example"]));
        let mut hosts = discovery.hosts().await.unwrap();
        hosts.sort();
        assert_eq!(hosts, vec!["a.example", "b.example", "c.example"]);
    }

    #[tokio::test]
    async fn test_account_id_fallback() {
        let discovery = Discovery::new(&Settings {
            account_id: Some("acme".to_string()),
            discovery_url: Some("http://127.0.0.1:9/unreachable".to_string()),
            ..Settings::default()
        });
        let hosts = discovery.hosts().await.unwrap();
        assert_eq!(hosts, vec![format!("acme.{}", VENDOR_HOST)]);
    }

    #[test]
    fn test_ws_url_shape() {
        assert_eq!(Discovery::ws_url("db-1.example.com"), "wss://db-1.example.com");
    }
}
