use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::WELL_KNOWN_PATH;
use crate::core::errors::ResourceXError;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// The discovery document served at `/.well-known/resourcex`.
#[derive(Debug, Deserialize)]
struct WellKnownDocument {
    #[serde(default)]
    #[allow(dead_code)]
    version: Option<String>,
    #[serde(default)]
    registries: Vec<String>,
}

/// Resolves a registry domain to its API endpoint via the well-known
/// document, memoizing per instance.
pub struct Discovery {
    http: reqwest::Client,
    cache: RwLock<HashMap<String, Url>>,
}

impl Discovery {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The endpoint advertised by `domain`: the first entry of its
    /// well-known registries list.
    ///
    /// Loopback and `localhost` authorities are queried over plain HTTP so
    /// that local registries need no TLS; everything else uses HTTPS.
    pub async fn discover(&self, domain: &str, ct: &CancellationToken) -> Result<Url> {
        {
            let cache = self.cache.read().await;
            if let Some(endpoint) = cache.get(domain) {
                return Ok(endpoint.clone());
            }
        }

        let endpoint = self.fetch(domain, ct).await?;
        debug!(domain, %endpoint, "discovered registry endpoint");

        let mut cache = self.cache.write().await;
        cache.insert(domain.to_string(), endpoint.clone());
        Ok(endpoint)
    }

    async fn fetch(&self, domain: &str, ct: &CancellationToken) -> Result<Url> {
        let scheme = if is_plain_http_authority(domain) {
            "http"
        } else {
            "https"
        };
        let url = Url::parse(&format!("{scheme}://{domain}{WELL_KNOWN_PATH}"))
            .map_err(|err| discovery_failed(domain, err))?;

        let response = tokio::select! {
            _ = ct.cancelled() => return Err(ResourceXError::Cancelled.into()),
            response = self.http.get(url).timeout(DISCOVERY_TIMEOUT).send() => {
                response.map_err(|err| {
                    if err.is_timeout() {
                        ResourceXError::Timeout { reason: err.to_string() }.into()
                    } else {
                        discovery_failed(domain, err)
                    }
                })?
            }
        };
        if !response.status().is_success() {
            return Err(discovery_failed(
                domain,
                format!("well-known endpoint returned {}", response.status()),
            ));
        }

        let document: WellKnownDocument = response
            .json()
            .await
            .map_err(|err| discovery_failed(domain, err))?;

        let Some(first) = document.registries.first() else {
            return Err(ResourceXError::EmptyRegistries {
                domain: domain.to_string(),
            }
            .into());
        };
        Url::parse(first).map_err(|err| discovery_failed(domain, err))
    }
}

fn discovery_failed(domain: &str, reason: impl std::fmt::Display) -> anyhow::Error {
    ResourceXError::DiscoveryFailed {
        domain: domain.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn is_plain_http_authority(domain: &str) -> bool {
    let host = domain.split(':').next().unwrap_or(domain);
    host == "localhost" || host == "127.0.0.1" || host == "[::1]"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_selection() {
        assert!(is_plain_http_authority("localhost"));
        assert!(is_plain_http_authority("localhost:3098"));
        assert!(is_plain_http_authority("127.0.0.1:8080"));
        assert!(!is_plain_http_authority("example.com"));
        assert!(!is_plain_http_authority("registry.example.com:8443"));
    }

    #[test]
    fn well_known_document_shape() {
        let document: WellKnownDocument = serde_json::from_str(
            r#"{"version":"1","registries":["https://registry.example.com"]}"#,
        )
        .unwrap();
        assert_eq!(document.registries, ["https://registry.example.com"]);

        let empty: WellKnownDocument = serde_json::from_str(r#"{"registries":[]}"#).unwrap();
        assert!(empty.registries.is_empty());
    }
}
