//! HTTP transport for warmup requests

use crate::config::WarmerConfig;
use crate::error::{Result, WarmerError};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, HOST};
use reqwest::{redirect, Client};
use std::time::Duration;

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Outcome of a request that reached the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupResponse {
    /// HTTP status code
    pub status: u16,
    /// Canonical reason phrase, empty for unknown codes
    pub reason: String,
    /// Size of the drained body in bytes
    pub body_bytes: usize,
}

/// Issues a single GET against the local node on behalf of a public host.
///
/// Any HTTP status is a successful response. Only transport failures
/// (connect, timeout, protocol, body read) are errors.
#[async_trait]
pub trait WarmupClient: Send + Sync {
    async fn get(&self, url: &str, host: &str) -> Result<WarmupResponse>;
}

/// reqwest-backed warmup client
pub struct HttpWarmupClient {
    http_client: Client,
    forwarded_proto: HeaderValue,
}

impl HttpWarmupClient {
    /// Create a client from the warmup settings of `config`
    pub fn from_config(config: &WarmerConfig) -> Result<Self> {
        Self::new(
            config.request_timeout(),
            config.max_redirects,
            &config.user_agent,
            &config.forwarded_proto,
        )
    }

    pub fn new(
        timeout: Duration,
        max_redirects: usize,
        user_agent: &str,
        forwarded_proto: &str,
    ) -> Result<Self> {
        let redirect_policy = if max_redirects == 0 {
            redirect::Policy::none()
        } else {
            redirect::Policy::limited(max_redirects)
        };

        let http_client = Client::builder()
            .timeout(timeout)
            .redirect(redirect_policy)
            .user_agent(user_agent)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| WarmerError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        let forwarded_proto = HeaderValue::from_str(forwarded_proto).map_err(|e| {
            WarmerError::ConfigError(format!("Invalid forwarded_proto '{}': {}", forwarded_proto, e))
        })?;

        Ok(HttpWarmupClient {
            http_client,
            forwarded_proto,
        })
    }
}

#[async_trait]
impl WarmupClient for HttpWarmupClient {
    async fn get(&self, url: &str, host: &str) -> Result<WarmupResponse> {
        let host_value = HeaderValue::from_str(host)
            .map_err(|e| WarmerError::InvalidUrl(format!("Invalid host '{}': {}", host, e)))?;

        let response = self
            .http_client
            .get(url)
            .header(HOST, host_value.clone())
            .header(X_FORWARDED_HOST, host_value)
            .header(X_FORWARDED_PROTO, self.forwarded_proto.clone())
            .send()
            .await
            .map_err(WarmerError::from_transport)?;

        let status = response.status();

        // Drain the body so the backend finishes rendering and storing the page.
        let body = response.bytes().await.map_err(WarmerError::from_transport)?;

        Ok(WarmupResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            body_bytes: body.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_from_default_config() {
        assert!(HttpWarmupClient::from_config(&WarmerConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_forwarded_proto() {
        let result = HttpWarmupClient::new(Duration::from_secs(1), 0, "ua", "bad\nvalue");
        assert!(matches!(result, Err(WarmerError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let client = HttpWarmupClient::new(Duration::from_secs(2), 0, "ua", "https").unwrap();
        // Port 9 (discard) is not expected to be listening on loopback.
        let err = client
            .get("http://127.0.0.1:9/", "shop.example.com")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
