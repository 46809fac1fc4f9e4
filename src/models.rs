//! Core data models for the node warmer

use crate::error::{Result, WarmerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// One URL to probe, split so the dispatcher can point the request at the
/// local node while keeping the public host for virtual hosting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WarmupTarget {
    /// Public host name the site answers to
    pub host: String,
    /// Path including the query string, always starting with `/`
    pub path: String,
}

impl WarmupTarget {
    /// Create a new WarmupTarget
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };

        WarmupTarget {
            host: host.into(),
            path,
        }
    }

    /// Parse an absolute public URL into its host and path
    ///
    /// The query string is kept on the path when present and non-empty.
    /// The port, scheme and fragment are dropped.
    ///
    /// # Returns
    /// * `Ok(WarmupTarget)` if the URL parses and has a host
    /// * `Err(WarmerError::InvalidUrl)` otherwise
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| WarmerError::InvalidUrl(format!("{}: {}", raw, e)))?;

        let host = url
            .host_str()
            .ok_or_else(|| WarmerError::InvalidUrl(format!("{}: missing host", raw)))?;

        let mut path = url.path().to_string();
        if let Some(query) = url.query().filter(|q| !q.is_empty()) {
            path.push('?');
            path.push_str(query);
        }

        Ok(WarmupTarget::new(host, path))
    }

    /// The URL this target is fetched from on the local node
    pub fn local_url(&self, local_base_url: &str) -> String {
        format!("{}{}", local_base_url.trim_end_matches('/'), self.path)
    }
}

impl fmt::Display for WarmupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host, self.path)
    }
}

/// The two independent version axes tracked in the version store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionKey {
    /// Fingerprint of the deployed code (lock file hash)
    CacheCode,
    /// Deployed static content marker
    StaticContent,
}

impl VersionKey {
    /// Durable key name used by version stores
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionKey::CacheCode => "node_warmer/cache_code_version",
            VersionKey::StaticContent => "node_warmer/deployed_static_content_version",
        }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
