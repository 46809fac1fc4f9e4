//! Configuration management for the node warmer

use crate::error::{Result, WarmerError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a warmup run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmerConfig {
    /// Application root directory (default: current directory)
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Public web root, relative to `root_dir` (default: pub)
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,

    /// Dependency lock file hashed into the code version, relative to `root_dir`
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// Deployed static content marker, relative to `root_dir`
    #[serde(default = "default_content_marker")]
    pub content_marker: PathBuf,

    /// Name of the sentinel file inside the public web root (default: WARMUP)
    #[serde(default = "default_sentinel_name")]
    pub sentinel_name: String,

    /// Base URL of the local application listener
    #[serde(default = "default_local_url")]
    pub local_url: String,

    /// Node identifier shown in the log (default: host name)
    #[serde(default)]
    pub node_id: Option<String>,

    /// Initial number of concurrent warmup requests per batch (default: 32)
    #[serde(default = "default_initial_batch_size")]
    pub initial_batch_size: usize,

    /// Per-request timeout in seconds (default: 60)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum redirects followed per request (default: 10)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// User-Agent sent with warmup requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Value of the X-Forwarded-Proto header (default: https)
    #[serde(default = "default_forwarded_proto")]
    pub forwarded_proto: String,

    /// Attempts per target before it is abandoned; 0 means unbounded (default: 10)
    #[serde(default = "default_max_target_attempts")]
    pub max_target_attempts: usize,

    /// Target discovery attempts before falling back to an empty list (default: 10)
    #[serde(default = "default_discovery_attempts")]
    pub discovery_attempts: usize,

    /// Base backoff between discovery attempts in milliseconds (default: 0)
    #[serde(default)]
    pub discovery_backoff_ms: u64,

    /// Whether exhausted discovery still records the content version (default: true)
    #[serde(default = "default_true")]
    pub mark_content_on_empty_targets: bool,

    /// JSON file holding stored versions, relative to `root_dir`
    #[serde(default = "default_version_store_path")]
    pub version_store_path: PathBuf,

    /// Where warmup targets come from
    #[serde(default)]
    pub targets: TargetsConfig,

    /// Cache flush backend: "command", "purge" or "none" (default: "command")
    #[serde(default = "default_cache_backend")]
    pub cache_backend: String,

    /// Command run by the "command" backend, executed in `root_dir`
    #[serde(default = "default_flush_command")]
    pub flush_command: Vec<String>,

    /// Purge endpoint used by the "purge" backend
    #[serde(default)]
    pub purge: Option<PurgeConfig>,

    /// Optional prometheus text file written at the end of a run
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,
}

/// Sources of warmup targets
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetsConfig {
    /// Absolute public URLs to warm
    #[serde(default)]
    pub urls: Vec<String>,

    /// File with one absolute URL per line, relative to `root_dir`
    #[serde(default)]
    pub url_file: Option<PathBuf>,

    /// Storefronts whose standard pages are warmed
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
}

/// A storefront to warm
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Public base URL of the store, e.g. "https://shop.example.com/"
    pub base_url: String,

    /// Product id used for the product page probe
    #[serde(default)]
    pub product_id: Option<u64>,

    /// Category id used for the category page probe
    #[serde(default)]
    pub category_id: Option<u64>,
}

/// Configuration for the HTTP PURGE cache backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurgeConfig {
    /// URL the PURGE request is sent to
    pub url: String,

    /// Bearer token for the purge endpoint (optional)
    #[serde(default)]
    pub auth_token: Option<String>,
}

// Default value functions for serde
fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("pub")
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("composer.lock")
}

fn default_content_marker() -> PathBuf {
    PathBuf::from("pub/static/deployed_version.txt")
}

fn default_sentinel_name() -> String {
    "WARMUP".to_string()
}

fn default_local_url() -> String {
    "http://localhost:80".to_string()
}

fn default_initial_batch_size() -> usize {
    32
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_redirects() -> usize {
    10
}

fn default_user_agent() -> String {
    format!("node-warmer/{}", env!("CARGO_PKG_VERSION"))
}

fn default_forwarded_proto() -> String {
    "https".to_string()
}

fn default_max_target_attempts() -> usize {
    10
}

fn default_discovery_attempts() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_version_store_path() -> PathBuf {
    PathBuf::from("var/node_warmer/versions.json")
}

fn default_cache_backend() -> String {
    "command".to_string()
}

fn default_flush_command() -> Vec<String> {
    vec!["bin/magento".to_string(), "cache:flush".to_string()]
}

impl Default for WarmerConfig {
    fn default() -> Self {
        WarmerConfig {
            root_dir: default_root_dir(),
            public_dir: default_public_dir(),
            lock_file: default_lock_file(),
            content_marker: default_content_marker(),
            sentinel_name: default_sentinel_name(),
            local_url: default_local_url(),
            node_id: None,
            initial_batch_size: default_initial_batch_size(),
            request_timeout_secs: default_request_timeout_secs(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            forwarded_proto: default_forwarded_proto(),
            max_target_attempts: default_max_target_attempts(),
            discovery_attempts: default_discovery_attempts(),
            discovery_backoff_ms: 0,
            mark_content_on_empty_targets: default_true(),
            version_store_path: default_version_store_path(),
            targets: TargetsConfig::default(),
            cache_backend: default_cache_backend(),
            flush_command: default_flush_command(),
            purge: None,
            metrics_textfile: None,
        }
    }
}

impl WarmerConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(WarmerConfig)` if loading and validation succeed
    /// * `Err(WarmerError)` if the file cannot be read or the config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            WarmerError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: WarmerConfig = serde_yaml::from_str(&content).map_err(|e| {
            WarmerError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Create a configuration rooted at `root_dir` with default settings
    pub fn for_root(root_dir: impl Into<PathBuf>) -> Self {
        WarmerConfig {
            root_dir: root_dir.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - initial_batch_size, request_timeout_secs and discovery_attempts must be > 0
    /// - local_url must be an absolute http(s) URL
    /// - sentinel_name must be a bare file name
    /// - the cache backend must be known and fully configured
    pub fn validate(&self) -> Result<()> {
        if self.initial_batch_size == 0 {
            return Err(WarmerError::ConfigError(
                "initial_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(WarmerError::ConfigError(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.discovery_attempts == 0 {
            return Err(WarmerError::ConfigError(
                "discovery_attempts must be greater than 0".to_string(),
            ));
        }

        match url::Url::parse(&self.local_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(WarmerError::ConfigError(format!(
                    "local_url must use http or https, got '{}'",
                    url.scheme()
                )));
            }
            Err(e) => {
                return Err(WarmerError::ConfigError(format!(
                    "Invalid local_url '{}': {}",
                    self.local_url, e
                )));
            }
        }

        if self.sentinel_name.is_empty()
            || self.sentinel_name.contains('/')
            || self.sentinel_name.contains('\\')
        {
            return Err(WarmerError::ConfigError(format!(
                "sentinel_name must be a plain file name, got '{}'",
                self.sentinel_name
            )));
        }

        match self.cache_backend.as_str() {
            "command" => {
                if self.flush_command.is_empty() {
                    return Err(WarmerError::ConfigError(
                        "flush_command is required when cache_backend is 'command'".to_string(),
                    ));
                }
            }
            "purge" => match self.purge {
                Some(ref purge) if !purge.url.is_empty() => {}
                _ => {
                    return Err(WarmerError::ConfigError(
                        "purge.url is required when cache_backend is 'purge'".to_string(),
                    ));
                }
            },
            "none" => {}
            other => {
                return Err(WarmerError::ConfigError(format!(
                    "Invalid cache_backend '{}', must be 'command', 'purge' or 'none'",
                    other
                )));
            }
        }

        Ok(())
    }

    /// Resolve a path relative to the application root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }

    /// Location of the sentinel file: `<public-root>/<sentinel_name>`
    pub fn sentinel_path(&self) -> PathBuf {
        self.resolve(&self.public_dir).join(&self.sentinel_name)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Per-target attempt cap, `None` when unbounded
    pub fn target_attempt_limit(&self) -> Option<usize> {
        if self.max_target_attempts == 0 {
            None
        } else {
            Some(self.max_target_attempts)
        }
    }
}
