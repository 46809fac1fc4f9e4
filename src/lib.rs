//! Node Warmer
//!
//! Brings a freshly provisioned application node to a warm state before it
//! takes traffic.
//!
//! # Overview
//!
//! A run compares the fingerprints of the deployed code (hash of the
//! dependency lock file) and of the deployed static content (a marker file)
//! against the values recorded by the previous run:
//!
//! - **Code changed**: record the new version and flush every application cache.
//! - **Content changed**: discover the public URLs to warm and replay them
//!   against the local listener with the public `Host` header, then record the
//!   new version.
//!
//! Either way the captured run log is written to a sentinel file in the public
//! web root. While that file exists, later runs return immediately unless
//! forced.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use node_warmer::{NodeWarmer, WarmerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WarmerConfig::from_file("node_warmer.yaml")?;
//! let local_url = config.local_url.clone();
//! let warmer = NodeWarmer::from_config(config)?;
//!
//! let summary = warmer.warm_node(&local_url, false).await?;
//! println!("Finished in {:?}, log at {}", summary.elapsed, summary.sentinel_path.display());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`NodeWarmer`]: the run state machine
//! - [`Fingerprinter`]: current and stored code/content versions
//! - [`VersionStore`]: durable stored versions ([`FileVersionStore`], [`MemoryVersionStore`])
//! - [`CacheController`]: cache flush backends
//! - [`TargetProvider`]: where the URLs to warm come from, retried by [`discover_targets`]
//! - [`RequestDispatcher`]: batched, self-throttling request replay
//! - [`WarmupClient`]: the HTTP transport ([`HttpWarmupClient`])
//! - [`WarmupLog`]: capturing log that ends up in the sentinel file
//! - [`WarmupMetrics`]: prometheus counters for the run
//!
//! # Configuration
//!
//! ```yaml
//! root_dir: /var/www/shop
//! local_url: http://localhost:80
//! initial_batch_size: 32
//! request_timeout_secs: 60
//! cache_backend: command
//! flush_command: ["bin/magento", "cache:flush"]
//! targets:
//!   stores:
//!     - base_url: https://shop.example.com/
//!       product_id: 42
//! ```
//!
//! See [`WarmerConfig`] for every option.

pub mod cache_controller;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod models;
pub mod node_warmer;
pub mod target_provider;
pub mod version_store;
pub mod warmup_client;
pub mod warmup_log;

// Re-export commonly used types
pub use cache_controller::{
    CacheController, CommandCacheController, NoopCacheController, PurgeCacheController,
};
pub use config::{PurgeConfig, StoreConfig, TargetsConfig, WarmerConfig};
pub use dispatcher::{AttemptOutcome, DispatchAttempt, DispatchReport, RequestDispatcher};
pub use error::{Result, WarmerError};
pub use fingerprint::{Fingerprinter, VersionDelta, VersionSnapshot};
pub use metrics::WarmupMetrics;
pub use models::{VersionKey, WarmupTarget};
pub use node_warmer::{NodeWarmer, WarmupState, WarmupSummary};
pub use target_provider::{
    discover_targets, CompositeProvider, DiscoveryOutcome, RetryPolicy, StorefrontProvider,
    TargetProvider, UrlListProvider,
};
pub use version_store::{FileVersionStore, MemoryVersionStore, VersionStore};
pub use warmup_client::{HttpWarmupClient, WarmupClient, WarmupResponse};
pub use warmup_log::{format_batch, LogEntry, LogLevel, WarmupLog};
