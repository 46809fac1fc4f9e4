//! Warmup target discovery
//!
//! A [`TargetProvider`] produces the ordered list of public URLs to replay
//! against the local node. Discovery may fail transiently (database not
//! ready, file being rewritten), so the orchestrator goes through
//! [`discover_targets`], which retries a bounded number of times and then
//! degrades to an empty list instead of aborting the run.

use crate::config::{StoreConfig, TargetsConfig};
use crate::error::{Result, WarmerError};
use crate::models::WarmupTarget;
use crate::warmup_log::WarmupLog;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Source of warmup targets
#[async_trait]
pub trait TargetProvider: Send + Sync {
    async fn targets(&self) -> Result<Vec<WarmupTarget>>;
}

/// Inline URLs plus an optional URL file, one absolute URL per line.
///
/// The file is re-read on every call. Blank lines and `#` comments are skipped.
pub struct UrlListProvider {
    urls: Vec<String>,
    url_file: Option<PathBuf>,
}

impl UrlListProvider {
    pub fn new(urls: Vec<String>, url_file: Option<PathBuf>) -> Self {
        UrlListProvider { urls, url_file }
    }
}

#[async_trait]
impl TargetProvider for UrlListProvider {
    async fn targets(&self) -> Result<Vec<WarmupTarget>> {
        let mut targets = self
            .urls
            .iter()
            .map(|url| WarmupTarget::from_url(url))
            .collect::<Result<Vec<_>>>()?;

        if let Some(path) = &self.url_file {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| WarmerError::io_at(path, e))?;

            for line in content.lines().map(str::trim) {
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                targets.push(WarmupTarget::from_url(line)?);
            }
        }

        Ok(targets)
    }
}

/// Standard storefront pages for each configured store
pub struct StorefrontProvider {
    stores: Vec<StoreConfig>,
}

const STOREFRONT_PAGES: &[&str] = &[
    "",
    "customer/account/login",
    "customer/account/create",
    "customer/account/forgotpassword",
    "checkout/cart",
    "catalogsearch/result/?q=test",
];

impl StorefrontProvider {
    pub fn new(stores: Vec<StoreConfig>) -> Self {
        StorefrontProvider { stores }
    }

    fn store_urls(store: &StoreConfig) -> Vec<String> {
        let base = if store.base_url.ends_with('/') {
            store.base_url.clone()
        } else {
            format!("{}/", store.base_url)
        };

        let mut urls: Vec<String> = STOREFRONT_PAGES
            .iter()
            .map(|page| format!("{}{}", base, page))
            .collect();

        if let Some(id) = store.product_id {
            urls.push(format!("{}catalog/product/view/id/{}", base, id));
        }
        if let Some(id) = store.category_id {
            urls.push(format!("{}catalog/category/view/id/{}", base, id));
        }

        urls
    }
}

#[async_trait]
impl TargetProvider for StorefrontProvider {
    async fn targets(&self) -> Result<Vec<WarmupTarget>> {
        self.stores
            .iter()
            .flat_map(Self::store_urls)
            .map(|url| WarmupTarget::from_url(&url))
            .collect()
    }
}

/// Concatenates several providers; any failure fails the whole call
pub struct CompositeProvider {
    providers: Vec<Arc<dyn TargetProvider>>,
}

impl CompositeProvider {
    pub fn new(providers: Vec<Arc<dyn TargetProvider>>) -> Self {
        CompositeProvider { providers }
    }

    /// Build the provider chain described by the `targets` config section.
    /// Relative URL file paths are resolved by the caller.
    pub fn from_config(targets: &TargetsConfig, url_file: Option<PathBuf>) -> Self {
        let mut providers: Vec<Arc<dyn TargetProvider>> = Vec::new();

        if !targets.stores.is_empty() {
            providers.push(Arc::new(StorefrontProvider::new(targets.stores.clone())));
        }
        if !targets.urls.is_empty() || url_file.is_some() {
            providers.push(Arc::new(UrlListProvider::new(targets.urls.clone(), url_file)));
        }

        CompositeProvider::new(providers)
    }
}

#[async_trait]
impl TargetProvider for CompositeProvider {
    async fn targets(&self) -> Result<Vec<WarmupTarget>> {
        let mut all = Vec::new();
        for provider in &self.providers {
            all.extend(provider.targets().await?);
        }
        Ok(all)
    }
}

/// Retry policy for target discovery
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: usize,
    /// Backoff before each retry in milliseconds
    pub backoff_ms: Vec<u64>,
}

const MAX_BACKOFF_MS: u64 = 5_000;

impl RetryPolicy {
    /// Exponential backoff starting at `base_backoff_ms`, capped at five seconds
    pub fn new(max_attempts: usize, base_backoff_ms: u64) -> Self {
        let backoff_ms = (0..max_attempts.saturating_sub(1))
            .map(|i| {
                base_backoff_ms
                    .saturating_mul(2u64.saturating_pow(i as u32))
                    .min(MAX_BACKOFF_MS)
            })
            .collect();

        RetryPolicy {
            max_attempts,
            backoff_ms,
        }
    }

    /// Backoff after the given (1-based) failed attempt
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let ms = self
            .backoff_ms
            .get(attempt.saturating_sub(1))
            .copied()
            .unwrap_or_else(|| *self.backoff_ms.last().unwrap_or(&0));
        Duration::from_millis(ms)
    }
}

/// Result of a discovery run
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub targets: Vec<WarmupTarget>,
    /// Attempts made, including the successful one
    pub attempts: usize,
    /// Every attempt failed and `targets` is the empty fallback
    pub exhausted: bool,
}

/// Ask the provider for targets, retrying per `policy`.
///
/// Each failure is logged as an error with its attempt number. After the last
/// failed attempt an empty list is returned with `exhausted` set.
pub async fn discover_targets(
    provider: &dyn TargetProvider,
    policy: &RetryPolicy,
    log: &WarmupLog,
) -> DiscoveryOutcome {
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match provider.targets().await {
            Ok(targets) => {
                return DiscoveryOutcome {
                    targets,
                    attempts: attempt,
                    exhausted: false,
                };
            }
            Err(e) => {
                log.error(format!(
                    "Unable to fetch warmup targets during attempt {}: {} ({:?})",
                    attempt, e, e
                ));

                if attempt < max_attempts {
                    let backoff = policy.backoff_duration(attempt);
                    if !backoff.is_zero() {
                        sleep(backoff).await;
                    }
                }
            }
        }
    }

    log.error(format!(
        "Giving up on target discovery after {} attempts, continuing with no targets",
        max_attempts
    ));

    DiscoveryOutcome {
        targets: Vec::new(),
        attempts: max_attempts,
        exhausted: true,
    }
}
