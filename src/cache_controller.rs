//! Cache flush backends

use crate::config::{PurgeConfig, WarmerConfig};
use crate::error::{Result, WarmerError};
use async_trait::async_trait;
use reqwest::{Client, Method};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Flushes every generated cache of the application
#[async_trait]
pub trait CacheController: Send + Sync {
    async fn flush_all(&self) -> Result<()>;
}

/// Build the controller selected by `cache_backend`
pub fn from_config(config: &WarmerConfig) -> Result<Arc<dyn CacheController>> {
    match config.cache_backend.as_str() {
        "command" => Ok(Arc::new(CommandCacheController::new(
            config.flush_command.clone(),
            config.root_dir.clone(),
        )?)),
        "purge" => {
            let purge = config.purge.clone().ok_or_else(|| {
                WarmerError::ConfigError("purge section is required for cache_backend 'purge'".to_string())
            })?;
            Ok(Arc::new(PurgeCacheController::new(purge, config.request_timeout())?))
        }
        "none" => Ok(Arc::new(NoopCacheController)),
        other => Err(WarmerError::ConfigError(format!(
            "Invalid cache_backend '{}'",
            other
        ))),
    }
}

/// Runs an external command, e.g. `bin/magento cache:flush`
pub struct CommandCacheController {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl CommandCacheController {
    pub fn new(argv: Vec<String>, working_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut argv = argv.into_iter();
        let program = argv
            .next()
            .ok_or_else(|| WarmerError::ConfigError("flush command must not be empty".to_string()))?;

        Ok(CommandCacheController {
            program,
            args: argv.collect(),
            working_dir: working_dir.into(),
        })
    }
}

#[async_trait]
impl CacheController for CommandCacheController {
    async fn flush_all(&self) -> Result<()> {
        debug!("Running flush command {} {:?}", self.program, self.args);

        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .output()
            .await
            .map_err(|e| {
                WarmerError::CacheFlushError(format!("Failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            return Err(WarmerError::CacheFlushError(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!("Flush command {} completed", self.program);
        Ok(())
    }
}

/// Sends `PURGE` with `X-Purge-All: true` to a caching proxy
pub struct PurgeCacheController {
    client: Client,
    config: PurgeConfig,
}

impl PurgeCacheController {
    pub fn new(config: PurgeConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WarmerError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(PurgeCacheController { client, config })
    }
}

#[async_trait]
impl CacheController for PurgeCacheController {
    async fn flush_all(&self) -> Result<()> {
        let method = Method::from_bytes(b"PURGE")
            .map_err(|e| WarmerError::InternalError(format!("Invalid method: {}", e)))?;

        let mut request = self
            .client
            .request(method, &self.config.url)
            .header("X-Purge-All", "true");

        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            WarmerError::CacheFlushError(format!("PURGE {} failed: {}", self.config.url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WarmerError::CacheFlushError(format!(
                "PURGE {} returned {}",
                self.config.url, status
            )));
        }

        info!("PURGE {} returned {}", self.config.url, status);
        Ok(())
    }
}

/// Backend for nodes whose caches are flushed elsewhere
pub struct NoopCacheController;

#[async_trait]
impl CacheController for NoopCacheController {
    async fn flush_all(&self) -> Result<()> {
        debug!("Cache backend is 'none', nothing to flush");
        Ok(())
    }
}
