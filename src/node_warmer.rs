//! Warmup orchestration
//!
//! ```text
//! Idle -> CheckingSentinel -> SkippedAlreadyWarm
//!                          -> CheckingVersions -> [FlushingCache] -> [Warming] -> WritingLog -> Done
//! any error                -> Failed -> WritingLog -> (error returned)
//! ```
//!
//! The sentinel file is written at the end of every run that gets past the
//! sentinel check, including failed ones, so outside automation does not
//! retry a broken node forever. Its content is the captured run log; check
//! it for the failure line if "warm" and "warmed successfully" need to be
//! told apart.

use crate::cache_controller::{self, CacheController};
use crate::config::WarmerConfig;
use crate::dispatcher::{DispatchReport, RequestDispatcher};
use crate::error::{Result, WarmerError};
use crate::fingerprint::{Fingerprinter, VersionDelta};
use crate::metrics::WarmupMetrics;
use crate::models::VersionKey;
use crate::target_provider::{
    discover_targets, CompositeProvider, DiscoveryOutcome, RetryPolicy, TargetProvider,
};
use crate::version_store::{FileVersionStore, VersionStore};
use crate::warmup_client::{HttpWarmupClient, WarmupClient};
use crate::warmup_log::{format_batch, WarmupLog};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// States of a warmup run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupState {
    Idle,
    CheckingSentinel,
    SkippedAlreadyWarm,
    CheckingVersions,
    FlushingCache,
    Warming,
    Failed,
    WritingLog,
    Done,
}

/// Per-invocation state, dropped when the run returns
#[derive(Debug)]
struct RunState {
    state: WarmupState,
    visited: Vec<WarmupState>,
    delta: VersionDelta,
    cache_flushed: bool,
    discovery: Option<DiscoveryOutcome>,
    dispatch: Option<DispatchReport>,
    flush_duration: Option<Duration>,
}

impl RunState {
    fn new() -> Self {
        RunState {
            state: WarmupState::Idle,
            visited: vec![WarmupState::Idle],
            delta: VersionDelta::default(),
            cache_flushed: false,
            discovery: None,
            dispatch: None,
            flush_duration: None,
        }
    }

    fn transition(&mut self, next: WarmupState) {
        debug!("Warmup state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.visited.push(next);
    }

    fn into_summary(self, elapsed: Duration, sentinel_path: PathBuf) -> WarmupSummary {
        WarmupSummary {
            state: self.state,
            visited: self.visited,
            delta: self.delta,
            cache_flushed: self.cache_flushed,
            flush_duration: self.flush_duration,
            discovery: self.discovery,
            dispatch: self.dispatch,
            elapsed,
            sentinel_path,
        }
    }
}

/// What a completed run did
#[derive(Debug, Clone)]
pub struct WarmupSummary {
    /// Terminal state: `Done` or `SkippedAlreadyWarm`
    pub state: WarmupState,
    /// Every state visited, in order
    pub visited: Vec<WarmupState>,
    pub delta: VersionDelta,
    pub cache_flushed: bool,
    pub flush_duration: Option<Duration>,
    /// Present when the content version changed
    pub discovery: Option<DiscoveryOutcome>,
    /// Present when the content version changed
    pub dispatch: Option<DispatchReport>,
    pub elapsed: Duration,
    pub sentinel_path: PathBuf,
}

impl WarmupSummary {
    pub fn skipped(&self) -> bool {
        self.state == WarmupState::SkippedAlreadyWarm
    }
}

/// Brings a node to a warm state
pub struct NodeWarmer {
    config: Arc<WarmerConfig>,
    node_id: String,
    fingerprinter: Fingerprinter,
    store: Arc<dyn VersionStore>,
    cache: Arc<dyn CacheController>,
    provider: Arc<dyn TargetProvider>,
    client: Arc<dyn WarmupClient>,
    log: Arc<WarmupLog>,
    metrics: WarmupMetrics,
}

impl NodeWarmer {
    /// Wire a warmer from explicit collaborators
    pub fn new(
        config: Arc<WarmerConfig>,
        store: Arc<dyn VersionStore>,
        cache: Arc<dyn CacheController>,
        provider: Arc<dyn TargetProvider>,
        client: Arc<dyn WarmupClient>,
    ) -> Result<Self> {
        config.validate()?;

        let fingerprinter = Fingerprinter::new(
            config.resolve(&config.lock_file),
            config.resolve(&config.content_marker),
            Arc::clone(&store),
        );
        let node_id = config.node_id.clone().unwrap_or_else(local_node_id);

        Ok(NodeWarmer {
            config,
            node_id,
            fingerprinter,
            store,
            cache,
            provider,
            client,
            log: Arc::new(WarmupLog::new()),
            metrics: WarmupMetrics::new()?,
        })
    }

    /// Wire a warmer from configuration alone, using the file version store,
    /// the configured cache backend and target sources, and the HTTP client.
    pub fn from_config(config: WarmerConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn VersionStore> =
            Arc::new(FileVersionStore::new(config.resolve(&config.version_store_path)));
        let cache = cache_controller::from_config(&config)?;
        let url_file = config
            .targets
            .url_file
            .as_ref()
            .map(|path| config.resolve(path));
        let provider: Arc<dyn TargetProvider> =
            Arc::new(CompositeProvider::from_config(&config.targets, url_file));
        let client: Arc<dyn WarmupClient> = Arc::new(HttpWarmupClient::from_config(&config)?);

        Self::new(Arc::new(config), store, cache, provider, client)
    }

    pub fn config(&self) -> &WarmerConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<WarmupLog> {
        &self.log
    }

    pub fn metrics(&self) -> &WarmupMetrics {
        &self.metrics
    }

    pub fn sentinel_path(&self) -> PathBuf {
        self.config.sentinel_path()
    }

    /// Warm the node behind `local_url`.
    ///
    /// Returns without doing anything when the sentinel exists and `force` is
    /// false. Otherwise flushes caches if the code version changed, replays
    /// the targets if the content version changed, and writes the sentinel.
    /// On error the sentinel is still written, with a failure line appended,
    /// and the error is returned.
    pub async fn warm_node(&self, local_url: &str, force: bool) -> Result<WarmupSummary> {
        let started = Instant::now();
        let sentinel = self.sentinel_path();
        let mut run = RunState::new();

        self.log
            .info(format!("Starting warmup for node \"{}\"", self.node_id));

        run.transition(WarmupState::CheckingSentinel);
        if sentinel.exists() && !force {
            self.log.info("Skipping warmup, already warm...");
            // Nothing is written on a skip; keep the buffer clean for a forced rerun.
            self.log.drain();
            run.transition(WarmupState::SkippedAlreadyWarm);
            return Ok(run.into_summary(started.elapsed(), sentinel));
        }

        match self.run_phases(local_url, &mut run).await {
            Ok(()) => {
                let took = started.elapsed();
                self.metrics.run_duration_seconds.set(took.as_secs_f64());
                self.log
                    .info(format!("All done, took {:.2}s", took.as_secs_f64()));

                run.transition(WarmupState::WritingLog);
                self.write_sentinel(&sentinel)?;
                self.write_metrics();
                run.transition(WarmupState::Done);
                Ok(run.into_summary(started.elapsed(), sentinel))
            }
            Err(e) => {
                run.transition(WarmupState::Failed);
                self.metrics
                    .run_duration_seconds
                    .set(started.elapsed().as_secs_f64());

                run.transition(WarmupState::WritingLog);
                let failure = format!(
                    "Warmup did not complete, generated {} file anyway: {}",
                    self.config.sentinel_name, e
                );
                self.log.error(failure);
                if let Err(write_err) = self.write_sentinel(&sentinel) {
                    warn!("Could not write sentinel after failure: {}", write_err);
                }
                self.write_metrics();
                Err(e)
            }
        }
    }

    async fn run_phases(&self, local_url: &str, run: &mut RunState) -> Result<()> {
        run.transition(WarmupState::CheckingVersions);
        let snapshot = self.fingerprinter.snapshot().await?;
        run.delta = snapshot.delta();

        if run.delta.code_changed {
            run.transition(WarmupState::FlushingCache);
            let flush_started = Instant::now();

            self.store
                .set(VersionKey::CacheCode, &snapshot.current_code)
                .await?;
            self.log.info(format!(
                "Cache version mismatch - stored: {}, new: {}, flushing cache...",
                snapshot.stored_code.as_deref().unwrap_or("<none>"),
                snapshot.current_code
            ));

            self.cache.flush_all().await?;
            run.cache_flushed = true;
            self.metrics.cache_flushes_total.inc();

            let took = flush_started.elapsed();
            run.flush_duration = Some(took);
            self.log
                .info(format!("Finished cache flush, took {:.2}s", took.as_secs_f64()));
        }

        if run.delta.content_changed {
            run.transition(WarmupState::Warming);
            self.log.info(format!(
                "Static content version changed - stored: {}, new: {}, warming up...",
                snapshot
                    .stored_content
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or("<none>"),
                snapshot.current_content.trim()
            ));

            let policy = RetryPolicy::new(
                self.config.discovery_attempts,
                self.config.discovery_backoff_ms,
            );
            let discovery = discover_targets(self.provider.as_ref(), &policy, &self.log).await;
            self.metrics
                .record_discovery(discovery.attempts, discovery.exhausted);
            self.log.info(format!(
                "Warming {} targets against {}",
                discovery.targets.len(),
                local_url
            ));

            let dispatcher = RequestDispatcher::new(Arc::clone(&self.client), Arc::clone(&self.log))
                .with_batch_size(self.config.initial_batch_size)
                .with_max_attempts(self.config.target_attempt_limit())
                .with_metrics(self.metrics.clone());
            let report = dispatcher
                .run(local_url, discovery.targets.clone())
                .await;

            self.log.info(format!(
                "Warmed {} targets in {} batches, {} failed attempts, {} abandoned",
                report.succeeded,
                report.batches(),
                report.failures,
                report.abandoned.len()
            ));

            if discovery.exhausted && !self.config.mark_content_on_empty_targets {
                self.log.warning(
                    "Target discovery failed, leaving static content version unchanged",
                );
            } else {
                self.store
                    .set(VersionKey::StaticContent, &snapshot.current_content)
                    .await?;
            }

            run.discovery = Some(discovery);
            run.dispatch = Some(report);
        } else {
            self.log
                .info("Static content version unchanged, skipping warmup requests");
        }

        Ok(())
    }

    /// Replace the sentinel with the drained log, atomically
    fn write_sentinel(&self, path: &Path) -> Result<()> {
        let content = format_batch(&self.log.drain());

        let sentinel_err = |e: std::io::Error| {
            WarmerError::SentinelError(format!("Failed to write {}: {}", path.display(), e))
        };

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(sentinel_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(sentinel_err)?;
        tmp.write_all(content.as_bytes()).map_err(sentinel_err)?;
        tmp.persist(path).map_err(|e| sentinel_err(e.error))?;

        debug!("Wrote sentinel {}", path.display());
        Ok(())
    }

    fn write_metrics(&self) {
        if let Some(path) = &self.config.metrics_textfile {
            let path = self.config.resolve(path);
            if let Err(e) = self.metrics.write_textfile(&path) {
                warn!("Could not write metrics to {}: {}", path.display(), e);
            }
        }
    }
}

fn local_node_id() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
