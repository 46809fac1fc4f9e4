//! Batched warmup request dispatcher
//!
//! Targets are sent to the local node in batches. Every request of a batch is
//! in flight at the same time and the whole batch is awaited before the next
//! one is formed. A transport failure shrinks the batch size by one (never
//! below one) and puts the target back at the end of the queue, so a struggling
//! node is automatically throttled down to serial requests while a healthy one
//! keeps full concurrency.
//!
//! HTTP error statuses are responses, not failures: a 503 page is logged and
//! the target is done.

use crate::error::WarmerError;
use crate::metrics::WarmupMetrics;
use crate::models::WarmupTarget;
use crate::warmup_client::{WarmupClient, WarmupResponse};
use crate::warmup_log::WarmupLog;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// What happened to one request
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The server answered, with any status
    Responded { status: u16, reason: String },
    /// Transport-level failure; the target was requeued or abandoned
    Failed { error: String },
}

/// One request issued by the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchAttempt {
    /// 1-based number of the batch the request belonged to
    pub batch: usize,
    pub target: WarmupTarget,
    pub outcome: AttemptOutcome,
    pub duration: Duration,
}

/// Summary of a dispatcher run
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Every request in the order results were inspected
    pub attempts: Vec<DispatchAttempt>,
    /// Batch size in effect when each batch was formed
    pub batch_sizes: Vec<usize>,
    /// Targets that got a response
    pub succeeded: usize,
    /// Transport failures, counting repeats of the same target
    pub failures: usize,
    /// Targets dropped after reaching the attempt limit
    pub abandoned: Vec<WarmupTarget>,
    pub final_batch_size: usize,
}

impl DispatchReport {
    pub fn batches(&self) -> usize {
        self.batch_sizes.len()
    }

    /// Attempts made for a given target, in order
    pub fn attempts_for<'a>(
        &'a self,
        target: &'a WarmupTarget,
    ) -> impl Iterator<Item = &'a DispatchAttempt> + 'a {
        self.attempts.iter().filter(move |a| &a.target == target)
    }
}

struct Pending {
    target: WarmupTarget,
    attempts: usize,
}

/// Drives warmup requests against the local node
pub struct RequestDispatcher {
    client: Arc<dyn WarmupClient>,
    log: Arc<WarmupLog>,
    metrics: Option<WarmupMetrics>,
    initial_batch_size: usize,
    max_attempts: Option<usize>,
}

impl RequestDispatcher {
    /// Default number of concurrent requests in the first batch
    pub const DEFAULT_BATCH_SIZE: usize = 32;

    pub fn new(client: Arc<dyn WarmupClient>, log: Arc<WarmupLog>) -> Self {
        RequestDispatcher {
            client,
            log,
            metrics: None,
            initial_batch_size: Self::DEFAULT_BATCH_SIZE,
            max_attempts: None,
        }
    }

    /// Set the batch size of the first batch (at least one)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.initial_batch_size = batch_size.max(1);
        self
    }

    /// Give up on a target after this many attempts; `None` requeues forever
    pub fn with_max_attempts(mut self, max_attempts: Option<usize>) -> Self {
        self.max_attempts = max_attempts.filter(|n| *n > 0);
        self
    }

    pub fn with_metrics(mut self, metrics: WarmupMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Warm every target against `local_base_url`
    pub async fn run(&self, local_base_url: &str, targets: Vec<WarmupTarget>) -> DispatchReport {
        let mut queue: VecDeque<Pending> = targets
            .into_iter()
            .map(|target| Pending {
                target,
                attempts: 0,
            })
            .collect();
        let mut batch_size = self.initial_batch_size.max(1);
        let mut report = DispatchReport::default();

        while !queue.is_empty() {
            let take = batch_size.min(queue.len());
            let batch: Vec<Pending> = queue.drain(..take).collect();
            report.batch_sizes.push(batch_size);
            let batch_no = report.batch_sizes.len();

            if let Some(metrics) = &self.metrics {
                metrics.batch_size.set(batch_size as i64);
            }
            debug!(
                "Dispatching batch {} with {} targets (batch size {}, {} queued)",
                batch_no,
                batch.len(),
                batch_size,
                queue.len()
            );

            // Fire the whole batch, then inspect results in batch order.
            let mut in_flight = Vec::with_capacity(batch.len());
            for pending in batch {
                let url = pending.target.local_url(local_base_url);
                self.log.info(format!(
                    "Querying url \"{}\" with host \"{}\"",
                    url, pending.target.host
                ));

                let client = Arc::clone(&self.client);
                let host = pending.target.host.clone();
                let request_url = url.clone();
                let task = tokio::spawn(async move {
                    let started = Instant::now();
                    let result = client.get(&request_url, &host).await;
                    (result, started.elapsed())
                });

                in_flight.push((pending, url, task));
            }

            for (mut pending, url, task) in in_flight {
                pending.attempts += 1;

                let (result, duration) = match task.await {
                    Ok(done) => done,
                    Err(e) => (
                        Err(WarmerError::InternalError(format!("Warmup task failed: {}", e))),
                        Duration::ZERO,
                    ),
                };

                match result {
                    Ok(response) => {
                        self.record_success(&mut report, batch_no, pending.target, &url, response, duration);
                    }
                    Err(e) => {
                        self.log.warning(format!("Could not get \"{}\" because: {}", url, e));
                        batch_size = batch_size.saturating_sub(1).max(1);
                        report.failures += 1;
                        if let Some(metrics) = &self.metrics {
                            metrics.record_failure(duration.as_secs_f64());
                        }
                        report.attempts.push(DispatchAttempt {
                            batch: batch_no,
                            target: pending.target.clone(),
                            outcome: AttemptOutcome::Failed {
                                error: e.to_string(),
                            },
                            duration,
                        });

                        if self.max_attempts.is_some_and(|max| pending.attempts >= max) {
                            self.log.error(format!(
                                "Giving up on \"{}\" with host \"{}\" after {} attempts",
                                url, pending.target.host, pending.attempts
                            ));
                            if let Some(metrics) = &self.metrics {
                                metrics.record_abandoned();
                            }
                            report.abandoned.push(pending.target);
                        } else {
                            queue.push_back(pending);
                        }
                    }
                }
            }
        }

        report.final_batch_size = batch_size;
        report
    }

    fn record_success(
        &self,
        report: &mut DispatchReport,
        batch_no: usize,
        target: WarmupTarget,
        url: &str,
        response: WarmupResponse,
        duration: Duration,
    ) {
        self.log.info(format!(
            "GET \"{}\" returned {} {}, took {:.2}s",
            url,
            response.status,
            response.reason,
            duration.as_secs_f64()
        ));

        if let Some(metrics) = &self.metrics {
            metrics.record_response(response.status, duration.as_secs_f64());
        }

        report.succeeded += 1;
        report.attempts.push(DispatchAttempt {
            batch: batch_no,
            target,
            outcome: AttemptOutcome::Responded {
                status: response.status,
                reason: response.reason,
            },
            duration,
        });
    }
}
