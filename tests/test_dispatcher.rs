//! Integration tests for RequestDispatcher using a scripted transport

use async_trait::async_trait;
use node_warmer::{
    AttemptOutcome, LogLevel, RequestDispatcher, Result, WarmerError, WarmupClient,
    WarmupLog, WarmupMetrics, WarmupResponse, WarmupTarget,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transport whose failures are scripted per path
#[derive(Default)]
struct ScriptedClient {
    /// Remaining transport failures per path; `usize::MAX` fails forever
    failures: Mutex<HashMap<String, usize>>,
    /// Status returned for a path, default 200
    statuses: HashMap<String, u16>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    fn failing(paths: &[(&str, usize)]) -> Self {
        ScriptedClient {
            failures: Mutex::new(
                paths
                    .iter()
                    .map(|(p, n)| (p.to_string(), *n))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl WarmupClient for ScriptedClient {
    async fn get(&self, url: &str, host: &str) -> Result<WarmupResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), host.to_string()));

        let path = url.trim_start_matches("http://localhost:80");
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(path) {
                if *remaining > 0 {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    return Err(WarmerError::Timeout(format!("{} timed out", url)));
                }
            }
        }

        let status = self.statuses.get(path).copied().unwrap_or(200);
        Ok(WarmupResponse {
            status,
            reason: http_reason(status).to_string(),
            body_bytes: 128,
        })
    }
}

fn http_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "",
    }
}

fn targets(n: usize) -> Vec<WarmupTarget> {
    (0..n)
        .map(|i| WarmupTarget::new("shop.example.com", format!("/page/{}", i)))
        .collect()
}

fn count_lines(log: &WarmupLog, level: LogLevel, prefix: &str) -> usize {
    log.drain()
        .iter()
        .filter(|e| e.level == level && e.message.starts_with(prefix))
        .count()
}

#[tokio::test]
async fn test_forty_targets_two_transient_failures() {
    let client = Arc::new(ScriptedClient::failing(&[("/page/5", 1), ("/page/17", 1)]));
    let log = Arc::new(WarmupLog::new());
    let dispatcher = RequestDispatcher::new(client.clone(), log.clone()).with_batch_size(32);

    let report = dispatcher.run("http://localhost:80", targets(40)).await;

    // First batch: 32 targets, two requeues, batch size 32 -> 30.
    // Second batch: remaining 8 plus the 2 requeued.
    assert_eq!(report.batch_sizes, vec![32, 30]);
    let second_batch = report.attempts.iter().filter(|a| a.batch == 2).count();
    assert_eq!(second_batch, 10);
    assert_eq!(report.final_batch_size, 30);

    assert_eq!(report.succeeded, 40);
    assert_eq!(report.failures, 2);
    assert!(report.abandoned.is_empty());
    assert_eq!(client.call_count(), 42);

    let drained = log.drain();
    let successes = drained
        .iter()
        .filter(|e| e.level == LogLevel::Info && e.message.starts_with("GET "))
        .count();
    let failures = drained
        .iter()
        .filter(|e| e.level == LogLevel::Warning && e.message.starts_with("Could not get"))
        .count();
    assert_eq!(successes, 40);
    assert_eq!(failures, 2);
}

#[tokio::test]
async fn test_failed_target_succeeds_in_later_batch() {
    let client = Arc::new(ScriptedClient::failing(&[("/page/3", 1)]));
    let dispatcher = RequestDispatcher::new(client, Arc::new(WarmupLog::new())).with_batch_size(4);

    let report = dispatcher.run("http://localhost:80", targets(6)).await;

    let flaky = WarmupTarget::new("shop.example.com", "/page/3");
    let attempts: Vec<_> = report.attempts_for(&flaky).collect();
    assert_eq!(attempts.len(), 2);
    assert!(matches!(attempts[0].outcome, AttemptOutcome::Failed { .. }));
    assert!(matches!(attempts[1].outcome, AttemptOutcome::Responded { status: 200, .. }));
    assert!(attempts[0].batch < attempts[1].batch);

    // Requeued behind the targets that were still waiting.
    let last = report.attempts.last().unwrap();
    assert_eq!(last.target, flaky);
}

#[tokio::test]
async fn test_error_statuses_are_not_failures() {
    let mut client = ScriptedClient::default();
    client.statuses.insert("/page/0".to_string(), 503);
    client.statuses.insert("/page/1".to_string(), 404);
    let client = Arc::new(client);
    let log = Arc::new(WarmupLog::new());
    let dispatcher = RequestDispatcher::new(client.clone(), log.clone());

    let report = dispatcher.run("http://localhost:80", targets(3)).await;

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failures, 0);
    assert_eq!(report.batch_sizes, vec![RequestDispatcher::DEFAULT_BATCH_SIZE]);
    assert_eq!(client.call_count(), 3);

    let messages: Vec<_> = log.drain().into_iter().map(|e| e.message).collect();
    assert!(messages
        .iter()
        .any(|m| m.starts_with("GET \"http://localhost:80/page/0\" returned 503 Service Unavailable")));
    assert!(messages
        .iter()
        .any(|m| m.starts_with("GET \"http://localhost:80/page/1\" returned 404 Not Found")));
}

#[tokio::test]
async fn test_requests_carry_public_host() {
    let client = Arc::new(ScriptedClient::default());
    let dispatcher = RequestDispatcher::new(client.clone(), Arc::new(WarmupLog::new()));

    let targets = vec![
        WarmupTarget::new("de.example.com", "/checkout/cart"),
        WarmupTarget::new("en.example.com", "/catalogsearch/result/?q=test"),
    ];
    dispatcher.run("http://localhost:80/", targets).await;

    let mut calls = client.calls.lock().unwrap().clone();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            (
                "http://localhost:80/catalogsearch/result/?q=test".to_string(),
                "en.example.com".to_string()
            ),
            (
                "http://localhost:80/checkout/cart".to_string(),
                "de.example.com".to_string()
            ),
        ]
    );
}

#[tokio::test]
async fn test_batch_runs_concurrently_but_bounded() {
    let client = Arc::new(ScriptedClient {
        delay: Some(Duration::from_millis(20)),
        ..Default::default()
    });
    let dispatcher =
        RequestDispatcher::new(client.clone(), Arc::new(WarmupLog::new())).with_batch_size(4);

    let report = dispatcher.run("http://localhost:80", targets(10)).await;

    assert_eq!(report.batches(), 3);
    assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_sustained_failure_throttles_to_one() {
    let client = Arc::new(ScriptedClient::failing(&[
        ("/page/0", 3),
        ("/page/1", 3),
        ("/page/2", 3),
    ]));
    let dispatcher =
        RequestDispatcher::new(client, Arc::new(WarmupLog::new())).with_batch_size(3);

    let report = dispatcher.run("http://localhost:80", targets(3)).await;

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failures, 9);
    assert_eq!(report.final_batch_size, 1);
    assert!(report.batch_sizes.windows(2).all(|w| w[0] >= w[1]));
    assert!(report.batch_sizes.iter().all(|size| *size >= 1));
}

#[tokio::test]
async fn test_always_failing_target_abandoned_at_limit() {
    let client = Arc::new(ScriptedClient::failing(&[("/page/1", usize::MAX)]));
    let log = Arc::new(WarmupLog::new());
    let metrics = WarmupMetrics::new().unwrap();
    let dispatcher = RequestDispatcher::new(client.clone(), log.clone())
        .with_batch_size(8)
        .with_max_attempts(Some(4))
        .with_metrics(metrics.clone());

    let report = dispatcher.run("http://localhost:80", targets(5)).await;

    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failures, 4);
    assert_eq!(
        report.abandoned,
        vec![WarmupTarget::new("shop.example.com", "/page/1")]
    );
    assert_eq!(client.call_count(), 8);
    assert_eq!(metrics.request_count("success"), 4);
    assert_eq!(metrics.request_count("failure"), 4);
    assert_eq!(metrics.abandoned_targets_total.get(), 1);

    assert_eq!(count_lines(&log, LogLevel::Error, "Giving up on"), 1);
}

#[tokio::test]
async fn test_unbounded_requeue_until_success() {
    let client = Arc::new(ScriptedClient::failing(&[("/page/0", 25)]));
    let dispatcher = RequestDispatcher::new(client.clone(), Arc::new(WarmupLog::new()))
        .with_batch_size(2)
        .with_max_attempts(None);

    let report = dispatcher.run("http://localhost:80", targets(2)).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failures, 25);
    assert!(report.abandoned.is_empty());
    assert_eq!(client.call_count(), 27);
}
