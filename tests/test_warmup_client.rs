//! Integration tests for the HTTP transport and the PURGE cache backend

use node_warmer::{
    CacheController, HttpWarmupClient, PurgeCacheController, PurgeConfig, RequestDispatcher,
    WarmerError, WarmupClient, WarmupLog, WarmupTarget,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(timeout: Duration, max_redirects: usize) -> HttpWarmupClient {
    HttpWarmupClient::new(timeout, max_redirects, "node-warmer-test/1.0", "https").unwrap()
}

#[tokio::test]
async fn test_request_carries_forwarding_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/checkout/cart"))
        .and(header("host", "de.example.com"))
        .and(header("x-forwarded-host", "de.example.com"))
        .and(header("x-forwarded-proto", "https"))
        .and(header("user-agent", "node-warmer-test/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(1024)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/checkout/cart", mock_server.uri());
    let response = client(Duration::from_secs(5), 10)
        .get(&url, "de.example.com")
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.reason, "OK");
    assert_eq!(response.body_bytes, 1024);
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let url = format!("{}/broken", mock_server.uri());
    let response = client(Duration::from_secs(5), 10)
        .get(&url, "shop.example.com")
        .await
        .unwrap();

    assert_eq!(response.status, 503);
    assert_eq!(response.reason, "Service Unavailable");
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let url = format!("{}/slow", mock_server.uri());
    let err = client(Duration::from_millis(200), 10)
        .get(&url, "shop.example.com")
        .await
        .unwrap_err();

    assert!(matches!(err, WarmerError::Timeout(_)), "got {:?}", err);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_redirects_followed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/old", mock_server.uri());
    let response = client(Duration::from_secs(5), 10)
        .get(&url, "shop.example.com")
        .await
        .unwrap();

    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_redirects_disabled() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&mock_server)
        .await;

    let url = format!("{}/old", mock_server.uri());
    let response = client(Duration::from_secs(5), 0)
        .get(&url, "shop.example.com")
        .await
        .unwrap();

    assert_eq!(response.status, 301);
    assert_eq!(response.reason, "Moved Permanently");
}

#[tokio::test]
async fn test_redirect_loop_is_transport_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .mount(&mock_server)
        .await;

    let url = format!("{}/loop", mock_server.uri());
    let err = client(Duration::from_secs(5), 3)
        .get(&url, "shop.example.com")
        .await
        .unwrap_err();

    assert!(err.is_transient());
}

#[tokio::test]
async fn test_dispatcher_against_live_server() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("host", "de.example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/catalog/product/view/id/42"))
        .and(header("host", "en.example.com"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let targets = vec![
        WarmupTarget::new("de.example.com", "/"),
        WarmupTarget::new("de.example.com", "/customer/account/login"),
        WarmupTarget::new("en.example.com", "/catalog/product/view/id/42"),
    ];
    let dispatcher = RequestDispatcher::new(
        Arc::new(client(Duration::from_secs(5), 10)),
        Arc::new(WarmupLog::new()),
    );

    let report = dispatcher.run(&mock_server.uri(), targets).await;
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failures, 0);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

/// Accepts one connection, answers with `status_line` and returns the raw request head
async fn one_shot_server(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            status_line
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        String::from_utf8_lossy(&head).to_string()
    });

    (format!("http://{}/", addr), handle)
}

#[tokio::test]
async fn test_purge_controller_sends_purge_all() {
    let (url, server) = one_shot_server("200 OK").await;

    let controller = PurgeCacheController::new(
        PurgeConfig {
            url,
            auth_token: Some("s3cret".to_string()),
        },
        Duration::from_secs(5),
    )
    .unwrap();
    controller.flush_all().await.unwrap();

    let head = server.await.unwrap().to_lowercase();
    assert!(head.starts_with("purge / http/1.1"), "got {}", head);
    assert!(head.contains("x-purge-all: true"));
    assert!(head.contains("authorization: bearer s3cret"));
}

#[tokio::test]
async fn test_purge_controller_rejects_error_status() {
    let (url, server) = one_shot_server("500 Internal Server Error").await;

    let controller = PurgeCacheController::new(
        PurgeConfig {
            url,
            auth_token: None,
        },
        Duration::from_secs(5),
    )
    .unwrap();
    let err = controller.flush_all().await.unwrap_err();

    assert!(matches!(err, WarmerError::CacheFlushError(_)));
    let head = server.await.unwrap().to_lowercase();
    assert!(!head.contains("authorization"));
}
