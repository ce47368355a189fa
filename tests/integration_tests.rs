//! Integration tests using wiremock and scripted transports.

use async_trait::async_trait;
use gridcall::backoff::Jitter;
use gridcall::capture::DiagnosticCapture;
use gridcall::config::{RetryConfig, TraceConfig};
use gridcall::{
    CancellationToken, Entity, Error, Executor, Request, Response, StopReason, Transport,
};
use http::{Method, StatusCode};
use serde_json::json;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retries() -> RetryConfig {
    RetryConfig::builder()
        .backoff_base(Duration::from_millis(10))
        .jitter(Jitter::Fixed(Duration::ZERO))
        .build()
}

fn error_body(code: i64, message: &str) -> serde_json::Value {
    json!({ "errorCode": code, "message": message, "refId": "ref-1" })
}

/// A forward-only stream of deterministic pseudo-random bytes.
struct PatternReader {
    remaining: usize,
    state: u32,
}

impl PatternReader {
    fn new(len: usize) -> Self {
        Self {
            remaining: len,
            state: 0x2545_f491,
        }
    }
}

impl Read for PatternReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.remaining);
        for byte in &mut buf[..n] {
            self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            *byte = (self.state >> 24) as u8;
        }
        self.remaining -= n;
        Ok(n)
    }
}

/// Replies from a script and records every attempt.
#[derive(Clone, Default)]
struct Scripted {
    replies: Arc<Mutex<Vec<Response>>>,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn repeating(status: StatusCode, body: serde_json::Value, times: usize) -> Self {
        let replies = (0..times)
            .map(|_| {
                Response::new(status).with_entity(Entity::json(body.to_string()))
            })
            .collect();
        Self {
            replies: Arc::new(Mutex::new(replies)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn send(&self, request: &mut Request) -> gridcall::Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(entity) = request.entity.as_mut() {
            entity.bytes()?;
        }
        let reply = self.replies.lock().unwrap().pop();
        Ok(reply.expect("script exhausted"))
    }
}

fn scripted_executor(script: Scripted) -> Executor {
    Executor::builder()
        .base_url("https://api.example.com/2.0/")
        .unwrap()
        .retry_config(
            RetryConfig::builder()
                .jitter(Jitter::Fixed(Duration::ZERO))
                .build(),
        )
        .transport(script)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_successful_get_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sheets/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "name": "Plan" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let executor = Executor::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .build()
        .unwrap();

    let request = executor.request(Method::GET, "sheets/1").unwrap();
    let mut response = executor.execute(request).await.unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
    assert!(response.stop_reason.is_none());
    assert!(response.content_type().unwrap().starts_with("application/json"));
    let body: serde_json::Value = serde_json::from_str(&response.text().unwrap()).unwrap();
    assert_eq!(body["name"], "Plan");
}

#[tokio::test]
async fn test_transient_error_then_success() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .and(path("/sheets"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(503)
                    .set_body_json(error_body(4002, "Server timeout exceeded."))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({ "data": [] }))
            }
        })
        .mount(&mock_server)
        .await;

    let executor = Executor::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_config(fast_retries())
        .build()
        .unwrap();

    let request = executor.request(Method::GET, "sheets").unwrap();
    let mut response = executor.execute(request).await.unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 2);
    assert!(response.was_retried());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
    assert_eq!(response.text().unwrap(), r#"{"data":[]}"#);
}

#[tokio::test]
async fn test_non_transient_error_is_returned_unchanged() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sheets/9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(error_body(1006, "Not Found")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let executor = Executor::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_config(fast_retries())
        .build()
        .unwrap();

    let request = executor.request(Method::GET, "sheets/9").unwrap();
    let mut response = executor.execute(request).await.unwrap();

    assert_eq!(response.status.as_u16(), 404);
    assert_eq!(response.attempts, 1);
    assert_eq!(
        response.stop_reason,
        Some(StopReason::NonTransient { code: 1006 })
    );
    let body: serde_json::Value = serde_json::from_str(&response.text().unwrap()).unwrap();
    assert_eq!(body, error_body(1006, "Not Found"));
}

#[tokio::test]
async fn test_non_json_failure_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sheets"))
        .respond_with(
            ResponseTemplate::new(502).set_body_raw("<html>Bad Gateway</html>", "text/html"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let executor = Executor::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_config(fast_retries())
        .build()
        .unwrap();

    let request = executor.request(Method::GET, "sheets").unwrap();
    let mut response = executor.execute(request).await.unwrap();

    assert_eq!(response.status.as_u16(), 502);
    assert!(matches!(
        response.stop_reason,
        Some(StopReason::NotJson { .. })
    ));
    assert_eq!(response.text().unwrap(), "<html>Bad Gateway</html>");
}

#[tokio::test]
async fn test_stream_upload_is_replayed_byte_for_byte() {
    const UPLOAD_LEN: usize = 5 * 1024 * 1024;

    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("POST"))
        .and(path("/sheets/1/attachments"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(500).set_body_json(error_body(4004, "Unexpected error."))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({ "result": { "id": 77 } }))
            }
        })
        .mount(&mock_server)
        .await;

    let executor = Executor::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_config(fast_retries())
        .build()
        .unwrap();

    let request = executor
        .request(Method::POST, "sheets/1/attachments")
        .unwrap()
        .with_header("Content-Disposition", "attachment; filename=\"data.bin\"")
        .with_entity(Entity::from_reader(
            "application/octet-stream",
            UPLOAD_LEN as i64,
            PatternReader::new(UPLOAD_LEN),
        ));

    let response = executor.execute(request).await.unwrap();
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 2);

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].body.len(), UPLOAD_LEN);
    assert!(received[0].body == received[1].body);

    let mut expected = Vec::with_capacity(UPLOAD_LEN);
    PatternReader::new(UPLOAD_LEN)
        .read_to_end(&mut expected)
        .unwrap();
    assert!(received[1].body == expected);
}

#[tokio::test]
async fn test_transport_error_is_surfaced() {
    let executor = Executor::builder()
        .base_url("http://127.0.0.1:1/")
        .unwrap()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let request = executor.request(Method::GET, "sheets").unwrap();
    let result = executor.execute(request).await;

    match result {
        Err(err @ Error::Network(_)) => assert!(err.is_transport()),
        other => panic!("Expected network error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_executions_share_one_executor() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sheets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(8)
        .mount(&mock_server)
        .await;

    let executor = Executor::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .build()
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let executor = executor.clone();
        handles.push(tokio::spawn(async move {
            let request = executor.request(Method::GET, "sheets").unwrap();
            executor.execute(request).await.unwrap().status
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_access_token_and_user_agent_are_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(wiremock::matchers::header("authorization", "Bearer secret-token"))
        .and(wiremock::matchers::header("user-agent", "sheet-sync/2.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 5 })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let executor = Executor::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .access_token("secret-token")
        .user_agent("sheet-sync/2.1")
        .build()
        .unwrap();

    let request = executor.request(Method::GET, "users/me").unwrap();
    let response = executor.execute(request).await.unwrap();
    assert_eq!(response.status.as_u16(), 200);
}

#[tokio::test(start_paused = true)]
async fn test_budget_exhaustion_returns_last_response() {
    let script = Scripted::repeating(
        StatusCode::TOO_MANY_REQUESTS,
        error_body(4003, "Rate limit exceeded."),
        10,
    );
    let calls = script.calls.clone();
    let executor = scripted_executor(script);

    let start = tokio::time::Instant::now();
    let request = executor.request(Method::GET, "sheets").unwrap();
    let mut response = executor.execute(request).await.unwrap();

    // Waits of 2s, 4s and 8s fit in 15s; the next 16s wait does not.
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(response.attempts, 4);
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(matches!(
        response.stop_reason,
        Some(StopReason::BudgetExhausted { attempts: 4, .. })
    ));
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(14) && waited < Duration::from_secs(15));

    let body: serde_json::Value = serde_json::from_str(&response.text().unwrap()).unwrap();
    assert_eq!(body["errorCode"], 4003);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_ends_backoff_wait() {
    let script = Scripted::repeating(
        StatusCode::SERVICE_UNAVAILABLE,
        error_body(4001, "Down for maintenance."),
        3,
    );
    let calls = script.calls.clone();
    let executor = scripted_executor(script);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let request = executor.request(Method::GET, "sheets").unwrap();
    let mut response = executor.execute_with_cancel(request, &cancel).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(response.stop_reason, Some(StopReason::Cancelled));
    assert!(response.elapsed < Duration::from_secs(2));
    assert!(response.text().unwrap().contains("4001"));
}

#[tokio::test]
async fn test_trace_capture_redacts_authorization() {
    let capture = DiagnosticCapture::new(TraceConfig::parse("Request,Response", None).unwrap());
    let mut request = Request::new(
        Method::GET,
        url::Url::parse("https://api.example.com/2.0/sheets").unwrap(),
    )
    .with_header("Authorization", "Bearer abcdefghij");
    let mut response = Response::new(StatusCode::OK).with_entity(Entity::json(r#"{"data":[]}"#));

    let record = capture.capture(1, &mut request, &mut response).unwrap();
    let line = record.to_json();

    assert!(line.contains("ghij"));
    assert!(!line.contains("abcdef"));
    let authorization = &record.request.unwrap().headers.unwrap()["Authorization"];
    assert!(authorization.ends_with("ghij"));
}

#[tokio::test]
async fn test_tracing_enabled_does_not_disturb_bodies() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("POST"))
        .and(path("/sheets"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(503)
                    .set_body_json(error_body(4002, "Server timeout exceeded."))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({ "result": { "id": 3 } }))
            }
        })
        .mount(&mock_server)
        .await;

    let executor = Executor::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_config(fast_retries())
        .trace_config(
            TraceConfig::parse("RequestBody ResponseBody RequestHeaders", Some("16")).unwrap(),
        )
        .build()
        .unwrap();

    let request = executor
        .request(Method::POST, "sheets")
        .unwrap()
        .with_entity(Entity::json(r#"{"name":"Quarterly","columns":[]}"#));
    let mut response = executor.execute(request).await.unwrap();

    assert_eq!(response.attempts, 2);
    assert_eq!(response.text().unwrap(), r#"{"result":{"id":3}}"#);

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    for request in &received {
        assert_eq!(request.body, br#"{"name":"Quarterly","columns":[]}"#);
    }
}
