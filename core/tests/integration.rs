//! Drive the fetcher over real HTTP against the mock server.
//!
//! # Design
//! Starts the mock server on a random port on its own thread, then uses the
//! default `UreqTransport` through both the callback and the future
//! interfaces. Covers success, HTTP error statuses, redirects, refused
//! connections, unknown hosts and timeouts.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::time::Duration;

use fetch_core::{
    Fetcher, FetcherConfig, HttpMethod, HttpRequest, JsonCodec, TaskState, TransportError,
};
use mock_server::Echo;

const WAIT: Duration = Duration::from_secs(10);

/// Start the mock server on a random port and return its address.
fn start_server() -> SocketAddr {
    let _ = env_logger::builder().is_test(true).try_init();

    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    addr
}

/// An address nothing listens on.
fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[test]
fn send_delivers_json_response_to_callback() {
    let addr = start_server();
    let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
    let request = HttpRequest::get(&format!("http://{addr}/json"))
        .unwrap()
        .add_header("Accept", "application/json");

    let (tx, rx) = mpsc::channel();
    let task = fetcher.send(request, move |result| tx.send(result).unwrap());

    let response = rx.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.status_text(), "OK");
    assert_eq!(response.header("Content-Type"), Some("application/json"));
    assert!(response.header("X-REQUEST-ID").is_some());
    assert!(response.header("date").is_some());
    assert!(response.header("x-not-sent").is_none());

    let body: HashMap<String, String> = response.json(&JsonCodec::default()).unwrap();
    assert_eq!(body.get("key").map(String::as_str), Some("value"));
    assert_eq!(task.state(), TaskState::Completed);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn error_status_is_a_completed_response() {
    let addr = start_server();
    let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
    let request = HttpRequest::get(&format!("http://{addr}/status/404")).unwrap();

    let (tx, rx) = mpsc::channel();
    let task = fetcher.send(request, move |result| tx.send(result).unwrap());

    let response = rx.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(response.status, 404);
    assert!(!response.is_success());
    assert_eq!(task.state(), TaskState::Completed);
}

#[test]
fn refused_connection_fails_the_task() {
    let addr = closed_port();
    let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
    let request = HttpRequest::get(&format!("http://{addr}/json")).unwrap();

    let (tx, rx) = mpsc::channel();
    let task = fetcher.send(request, move |result| tx.send(result).unwrap());

    let result = rx.recv_timeout(WAIT).unwrap();
    assert!(
        matches!(result, Err(TransportError::ConnectionRefused)),
        "got {result:?}"
    );
    assert_eq!(task.state(), TaskState::Failed);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[tokio::test]
async fn unknown_host_fails_with_host_not_found() {
    let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
    let request = HttpRequest::get("http://nonexistent.invalid/json").unwrap();

    let result = fetcher.fetch(request).await;
    assert!(matches!(result, Err(TransportError::HostNotFound)), "got {result:?}");
}

#[test]
fn slow_response_times_out() {
    let addr = start_server();
    let config = FetcherConfig {
        timeout_ms: Some(100),
        ..FetcherConfig::default()
    };
    let fetcher = Fetcher::new(config).unwrap();
    let request = HttpRequest::get(&format!("http://{addr}/slow/2000")).unwrap();

    let (tx, rx) = mpsc::channel();
    fetcher.send(request, move |result| tx.send(result).unwrap());

    let err = rx.recv_timeout(WAIT).unwrap().unwrap_err();
    assert!(matches!(err, TransportError::Timeout), "got {err:?}");
}

#[test]
fn oversized_body_is_rejected() {
    let addr = start_server();
    let config = FetcherConfig {
        max_body_bytes: 4,
        ..FetcherConfig::default()
    };
    let fetcher = Fetcher::new(config).unwrap();
    let request = HttpRequest::get(&format!("http://{addr}/json")).unwrap();

    let (tx, rx) = mpsc::channel();
    fetcher.send(request, move |result| tx.send(result).unwrap());

    let err = rx.recv_timeout(WAIT).unwrap().unwrap_err();
    assert!(matches!(err, TransportError::BodyTooLarge(_)), "got {err:?}");
}

#[tokio::test]
async fn fetch_posts_json_and_reads_echo() {
    let addr = start_server();
    let codec = JsonCodec::default();
    let fetcher = Fetcher::new(FetcherConfig {
        user_agent: Some("integration/1.0".to_string()),
        ..FetcherConfig::default()
    })
    .unwrap();

    let mut payload = HashMap::new();
    payload.insert("key", "value");
    let request = HttpRequest::new(HttpMethod::Post, &format!("http://{addr}/echo"))
        .unwrap()
        .with_json(&codec, &payload)
        .unwrap();

    let response = fetcher.fetch(request).await.unwrap();
    assert_eq!(response.status, 200);
    let echo: Echo = response.json(&codec).unwrap();
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.headers["content-type"], "application/json");
    assert_eq!(echo.headers["user-agent"], "integration/1.0");

    let sent: HashMap<String, String> = codec.decode(echo.body.as_bytes()).unwrap();
    assert_eq!(sent.get("key").map(String::as_str), Some("value"));
}

#[tokio::test]
async fn concurrent_fetches_complete_independently() {
    let addr = start_server();
    let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
    let slow = HttpRequest::get(&format!("http://{addr}/slow/200")).unwrap();
    let fast = HttpRequest::get(&format!("http://{addr}/status/204")).unwrap();

    let (slow, fast) = tokio::join!(fetcher.fetch(slow), fetcher.fetch(fast));
    let slow = slow.unwrap();
    assert_eq!(slow.status, 200);
    assert_eq!(slow.text(), "done");
    assert_eq!(fast.unwrap().status, 204);
}

#[tokio::test]
async fn sequential_fetches_chain_with_await() {
    let addr = start_server();
    let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();

    let first = fetcher
        .fetch(HttpRequest::get(&format!("http://{addr}/json")).unwrap())
        .await
        .unwrap();
    let request_id = first.header("x-request-id").unwrap().to_string();

    let second = fetcher
        .fetch(
            HttpRequest::new(HttpMethod::Delete, &format!("http://{addr}/echo"))
                .unwrap()
                .add_header("x-previous", &request_id),
        )
        .await
        .unwrap();
    let echo: Echo = second.json(&JsonCodec::default()).unwrap();
    assert_eq!(echo.method, "DELETE");
    assert_eq!(echo.headers["x-previous"], request_id);
}

#[tokio::test]
async fn body_is_sent_for_get_and_delete() {
    let addr = start_server();
    let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
    let codec = JsonCodec::default();

    for method in [HttpMethod::Get, HttpMethod::Delete] {
        let request = HttpRequest::new(method, &format!("http://{addr}/echo"))
            .unwrap()
            .with_body(b"payload".to_vec());
        let response = fetcher.fetch(request).await.unwrap();
        let echo: Echo = response.json(&codec).unwrap();
        assert_eq!(echo.method, method.as_str());
        assert_eq!(echo.body, "payload");
    }
}

#[tokio::test]
async fn redirect_reports_the_final_url() {
    let addr = start_server();
    let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
    let request = HttpRequest::get(&format!("http://{addr}/redirect")).unwrap();

    let response = fetcher.fetch(request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.url.path(), "/json");
    let body: HashMap<String, String> = response.json(&JsonCodec::default()).unwrap();
    assert_eq!(body.get("key").map(String::as_str), Some("value"));
}
