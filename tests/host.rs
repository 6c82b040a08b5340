//! End-to-end tests over a live host and raw TCP clients.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use berth::{Error, Host, HostConfig, Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::timeout;
use url::Url;

/// Routes the host's log output through the test harness. Safe to call from
/// every test; only the first call installs the subscriber.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Grabs a port the OS considers free right now. The tiny race between
/// dropping the probe listener and the host binding it is acceptable in
/// tests.
fn free_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

fn base_uris(port: u16) -> Vec<Url> {
    vec![Url::parse(&format!("http://localhost:{port}/app/")).unwrap()]
}

/// Sends one HTTP/1.1 request and reads the connection to EOF.
async fn send_request(port: u16, target: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!(
        "GET {target} HTTP/1.1\r\nHost: localhost:{port}\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    // An aborted connection may reset instead of closing cleanly; the test
    // cares about whatever arrived before that.
    let _ = stream.read_to_end(&mut raw).await;
    String::from_utf8_lossy(&raw).into_owned()
}

#[tokio::test]
async fn round_trips_a_request_through_the_engine() {
    init_tracing();

    let engine =|req: Request| async move {
        let body = format!("{} {}", req.method(), req.url().path);
        Ok::<_, Error>(Response::text(body))
    };

    let port = free_port();
    let config = HostConfig { allow_chunked_encoding: false, ..HostConfig::default() };
    let mut host = Host::new(base_uris(port), config, engine).unwrap();
    host.start().await.unwrap();

    let reply = send_request(port, "/app/foo/bar?x=1").await;
    assert!(reply.starts_with("HTTP/1.1 200"), "unexpected reply: {reply}");
    assert!(reply.contains("content-length: 12"), "unexpected reply: {reply}");
    assert!(reply.ends_with("GET /foo/bar"), "unexpected reply: {reply}");

    host.stop().await;
}

#[tokio::test]
async fn default_encoding_policy_streams_chunked() {
    init_tracing();

    let engine =|_req: Request| async move {
        Ok::<_, Error>(Response::text("streamed body"))
    };

    let port = free_port();
    let mut host = Host::new(base_uris(port), HostConfig::default(), engine).unwrap();
    host.start().await.unwrap();

    let reply = send_request(port, "/app/").await;
    assert!(reply.starts_with("HTTP/1.1 200"), "unexpected reply: {reply}");
    assert!(reply.contains("transfer-encoding: chunked"), "unexpected reply: {reply}");
    assert!(!reply.contains("content-length"), "unexpected reply: {reply}");

    host.stop().await;
}

#[tokio::test]
async fn unroutable_request_reaches_the_error_callback_only() {
    init_tracing();

    let errors: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&errors);

    let config = HostConfig {
        on_unhandled_error: Arc::new(move |e: &Error| sink.lock().unwrap().push(e.to_string())),
        ..HostConfig::default()
    };
    let engine = |_req: Request| async move { Ok::<_, Error>(Response::text("unreached")) };

    let port = free_port();
    let mut host = Host::new(base_uris(port), config, engine).unwrap();
    host.start().await.unwrap();

    // Outside the configured base path, fallback disabled: the request fails
    // and its connection is aborted without a synthesized response.
    let reply = send_request(port, "/other").await;
    assert!(!reply.contains("unreached"), "engine ran for an unroutable request");

    let recorded = errors.lock().unwrap().clone();
    assert!(
        recorded.iter().any(|e| e.contains("unable to locate base URI")),
        "recorded errors: {recorded:?}"
    );

    // The accept loop must have survived: a routable request still works.
    let reply = send_request(port, "/app/").await;
    assert!(reply.starts_with("HTTP/1.1 200"), "unexpected reply: {reply}");

    host.stop().await;
}

#[tokio::test]
async fn admission_throttles_accepts_not_in_flight_requests() {
    init_tracing();

    let gate = Arc::new(Notify::new());
    let (entered_tx, mut entered_rx) = tokio::sync::mpsc::unbounded_channel::<()>();

    let engine = {
        let gate = Arc::clone(&gate);
        move |req: Request| {
            let gate = Arc::clone(&gate);
            let entered_tx = entered_tx.clone();
            async move {
                if req.url().path == "/slow" {
                    let _ = entered_tx.send(());
                    gate.notified().await;
                }
                Ok::<_, Error>(Response::text(req.url().path.clone()))
            }
        }
    };

    let port = free_port();
    // Buffered output keeps the raw reply free of chunked framing, so the
    // body comparisons below can look at the reply's tail.
    let config = HostConfig {
        max_connections: 1,
        allow_chunked_encoding: false,
        ..HostConfig::default()
    };
    let mut host = Host::new(base_uris(port), config, engine).unwrap();
    host.start().await.unwrap();

    // Park the first request inside the engine.
    let slow = tokio::spawn(send_request(port, "/app/slow"));
    timeout(Duration::from_secs(5), entered_rx.recv())
        .await
        .expect("first request never reached the engine");

    // With one permit, the second accept may be issued as soon as the first
    // accept resolved — not once the first request finishes processing. The
    // second request must therefore complete while the first is still parked.
    let fast = timeout(Duration::from_secs(5), send_request(port, "/app/fast"))
        .await
        .expect("second request was blocked behind the first");
    assert!(fast.ends_with("/fast"), "unexpected reply: {fast}");

    gate.notify_one();
    let slow = timeout(Duration::from_secs(5), slow)
        .await
        .expect("first request never completed")
        .unwrap();
    assert!(slow.ends_with("/slow"), "unexpected reply: {slow}");

    host.stop().await;
}

#[tokio::test]
async fn stop_closes_the_listener() {
    init_tracing();

    let engine =|_req: Request| async move { Ok::<_, Error>(Response::text("ok")) };

    let port = free_port();
    let mut host = Host::new(base_uris(port), HostConfig::default(), engine).unwrap();
    host.start().await.unwrap();

    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_ok());

    host.stop().await;

    // The listener is gone; new connections are refused.
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn start_is_idempotent_while_running() {
    init_tracing();

    let engine =|_req: Request| async move { Ok::<_, Error>(Response::text("ok")) };

    let port = free_port();
    let mut host = Host::new(base_uris(port), HostConfig::default(), engine).unwrap();
    host.start().await.unwrap();
    host.start().await.unwrap();

    let reply = send_request(port, "/app/").await;
    assert!(reply.starts_with("HTTP/1.1 200"), "unexpected reply: {reply}");

    host.stop().await;
}
