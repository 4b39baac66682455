//! Executor behaviour against local socket fixtures

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use probegate::config::Settings;
use probegate::context::MissionContext;
use probegate::http::{HttpExecutor, HttpMethod, RequestSpec};
use probegate::resources::CookieProfileCache;

/// Serve exactly one connection with a canned response; yields the raw
/// request bytes the client sent.
async fn serve_once(response: String) -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut collected = Vec::new();
        let mut buffer = vec![0u8; 16 * 1024];
        // Headers and body may arrive in separate segments; keep reading
        // until the client pauses.
        loop {
            let read = tokio::time::timeout(
                std::time::Duration::from_millis(150),
                stream.read(&mut buffer),
            )
            .await;
            match read {
                Ok(Ok(n)) if n > 0 => collected.extend_from_slice(&buffer[..n]),
                _ => break,
            }
            if request_complete(&collected) {
                break;
            }
        }
        let _ = tx.send(String::from_utf8_lossy(&collected).into_owned());
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    });
    (addr, rx)
}

/// True once the header block and any Content-Length body are in.
fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);
    raw.len() >= header_end + 4 + content_length
}

fn http_response(status_line: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n{extra_headers}\r\n{body}",
        body.len()
    )
}

fn executor() -> HttpExecutor {
    HttpExecutor::new(
        Settings::default(),
        Arc::new(MissionContext::new()),
        None,
        None,
    )
}

fn executor_with_cookies(cache: Arc<CookieProfileCache>) -> HttpExecutor {
    HttpExecutor::new(
        Settings::default(),
        Arc::new(MissionContext::new()),
        Some(cache),
        None,
    )
}

#[tokio::test]
async fn test_basic_get() {
    let (addr, request_rx) = serve_once(http_response(
        "200 OK",
        "X-Powered-By: fixtures\r\n",
        "hello world",
    ))
    .await;

    let envelope = executor()
        .execute(RequestSpec::new(format!("http://{addr}/ping")))
        .await
        .expect("should execute");

    assert_eq!(envelope.status, Some(200));
    assert_eq!(envelope.body, "hello world");
    assert_eq!(envelope.headers.get("x-powered-by").map(String::as_str), Some("fixtures"));
    assert!(envelope.error.is_none());
    assert!(envelope.elapsed_ms >= 0.0);

    let raw = request_rx.await.expect("request captured");
    assert!(raw.starts_with("GET /ping HTTP/1.1"));
}

#[tokio::test]
async fn test_headers_query_and_body_are_sent() {
    let (addr, request_rx) =
        serve_once(http_response("200 OK", "", "ok")).await;

    let mut spec = RequestSpec::new(format!("http://{addr}/submit"));
    spec.method = HttpMethod::Post;
    spec.headers.insert("X-Probe".into(), "yes".into());
    spec.query_params.insert("page".into(), "2".into());
    spec.body = Some(r#"{"k":"v"}"#.into());

    let envelope = executor().execute(spec).await.expect("should execute");
    assert_eq!(envelope.status, Some(200));

    let raw = request_rx.await.expect("request captured");
    assert!(raw.starts_with("POST /submit?page=2 HTTP/1.1"));
    assert!(raw.contains("x-probe: yes"));
    assert!(raw.contains(r#"{"k":"v"}"#));
}

#[tokio::test]
async fn test_redirect_chain_reports_final_url() {
    let (target_addr, _rx_b) = serve_once(http_response("200 OK", "", "landed")).await;
    let location = format!("http://{target_addr}/home");
    let (first_addr, _rx_a) = serve_once(http_response(
        "301 Moved Permanently",
        &format!("Location: {location}\r\n"),
        "",
    ))
    .await;

    let envelope = executor()
        .execute(RequestSpec::new(format!("http://{first_addr}/")))
        .await
        .expect("should execute");

    assert_eq!(envelope.status, Some(200));
    assert_eq!(envelope.final_url, location);
    assert_eq!(envelope.body, "landed");
}

#[tokio::test]
async fn test_redirects_can_be_disabled() {
    let (addr, _rx) = serve_once(http_response(
        "301 Moved Permanently",
        "Location: http://example.invalid/\r\n",
        "",
    ))
    .await;

    let mut spec = RequestSpec::new(format!("http://{addr}/"));
    spec.follow_redirects = false;

    let envelope = executor().execute(spec).await.expect("should execute");
    assert_eq!(envelope.status, Some(301));
    assert!(envelope.final_url.contains(&addr.to_string()));
}

#[tokio::test]
async fn test_timeout_produces_error_envelope() {
    // Accept the connection and go silent.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        drop(stream);
    });

    let mut spec = RequestSpec::new(format!("http://{addr}/slow"));
    spec.timeout_ms = 200;

    let envelope = executor().execute(spec).await.expect("should not error out");
    assert_eq!(envelope.status, None);
    assert_eq!(envelope.error.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Bind then drop to get a port with no listener.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let envelope = executor()
        .execute(RequestSpec::new(format!("http://{addr}/")))
        .await
        .expect("should not error out");
    assert_eq!(envelope.status, None);
    let error = envelope.error.expect("transport error recorded");
    assert!(error.starts_with("transport error:"), "got: {error}");
}

#[tokio::test]
async fn test_invalid_url_is_validation_failure() {
    let err = executor()
        .execute(RequestSpec::new("not a url"))
        .await
        .expect_err("should reject");
    assert_eq!(err.kind(), "validation_failed");
}

#[cfg(unix)]
fn write_profile(config_dir: &Path, data_dir: &Path) -> Arc<CookieProfileCache> {
    use std::os::unix::fs::PermissionsExt;
    let cookie_path = data_dir.join("admin.json");
    std::fs::write(&cookie_path, r#"{"sid": "aaa", "csrf": "bbb"}"#).expect("write cookies");
    std::fs::set_permissions(&cookie_path, std::fs::Permissions::from_mode(0o600))
        .expect("chmod cookies");
    let config_path = config_dir.join("cookie_sessions.yaml");
    std::fs::write(
        &config_path,
        "sessions:\n  admin:\n    cookie_file: admin.json\n    cache_ttl: 60\n",
    )
    .expect("write config");
    Arc::new(CookieProfileCache::new(config_path, data_dir.to_path_buf()))
}

#[cfg(unix)]
#[tokio::test]
async fn test_explicit_cookies_override_profile_by_key() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    let cache = write_profile(config_dir.path(), data_dir.path());

    let (addr, request_rx) = serve_once(http_response("200 OK", "", "ok")).await;

    let mut spec = RequestSpec::new(format!("http://{addr}/"));
    spec.cookie_profile = Some("admin".into());
    spec.cookies.insert("csrf".into(), "ccc".into());

    let envelope = executor_with_cookies(cache)
        .execute(spec)
        .await
        .expect("should execute");
    assert_eq!(envelope.status, Some(200));

    let raw = request_rx.await.expect("request captured");
    let cookie_line = raw
        .lines()
        .find(|l| l.to_lowercase().starts_with("cookie:"))
        .expect("cookie header present");
    assert!(cookie_line.contains("sid=aaa"), "line: {cookie_line}");
    assert!(cookie_line.contains("csrf=ccc"), "line: {cookie_line}");
    assert!(!cookie_line.contains("csrf=bbb"), "line: {cookie_line}");
}

#[cfg(unix)]
#[tokio::test]
async fn test_active_profile_applies_when_not_overridden() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    let cache = write_profile(config_dir.path(), data_dir.path());

    let (addr, request_rx) = serve_once(http_response("200 OK", "", "ok")).await;

    let mission_context = Arc::new(MissionContext::new());
    mission_context.set(uuid::Uuid::new_v4(), Some("admin".into()));
    let executor = HttpExecutor::new(Settings::default(), mission_context, Some(cache), None);

    let envelope = executor
        .execute(RequestSpec::new(format!("http://{addr}/")))
        .await
        .expect("should execute");
    assert_eq!(envelope.status, Some(200));

    let raw = request_rx.await.expect("request captured");
    assert!(raw.lines().any(|l| l.to_lowercase().starts_with("cookie:") && l.contains("sid=aaa")));
}

#[tokio::test]
async fn test_unknown_profile_fails_before_transfer() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    let config_path = config_dir.path().join("cookie_sessions.yaml");
    std::fs::write(&config_path, "sessions: {}\n").expect("write config");
    let cache = Arc::new(CookieProfileCache::new(
        config_path,
        data_dir.path().to_path_buf(),
    ));

    let mut spec = RequestSpec::new("http://127.0.0.1:1/");
    spec.cookie_profile = Some("ghost".into());

    let err = executor_with_cookies(cache)
        .execute(spec)
        .await
        .expect_err("should fail");
    assert_eq!(err.kind(), "not_found");
}
