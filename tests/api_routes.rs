use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use livecap::api::{ApiConfig, ApiHandle, ApiServer};
use livecap::{AppContext, EmailAlertSink, Frame, LivecapConfig};

struct TestServer {
    context: Arc<AppContext>,
    handle: Option<ApiHandle>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = LivecapConfig::default();
        config.api.addr = "127.0.0.1:0".to_string();
        config.api.snapshot_dir = dir.path().join("snapshots");
        config.api.upload_dir = dir.path().join("uploads");

        let alerts = Arc::new(EmailAlertSink::from_settings(&config.alert));
        let api_config = ApiConfig::from(&config.api);
        let context = Arc::new(AppContext::from_parts(config, None, None, alerts));
        let handle = ApiServer::new(api_config, context.clone())
            .spawn()
            .expect("spawn api");
        Self {
            context,
            handle: Some(handle),
            _dir: dir,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.handle.as_ref().expect("running").addr
    }

    fn request(&self, method: &str, path: &str, body: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(self.addr()).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("timeout");
        let request = format!(
            "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            method,
            path,
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).expect("write request");
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).expect("read response");
        let text = String::from_utf8_lossy(&raw).to_string();
        let status = text
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status code");
        let body = text
            .split_once("\r\n\r\n")
            .map(|(_, body)| body.to_string())
            .unwrap_or_default();
        (status, body)
    }

    fn json(&self, method: &str, path: &str, body: &str) -> (u16, serde_json::Value) {
        let (status, body) = self.request(method, path, body);
        (status, serde_json::from_str(&body).expect("json body"))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.context.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop();
        }
    }
}

#[test]
fn index_and_health_are_served() {
    let server = TestServer::start();

    let (status, body) = server.request("GET", "/", "");
    assert_eq!(status, 200);
    assert!(body.contains("/video_feed"));

    let (status, body) = server.json("GET", "/health", "");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[test]
fn stats_report_placeholder_caption_and_disabled_security() {
    let server = TestServer::start();

    let (status, stats) = server.json("GET", "/stats", "");
    assert_eq!(status, 200);
    assert_eq!(stats["caption"], "Initializing...");
    assert_eq!(stats["generation"], 0);
    assert_eq!(stats["security"]["enabled"], false);
    assert_eq!(stats["security"]["detected"], false);
}

#[test]
fn unknown_paths_and_wrong_methods_are_rejected() {
    let server = TestServer::start();

    assert_eq!(server.request("GET", "/nope", "").0, 404);
    assert_eq!(server.request("POST", "/stats", "").0, 405);
    assert_eq!(server.request("GET", "/translate", "").0, 405);
}

#[test]
fn translate_reports_errors_inline() {
    let server = TestServer::start();

    let (status, body) = server.json(
        "POST",
        "/translate",
        r#"{"text": "a cat on a sofa", "target_lang": "not a language"}"#,
    );
    assert_eq!(status, 200);
    let translated = body["translated_text"].as_str().expect("text");
    assert!(translated.starts_with("Error: "), "{}", translated);

    assert_eq!(server.request("POST", "/translate", "{ broken").0, 400);
}

#[test]
fn snapshot_needs_a_frame_then_saves_it() {
    let server = TestServer::start();

    let (status, body) = server.json("POST", "/snapshot", "");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "error");

    let jpeg = Frame::filled(16, 16, [10, 200, 30])
        .encode_jpeg(80)
        .expect("encode");
    server.context.hub().publish(jpeg.clone());

    let (status, body) = server.json("POST", "/snapshot", "");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "success");
    let filename = body["filename"].as_str().expect("filename");
    let saved = std::fs::read(server.context.config().api.snapshot_dir.join(filename))
        .expect("snapshot file");
    assert_eq!(saved, jpeg);
}

#[test]
fn email_configuration_is_validated() {
    let server = TestServer::start();
    assert!(!server.context.alerts().is_configured());

    let (status, body) = server.json(
        "POST",
        "/configure_email",
        r#"{"sender": "not-an-address", "password": "x", "receiver": "me@example.com"}"#,
    );
    assert_eq!(status, 400);
    assert_eq!(body["status"], "error");
    assert!(!server.context.alerts().is_configured());

    let (status, body) = server.json(
        "POST",
        "/configure_email",
        r#"{"sender": "cam@example.com", "password": "app-password", "receiver": "me@example.com"}"#,
    );
    assert_eq!(status, 200);
    assert_eq!(body["status"], "success");
    assert!(server.context.alerts().is_configured());
}

#[test]
fn source_switch_rejects_unknown_sources_and_bad_uploads() {
    let server = TestServer::start();

    let (status, body) = server.json("POST", "/switch_source?source=ftp", "");
    assert_eq!(status, 400);
    assert_eq!(body["status"], "error");

    let (status, body) = server.json("POST", "/upload_video", "{}");
    assert_eq!(status, 400);
    assert_eq!(body["status"], "error");
}

#[test]
fn video_feed_streams_published_frames() {
    let server = TestServer::start();
    let jpeg = Frame::filled(8, 8, [0, 0, 255]).encode_jpeg(80).expect("encode");
    server.context.hub().publish(jpeg);

    let mut stream = TcpStream::connect(server.addr()).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("timeout");
    stream
        .write_all(b"GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .expect("write request");

    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    while !String::from_utf8_lossy(&seen).contains("Content-Type: image/jpeg") {
        let n = stream.read(&mut buf).expect("read feed");
        assert!(n > 0, "feed closed early");
        seen.extend_from_slice(&buf[..n]);
    }
    let text = String::from_utf8_lossy(&seen);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
    assert!(text.contains("--frame\r\n"));
}
