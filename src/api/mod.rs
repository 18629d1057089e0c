//! HTTP presentation layer.
//!
//! Plain HTTP/1.1 over `std::net`. The accept loop runs on its own thread and
//! each connection gets a thread, since `/video_feed` stays open for as long
//! as the client watches. Every response closes the connection.

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::alert::EmailSettings;
use crate::config::ApiSettings;
use crate::context::{AppContext, SourceSpec};
use crate::speech::SpeechClient;
use crate::stream::HubWait;

mod multipart;

use multipart::{boundary_from_content_type, extract_file_field};

const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_JSON_BODY_BYTES: u64 = 1024 * 1024;
const SOURCE_SWITCH_TIMEOUT: Duration = Duration::from_secs(10);
const STREAM_WAIT: Duration = Duration::from_secs(1);
const INDEX_HTML: &str = include_str!("../../assets/index.html");

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub snapshot_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            snapshot_dir: PathBuf::from("."),
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            addr: settings.addr.clone(),
            snapshot_dir: settings.snapshot_dir.clone(),
            upload_dir: settings.upload_dir.clone(),
            max_upload_bytes: settings.max_upload_bytes,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting, end open streams, and wait for the accept thread.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    context: Arc<AppContext>,
}

/// Shared by every connection thread.
struct Shared {
    cfg: ApiConfig,
    context: Arc<AppContext>,
    speech: SpeechClient,
    shutdown: Arc<AtomicBool>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, context: Arc<AppContext>) -> Self {
        Self { cfg, context }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind api listener on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared {
            speech: SpeechClient::new(&self.context.config().speech),
            cfg: self.cfg,
            context: self.context,
            shutdown: shutdown.clone(),
        });
        let join = std::thread::Builder::new()
            .name("api-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, shared) {
                    log::error!("http api stopped: {}", err);
                }
            })
            .context("spawn api thread")?;

        log::info!("http api listening on http://{}", addr);
        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, shared: Arc<Shared>) -> Result<()> {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let shared = shared.clone();
                let spawned = std::thread::Builder::new()
                    .name("api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &shared) {
                            log::warn!("http request failed: {:#}", err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("failed to spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, shared: &Shared) -> Result<()> {
    // Accepted sockets can inherit the listener's non-blocking flag.
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, &json!({"error": "forbidden"}))?;
        return Ok(());
    }

    let mut request = read_request(&mut stream)?;
    let body_limit = if request.path == "/upload_video" {
        shared.cfg.max_upload_bytes
    } else {
        MAX_JSON_BODY_BYTES
    };
    if let Err(err) = request.read_body(&mut stream, body_limit) {
        write_json_response(
            &mut stream,
            413,
            &json!({"status": "error", "message": err.to_string()}),
        )?;
        return Ok(());
    }
    log::debug!("{} {}", request.method, request.path);

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => write_response(
            &mut stream,
            200,
            "text/html; charset=utf-8",
            INDEX_HTML.as_bytes(),
        ),
        ("GET", "/health") => write_json_response(&mut stream, 200, &json!({"status": "ok"})),
        ("GET", "/video_feed") => stream_video(&mut stream, shared),
        ("GET", "/stats") => handle_stats(&mut stream, shared),
        ("POST", "/translate") => handle_translate(&mut stream, shared, &request),
        ("POST", "/speak") => handle_speak(&mut stream, shared, &request),
        ("POST", "/snapshot") => handle_snapshot(&mut stream, shared),
        ("POST", "/configure_email") => handle_configure_email(&mut stream, shared, &request),
        ("POST", "/switch_source") => handle_switch_source(&mut stream, shared, &request),
        ("POST", "/upload_video") => handle_upload(&mut stream, shared, &request),
        (_, "/" | "/health" | "/video_feed" | "/stats" | "/translate" | "/speak" | "/snapshot"
            | "/configure_email" | "/switch_source" | "/upload_video") => {
            write_json_response(&mut stream, 405, &json!({"error": "method_not_allowed"}))
        }
        _ => write_json_response(&mut stream, 404, &json!({"error": "not_found"})),
    }
}

// ----------------------------------------------------------------------------
// Routes
// ----------------------------------------------------------------------------

fn stream_video(stream: &mut TcpStream, shared: &Shared) -> Result<()> {
    let header = "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n";
    stream.write_all(header.as_bytes())?;

    let hub = shared.context.hub();
    let mut last_seq = 0;
    while !shared.shutdown.load(Ordering::SeqCst) {
        match hub.wait_next(last_seq, STREAM_WAIT) {
            HubWait::Frame { seq, jpeg } => {
                last_seq = seq;
                let part = format!(
                    "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                    jpeg.len()
                );
                let sent = stream
                    .write_all(part.as_bytes())
                    .and_then(|_| stream.write_all(&jpeg))
                    .and_then(|_| stream.write_all(b"\r\n"));
                if sent.is_err() {
                    log::debug!("video feed client disconnected");
                    break;
                }
            }
            HubWait::Timeout => continue,
            HubWait::Closed => break,
        }
    }
    Ok(())
}

fn handle_stats(stream: &mut TcpStream, shared: &Shared) -> Result<()> {
    let caption = shared.context.caption_snapshot();
    let security = shared.context.security_report();
    write_json_response(
        stream,
        200,
        &json!({
            "caption": caption.text,
            "generation": caption.generation,
            "source": shared.context.active_source(),
            "security": {
                "enabled": security.enabled,
                "detected": security.detected,
                "detail": security.detail,
            },
        }),
    )
}

#[derive(Deserialize)]
struct TranslateRequest {
    text: String,
    target_lang: String,
}

fn handle_translate(stream: &mut TcpStream, shared: &Shared, request: &HttpRequest) -> Result<()> {
    let Some(body) = parse_json::<TranslateRequest>(stream, request)? else {
        return Ok(());
    };
    let translated = match shared.speech.translate(&body.text, &body.target_lang) {
        Ok(text) => text,
        Err(err) => {
            log::warn!("translation failed: {:#}", err);
            format!("Error: {}", err)
        }
    };
    write_json_response(stream, 200, &json!({"translated_text": translated}))
}

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
    lang: String,
}

fn handle_speak(stream: &mut TcpStream, shared: &Shared, request: &HttpRequest) -> Result<()> {
    let Some(body) = parse_json::<SpeakRequest>(stream, request)? else {
        return Ok(());
    };
    match shared.speech.synthesize(&body.text, &body.lang) {
        Ok(audio) => write_response(stream, 200, "audio/mpeg", &audio),
        Err(err) => {
            log::warn!("speech synthesis failed: {:#}", err);
            write_json_response(stream, 500, &json!({"error": err.to_string()}))
        }
    }
}

fn handle_snapshot(stream: &mut TcpStream, shared: &Shared) -> Result<()> {
    let Some((_, jpeg)) = shared.context.hub().latest() else {
        return write_json_response(
            stream,
            200,
            &json!({"status": "error", "message": "Could not take snapshot"}),
        );
    };
    match save_snapshot(&shared.cfg.snapshot_dir, &jpeg) {
        Ok(filename) => {
            log::info!("snapshot saved as {}", filename);
            write_json_response(stream, 200, &json!({"status": "success", "filename": filename}))
        }
        Err(err) => {
            log::warn!("snapshot failed: {:#}", err);
            write_json_response(
                stream,
                200,
                &json!({"status": "error", "message": "Could not take snapshot"}),
            )
        }
    }
}

fn handle_configure_email(
    stream: &mut TcpStream,
    shared: &Shared,
    request: &HttpRequest,
) -> Result<()> {
    let Some(settings) = parse_json::<EmailSettings>(stream, request)? else {
        return Ok(());
    };
    match shared.context.alerts().configure(settings) {
        Ok(()) => write_json_response(
            stream,
            200,
            &json!({"status": "success", "message": "Email configuration saved"}),
        ),
        Err(err) => write_json_response(
            stream,
            400,
            &json!({"status": "error", "message": format!("{:#}", err)}),
        ),
    }
}

fn handle_switch_source(stream: &mut TcpStream, shared: &Shared, request: &HttpRequest) -> Result<()> {
    match request.query_param("source").as_deref() {
        Some("webcam") => {}
        other => {
            let message = format!("unsupported source {:?}", other.unwrap_or(""));
            return write_json_response(stream, 400, &json!({"status": "error", "message": message}));
        }
    }
    switch_and_respond(stream, shared, shared.context.default_source())
}

fn handle_upload(stream: &mut TcpStream, shared: &Shared, request: &HttpRequest) -> Result<()> {
    let stored = request
        .header("content-type")
        .and_then(boundary_from_content_type)
        .ok_or_else(|| anyhow!("expected a multipart/form-data upload"))
        .and_then(|boundary| extract_file_field(&request.body, &boundary, "file"))
        .and_then(|file| store_upload(&shared.cfg.upload_dir, file.filename.as_deref(), file.data));
    let path = match stored {
        Ok(path) => path,
        Err(err) => {
            return write_json_response(
                stream,
                400,
                &json!({"status": "error", "message": format!("{:#}", err)}),
            );
        }
    };
    log::info!("stored uploaded video at {}", path.display());
    switch_and_respond(stream, shared, SourceSpec::File(path))
}

fn switch_and_respond(stream: &mut TcpStream, shared: &Shared, spec: SourceSpec) -> Result<()> {
    match shared.context.request_source(spec, SOURCE_SWITCH_TIMEOUT) {
        Ok(description) => write_json_response(
            stream,
            200,
            &json!({"status": "success", "message": format!("Switched to {}", description)}),
        ),
        Err(err) => write_json_response(
            stream,
            500,
            &json!({"status": "error", "message": format!("{:#}", err)}),
        ),
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Parse a JSON body, answering 400 and returning `None` when it is invalid.
fn parse_json<T: for<'de> Deserialize<'de>>(
    stream: &mut TcpStream,
    request: &HttpRequest,
) -> Result<Option<T>> {
    match serde_json::from_slice::<T>(&request.body) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            write_json_response(
                stream,
                400,
                &json!({"error": format!("invalid request body: {}", err)}),
            )?;
            Ok(None)
        }
    }
}

fn save_snapshot(dir: &Path, jpeg: &[u8]) -> Result<String> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create snapshot directory {}", dir.display()))?;
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let filename = format!("snapshot_{}.jpg", secs);
    std::fs::write(dir.join(&filename), jpeg)
        .with_context(|| format!("write snapshot {}", filename))?;
    Ok(filename)
}

fn store_upload(dir: &Path, filename: Option<&str>, data: &[u8]) -> Result<PathBuf> {
    if data.is_empty() {
        return Err(anyhow!("uploaded file is empty"));
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create upload directory {}", dir.display()))?;
    let mut tag = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut tag);
    let name = format!(
        "{}_{}",
        hex::encode(tag),
        sanitize_filename(filename.unwrap_or("upload.mp4"))
    );
    let path = dir.join(name);
    std::fs::write(&path, data).with_context(|| format!("write upload {}", path.display()))?;
    Ok(path)
}

/// Keep only the final path component, restricted to a safe character set.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload.mp4".to_string()
    } else {
        trimmed.to_string()
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers were complete"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        raw_path: raw_path.to_string(),
        body: data[header_end + 4..].to_vec(),
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    raw_path: String,
    body: Vec<u8>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|v| v.as_str())
    }

    fn content_length(&self) -> Result<u64> {
        match self.header("content-length") {
            Some(value) => value
                .parse()
                .map_err(|_| anyhow!("invalid Content-Length '{}'", value)),
            None => Ok(0),
        }
    }

    /// Read the rest of the body announced by `Content-Length`.
    fn read_body(&mut self, stream: &mut TcpStream, limit: u64) -> Result<()> {
        let expected = self.content_length()?;
        if expected > limit {
            return Err(anyhow!("request body exceeds {} bytes", limit));
        }
        let expected = expected as usize;
        if self.body.len() > expected {
            self.body.truncate(expected);
            return Ok(());
        }
        let missing = expected - self.body.len();
        self.body.reserve(missing);
        Read::by_ref(stream)
            .take(missing as u64)
            .read_to_end(&mut self.body)
            .context("read request body")?;
        if self.body.len() != expected {
            return Err(anyhow!("request body ended early"));
        }
        Ok(())
    }

    fn query_param(&self, key: &str) -> Option<String> {
        let query = self.raw_path.split_once('?')?.1;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\clips\\my clip.mp4"), "my_clip.mp4");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "upload.mp4");
    }

    #[test]
    fn snapshot_is_written_with_epoch_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let name = save_snapshot(dir.path(), &[0xFF, 0xD8, 0xFF, 0xD9])?;
        assert!(name.starts_with("snapshot_") && name.ends_with(".jpg"));
        assert_eq!(std::fs::read(dir.path().join(&name))?, vec![0xFF, 0xD8, 0xFF, 0xD9]);
        Ok(())
    }

    #[test]
    fn uploads_get_unique_prefixed_names() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = store_upload(dir.path(), Some("clip.mp4"), b"data")?;
        let b = store_upload(dir.path(), Some("clip.mp4"), b"data")?;
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with("_clip.mp4"));
        assert!(store_upload(dir.path(), Some("x.mp4"), b"").is_err());
        Ok(())
    }
}
