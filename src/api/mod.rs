use crate::control::Controller;
use crate::error::GarudaError;
use crate::session::StartRequest;
use crate::stream::MULTIPART_CONTENT_TYPE;
use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 16 * 1024;

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections. Open video streams end with the session.
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
    addr: String,
    controller: Arc<Controller>,
}

impl ApiServer {
    pub fn new(addr: impl Into<String>, controller: Arc<Controller>) -> Self {
        Self {
            addr: addr.into(),
            controller,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
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
        let shutdown_thread = shutdown.clone();
        let controller = self.controller;
        let join = std::thread::Builder::new()
            .name("garuda-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, controller, shutdown_thread) {
                    log::error!("control api stopped: {}", err);
                }
            })?;
        log::info!("control api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    controller: Arc<Controller>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let controller = controller.clone();
                // Video viewers hold their connection for the whole session.
                let spawned = std::thread::Builder::new()
                    .name("garuda-api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &controller) {
                            log::warn!("control api request from {} rejected: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("control api: cannot spawn connection thread: {}", err);
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

fn handle_connection(mut stream: TcpStream, controller: &Controller) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            let _ = write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#);
            return Err(err);
        }
    };

    let allowed = match request.path.as_str() {
        "/health" | "/status" | "/video_feed" => "GET",
        "/start_surveillance" | "/stop_surveillance" => "POST",
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    };
    if request.method != allowed {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match request.path.as_str() {
        "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        "/status" => write_serialized(&mut stream, 200, &controller.status()),
        "/stop_surveillance" => write_serialized(&mut stream, 200, &controller.stop()),
        "/start_surveillance" => start_surveillance(&mut stream, controller, &request.body),
        _ => video_feed(&mut stream, controller),
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

/// Body is JSON only (`StartRequest`); form-encoded posts get a 400.
fn start_surveillance(stream: &mut TcpStream, controller: &Controller, body: &[u8]) -> Result<()> {
    let start: StartRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        match serde_json::from_slice(body) {
            Ok(start) => start,
            Err(err) => {
                let error = ErrorBody {
                    status: "error",
                    message: format!("invalid start request: {}", err),
                };
                return write_serialized(stream, 400, &error);
            }
        }
    };

    match controller.start(&start) {
        Ok(response) => write_serialized(stream, 200, &response),
        Err(err) => {
            let status = match err {
                GarudaError::SourceUnavailable { .. } => 503,
                _ => 500,
            };
            let error = ErrorBody {
                status: "error",
                message: err.to_string(),
            };
            write_serialized(stream, status, &error)
        }
    }
}

fn video_feed(stream: &mut TcpStream, controller: &Controller) -> Result<()> {
    let frames = controller.stream_frames();
    if !frames.is_live() {
        let placeholder = controller.hub().placeholder();
        return write_response(stream, 200, "image/jpeg", &placeholder);
    }

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        MULTIPART_CONTENT_TYPE
    );
    stream.write_all(header.as_bytes())?;
    let mut sent = 0u64;
    for chunk in frames {
        if let Err(err) = stream.write_all(&chunk).and_then(|_| stream.flush()) {
            log::debug!("video viewer left after {} frames: {}", sent, err);
            return Ok(());
        }
        sent += 1;
    }
    log::debug!("video stream finished after {} frames", sent);
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            bail!("connection closed before end of headers");
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            bail!("request too large");
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

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > MAX_REQUEST_BYTES || header_end + 4 + content_length > MAX_REQUEST_BYTES {
        bail!("request too large");
    }
    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            bail!("request body truncated");
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_serialized<T: Serialize>(stream: &mut TcpStream, status: u16, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
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
        503 => "HTTP/1.1 503 Service Unavailable",
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
    body: Vec<u8>,
}
