use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::NaiveTime;
use serde_json::Value;

use garuda_watch::{
    AlertDispatcher, ApiHandle, ApiServer, Controller, FixedClock, GarudaConfig, GarudaError,
    InputKind, PipelineTuning, SharedDetector, StartRequest, StubBackend, TelegramTransport,
};

fn controller(camera_device: &str) -> Result<Arc<Controller>> {
    let mut config = GarudaConfig::default();
    config.api_addr = "127.0.0.1:0".to_string();
    config.capture.camera_device = camera_device.to_string();
    config.capture.inference_width = 64;

    let detector: SharedDetector = Arc::new(Mutex::new(StubBackend::new()));
    let dispatcher = Arc::new(AlertDispatcher::new(
        Arc::new(TelegramTransport::default()),
        1,
        1,
    )?);
    let controller = Controller::new(&config, detector, dispatcher)?
        .with_clock(Arc::new(FixedClock::new(
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        )))
        .with_tuning(PipelineTuning {
            inference_width: 64,
            idle_poll: Duration::from_millis(20),
            read_timeout: Duration::from_millis(100),
            ..PipelineTuning::default()
        });
    Ok(Arc::new(controller))
}

struct TestServer {
    controller: Arc<Controller>,
    handle: Option<ApiHandle>,
    addr: SocketAddr,
}

impl TestServer {
    fn start(camera_device: &str) -> Result<Self> {
        let controller = controller(camera_device)?;
        let handle = ApiServer::new("127.0.0.1:0", controller.clone()).spawn()?;
        let addr = handle.addr;
        Ok(Self {
            controller,
            handle: Some(handle),
            addr,
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop();
        }
        self.controller.shutdown();
    }
}

fn send(addr: SocketAddr, method: &str, path: &str, body: &str) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {len}\r\n\r\n{body}",
        len = body.len()
    );
    stream.write_all(request.as_bytes())?;
    Ok(stream)
}

fn split_response(raw: &[u8]) -> Result<(u16, String, Vec<u8>)> {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("missing header terminator"))?;
    let head = String::from_utf8_lossy(&raw[..end]).to_string();
    let status = head
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow!("missing status"))?
        .parse()?;
    Ok((status, head, raw[end + 4..].to_vec()))
}

fn request(addr: SocketAddr, method: &str, path: &str, body: &str) -> Result<(u16, String, Vec<u8>)> {
    let mut stream = send(addr, method, path, body)?;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    split_response(&raw)
}

fn json(addr: SocketAddr, method: &str, path: &str, body: &str) -> Result<(u16, Value)> {
    let (status, _, body) = request(addr, method, path, body)?;
    Ok((status, serde_json::from_slice(&body)?))
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

#[test]
fn health_and_idle_status() -> Result<()> {
    let server = TestServer::start("stub://camera?fps=30&width=64&height=48")?;

    let (status, body) = json(server.addr, "GET", "/health", "")?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = json(server.addr, "GET", "/status", "")?;
    assert_eq!(status, 200);
    assert_eq!(body["is_running"], false);
    assert_eq!(body["input_type"], "Camera");
    assert_eq!(body["from_time"], "00:00:00");
    assert_eq!(body["to_time"], "23:59:59");
    assert_eq!(body["playback_speed"], 1.0);
    assert_eq!(body["target_fps"], 15.0);
    Ok(())
}

#[test]
fn start_stream_and_stop_over_http() -> Result<()> {
    let server = TestServer::start("stub://camera?fps=30&width=64&height=48")?;

    let (status, body) = json(
        server.addr,
        "POST",
        "/start_surveillance",
        r#"{"input_type":"Camera","camera_index":0,"from_time":"08:00","to_time":"20:00:00","target_fps":"45"}"#,
    )?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "success");
    assert_eq!(body["adjustments"].as_array().map(Vec::len), Some(1));

    let (_, snapshot) = json(server.addr, "GET", "/status", "")?;
    assert_eq!(snapshot["is_running"], true);
    assert_eq!(snapshot["target_fps"], 30.0);
    assert_eq!(snapshot["from_time"], "08:00");

    let mut feed = send(server.addr, "GET", "/video_feed", "")?;
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_secs(5);
    while count(&raw, b"--frame\r\n") < 3 && Instant::now() < deadline {
        let n = feed.read(&mut buf)?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
    }
    let head = String::from_utf8_lossy(&raw[..raw.len().min(256)]).to_string();
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("multipart/x-mixed-replace; boundary=frame"));
    assert!(count(&raw, b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8") >= 3);

    let (status, body) = json(server.addr, "POST", "/stop_surveillance", "")?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "success");

    // The stream ends with the session.
    feed.read_to_end(&mut raw)?;

    let (_, snapshot) = json(server.addr, "GET", "/status", "")?;
    assert_eq!(snapshot["is_running"], false);
    assert_eq!(snapshot["target_fps"], 30.0);

    let report = server
        .controller
        .stop_and_wait()
        .ok_or_else(|| anyhow!("no session report"))?;
    assert!(report.emitted >= 3);
    Ok(())
}

#[test]
fn idle_video_feed_is_single_placeholder_jpeg() -> Result<()> {
    let server = TestServer::start("stub://camera?fps=30&width=64&height=48")?;
    let (status, head, body) = request(server.addr, "GET", "/video_feed", "")?;
    assert_eq!(status, 200);
    assert!(head.contains("Content-Type: image/jpeg"));
    assert_eq!(&body[..2], &[0xFF, 0xD8]);
    Ok(())
}

#[test]
fn unavailable_source_fails_start_and_stays_idle() -> Result<()> {
    let server = TestServer::start("stub://unavailable")?;

    let (status, body) = json(
        server.addr,
        "POST",
        "/start_surveillance",
        r#"{"input_type":"Camera","camera_index":2}"#,
    )?;
    assert_eq!(status, 503);
    assert_eq!(body["status"], "error");
    assert!(body["message"]
        .as_str()
        .is_some_and(|m| m.contains("camera:2")));

    let (_, snapshot) = json(server.addr, "GET", "/status", "")?;
    assert_eq!(snapshot["is_running"], false);
    Ok(())
}

#[test]
fn malformed_requests_are_rejected() -> Result<()> {
    let server = TestServer::start("stub://camera?fps=30&width=64&height=48")?;

    let (status, _, _) = request(server.addr, "GET", "/nope", "")?;
    assert_eq!(status, 404);
    let (status, _, _) = request(server.addr, "GET", "/start_surveillance", "")?;
    assert_eq!(status, 405);
    let (status, _, _) = request(server.addr, "POST", "/status", "")?;
    assert_eq!(status, 405);
    let (status, body) = json(server.addr, "POST", "/start_surveillance", "{not json")?;
    assert_eq!(status, 400);
    assert_eq!(body["status"], "error");
    // Form posts are not accepted; the route takes JSON only.
    let (status, body) = json(
        server.addr,
        "POST",
        "/start_surveillance",
        "input_type=Camera&camera_index=0",
    )?;
    assert_eq!(status, 400);
    assert_eq!(body["status"], "error");
    assert!(!server.controller.status().is_running);
    Ok(())
}

#[test]
fn oversized_content_length_is_rejected() -> Result<()> {
    let server = TestServer::start("stub://camera?fps=30&width=64&height=48")?;

    for length in ["18446744073709551615", "20000"] {
        let mut stream = TcpStream::connect(server.addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        let request = format!(
            "POST /start_surveillance HTTP/1.1\r\nHost: localhost\r\nContent-Length: {length}\r\n\r\n{{}}"
        );
        stream.write_all(request.as_bytes())?;
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;
        let (status, _, body) = split_response(&raw)?;
        assert_eq!(status, 400, "content-length {}", length);
        assert_eq!(String::from_utf8_lossy(&body), r#"{"error":"bad_request"}"#);
    }

    // The server is still serving.
    let (status, _) = json(server.addr, "GET", "/health", "")?;
    assert_eq!(status, 200);
    assert!(!server.controller.status().is_running);
    Ok(())
}

#[test]
fn restart_replaces_the_running_session() -> Result<()> {
    let controller = controller("stub://camera?fps=30&width=64&height=48")?;

    let first = StartRequest {
        input_type: Some("Camera".to_string()),
        ..StartRequest::default()
    };
    controller.start(&first)?;
    assert!(controller.status().is_running);
    std::thread::sleep(Duration::from_millis(200));

    let second = StartRequest {
        input_type: Some("File".to_string()),
        source_path: Some("stub://clip?fps=30&frames=20&width=64&height=48".to_string()),
        ..StartRequest::default()
    };
    let response = controller.start(&second)?;
    assert!(response.adjustments.is_empty());

    let status = controller.status();
    assert!(status.is_running);
    assert_eq!(status.input_type, InputKind::File);
    let first_report = controller
        .last_report()
        .ok_or_else(|| anyhow!("first session was not joined"))?;
    assert!(first_report.frames > 0);
    assert!(first_report.source.decoded > 0);

    let stop = controller.stop();
    assert_eq!(stop.message, "Surveillance stopped");
    assert_eq!(controller.stop().message, "Surveillance was not running");
    assert!(controller.stop_and_wait().is_some());
    assert!(controller.stop_and_wait().is_none());
    controller.shutdown();
    Ok(())
}

#[test]
fn failed_start_keeps_requested_configuration() -> Result<()> {
    let controller = controller("stub://unavailable")?;
    let request = StartRequest {
        input_type: Some("Camera".to_string()),
        from_time: Some("06:00:00".to_string()),
        ..StartRequest::default()
    };
    match controller.start(&request) {
        Err(GarudaError::SourceUnavailable { source_ref, .. }) => {
            assert_eq!(source_ref, "camera:0")
        }
        other => panic!("expected SourceUnavailable, got {:?}", other.map(|r| r.message)),
    }
    let status = controller.status();
    assert!(!status.is_running);
    assert_eq!(status.from_time, "06:00:00");
    controller.shutdown();
    Ok(())
}
