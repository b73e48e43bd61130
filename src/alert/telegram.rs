use anyhow::{bail, Context, Result};
use image::RgbImage;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::AlertTransport;
use crate::annotate::encode_jpeg;
use crate::session::AlertCredential;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API `sendPhoto` transport.
///
/// Only HTTP 200 counts as delivered.
pub struct TelegramTransport {
    api_base: String,
    jpeg_quality: u8,
    agent: ureq::Agent,
}

impl TelegramTransport {
    pub fn new(api_base: impl Into<String>, timeout: Duration, jpeg_quality: u8) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            jpeg_quality,
            agent,
        }
    }

    fn endpoint(&self, token: &str) -> String {
        format!("{}/bot{}/sendPhoto", self.api_base, token.trim())
    }
}

impl Default for TelegramTransport {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE, Duration::from_secs(15), 80)
    }
}

impl AlertTransport for TelegramTransport {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn send(&self, credential: &AlertCredential, image: &RgbImage, caption: &str) -> Result<()> {
        if !credential.is_complete() {
            bail!("alert credential is incomplete");
        }
        let jpeg = encode_jpeg(image, self.jpeg_quality).context("encode alert photo")?;
        let boundary = multipart_boundary();
        let body = multipart_body(&boundary, credential.chat_id.trim(), caption, &jpeg);

        let response = self
            .agent
            .post(&self.endpoint(&credential.token))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body);
        match response {
            Ok(response) if response.status() == 200 => Ok(()),
            Ok(response) => bail!("sendPhoto answered HTTP {}", response.status()),
            // The token is part of the URL; keep it out of the error text.
            Err(ureq::Error::Status(code, _)) => bail!("sendPhoto answered HTTP {}", code),
            Err(ureq::Error::Transport(err)) => bail!("sendPhoto transport error: {}", err.kind()),
        }
    }
}

fn multipart_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("garuda-{:x}", nanos)
}

fn multipart_body(boundary: &str, chat_id: &str, caption: &str, jpeg: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(jpeg.len() + 512);
    for (name, value) in [("chat_id", chat_id), ("caption", caption)] {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                boundary, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"alert.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n",
            boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(jpeg);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    #[test]
    fn multipart_body_carries_fields_and_photo() {
        let body = multipart_body("b0", "42", "Person detected!", &[0xFF, 0xD8, 0xFF]);
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--b0\r\n"));
        assert!(text.contains("name=\"chat_id\"\r\n\r\n42\r\n"));
        assert!(text.contains("name=\"caption\"\r\n\r\nPerson detected!\r\n"));
        assert!(text.contains("filename=\"alert.jpg\"\r\nContent-Type: image/jpeg"));
        assert!(text.ends_with("\r\n--b0--\r\n"));
    }

    #[test]
    fn incomplete_credential_is_refused_locally() {
        let transport = TelegramTransport::new("http://127.0.0.1:9", Duration::from_millis(50), 80);
        let result = transport.send(&AlertCredential::new("", "42"), &RgbImage::new(2, 2), "x");
        assert!(result.is_err());
    }

    fn one_shot_server(status_line: &'static str) -> Result<(String, std::thread::JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request.ends_with(b"--\r\n") {
                    break;
                }
            }
            let response = format!("{}\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}", status_line);
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        Ok((format!("http://{}", addr), handle))
    }

    #[test]
    fn http_200_is_delivery() -> Result<()> {
        let (base, server) = one_shot_server("HTTP/1.1 200 OK")?;
        let transport = TelegramTransport::new(base, Duration::from_secs(2), 80);
        transport.send(
            &AlertCredential::new("123:abc", "42"),
            &RgbImage::new(8, 8),
            "Person detected!",
        )?;
        let request = server.join().unwrap();
        assert!(request.starts_with("POST /bot123:abc/sendPhoto"));
        assert!(request.contains("multipart/form-data; boundary=garuda-"));
        Ok(())
    }

    #[test]
    fn non_200_is_failure() -> Result<()> {
        let (base, server) = one_shot_server("HTTP/1.1 401 Unauthorized")?;
        let transport = TelegramTransport::new(base, Duration::from_secs(2), 80);
        let result = transport.send(
            &AlertCredential::new("bad", "42"),
            &RgbImage::new(8, 8),
            "Person detected!",
        );
        server.join().unwrap();
        let err = result.expect_err("401 must fail");
        assert!(err.to_string().contains("401"));
        assert!(!err.to_string().contains("bad"));
        Ok(())
    }
}
