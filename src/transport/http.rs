//! HTTP transport: one request per command against the controller's web server.
//!
//! Actuation commands are POSTed as JSON to `<base>/<command>`, the status
//! probe is a GET on `<base>/status`.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use super::{DeviceRequest, DeviceTransport, TransportError, TransportResponse};

/// Controller reachable over HTTP.
#[derive(Debug)]
pub struct HttpTransport {
    base_url: String,
    client: Client,
    wire: Mutex<()>,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. `http://192.168.2.236:80`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::Unreachable(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            wire: Mutex::new(()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, request: &DeviceRequest) -> String {
        format!("{}/{}", self.base_url, request.name())
    }
}

impl DeviceTransport for HttpTransport {
    fn submit(
        &self,
        request: &DeviceRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let _wire = self.wire.lock().unwrap_or_else(|e| e.into_inner());
        let url = self.endpoint(request);
        debug!("HTTP {} -> {}", request, url);

        let builder = match request {
            DeviceRequest::Status => self.client.get(&url),
            _ => self.client.post(&url).json(request),
        };

        let response = builder.timeout(timeout).send().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        if status != StatusCode::OK {
            warn!("Device answered {} for {}: {}", status, request, body.trim());
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        match serde_json::from_str::<TransportResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) if matches!(request, DeviceRequest::Status) => {
                Err(TransportError::Malformed(e.to_string()))
            }
            // Older firmware answers actuation calls with plain text; a 200
            // is the acknowledgement.
            Err(_) => Ok(TransportResponse::success(body.trim())),
        }
    }

    fn describe(&self) -> String {
        format!("http {}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ResponseStatus;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one HTTP exchange and hand back the raw request.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Should bind test listener");
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_move_posts_json_envelope() {
        let (url, server) = serve_once("200 OK", r#"{"status":"success","message":"ok"}"#);
        let transport = HttpTransport::new(url).unwrap();
        let response = transport
            .submit(&DeviceRequest::Move { position: 120 }, Duration::from_secs(5))
            .unwrap();
        assert!(response.is_success());

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /move "));
        assert!(request.contains(r#""position":120"#));
    }

    #[test]
    fn test_non_200_is_error() {
        let (url, server) = serve_once("500 Internal Server Error", "boom");
        let transport = HttpTransport::new(url).unwrap();
        let err = transport
            .submit(&DeviceRequest::Servo { delay: 100 }, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, TransportError::HttpStatus { status: 500, .. }));
        server.join().unwrap();
    }

    #[test]
    fn test_plain_text_acknowledgement() {
        let (url, server) = serve_once("200 OK", "Servo moved");
        let transport = HttpTransport::new(url).unwrap();
        let response = transport
            .submit(&DeviceRequest::Servo { delay: 100 }, Duration::from_secs(5))
            .unwrap();
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.message, "Servo moved");
        server.join().unwrap();
    }

    #[test]
    fn test_health_check_online() {
        let (url, server) = serve_once("200 OK", r#"{"status":"online"}"#);
        let transport = HttpTransport::new(url).unwrap();
        assert!(transport.health_check());
        let request = server.join().unwrap();
        assert!(request.starts_with("GET /status "));
    }

    #[test]
    fn test_unreachable_device() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let transport = HttpTransport::new(format!("http://{}", addr)).unwrap();
        let err = transport
            .submit(&DeviceRequest::Move { position: 1 }, Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Unreachable(_) | TransportError::Timeout(_)
        ));
        assert!(!transport.health_check());
    }
}
