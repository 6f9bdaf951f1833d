#![allow(dead_code)]

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const READ_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_READ_DURATION: Duration = Duration::from_secs(6);
const MAX_HEADER_BYTES: usize = 64 * 1024;

pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body json")
    }
}

/// Mock ARM endpoint answering one scripted response per connection.
///
/// Responses carry `Connection: close`, so every client request arrives on a
/// fresh connection and the script is consumed in order.
pub struct MockArm {
    listener: TcpListener,
    pub base_url: String,
}

impl MockArm {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        Self {
            listener,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn serve(self, responses: Vec<String>) -> mpsc::UnboundedReceiver<CapturedRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = self.listener;

        tokio::spawn(async move {
            for response in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let req = read_request(&mut stream).await;
                let _ = tx.send(req);
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        rx
    }
}

pub fn response_with_body(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {status}\r\nConnection: close\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
    response
}

pub fn json_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut all = vec![("Content-Type", "application/json")];
    all.extend_from_slice(headers);
    response_with_body(status, &all, body)
}

pub fn empty_response(status: &str, headers: &[(&str, &str)]) -> String {
    response_with_body(status, headers, "")
}

/// Waits for exactly `n` captured requests, giving each up to two seconds.
pub async fn collect(
    rx: &mut mpsc::UnboundedReceiver<CapturedRequest>,
    n: usize,
) -> Vec<CapturedRequest> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let req = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("request timeout")
            .expect("request");
        out.push(req);
    }
    out
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

async fn read_request(stream: &mut TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let deadline = Instant::now() + MAX_READ_DURATION;

    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() >= MAX_HEADER_BYTES {
            panic!("request headers too large");
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            panic!("timed out reading request headers");
        }
        match timeout(remaining.min(READ_TIMEOUT), stream.read(&mut chunk)).await {
            Ok(Ok(0)) => panic!("connection closed before headers"),
            Ok(Ok(read)) => buf.extend_from_slice(&chunk[..read]),
            Ok(Err(e)) => panic!("read_request I/O error: {e}"),
            Err(_) => continue,
        }
    };

    let header_str = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = header_str.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let full_path = parts.next().unwrap_or("");

    let (path, query_str) = full_path.split_once('?').unwrap_or((full_path, ""));
    let mut query = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(query_str.as_bytes()) {
        query.insert(key.to_string(), value.to_string());
    }

    let mut headers = Vec::new();
    let mut content_length: usize = 0;
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = value.parse().unwrap_or(0);
            }
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            panic!("timed out reading request body");
        }
        match timeout(remaining.min(READ_TIMEOUT), stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(read)) => body.extend_from_slice(&chunk[..read]),
            Ok(Err(e)) => panic!("read_request body I/O error: {e}"),
            Err(_) => continue,
        }
    }
    body.truncate(content_length);

    CapturedRequest {
        method,
        path: path.to_string(),
        headers,
        query,
        body,
    }
}
