//! Test helpers shared by the chatline crates: a tiny HTTP capture server for
//! exercising the push relay client without a real endpoint.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;

#[derive(Debug)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl CapturedRequest {
    /// Body parsed as JSON. Panics on malformed bodies; test-only helper.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body is json")
    }
}

/// Spawn a mock HTTP server that serves `requests` connections, answering each
/// with `status_line` and `response_body`. Returns the base URL and a receiver
/// yielding every captured request in arrival order.
pub fn spawn_capture_server(
    status_line: &str,
    response_body: &str,
    requests: usize,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("read mock server addr");
    let (tx, rx) = mpsc::channel();
    let status_line = status_line.to_string();
    let response_body = response_body.to_string();

    thread::spawn(move || {
        for _ in 0..requests {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let req = read_http_request(&mut stream);
            if tx.send(req).is_err() {
                return;
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                response_body.len(),
                response_body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    (format!("http://{addr}"), rx)
}

/// An address nothing listens on, for exercising delivery failures.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe");
    let addr = listener.local_addr().expect("read probe addr");
    drop(listener);
    format!("http://{addr}")
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn read_http_request(stream: &mut TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut end = None;
    let mut content_length = 0usize;

    loop {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if end.is_none() {
            end = header_end(&buf);
            if let Some(e) = end {
                content_length = String::from_utf8_lossy(&buf[..e])
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
            }
        }
        if let Some(e) = end {
            if buf.len() >= e + content_length {
                break;
            }
        }
    }

    let end = end.expect("request headers must be present");
    let head = String::from_utf8_lossy(&buf[..end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next().expect("request line").split_whitespace();
    let method = request_line.next().expect("method").to_string();
    let path = request_line.next().expect("path").to_string();
    let headers = lines
        .take_while(|line| !line.trim().is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let body_end = (end + content_length).min(buf.len());
    let body = String::from_utf8_lossy(&buf[end..body_end]).into_owned();

    CapturedRequest {
        method,
        path,
        headers,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(addr: &str, body: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        let req = format!(
            "POST /send HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(req.as_bytes()).unwrap();
        let mut resp = String::new();
        stream.read_to_string(&mut resp).unwrap();
        resp
    }

    #[test]
    fn capture_server_serves_several_requests() {
        let (url, rx) = spawn_capture_server("200 OK", r#"{"ok":true}"#, 2);
        let addr = url.trim_start_matches("http://").to_string();

        assert!(post(&addr, r#"{"n":1}"#).contains("200 OK"));
        assert!(post(&addr, r#"{"n":2}"#).contains("200 OK"));

        let first = rx.recv().unwrap();
        let second = rx.recv().unwrap();
        assert_eq!(first.method, "POST");
        assert_eq!(first.path, "/send");
        assert_eq!(first.json()["n"], 1);
        assert_eq!(second.json()["n"], 2);
    }

    #[test]
    fn unreachable_url_refuses_connections() {
        let url = unreachable_url();
        assert!(TcpStream::connect(url.trim_start_matches("http://")).is_err());
    }
}
