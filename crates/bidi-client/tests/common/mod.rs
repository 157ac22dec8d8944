//! Minimal WebDriver HTTP endpoint for bootstrap tests.
#![allow(dead_code)]

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// A request seen by the stub: `"POST /session"` and the decoded JSON body, if any.
#[derive(Debug)]
pub struct Recorded {
    pub line: String,
    pub body: Value,
}

/// Serves `POST /session` with session `s1` pointing at `web_socket_url`, and
/// `DELETE /session/{id}` with a null value. Returns the base URL and the request log.
pub async fn webdriver_stub(web_socket_url: String) -> (String, mpsc::UnboundedReceiver<Recorded>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            let web_socket_url = web_socket_url.clone();
            tokio::spawn(async move {
                let _ = handle(stream, &web_socket_url, &tx).await;
            });
        }
    });
    (base, rx)
}

async fn handle(
    mut stream: TcpStream,
    web_socket_url: &str,
    tx: &mpsc::UnboundedSender<Recorded>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let line = format!(
        "{} {}",
        parts.next().unwrap_or_default(),
        parts.next().unwrap_or_default()
    );
    let length = lines
        .filter_map(|header| header.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);

    let reply = if line == "POST /session" {
        json!({
            "value": {
                "sessionId": "s1",
                "capabilities": { "webSocketUrl": web_socket_url }
            }
        })
    } else {
        json!({ "value": null })
    };
    let _ = tx.send(Recorded { line, body });

    let payload = reply.to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        payload.len(),
        payload
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// A `ws://` URL nothing listens on.
pub fn refused_websocket_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/session")
}
