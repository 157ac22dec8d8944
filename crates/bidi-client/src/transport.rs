use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::{ClientError, ClientErrorKind};

/// One duplex, message-oriented channel to the peer.
///
/// `receive` is polled inside `tokio::select!` by the client loop and must be cancellation
/// safe: dropping an unfinished `receive` future must not lose a message.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), ClientError>;
    async fn receive(&mut self) -> Result<String, ClientError>;
    async fn close(&mut self) -> Result<(), ClientError>;
}

pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
    closed: bool,
}

impl WebSocketTransport {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let handshake = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| {
                ClientError::new(ClientErrorKind::ConnectionError)
                    .with_hint(format!("websocket handshake with {url} timed out"))
            })?;
        let (stream, response) = handshake.map_err(|err| {
            ClientError::new(ClientErrorKind::ConnectionError)
                .with_hint(format!("failed to connect to {url}: {err}"))
        })?;

        info!(
            target: "bidi-transport",
            url,
            status = response.status().as_u16(),
            "websocket connection established"
        );
        Ok(Self {
            stream,
            url: url.to_string(),
            closed: false,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_ws_error(&mut self, err: tungstenite::Error) -> ClientError {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                self.closed = true;
                ClientError::closed()
            }
            other => {
                ClientError::new(ClientErrorKind::ConnectionError).with_hint(other.to_string())
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::closed().with_hint("send on closed websocket"));
        }
        match self.stream.send(WsMessage::Text(text.into())).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.map_ws_error(err)),
        }
    }

    async fn receive(&mut self) -> Result<String, ClientError> {
        if self.closed {
            return Err(ClientError::closed());
        }
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(text.as_str().to_owned()),
                Some(Ok(WsMessage::Binary(bytes))) => {
                    return String::from_utf8(bytes.to_vec()).map_err(|err| {
                        ClientError::new(ClientErrorKind::MalformedMessage)
                            .with_hint(format!("binary frame is not utf-8: {err}"))
                    });
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    self.closed = true;
                    let hint = frame
                        .map(|frame| {
                            format!(
                                "peer closed: {} {}",
                                u16::from(frame.code),
                                frame.reason.as_str()
                            )
                        })
                        .unwrap_or_else(|| "peer closed".to_string());
                    return Err(ClientError::closed().with_hint(hint));
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(self.map_ws_error(err)),
                None => {
                    self.closed = true;
                    return Err(ClientError::closed().with_hint("websocket stream ended"));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(err) => {
                debug!(target: "bidi-transport", ?err, "websocket close failed");
                Err(ClientError::new(ClientErrorKind::ConnectionError).with_hint(err.to_string()))
            }
        }
    }
}

/// In-process transport whose other end is scripted through a [`MemoryPeer`].
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
    closed: bool,
}

/// Peer side of a [`MemoryTransport`].
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, MemoryPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
                closed: false,
            },
            MemoryPeer {
                inbound: Some(in_tx),
                outbound: out_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::closed().with_hint("send on closed memory transport"));
        }
        self.outbound
            .send(text)
            .map_err(|_| ClientError::closed().with_hint("memory peer dropped"))
    }

    async fn receive(&mut self) -> Result<String, ClientError> {
        if self.closed {
            return Err(ClientError::closed());
        }
        match self.inbound.recv().await {
            Some(text) => Ok(text),
            None => {
                self.closed = true;
                Err(ClientError::closed().with_hint("memory peer closed"))
            }
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.closed = true;
        self.inbound.close();
        Ok(())
    }
}

impl MemoryPeer {
    /// Next text the client wrote, or `None` once the client side is gone.
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next outbound text parsed as JSON. Non-JSON text is returned as a JSON string.
    pub async fn next_command(&mut self) -> Option<Value> {
        let text = self.next_outbound().await?;
        Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    pub fn push(&self, text: impl Into<String>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    pub fn push_json(&self, value: Value) -> bool {
        self.push(value.to_string())
    }

    pub fn respond(&self, id: u64, result: Value) -> bool {
        self.push_json(json!({ "id": id, "type": "success", "result": result }))
    }

    pub fn respond_error(&self, id: u64, error: &str, message: &str) -> bool {
        self.push_json(json!({ "id": id, "type": "error", "error": error, "message": message }))
    }

    pub fn emit(&self, method: &str, params: Value) -> bool {
        self.push_json(json!({ "type": "event", "method": method, "params": params }))
    }

    /// Simulates the peer hanging up.
    pub fn close(&mut self) {
        self.inbound.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_transport_preserves_order() {
        let (mut transport, mut peer) = MemoryTransport::pair();
        peer.push("a");
        peer.push("b");
        peer.push("c");
        assert_eq!(transport.receive().await.unwrap(), "a");
        assert_eq!(transport.receive().await.unwrap(), "b");
        assert_eq!(transport.receive().await.unwrap(), "c");

        transport.send("out".into()).await.unwrap();
        assert_eq!(peer.next_outbound().await.as_deref(), Some("out"));
    }

    #[tokio::test]
    async fn peer_close_surfaces_connection_closed() {
        let (mut transport, mut peer) = MemoryTransport::pair();
        peer.push("last");
        peer.close();
        assert_eq!(transport.receive().await.unwrap(), "last");
        let err = transport.receive().await.unwrap_err();
        assert!(err.is_closed());
        assert!(!peer.push("late"));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (mut transport, _peer) = MemoryTransport::pair();
        transport.close().await.unwrap();
        let err = transport.send("x".into()).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn refused_websocket_connect_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WebSocketTransport::connect(
            &format!("ws://{addr}/session"),
            Duration::from_secs(2),
        )
        .await
        .err()
        .expect("connect must fail");
        assert_eq!(err.kind, ClientErrorKind::ConnectionError);
    }
}
