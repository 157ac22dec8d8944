//! WebDriver BiDi correlation client.
//!
//! One WebSocket carries both command/response pairs and unsolicited events. This crate owns
//! that connection through a single reader loop, hands out command ids, routes responses back
//! to the caller that issued the command and events to whoever is waiting for them.

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the client.
    #[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
    pub enum ClientErrorKind {
        #[error("connection failed")]
        ConnectionError,
        #[error("connection closed")]
        ConnectionClosed,
        #[error("command failed with {error}: {message}")]
        Command { error: String, message: String },
        #[error("timed out")]
        Timeout,
        #[error("malformed message")]
        MalformedMessage,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to callers.
    ///
    /// Cloneable because a single transport or decode failure is broadcast to every pending
    /// waiter.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct ClientError {
        pub kind: ClientErrorKind,
        pub hint: Option<String>,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for ClientError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for ClientError {}

    impl ClientError {
        pub fn new(kind: ClientErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                data: None,
            }
        }

        pub fn command(error: impl Into<String>, message: impl Into<String>) -> Self {
            Self::new(ClientErrorKind::Command {
                error: error.into(),
                message: message.into(),
            })
        }

        pub fn closed() -> Self {
            Self::new(ClientErrorKind::ConnectionClosed)
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }

        /// Peer-side `error` code when this is a command failure.
        pub fn command_error(&self) -> Option<&str> {
            match &self.kind {
                ClientErrorKind::Command { error, .. } => Some(error.as_str()),
                _ => None,
            }
        }

        pub fn is_timeout(&self) -> bool {
            matches!(self.kind, ClientErrorKind::Timeout)
        }

        pub fn is_closed(&self) -> bool {
            matches!(self.kind, ClientErrorKind::ConnectionClosed)
        }
    }
}

pub mod config {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use std::env;
    use std::time::Duration;

    /// Connection and timing configuration for a BiDi client.
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct BidiConfig {
        /// Direct WebSocket endpoint. Takes precedence over `http_endpoint`.
        pub websocket_url: Option<String>,
        /// Classic WebDriver endpoint used for the two-phase session bootstrap.
        pub http_endpoint: Option<String>,
        /// Port of a local BiDi server when neither endpoint is configured.
        pub port: u16,
        pub connect_timeout_ms: u64,
        /// `None` lets commands wait until their response or connection death.
        pub command_timeout_ms: Option<u64>,
        pub event_timeout_ms: u64,
        pub outbound_queue: usize,
        pub protocol_error_capacity: usize,
        /// Extra capabilities merged into the bootstrap `alwaysMatch` block.
        pub capabilities: Value,
    }

    impl Default for BidiConfig {
        fn default() -> Self {
            Self {
                websocket_url: env_string("BIDI_WS_URL"),
                http_endpoint: env_string("BIDI_HTTP_ENDPOINT"),
                port: resolve_port(),
                connect_timeout_ms: 10_000,
                command_timeout_ms: None,
                event_timeout_ms: 5_000,
                outbound_queue: 128,
                protocol_error_capacity: 64,
                capabilities: Value::Object(Default::default()),
            }
        }
    }

    impl BidiConfig {
        /// WebSocket URL used when no bootstrap call is required.
        pub fn direct_websocket_url(&self) -> Option<String> {
            if let Some(url) = &self.websocket_url {
                return Some(url.clone());
            }
            if self.http_endpoint.is_some() {
                return None;
            }
            Some(format!("ws://localhost:{}/session", self.port))
        }

        pub fn connect_timeout(&self) -> Duration {
            Duration::from_millis(self.connect_timeout_ms)
        }

        pub fn command_timeout(&self) -> Option<Duration> {
            self.command_timeout_ms.map(Duration::from_millis)
        }

        pub fn event_timeout(&self) -> Duration {
            Duration::from_millis(self.event_timeout_ms)
        }
    }

    fn env_string(key: &str) -> Option<String> {
        match env::var(key) {
            Ok(value) => {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Err(_) => None,
        }
    }

    fn resolve_port() -> u16 {
        env_string("BIDI_PORT")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(8080)
    }
}

pub mod bootstrap;
pub mod client;
pub mod codec;
pub mod ids;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod transport;

pub use client::{BidiClient, EventWait};
pub use codec::{decode, encode, Command, Event, Message, ResponsePayload};
pub use config::BidiConfig;
pub use error::{ClientError, ClientErrorKind};
pub use ids::CommandIdAllocator;
pub use metrics::ClientMetricsSnapshot;
pub use registry::EventPredicate;
pub use session::Session;
pub use transport::{MemoryPeer, MemoryTransport, Transport, WebSocketTransport};

#[cfg(test)]
mod tests {
    use super::config::BidiConfig;
    use serial_test::serial;
    use std::env;

    fn with_env<F: FnOnce()>(pairs: &[(&str, Option<&str>)], f: F) {
        let saved: Vec<_> = pairs
            .iter()
            .map(|(key, _)| (key.to_string(), env::var(key).ok()))
            .collect();
        for (key, value) in pairs {
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
        f();
        for (key, value) in saved {
            match value {
                Some(value) => env::set_var(&key, value),
                None => env::remove_var(&key),
            }
        }
    }

    #[test]
    #[serial]
    fn derives_local_url_from_port() {
        with_env(
            &[
                ("BIDI_WS_URL", None),
                ("BIDI_HTTP_ENDPOINT", None),
                ("BIDI_PORT", Some("9222")),
            ],
            || {
                let cfg = BidiConfig::default();
                assert_eq!(
                    cfg.direct_websocket_url().as_deref(),
                    Some("ws://localhost:9222/session")
                );
            },
        );
    }

    #[test]
    #[serial]
    fn http_endpoint_requires_bootstrap() {
        with_env(
            &[
                ("BIDI_WS_URL", Some("  ")),
                ("BIDI_HTTP_ENDPOINT", Some("http://127.0.0.1:4444")),
                ("BIDI_PORT", None),
            ],
            || {
                let cfg = BidiConfig::default();
                assert!(cfg.websocket_url.is_none());
                assert!(cfg.direct_websocket_url().is_none());
                assert_eq!(cfg.port, 8080);
            },
        );
    }

    #[test]
    #[serial]
    fn explicit_websocket_url_wins() {
        with_env(
            &[
                ("BIDI_WS_URL", Some("ws://example.test/bidi")),
                ("BIDI_HTTP_ENDPOINT", Some("http://127.0.0.1:4444")),
            ],
            || {
                let cfg = BidiConfig::default();
                assert_eq!(
                    cfg.direct_websocket_url().as_deref(),
                    Some("ws://example.test/bidi")
                );
            },
        );
    }
}
