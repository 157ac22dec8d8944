//! Two-phase bootstrap: create a classic WebDriver session over HTTP and read back the BiDi
//! WebSocket URL it advertises.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use url::Url;

use crate::error::{ClientError, ClientErrorKind};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSession {
    pub session_id: String,
    pub web_socket_url: String,
}

/// Body of `POST /session` with `webSocketUrl` forced on and `extra` merged into
/// `alwaysMatch`.
pub fn session_request(extra: &Value) -> Value {
    let mut always_match = Map::new();
    if let Value::Object(fields) = extra {
        always_match.extend(fields.clone());
    }
    always_match.insert("webSocketUrl".into(), Value::Bool(true));
    json!({ "capabilities": { "alwaysMatch": always_match } })
}

/// Extracts session id and WebSocket URL from a `POST /session` reply.
pub fn parse_session_response(body: &Value) -> Result<BootstrapSession, ClientError> {
    let value = body.get("value").unwrap_or(body);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(ClientError::new(ClientErrorKind::ConnectionError)
            .with_hint(format!("session creation rejected: {error}: {message}"))
            .with_data(body.clone()));
    }

    let session_id = value
        .get("sessionId")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("sessionId", body))?;
    let web_socket_url = value
        .get("capabilities")
        .and_then(|caps| caps.get("webSocketUrl"))
        .and_then(Value::as_str)
        .ok_or_else(|| missing("capabilities.webSocketUrl", body))?;

    Ok(BootstrapSession {
        session_id: session_id.to_string(),
        web_socket_url: web_socket_url.to_string(),
    })
}

fn missing(field: &str, body: &Value) -> ClientError {
    ClientError::new(ClientErrorKind::ConnectionError)
        .with_hint(format!("session response has no {field}"))
        .with_data(body.clone())
}

fn endpoint(base: &str, path: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(base).map_err(|err| {
        ClientError::new(ClientErrorKind::ConnectionError)
            .with_hint(format!("invalid http endpoint {base}: {err}"))
    })?;
    let joined = format!("{}/{}", url.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    Ok(url)
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| ClientError::new(ClientErrorKind::Internal).with_hint(err.to_string()))
}

fn http_error(err: reqwest::Error) -> ClientError {
    let kind = if err.is_timeout() {
        ClientErrorKind::Timeout
    } else {
        ClientErrorKind::ConnectionError
    };
    ClientError::new(kind).with_hint(err.to_string())
}

pub async fn create_session(
    http_endpoint: &str,
    capabilities: &Value,
    timeout: Duration,
) -> Result<BootstrapSession, ClientError> {
    let url = endpoint(http_endpoint, "session")?;
    debug!(target: "bidi-session", %url, "creating webdriver session");

    let response = http_client(timeout)?
        .post(url)
        .json(&session_request(capabilities))
        .send()
        .await
        .map_err(http_error)?;
    let body: Value = response.json().await.map_err(http_error)?;
    let session = parse_session_response(&body)?;

    info!(
        target: "bidi-session",
        session_id = %session.session_id,
        url = %session.web_socket_url,
        "webdriver session created"
    );
    Ok(session)
}

pub async fn delete_session(
    http_endpoint: &str,
    session_id: &str,
    timeout: Duration,
) -> Result<(), ClientError> {
    let url = endpoint(http_endpoint, &format!("session/{session_id}"))?;
    let response = http_client(timeout)?
        .delete(url)
        .send()
        .await
        .map_err(http_error)?;
    if !response.status().is_success() {
        return Err(ClientError::new(ClientErrorKind::ConnectionError)
            .with_hint(format!("delete session returned {}", response.status())));
    }
    Ok(())
}
