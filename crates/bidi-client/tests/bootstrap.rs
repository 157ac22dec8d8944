mod common;

use std::time::Duration;

use bidi_client::bootstrap::{create_session, delete_session};
use bidi_client::{BidiConfig, Session};
use futures::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use common::webdriver_stub;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn create_and_delete_round_trip() {
    let (endpoint, mut requests) = webdriver_stub("ws://127.0.0.1:1/session/s1".into()).await;

    let session = create_session(&endpoint, &json!({ "browserName": "firefox" }), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(session.session_id, "s1");
    assert_eq!(session.web_socket_url, "ws://127.0.0.1:1/session/s1");

    let post = requests.recv().await.unwrap();
    assert_eq!(post.line, "POST /session");
    let always = &post.body["capabilities"]["alwaysMatch"];
    assert_eq!(always["webSocketUrl"], true);
    assert_eq!(always["browserName"], "firefox");

    delete_session(&endpoint, "s1", TIMEOUT).await.unwrap();
    assert_eq!(requests.recv().await.unwrap().line, "DELETE /session/s1");
}

#[tokio::test]
async fn open_via_http_endpoint_and_teardown_deletes_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}/session/s1", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    });
    let (endpoint, mut requests) = webdriver_stub(ws_url.clone()).await;

    let config = BidiConfig {
        websocket_url: None,
        http_endpoint: Some(endpoint),
        capabilities: json!({ "acceptInsecureCerts": true }),
        ..BidiConfig::default()
    };
    let session = Session::open(config).await.unwrap();
    assert_eq!(session.bootstrap().unwrap().session_id, "s1");
    assert_eq!(session.bootstrap().unwrap().web_socket_url, ws_url);

    let post = requests.recv().await.unwrap();
    assert_eq!(post.line, "POST /session");
    assert_eq!(post.body["capabilities"]["alwaysMatch"]["webSocketUrl"], true);
    assert_eq!(
        post.body["capabilities"]["alwaysMatch"]["acceptInsecureCerts"],
        true
    );

    session.teardown().await.unwrap();
    assert_eq!(requests.recv().await.unwrap().line, "DELETE /session/s1");
    tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
}
