mod common;

use bidi_client::session::ContextKind;
use bidi_client::{BidiClient, BidiConfig, ClientErrorKind, MemoryPeer, MemoryTransport, Session};
use serde_json::{json, Value};

use common::{refused_websocket_url, webdriver_stub};

fn session() -> (Session, MemoryPeer) {
    let (transport, peer) = MemoryTransport::pair();
    let client = BidiClient::start(transport, BidiConfig::default());
    (Session::from_client(client), peer)
}

/// Answers the next command, which must be `method`, and returns its params.
async fn serve(peer: &mut MemoryPeer, method: &str, result: Value) -> Value {
    let command = peer.next_command().await.expect("command");
    assert_eq!(command["method"], method, "unexpected command {command}");
    let id = command["id"].as_u64().expect("id");
    peer.respond(id, result);
    command["params"].clone()
}

#[tokio::test]
async fn discovers_and_creates_contexts() {
    let (session, mut peer) = session();

    let (context, _) = tokio::join!(session.first_context(), async {
        serve(
            &mut peer,
            "browsingContext.getTree",
            json!({ "contexts": [{ "context": "top-1", "url": "about:blank", "children": [] }] }),
        )
        .await
    });
    assert_eq!(context.unwrap(), "top-1");

    let (created, params) = tokio::join!(session.create_context(ContextKind::Tab), async {
        serve(&mut peer, "browsingContext.create", json!({ "context": "tab-2" })).await
    });
    assert_eq!(created.unwrap(), "tab-2");
    assert_eq!(params, json!({ "type": "tab" }));
}

#[tokio::test]
async fn empty_tree_is_an_error() {
    let (session, mut peer) = session();
    let (context, _) = tokio::join!(session.first_context(), async {
        serve(&mut peer, "browsingContext.getTree", json!({ "contexts": [] })).await
    });
    assert!(context.unwrap_err().hint.unwrap().contains("no contexts"));
}

#[tokio::test]
async fn teardown_undoes_session_state() {
    let (session, mut peer) = session();

    let (subscribed, params) = tokio::join!(
        session.subscribe(&["log.entryAdded"], None),
        async { serve(&mut peer, "session.subscribe", json!({ "subscription": "sub-1" })).await }
    );
    subscribed.unwrap();
    assert_eq!(params, json!({ "events": ["log.entryAdded"] }));

    let (created, _) = tokio::join!(session.create_context(ContextKind::Window), async {
        serve(&mut peer, "browsingContext.create", json!({ "context": "win-1" })).await
    });
    created.unwrap();

    let teardown = tokio::spawn(session.teardown());
    let params = serve(&mut peer, "browsingContext.close", json!({})).await;
    assert_eq!(params, json!({ "context": "win-1" }));
    let params = serve(&mut peer, "session.unsubscribe", json!({})).await;
    assert_eq!(params, json!({ "subscriptions": ["sub-1"] }));

    teardown.await.unwrap().unwrap();
    assert_eq!(peer.next_outbound().await, None);
}

#[tokio::test]
async fn teardown_runs_every_step_and_reports_first_failure() {
    let (session, mut peer) = session();

    let contexts = ["ctx-9".to_string()];
    let (subscribed, _) = tokio::join!(
        session.subscribe(&["browsingContext.load"], Some(&contexts[..])),
        async { serve(&mut peer, "session.subscribe", json!({})).await }
    );
    subscribed.unwrap();
    let (created, _) = tokio::join!(session.create_context(ContextKind::Tab), async {
        serve(&mut peer, "browsingContext.create", json!({ "context": "tab-1" })).await
    });
    created.unwrap();

    let teardown = tokio::spawn(session.teardown());

    let command = peer.next_command().await.unwrap();
    assert_eq!(command["method"], "browsingContext.close");
    peer.respond_error(
        command["id"].as_u64().unwrap(),
        "no such frame",
        "already closed",
    );
    let params = serve(&mut peer, "session.unsubscribe", json!({})).await;
    assert_eq!(
        params,
        json!({ "events": ["browsingContext.load"], "contexts": ["ctx-9"] })
    );

    let err = teardown.await.unwrap().unwrap_err();
    assert_eq!(err.command_error(), Some("no such frame"));
}

#[tokio::test]
async fn closed_contexts_are_not_closed_again() {
    let (session, mut peer) = session();
    let (created, _) = tokio::join!(session.create_context(ContextKind::Tab), async {
        serve(&mut peer, "browsingContext.create", json!({ "context": "tab-1" })).await
    });
    created.unwrap();
    let (closed, _) = tokio::join!(session.close_context("tab-1"), async {
        serve(&mut peer, "browsingContext.close", json!({})).await
    });
    closed.unwrap();

    session.teardown().await.unwrap();
    assert_eq!(peer.next_outbound().await, None);
}

#[tokio::test]
async fn failed_connect_deletes_bootstrap_session() {
    let (endpoint, mut requests) = webdriver_stub(refused_websocket_url()).await;
    let config = BidiConfig {
        websocket_url: None,
        http_endpoint: Some(endpoint),
        connect_timeout_ms: 2_000,
        ..BidiConfig::default()
    };

    let err = Session::open(config).await.err().expect("connect should fail");
    assert_eq!(err.kind, ClientErrorKind::ConnectionError);

    assert_eq!(requests.recv().await.unwrap().line, "POST /session");
    assert_eq!(requests.recv().await.unwrap().line, "DELETE /session/s1");
}
