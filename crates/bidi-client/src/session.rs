//! Test-session glue on top of [`BidiClient`]: connect, discover or create browsing contexts,
//! subscribe to events, tear everything down again.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::bootstrap::{self, BootstrapSession};
use crate::client::BidiClient;
use crate::config::BidiConfig;
use crate::error::{ClientError, ClientErrorKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Tab,
    Window,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    None,
    Interactive,
    Complete,
}

#[derive(Clone, Debug)]
struct Subscription {
    id: Option<String>,
    events: Vec<String>,
    contexts: Vec<String>,
}

pub struct Session {
    client: BidiClient,
    bootstrap: Option<BootstrapSession>,
    created_contexts: Mutex<Vec<String>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Session {
    /// Connects using `config`, bootstrapping over HTTP when only an HTTP endpoint is set.
    pub async fn open(config: BidiConfig) -> Result<Self, ClientError> {
        let (url, bootstrap) = match config.direct_websocket_url() {
            Some(url) => (url, None),
            None => {
                let endpoint = config.http_endpoint.clone().ok_or_else(|| {
                    ClientError::new(ClientErrorKind::ConnectionError)
                        .with_hint("neither websocket_url nor http_endpoint configured")
                })?;
                let session = bootstrap::create_session(
                    &endpoint,
                    &config.capabilities,
                    config.connect_timeout(),
                )
                .await?;
                (session.web_socket_url.clone(), Some(session))
            }
        };

        let client = match BidiClient::connect(&url, config.clone()).await {
            Ok(client) => client,
            Err(err) => {
                if let (Some(session), Some(endpoint)) = (&bootstrap, &config.http_endpoint) {
                    let deleted = bootstrap::delete_session(
                        endpoint,
                        &session.session_id,
                        config.connect_timeout(),
                    )
                    .await;
                    if let Err(delete_err) = deleted {
                        warn!(
                            target: "bidi-session",
                            session_id = %session.session_id,
                            %delete_err,
                            "failed to delete bootstrap session after connect failure"
                        );
                    }
                }
                return Err(err);
            }
        };
        info!(target: "bidi-session", %url, "bidi session opened");
        Ok(Self {
            client,
            bootstrap,
            created_contexts: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn from_client(client: BidiClient) -> Self {
        Self {
            client,
            bootstrap: None,
            created_contexts: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn client(&self) -> &BidiClient {
        &self.client
    }

    pub fn bootstrap(&self) -> Option<&BootstrapSession> {
        self.bootstrap.as_ref()
    }

    pub async fn status(&self) -> Result<Value, ClientError> {
        self.client.call("session.status", json!({})).await
    }

    /// `session.subscribe`; remembered so [`teardown`](Self::teardown) can undo it.
    pub async fn subscribe(
        &self,
        events: &[&str],
        contexts: Option<&[String]>,
    ) -> Result<Value, ClientError> {
        let mut params = json!({ "events": events });
        if let Some(contexts) = contexts {
            params["contexts"] = json!(contexts);
        }
        let result = self.client.call("session.subscribe", params).await?;

        self.subscriptions.lock().push(Subscription {
            id: result
                .get("subscription")
                .and_then(Value::as_str)
                .map(str::to_string),
            events: events.iter().map(|event| event.to_string()).collect(),
            contexts: contexts.map(<[String]>::to_vec).unwrap_or_default(),
        });
        debug!(target: "bidi-session", ?events, "subscribed");
        Ok(result)
    }

    pub async fn unsubscribe(
        &self,
        events: &[&str],
        contexts: Option<&[String]>,
    ) -> Result<Value, ClientError> {
        let mut params = json!({ "events": events });
        if let Some(contexts) = contexts {
            params["contexts"] = json!(contexts);
        }
        let result = self.client.call("session.unsubscribe", params).await?;
        self.subscriptions.lock().retain(|sub| {
            !(sub.events.iter().all(|event| events.contains(&event.as_str()))
                && contexts.map_or(true, |contexts| sub.contexts == contexts))
        });
        Ok(result)
    }

    pub async fn get_tree(&self, root: Option<&str>) -> Result<Value, ClientError> {
        let params = match root {
            Some(root) => json!({ "root": root }),
            None => json!({}),
        };
        self.client.call("browsingContext.getTree", params).await
    }

    /// Id of the first top-level browsing context.
    pub async fn first_context(&self) -> Result<String, ClientError> {
        let tree = self.get_tree(None).await?;
        tree.get("contexts")
            .and_then(Value::as_array)
            .and_then(|contexts| contexts.first())
            .and_then(|context| context.get("context"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::new(ClientErrorKind::Internal)
                    .with_hint("browsingContext.getTree returned no contexts")
                    .with_data(tree.clone())
            })
    }

    pub async fn create_context(&self, kind: ContextKind) -> Result<String, ClientError> {
        let result = self
            .client
            .call("browsingContext.create", json!({ "type": kind }))
            .await?;
        let context = result
            .get("context")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::new(ClientErrorKind::Internal)
                    .with_hint("browsingContext.create returned no context")
                    .with_data(result.clone())
            })?;
        self.created_contexts.lock().push(context.clone());
        Ok(context)
    }

    pub async fn close_context(&self, context: &str) -> Result<(), ClientError> {
        self.client
            .call("browsingContext.close", json!({ "context": context }))
            .await?;
        self.created_contexts.lock().retain(|id| id != context);
        Ok(())
    }

    pub async fn goto_url(
        &self,
        context: &str,
        url: &str,
        wait: ReadinessState,
    ) -> Result<Value, ClientError> {
        self.client
            .call(
                "browsingContext.navigate",
                json!({ "context": context, "url": url, "wait": wait }),
            )
            .await
    }

    /// Closes contexts created here, drops subscriptions made here, closes the connection
    /// and deletes the bootstrap session. Every step runs; the first failure is returned.
    pub async fn teardown(self) -> Result<(), ClientError> {
        let mut first_err: Option<ClientError> = None;
        let mut note = |step: &str, result: Result<(), ClientError>| {
            if let Err(err) = result {
                warn!(target: "bidi-session", step, %err, "teardown step failed");
                first_err.get_or_insert(err);
            }
        };

        let contexts: Vec<String> = self.created_contexts.lock().drain(..).rev().collect();
        for context in contexts {
            let result = self
                .client
                .call("browsingContext.close", json!({ "context": context }))
                .await
                .map(|_| ());
            note("close context", result);
        }

        let subscriptions: Vec<Subscription> = self.subscriptions.lock().drain(..).collect();
        for sub in subscriptions {
            let params = match &sub.id {
                Some(id) => json!({ "subscriptions": [id] }),
                None if sub.contexts.is_empty() => json!({ "events": sub.events }),
                None => json!({ "events": sub.events, "contexts": sub.contexts }),
            };
            let result = self
                .client
                .call("session.unsubscribe", params)
                .await
                .map(|_| ());
            note("unsubscribe", result);
        }

        self.client.close().await;

        if let (Some(session), Some(endpoint)) =
            (&self.bootstrap, &self.client.config().http_endpoint)
        {
            let result = bootstrap::delete_session(
                endpoint,
                &session.session_id,
                self.client.config().connect_timeout(),
            )
            .await;
            note("delete session", result);
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
