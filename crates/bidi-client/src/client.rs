use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{decode, encode, protocol_error, Command, Event, Message};
use crate::config::BidiConfig;
use crate::error::{ClientError, ClientErrorKind};
use crate::ids::CommandIdAllocator;
use crate::metrics;
use crate::registry::{CommandResult, EventPredicate, EventResult, PendingRegistry};
use crate::transport::{Transport, WebSocketTransport};

struct ControlMessage {
    text: String,
    responder: oneshot::Sender<Result<(), ClientError>>,
}

struct ClientInner {
    command_tx: mpsc::Sender<ControlMessage>,
    registry: Arc<PendingRegistry>,
    ids: CommandIdAllocator,
    protocol_errors: broadcast::Sender<ClientError>,
    shutdown: CancellationToken,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    alive: Arc<AtomicBool>,
    config: BidiConfig,
}

/// Multiplexed BiDi client over one transport.
///
/// Cloning is cheap; every clone shares the same connection, id allocator and pending waits.
#[derive(Clone)]
pub struct BidiClient {
    inner: Arc<ClientInner>,
}

/// Where the reply to an outbound text will be routed.
enum Slot {
    Command(u64),
    Raw,
}

/// Removes a pending registration when the awaiting future is dropped before resolution.
struct SlotGuard {
    registry: Arc<PendingRegistry>,
    slot: Slot,
    token: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        match self.slot {
            Slot::Command(id) => self.registry.remove_command(id, self.token),
            Slot::Raw => self.registry.remove_raw(self.token),
        }
    }
}

impl BidiClient {
    /// Opens a WebSocket to `url` and starts the client loop.
    pub async fn connect(url: &str, config: BidiConfig) -> Result<Self, ClientError> {
        let transport = WebSocketTransport::connect(url, config.connect_timeout()).await?;
        Ok(Self::start(transport, config))
    }

    /// Starts the client loop over an already connected transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T>(transport: T, config: BidiConfig) -> Self
    where
        T: Transport + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (protocol_errors, _) = broadcast::channel(config.protocol_error_capacity.max(1));
        let registry = Arc::new(PendingRegistry::new());
        let shutdown = CancellationToken::new();
        let alive = Arc::new(AtomicBool::new(true));

        let loop_task = tokio::spawn({
            let registry = Arc::clone(&registry);
            let protocol_errors = protocol_errors.clone();
            let shutdown = shutdown.clone();
            let alive = Arc::clone(&alive);
            async move {
                let result = Self::run_loop(
                    Box::new(transport),
                    command_rx,
                    &registry,
                    &protocol_errors,
                    shutdown,
                )
                .await;
                alive.store(false, Ordering::Relaxed);
                let err = match result {
                    Ok(()) => ClientError::closed().with_hint("client loop stopped"),
                    Err(err) => {
                        error!(target: "bidi-client", %err, "client loop terminated with error");
                        err
                    }
                };
                let failed = registry.shutdown(err);
                if failed > 0 {
                    debug!(target: "bidi-client", failed, "failed pending waits on shutdown");
                }
            }
        });

        Self {
            inner: Arc::new(ClientInner {
                command_tx,
                registry,
                ids: CommandIdAllocator::new(),
                protocol_errors,
                shutdown,
                loop_task: Mutex::new(Some(loop_task)),
                alive,
                config,
            }),
        }
    }

    pub fn config(&self) -> &BidiConfig {
        &self.inner.config
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Relaxed)
    }

    pub fn ids(&self) -> &CommandIdAllocator {
        &self.inner.ids
    }

    pub fn pending_commands(&self) -> usize {
        self.inner.registry.pending_commands()
    }

    pub fn pending_events(&self) -> usize {
        self.inner.registry.pending_events()
    }

    /// Malformed messages that could not be attributed to a single waiter.
    pub fn protocol_errors(&self) -> broadcast::Receiver<ClientError> {
        self.inner.protocol_errors.subscribe()
    }

    /// Sends `command` and waits for its response.
    ///
    /// Uses the configured command timeout, if any.
    pub async fn execute(&self, command: Command) -> Result<Value, ClientError> {
        match self.inner.config.command_timeout() {
            Some(timeout) => self.execute_with_timeout(command, timeout).await,
            None => self.execute_inner(command).await,
        }
    }

    pub async fn execute_with_timeout(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let method = command.method.clone();
        match tokio::time::timeout(timeout, self.execute_inner(command)).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_command_failure(&method);
                Err(ClientError::new(ClientErrorKind::Timeout)
                    .with_hint(format!("{method} got no response within {timeout:?}")))
            }
        }
    }

    /// Shorthand for `execute(Command::new(method, params))`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.execute(Command::new(method, params)).await
    }

    async fn execute_inner(&self, mut command: Command) -> Result<Value, ClientError> {
        let id = match command.id {
            Some(id) => {
                self.inner.ids.observe(id);
                id
            }
            None => {
                let id = self.inner.ids.next();
                command.id = Some(id);
                id
            }
        };
        let text = encode(&command)?;
        self.round_trip(&command.method, text, Slot::Command(id)).await
    }

    /// Writes `text` verbatim without waiting for anything.
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.write(text.into()).await
    }

    /// Writes `text` verbatim and waits for the peer's answer.
    ///
    /// Text carrying a numeric `id` is correlated like a command. Anything else waits for the
    /// next id-less protocol error, which is returned as a command failure.
    pub async fn execute_raw(&self, text: impl Into<String>) -> Result<Value, ClientError> {
        let text = text.into();
        let parsed: Option<Value> = serde_json::from_str(&text).ok();
        let id = parsed
            .as_ref()
            .and_then(|value| value.get("id"))
            .and_then(Value::as_u64);
        let method = parsed
            .as_ref()
            .and_then(|value| value.get("method"))
            .and_then(Value::as_str)
            .unwrap_or("<raw>")
            .to_string();

        match id {
            Some(id) => {
                self.inner.ids.observe(id);
                self.round_trip(&method, text, Slot::Command(id)).await
            }
            None => self.round_trip(&method, text, Slot::Raw).await,
        }
    }

    async fn round_trip(
        &self,
        method: &str,
        text: String,
        slot: Slot,
    ) -> Result<Value, ClientError> {
        let registry = Arc::clone(&self.inner.registry);
        let (token, rx) = match slot {
            Slot::Command(id) => registry.register_command(id)?,
            Slot::Raw => registry.register_raw()?,
        };
        let _guard = SlotGuard {
            registry,
            slot,
            token,
        };

        metrics::record_command(method);
        let started = Instant::now();
        trace!(target: "bidi-client", method, "sending command");

        let result = match self.write(text).await {
            Ok(()) => Self::await_reply(rx).await,
            Err(err) => Err(err),
        };

        match &result {
            Ok(_) => metrics::record_command_success(method, started.elapsed()),
            Err(err) => {
                metrics::record_command_failure(method);
                debug!(target: "bidi-client", method, %err, "command failed");
            }
        }
        result
    }

    async fn await_reply(rx: oneshot::Receiver<CommandResult>) -> CommandResult {
        rx.await
            .unwrap_or_else(|_| Err(ClientError::closed().with_hint("response channel dropped")))
    }

    async fn write(&self, text: String) -> Result<(), ClientError> {
        if let Some(err) = self.inner.registry.terminal_error() {
            return Err(err);
        }
        let (responder, ack) = oneshot::channel();
        self.inner
            .command_tx
            .send(ControlMessage { text, responder })
            .await
            .map_err(|_| ClientError::closed().with_hint("client loop is gone"))?;
        ack.await
            .unwrap_or_else(|_| Err(ClientError::closed().with_hint("client loop is gone")))
    }

    /// Registers an event wait right away; await it later with [`EventWait::recv`].
    ///
    /// Register before triggering the action that produces the event: events that arrive
    /// while nobody waits for them are dropped.
    ///
    /// `predicate` runs on the client loop while the wait registry is locked. It must not
    /// block or call back into the client; registering another wait from inside it
    /// deadlocks the loop.
    pub fn register_event_wait<F>(&self, label: impl Into<String>, predicate: F) -> EventWait
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let label = label.into();
        let predicate: EventPredicate = Arc::new(predicate);
        let (token, rx) = self
            .inner
            .registry
            .register_event(label.clone(), predicate);
        EventWait {
            rx,
            token,
            label,
            registry: Arc::clone(&self.inner.registry),
        }
    }

    pub fn register_method_wait(&self, method: &str) -> EventWait {
        let expected = method.to_string();
        self.register_event_wait(method, move |event| event.method == expected)
    }

    pub async fn wait_for_event(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<Event, ClientError> {
        self.register_method_wait(method).recv(timeout).await
    }

    /// Waits for the first event accepted by `predicate`.
    ///
    /// Same restriction as [`register_event_wait`](Self::register_event_wait): the predicate
    /// runs under the registry lock and must not call back into the client.
    pub async fn wait_for_filtered_event<F>(
        &self,
        label: &str,
        predicate: F,
        timeout: Duration,
    ) -> Result<Event, ClientError>
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.register_event_wait(label, predicate)
            .recv(timeout)
            .await
    }

    /// Waits for one event of each method, in the order given. All waits are registered
    /// before the first one is awaited.
    pub async fn wait_for_events(
        &self,
        methods: &[&str],
        timeout: Duration,
    ) -> Result<Vec<Event>, ClientError> {
        let waits: Vec<EventWait> = methods
            .iter()
            .map(|method| self.register_method_wait(method))
            .collect();
        try_join_all(waits.into_iter().map(|wait| wait.recv(timeout))).await
    }

    /// Closes the transport, stops the loop and fails every pending wait.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        let handle = self.inner.loop_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(target: "bidi-client", ?err, "client loop join failed");
            }
        }
    }

    async fn run_loop(
        mut transport: Box<dyn Transport>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        registry: &PendingRegistry,
        protocol_errors: &broadcast::Sender<ClientError>,
        shutdown: CancellationToken,
    ) -> Result<(), ClientError> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Err(err) = transport.close().await {
                        debug!(target: "bidi-client", %err, "transport close failed");
                    }
                    info!(target: "bidi-client", "client closed");
                    return Ok(());
                }
                Some(cmd) = command_rx.recv() => {
                    let result = transport.send(cmd.text).await;
                    let fatal = result.as_ref().err().cloned();
                    let _ = cmd.responder.send(result);
                    if let Some(err) = fatal {
                        return Err(err);
                    }
                }
                received = transport.receive() => {
                    match received {
                        Ok(text) => Self::dispatch(&text, registry, protocol_errors),
                        Err(err) if err.kind == ClientErrorKind::MalformedMessage => {
                            Self::broadcast_malformed(err, registry, protocol_errors);
                        }
                        Err(err) if err.is_closed() => {
                            info!(target: "bidi-client", %err, "connection closed by peer");
                            return Err(err);
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    fn dispatch(
        text: &str,
        registry: &PendingRegistry,
        protocol_errors: &broadcast::Sender<ClientError>,
    ) {
        match decode(text) {
            Message::Response { id, payload } => {
                if !registry.resolve_command(id, payload.into_result()) {
                    metrics::record_dropped();
                    debug!(target: "bidi-client", id, "dropping response nobody waits for");
                }
            }
            Message::Event(event) => {
                metrics::record_event(&event.method);
                let matched = registry.dispatch_event(&event);
                if matched == 0 {
                    metrics::record_dropped();
                    trace!(
                        target: "bidi-client",
                        method = %event.method,
                        "dropping unclaimed event"
                    );
                }
            }
            Message::Malformed { raw } => {
                metrics::record_malformed();
                if let Some((error, message)) = protocol_error(&raw) {
                    if registry.resolve_protocol_error(&error, &message, &raw) {
                        return;
                    }
                }
                let err = ClientError::new(ClientErrorKind::MalformedMessage)
                    .with_hint(preview(&raw))
                    .with_data(json!({ "raw": raw }));
                Self::broadcast_malformed(err, registry, protocol_errors);
            }
        }
    }

    fn broadcast_malformed(
        err: ClientError,
        registry: &PendingRegistry,
        protocol_errors: &broadcast::Sender<ClientError>,
    ) {
        let failed = registry.fail_all(&err);
        warn!(target: "bidi-client", %err, failed, "malformed message from peer");
        let _ = protocol_errors.send(err);
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn preview(raw: &str) -> String {
    const LIMIT: usize = 120;
    match raw.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &raw[..cut]),
        None => raw.to_string(),
    }
}

/// A registered, one-shot wait for an event.
///
/// Dropping it, or letting [`recv`](Self::recv) time out, removes the registration.
pub struct EventWait {
    rx: oneshot::Receiver<EventResult>,
    token: u64,
    label: String,
    registry: Arc<PendingRegistry>,
}

impl EventWait {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn recv(mut self, timeout: Duration) -> Result<Event, ClientError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::closed().with_hint("event wait dropped by client loop")),
            Err(_) => Err(ClientError::new(ClientErrorKind::Timeout).with_hint(format!(
                "no {} event within {timeout:?}",
                self.label
            ))),
        }
    }
}

impl Drop for EventWait {
    fn drop(&mut self) {
        self.registry.remove_event(self.token);
    }
}
