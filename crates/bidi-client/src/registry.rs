//! Pending wait registry shared by callers and the client loop.
//!
//! Callers insert their own entries and remove them again on cancellation or timeout; only
//! the client loop performs the resolve-and-remove transition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::codec::Event;
use crate::error::{ClientError, ClientErrorKind};

pub type EventPredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

pub(crate) type CommandResult = Result<Value, ClientError>;
pub(crate) type EventResult = Result<Event, ClientError>;

struct CommandSlot {
    token: u64,
    tx: oneshot::Sender<CommandResult>,
}

struct EventSlot {
    token: u64,
    label: String,
    predicate: EventPredicate,
    tx: oneshot::Sender<EventResult>,
}

struct RawSlot {
    token: u64,
    tx: oneshot::Sender<CommandResult>,
}

#[derive(Default)]
pub struct PendingRegistry {
    commands: DashMap<u64, CommandSlot>,
    events: Mutex<Vec<EventSlot>>,
    raw: Mutex<Vec<RawSlot>>,
    terminal: Mutex<Option<ClientError>>,
    tokens: AtomicU64,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&self) -> u64 {
        self.tokens.fetch_add(1, Ordering::Relaxed)
    }

    pub fn terminal_error(&self) -> Option<ClientError> {
        self.terminal.lock().clone()
    }

    pub(crate) fn register_command(
        &self,
        id: u64,
    ) -> Result<(u64, oneshot::Receiver<CommandResult>), ClientError> {
        if let Some(err) = self.terminal_error() {
            return Err(err);
        }
        let (tx, rx) = oneshot::channel();
        let token = self.token();
        match self.commands.entry(id) {
            Entry::Occupied(_) => {
                return Err(ClientError::new(ClientErrorKind::Internal)
                    .with_hint(format!("command id {id} is already in flight")));
            }
            Entry::Vacant(slot) => {
                slot.insert(CommandSlot { token, tx });
            }
        }
        if let Some(err) = self.terminal_error() {
            self.remove_command(id, token);
            return Err(err);
        }
        Ok((token, rx))
    }

    /// Drops a caller's own registration. A newer registration reusing the id is left alone.
    pub(crate) fn remove_command(&self, id: u64, token: u64) {
        self.commands.remove_if(&id, |_, slot| slot.token == token);
    }

    /// Returns `false` when nobody waits for `id`.
    pub(crate) fn resolve_command(&self, id: u64, result: CommandResult) -> bool {
        match self.commands.remove(&id) {
            Some((_, slot)) => {
                let _ = slot.tx.send(result);
                true
            }
            None => false,
        }
    }

    pub(crate) fn register_event(
        &self,
        label: String,
        predicate: EventPredicate,
    ) -> (u64, oneshot::Receiver<EventResult>) {
        let (tx, rx) = oneshot::channel();
        let token = self.token();
        let mut events = self.events.lock();
        if let Some(err) = self.terminal_error() {
            let _ = tx.send(Err(err));
            return (token, rx);
        }
        events.push(EventSlot {
            token,
            label,
            predicate,
            tx,
        });
        (token, rx)
    }

    pub(crate) fn remove_event(&self, token: u64) {
        self.events.lock().retain(|slot| slot.token != token);
    }

    /// Resolves every wait whose predicate accepts `event`; returns how many matched.
    ///
    /// Predicates run under the registry lock and must not call back into the client.
    pub(crate) fn dispatch_event(&self, event: &Event) -> usize {
        let mut events = self.events.lock();
        let mut matched = 0;
        for slot in std::mem::take(&mut *events) {
            if slot.tx.is_closed() {
                continue;
            }
            if (slot.predicate)(event) {
                matched += 1;
                let _ = slot.tx.send(Ok(event.clone()));
            } else {
                events.push(slot);
            }
        }
        matched
    }

    pub(crate) fn register_raw(
        &self,
    ) -> Result<(u64, oneshot::Receiver<CommandResult>), ClientError> {
        if let Some(err) = self.terminal_error() {
            return Err(err);
        }
        let (tx, rx) = oneshot::channel();
        let token = self.token();
        self.raw.lock().push(RawSlot { token, tx });
        if let Some(err) = self.terminal_error() {
            self.remove_raw(token);
            return Err(err);
        }
        Ok((token, rx))
    }

    pub(crate) fn remove_raw(&self, token: u64) {
        self.raw.lock().retain(|slot| slot.token != token);
    }

    /// Hands an id-less protocol error to the single raw send waiting for one.
    pub(crate) fn resolve_protocol_error(&self, error: &str, message: &str, raw: &str) -> bool {
        let mut slots = self.raw.lock();
        slots.retain(|slot| !slot.tx.is_closed());
        if slots.len() != 1 {
            return false;
        }
        let Some(slot) = slots.pop() else {
            return false;
        };
        let data = serde_json::from_str(raw).unwrap_or_else(|_| json!({ "raw": raw }));
        let _ = slot
            .tx
            .send(Err(ClientError::command(error, message).with_data(data)));
        true
    }

    /// Fails every pending wait with `err`. The registry stays usable.
    pub(crate) fn fail_all(&self, err: &ClientError) -> usize {
        let commands: Vec<u64> = self.commands.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in commands {
            if let Some((_, slot)) = self.commands.remove(&id) {
                let _ = slot.tx.send(Err(err.clone()));
                failed += 1;
            }
        }
        for slot in self.events.lock().drain(..) {
            let _ = slot.tx.send(Err(err.clone()));
            failed += 1;
        }
        for slot in self.raw.lock().drain(..) {
            let _ = slot.tx.send(Err(err.clone()));
            failed += 1;
        }
        failed
    }

    /// Fails every pending wait with `err`. Later registrations are rejected with
    /// `ConnectionClosed`, carrying `err` as hint when it was some other fault.
    pub(crate) fn shutdown(&self, err: ClientError) -> usize {
        let closed = if err.is_closed() {
            err.clone()
        } else {
            ClientError::closed().with_hint(err.to_string())
        };
        {
            let _events = self.events.lock();
            let mut terminal = self.terminal.lock();
            if terminal.is_none() {
                *terminal = Some(closed);
            }
        }
        self.fail_all(&err)
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn pending_events(&self) -> usize {
        self.events.lock().len()
    }

    pub fn pending_event_labels(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|slot| slot.label.clone())
            .collect()
    }
}
