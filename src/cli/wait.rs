use std::time::Duration;

use anyhow::{bail, Result};
use bidi_client::{BidiConfig, Event, Session};
use clap::Args;
use futures::future::try_join_all;
use serde_json::{json, Value};
use tracing::info;

use super::output::{self, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct WaitArgs {
    /// Event methods to wait for, one event each, in this order
    #[arg(required = true)]
    pub events: Vec<String>,

    /// Subscribe to the events before waiting
    #[arg(short, long)]
    pub subscribe: bool,

    /// Restrict the subscription to these browsing contexts
    #[arg(long = "context", value_name = "ID")]
    pub contexts: Vec<String>,

    /// Per-event deadline; defaults to `event_timeout_ms`
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

fn event_json(event: &Event) -> Value {
    json!({ "method": event.method, "params": event.params })
}

pub async fn cmd_wait(args: WaitArgs, config: &BidiConfig, format: OutputFormat) -> Result<()> {
    if !args.contexts.is_empty() && !args.subscribe {
        bail!("--context only applies together with --subscribe");
    }
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.event_timeout());
    let methods: Vec<&str> = args.events.iter().map(String::as_str).collect();

    let session = Session::open(config.clone()).await?;
    // Registered before subscribing so nothing emitted in between is lost.
    let waits: Vec<_> = methods
        .iter()
        .map(|method| session.client().register_method_wait(method))
        .collect();

    if args.subscribe {
        let contexts = (!args.contexts.is_empty()).then_some(args.contexts.as_slice());
        if let Err(err) = session.subscribe(&methods, contexts).await {
            drop(waits);
            session.teardown().await.ok();
            return Err(err.into());
        }
    }

    info!(events = ?methods, "waiting for events");
    let result = try_join_all(waits.into_iter().map(|wait| wait.recv(timeout))).await;
    let teardown = session.teardown().await;

    let events = result?;
    let values: Vec<Value> = events.iter().map(event_json).collect();
    output::print(&values, format)?;
    teardown?;
    Ok(())
}
