use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bidi_client::{BidiConfig, ClientError, Command, Session};
use clap::Args;
use serde_json::{json, Value};
use tracing::debug;

use super::output::{self, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct ExecArgs {
    /// Command method, e.g. `browsingContext.getTree`
    pub method: String,

    /// Command params as a JSON object
    #[arg(short, long, value_name = "JSON", default_value = "{}")]
    pub params: String,

    /// Extra top-level command field, repeatable (e.g. `goog:channel="x"`)
    #[arg(long = "ext", value_name = "KEY=JSON")]
    pub extensions: Vec<String>,

    /// Explicit command id instead of the next allocated one
    #[arg(long)]
    pub id: Option<u64>,

    /// Give up after this many milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Args, Clone, Debug)]
pub struct RawArgs {
    /// Text written to the socket verbatim
    pub text: String,

    /// Give up after this many milliseconds
    #[arg(long, value_name = "MS", default_value_t = 5_000)]
    pub timeout_ms: u64,
}

/// Splits `KEY=JSON`; a value that is not valid JSON is taken as a string.
pub fn parse_extension(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("extension {raw:?} is not KEY=JSON"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("extension {raw:?} has an empty key"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn build_command(args: &ExecArgs) -> Result<Command> {
    let params: Value = serde_json::from_str(&args.params)
        .with_context(|| format!("--params is not valid JSON: {}", args.params))?;
    if !params.is_object() {
        return Err(anyhow!("--params must be a JSON object"));
    }
    let mut command = Command::new(args.method.clone(), params);
    if let Some(id) = args.id {
        command = command.with_id(id);
    }
    for raw in &args.extensions {
        let (key, value) = parse_extension(raw)?;
        command = command.with_extension(key, value);
    }
    Ok(command)
}

fn failure(err: &ClientError) -> Value {
    json!({
        "error": err.command_error().unwrap_or("client error"),
        "message": err.to_string(),
        "data": err.data,
    })
}

pub async fn cmd_exec(args: ExecArgs, config: &BidiConfig, format: OutputFormat) -> Result<()> {
    let command = build_command(&args)?;
    let session = Session::open(config.clone()).await?;
    debug!(method = %command.method, "executing command");

    let result = match args.timeout_ms {
        Some(ms) => {
            session
                .client()
                .execute_with_timeout(command, Duration::from_millis(ms))
                .await
        }
        None => session.client().execute(command).await,
    };
    let teardown = session.teardown().await;

    match result {
        Ok(value) => {
            output::print(&value, format)?;
            teardown?;
            Ok(())
        }
        Err(err) => {
            output::print(&failure(&err), format)?;
            Err(err.into())
        }
    }
}

pub async fn cmd_raw(args: RawArgs, config: &BidiConfig, format: OutputFormat) -> Result<()> {
    let session = Session::open(config.clone()).await?;
    let timeout = Duration::from_millis(args.timeout_ms);
    let result = tokio::time::timeout(timeout, session.client().execute_raw(args.text)).await;
    let teardown = session.teardown().await;

    match result {
        Ok(Ok(value)) => output::print(&value, format)?,
        // The peer answering with a protocol error is the expected outcome for most raw text.
        Ok(Err(err)) => output::print(&failure(&err), format)?,
        Err(_) => return Err(anyhow!("no answer within {timeout:?}")),
    }
    teardown?;
    Ok(())
}
