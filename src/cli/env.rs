use clap::Parser;
use std::path::PathBuf;

use super::commands::Commands;
use super::output::OutputFormat;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    pub output: OutputFormat,

    /// WebSocket URL of the BiDi endpoint (overrides config)
    #[arg(long, value_name = "URL", global = true)]
    pub ws_url: Option<String>,

    /// Classic WebDriver endpoint used to bootstrap a session (overrides config)
    #[arg(long, value_name = "URL", global = true)]
    pub http_endpoint: Option<String>,

    /// Print client metrics to stderr when the command finishes
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}
