use clap::Subcommand;

use super::compare::MatchArgs;
use super::config::ConfigArgs;
use super::exec::{ExecArgs, RawArgs};
use super::wait::WaitArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Send one command and print its result
    Exec(ExecArgs),

    /// Send raw text and print whatever the peer answers
    Raw(RawArgs),

    /// Wait for events, optionally subscribing first
    Wait(WaitArgs),

    /// Structurally compare two JSON files
    Match(MatchArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),
}
