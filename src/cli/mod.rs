pub mod commands;
pub mod compare;
pub mod config;
pub mod env;
pub mod exec;
pub mod output;
pub mod runtime;
pub mod wait;

use anyhow::Result;

pub use commands::Commands;
pub use env::CliArgs;
pub use runtime::LoadedConfig;

use compare::cmd_match;
use config::cmd_config;
use exec::{cmd_exec, cmd_raw};
use wait::cmd_wait;

pub async fn dispatch(args: CliArgs, loaded: LoadedConfig) -> Result<()> {
    let output = args.output;
    match args.command {
        Commands::Exec(exec) => cmd_exec(exec, &loaded.config, output).await,
        Commands::Raw(raw) => cmd_raw(raw, &loaded.config, output).await,
        Commands::Wait(wait) => cmd_wait(wait, &loaded.config, output).await,
        Commands::Match(args) => cmd_match(args).await,
        Commands::Config(args) => cmd_config(args, &loaded),
    }
}
