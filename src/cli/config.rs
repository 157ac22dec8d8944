use anyhow::Result;
use clap::{Args, Subcommand};

use super::runtime::LoadedConfig;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration, after env and flag overrides
    Show,

    /// Print the config file path that was consulted
    Path,
}

pub fn cmd_config(args: ConfigArgs, loaded: &LoadedConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let source = if loaded.from_file {
                loaded.path.display().to_string()
            } else {
                format!("defaults; {} not found", loaded.path.display())
            };
            println!("# {source}");
            print!("{}", serde_yaml::to_string(&loaded.config)?);
        }
        ConfigAction::Path => println!("{}", loaded.path.display()),
    }
    Ok(())
}
