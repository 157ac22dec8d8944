use anyhow::Result;
use bidi_probe::cli::{self, CliArgs};
use bidi_probe::{init_logging, load_config, metrics};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_logging(&args.log_level, args.debug, args.log_json)?;
    info!("Starting bidi-probe v{}", env!("CARGO_PKG_VERSION"));

    let mut loaded = load_config(args.config.as_ref()).await?;
    cli::runtime::apply_cli_overrides(&mut loaded.config, &args);

    let print_metrics = args.metrics;
    let result = cli::dispatch(args, loaded).await;

    if print_metrics {
        match metrics::render() {
            Ok(text) => eprint!("{text}"),
            Err(err) => error!(?err, "failed to render metrics"),
        }
    }

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
