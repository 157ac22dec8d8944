//! bidi-probe library
//!
//! Exposes config loading, logging setup and the subcommands for integration testing.

pub mod cli;
pub mod metrics;

pub use cli::runtime::{init_logging, load_config, LoadedConfig};
