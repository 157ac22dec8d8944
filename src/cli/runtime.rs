use std::path::PathBuf;

use anyhow::{Context, Result};
use bidi_client::BidiConfig;
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::env::CliArgs;

/// Installs the global subscriber. `RUST_LOG` wins over `level`; `debug` forces DEBUG.
///
/// Logs go to stderr so command output on stdout stays machine readable.
pub fn init_logging(level: &str, debug: bool, json: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .context("installing log subscriber")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("installing log subscriber")?;
    }
    Ok(())
}

pub struct LoadedConfig {
    pub config: BidiConfig,
    pub path: PathBuf,
    pub from_file: bool,
}

/// Default lookup when `--config` is absent.
pub fn default_config_path() -> Result<PathBuf> {
    // Priority: ./config/bidi.yaml > <config_dir>/bidi-probe/config.yaml
    let local_config = PathBuf::from("config/bidi.yaml");
    if local_config.exists() {
        return Ok(local_config);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("bidi-probe");
    path.push("config.yaml");
    Ok(path)
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        let config: BidiConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

        info!("Loaded configuration from: {}", config_path.display());
        Ok(LoadedConfig {
            config,
            path: config_path,
            from_file: true,
        })
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        Ok(LoadedConfig {
            config: BidiConfig::default(),
            path: config_path,
            from_file: false,
        })
    }
}

pub fn apply_cli_overrides(config: &mut BidiConfig, args: &CliArgs) {
    if let Some(url) = &args.ws_url {
        config.websocket_url = Some(url.clone());
    }
    if let Some(endpoint) = &args.http_endpoint {
        config.http_endpoint = Some(endpoint.clone());
        if args.ws_url.is_none() {
            config.websocket_url = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[tokio::test]
    async fn reads_yaml_and_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let yaml = [
            "websocket_url: ws://127.0.0.1:9222/session",
            "command_timeout_ms: 2500",
            "capabilities:",
            "  browserName: firefox",
        ];
        writeln!(file, "{}", yaml.join("\n")).unwrap();

        let loaded = load_config(Some(&file.path().to_path_buf())).await.unwrap();
        assert!(loaded.from_file);
        assert_eq!(
            loaded.config.websocket_url.as_deref(),
            Some("ws://127.0.0.1:9222/session")
        );
        assert_eq!(loaded.config.command_timeout_ms, Some(2500));
        assert_eq!(loaded.config.capabilities["browserName"], "firefox");
        assert_eq!(loaded.config.event_timeout_ms, 5_000);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let loaded = load_config(Some(&path)).await.unwrap();
        assert!(!loaded.from_file);
        assert_eq!(loaded.config.connect_timeout_ms, 10_000);
    }

    #[tokio::test]
    async fn invalid_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port: [not a number").unwrap();
        let err = load_config(Some(&file.path().to_path_buf()))
            .await
            .err()
            .expect("parse failure");
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn http_endpoint_flag_forces_bootstrap() {
        let args = CliArgs::parse_from([
            "bidi-probe",
            "--http-endpoint",
            "http://127.0.0.1:4444",
            "config",
            "show",
        ]);
        let mut config = BidiConfig {
            websocket_url: Some("ws://from-file/session".into()),
            ..BidiConfig::default()
        };
        apply_cli_overrides(&mut config, &args);
        assert_eq!(config.http_endpoint.as_deref(), Some("http://127.0.0.1:4444"));
        assert!(config.direct_websocket_url().is_none());
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn env_fills_fields_the_file_omits() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "event_timeout_ms: 100").unwrap();

        std::env::set_var("BIDI_HTTP_ENDPOINT", "http://127.0.0.1:4444");
        let loaded = load_config(Some(&file.path().to_path_buf())).await;
        std::env::remove_var("BIDI_HTTP_ENDPOINT");

        let config = loaded.unwrap().config;
        assert_eq!(config.event_timeout_ms, 100);
        assert_eq!(config.http_endpoint.as_deref(), Some("http://127.0.0.1:4444"));
    }
}
