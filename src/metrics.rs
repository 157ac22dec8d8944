use anyhow::{Context, Result};
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        bidi_client::metrics::register_metrics(global_registry());
    });
}

/// Prometheus text exposition of every client metric.
pub fn render() -> Result<String> {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&global_registry().gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("metrics are not utf-8")
}
