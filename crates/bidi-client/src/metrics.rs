use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, Registry,
};
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientMetricsSnapshot {
    pub commands: u64,
    pub command_success: u64,
    pub command_failures: u64,
    pub command_latency_total_us: u64,
    pub events: u64,
    pub dropped: u64,
    pub malformed: u64,
}

static COMMANDS: AtomicU64 = AtomicU64::new(0);
static COMMAND_SUCCESS: AtomicU64 = AtomicU64::new(0);
static COMMAND_FAILURES: AtomicU64 = AtomicU64::new(0);
static COMMAND_LATENCY_TOTAL_US: AtomicU64 = AtomicU64::new(0);
static EVENTS: AtomicU64 = AtomicU64::new(0);
static DROPPED: AtomicU64 = AtomicU64::new(0);
static MALFORMED: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref BIDI_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("bidi_commands_total", "Total BiDi commands sent"),
        &["method"]
    )
    .unwrap();
    static ref BIDI_COMMAND_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "bidi_command_failures_total",
            "Total BiDi commands that failed"
        ),
        &["method"]
    )
    .unwrap();
    static ref BIDI_COMMAND_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "bidi_command_duration_seconds",
            "BiDi command round-trip latency",
            vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]
        ),
        &["method"]
    )
    .unwrap();
    static ref BIDI_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("bidi_events_total", "Total BiDi events received"),
        &["method"]
    )
    .unwrap();
    static ref BIDI_DROPPED_TOTAL: IntCounter = IntCounter::new(
        "bidi_dropped_messages_total",
        "Responses and events that no pending wait claimed",
    )
    .unwrap();
    static ref BIDI_MALFORMED_TOTAL: IntCounter = IntCounter::new(
        "bidi_malformed_messages_total",
        "Inbound messages the codec could not classify",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register bidi metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, BIDI_COMMANDS_TOTAL.clone());
    register(registry, BIDI_COMMAND_FAILURES_TOTAL.clone());
    register(registry, BIDI_COMMAND_DURATION.clone());
    register(registry, BIDI_EVENTS_TOTAL.clone());
    register(registry, BIDI_DROPPED_TOTAL.clone());
    register(registry, BIDI_MALFORMED_TOTAL.clone());
}

pub fn record_command(method: &str) {
    COMMANDS.fetch_add(1, Ordering::Relaxed);
    BIDI_COMMANDS_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_command_success(method: &str, duration: Duration) {
    COMMAND_SUCCESS.fetch_add(1, Ordering::Relaxed);
    let micros = duration.as_micros().min(u64::MAX as u128) as u64;
    COMMAND_LATENCY_TOTAL_US.fetch_add(micros, Ordering::Relaxed);
    BIDI_COMMAND_DURATION
        .with_label_values(&[method])
        .observe(duration.as_secs_f64());
}

pub fn record_command_failure(method: &str) {
    COMMAND_FAILURES.fetch_add(1, Ordering::Relaxed);
    BIDI_COMMAND_FAILURES_TOTAL
        .with_label_values(&[method])
        .inc();
}

pub fn record_event(method: &str) {
    EVENTS.fetch_add(1, Ordering::Relaxed);
    BIDI_EVENTS_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_dropped() {
    DROPPED.fetch_add(1, Ordering::Relaxed);
    BIDI_DROPPED_TOTAL.inc();
}

pub fn record_malformed() {
    MALFORMED.fetch_add(1, Ordering::Relaxed);
    BIDI_MALFORMED_TOTAL.inc();
}

pub fn snapshot() -> ClientMetricsSnapshot {
    ClientMetricsSnapshot {
        commands: COMMANDS.load(Ordering::Relaxed),
        command_success: COMMAND_SUCCESS.load(Ordering::Relaxed),
        command_failures: COMMAND_FAILURES.load(Ordering::Relaxed),
        command_latency_total_us: COMMAND_LATENCY_TOTAL_US.load(Ordering::Relaxed),
        events: EVENTS.load(Ordering::Relaxed),
        dropped: DROPPED.load(Ordering::Relaxed),
        malformed: MALFORMED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    COMMANDS.store(0, Ordering::Relaxed);
    COMMAND_SUCCESS.store(0, Ordering::Relaxed);
    COMMAND_FAILURES.store(0, Ordering::Relaxed);
    COMMAND_LATENCY_TOTAL_US.store(0, Ordering::Relaxed);
    EVENTS.store(0, Ordering::Relaxed);
    DROPPED.store(0, Ordering::Relaxed);
    MALFORMED.store(0, Ordering::Relaxed);
}
