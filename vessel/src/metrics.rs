//! Prometheus metrics for vessel.
//!
//! Compiled only with the `metrics` feature.
//!
//! # Metrics
//!
//! ## Counters
//! - `vessel_launches_total` - Worker launches by work kind and outcome
//! - `vessel_container_transitions_total` - Container state transitions
//! - `vessel_recovery_attempts_total` - Container recovery attempts
//!
//! ## Histograms
//! - `vessel_launch_duration_seconds` - Wall time of a worker launch
#![cfg(feature = "metrics")]

use prometheus::{CounterVec, HistogramVec, IntCounter, Opts, Registry, exponential_buckets};
use std::sync::LazyLock;

/// Global Prometheus registry for vessel metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `work_kind`, `outcome`.
pub static LAUNCHES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("vessel_launches_total", "Total number of worker launches");
    CounterVec::new(opts, &["work_kind", "outcome"])
        .expect("vessel_launches_total metric creation failed")
});

/// Labels: `work_kind`, `outcome`.
pub static LAUNCH_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.01, 2.0, 14).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "vessel_launch_duration_seconds",
        "Worker launch duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["work_kind", "outcome"])
        .expect("vessel_launch_duration_seconds metric creation failed")
});

/// Labels: `from`, `to`.
pub static CONTAINER_TRANSITIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "vessel_container_transitions_total",
        "Total number of container state transitions",
    );
    CounterVec::new(opts, &["from", "to"])
        .expect("vessel_container_transitions_total metric creation failed")
});

pub static RECOVERY_ATTEMPTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vessel_recovery_attempts_total",
        "Total number of container recovery attempts",
    )
    .expect("vessel_recovery_attempts_total metric creation failed")
});

/// Register every metric with the global registry. Safe to call repeatedly.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(LAUNCHES_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(LAUNCH_DURATION_SECONDS.clone()),
        Box::new(CONTAINER_TRANSITIONS_TOTAL.clone()),
        Box::new(RECOVERY_ATTEMPTS_TOTAL.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_launch(work_kind: &str, outcome: &str, duration_secs: f64) {
    LAUNCHES_TOTAL
        .with_label_values(&[work_kind, outcome])
        .inc();
    LAUNCH_DURATION_SECONDS
        .with_label_values(&[work_kind, outcome])
        .observe(duration_secs);
}

pub fn record_transition(from: &str, to: &str) {
    CONTAINER_TRANSITIONS_TOTAL
        .with_label_values(&[from, to])
        .inc();
}

pub fn record_recovery_attempt() {
    RECOVERY_ATTEMPTS_TOTAL.inc();
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
