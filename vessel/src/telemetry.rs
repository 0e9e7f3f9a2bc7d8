//! Tracing and telemetry instrumentation for vessel.
//!
//! Helpers for creating tracing spans around worker launches and container
//! lifecycle operations, and for recording their outcomes. Every `record_*`
//! function logs a structured event and, with the `metrics` feature enabled,
//! updates the matching Prometheus series.
//!
//! # Example
//!
//! ```ignore
//! use vessel::telemetry::{container_span, record_transition};
//!
//! let span = container_span("job-123", "poll");
//! let _enter = span.enter();
//! record_transition("job-123", "running", "succeeded");
//! ```

use std::time::{Duration, Instant};

use tracing::{Span, info_span};

/// Create a tracing span for one worker launch.
///
/// The span carries the work kind and the worker's process id, when known.
#[must_use]
pub fn launch_span(kind: impl AsRef<str>, pid: Option<u32>) -> Span {
    info_span!(
        "vessel.launch",
        work_kind = %kind.as_ref(),
        pid = pid,
    )
}

/// Create a tracing span for a container lifecycle operation.
///
/// # Arguments
/// * `job_id` - The job identifier
/// * `operation` - The operation name (run, poll, stop, recover)
#[must_use]
pub fn container_span(job_id: impl AsRef<str>, operation: &'static str) -> Span {
    info_span!(
        "vessel.container",
        job_id = %job_id.as_ref(),
        operation = operation,
    )
}

/// Record the end of a worker launch.
///
/// `outcome` is one of `success`, `work_unit_failure`, `launcher_error`
/// or `cancelled`.
pub fn record_launch_finished(
    kind: impl AsRef<str>,
    outcome: impl AsRef<str>,
    elapsed: Duration,
) {
    tracing::info!(
        work_kind = %kind.as_ref(),
        outcome = %outcome.as_ref(),
        duration_secs = elapsed.as_secs_f64(),
        "worker launch finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_launch(kind.as_ref(), outcome.as_ref(), elapsed.as_secs_f64());
}

/// Record a container state transition.
pub fn record_transition(
    job_id: impl AsRef<str>,
    from: impl AsRef<str>,
    to: impl AsRef<str>,
) {
    tracing::info!(
        job_id = %job_id.as_ref(),
        from = %from.as_ref(),
        to = %to.as_ref(),
        "container state changed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_transition(from.as_ref(), to.as_ref());
}

/// Record one recovery attempt of a container.
pub fn record_recovery_attempt(job_id: impl AsRef<str>, attempt: u16) {
    tracing::warn!(
        job_id = %job_id.as_ref(),
        attempt = attempt,
        "recovering container after inconclusive poll"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_recovery_attempt();
}

/// Start timing a launch. Pass the handle to [`record_launch_end`].
pub fn record_launch_start(kind: impl AsRef<str>) -> LaunchTimingHandle {
    LaunchTimingHandle {
        kind: kind.as_ref().to_string(),
        start: Instant::now(),
    }
}

/// Finish timing a launch and record its outcome.
pub fn record_launch_end(handle: LaunchTimingHandle, outcome: impl AsRef<str>) {
    record_launch_finished(&handle.kind, outcome, handle.start.elapsed());
}

/// Handle for tracking launch duration.
#[derive(Debug)]
pub struct LaunchTimingHandle {
    kind: String,
    start: Instant,
}

impl LaunchTimingHandle {
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
