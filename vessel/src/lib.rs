//! Vessel - isolated build workers and supervised cluster job containers.
//!
//! A control-plane core that builds job artifacts in freshly spawned worker
//! processes and tracks the resulting cluster runs until they finish.
//!
//! # Core Concepts
//!
//! - **Work unit**: A serializable command implementing [`WorkUnit`]. The
//!   parent ships it to a worker process, which dispatches it through a
//!   [`WorkRegistry`] and writes back one result record.
//!
//! - **Launcher**: [`WorkerLauncher`] spawns one worker per
//!   [`LaunchConfiguration`], streams its console output to a
//!   [`ConsoleSink`] and yields an [`ExecutionResult`].
//!
//! - **Container**: [`JobContainer`] holds one job's remote lifecycle as a
//!   state machine; [`ContainerProxy`] serializes access to it and retries
//!   inconclusive polls under a [`RetryPolicy`].
//!
//! - **Runtime**: [`ContainerRuntime`] owns the containers of a control
//!   plane and polls every started container until it finishes.
//!
//! - **Events**: [`ContainerEventBus`] broadcasts lifecycle changes.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use vessel::*;
//!
//! let launcher = WorkerLauncher::new(LauncherConfig::new("/usr/lib/vessel/vessel-worker"));
//! let config = LaunchConfiguration::builder()
//!     .with_work(Probe::Value { value: 42 })
//!     .with_heap_max("512m".parse()?)
//!     .build()?;
//! let result = launcher.run(config).await?;
//! assert_eq!(result.value(), Some(&42));
//! ```

/// Configuration structures for launching and supervision.
///
/// The `config` module defines [`LauncherConfig`] and
/// [`SupervisorConfig`].
pub mod config;

/// Job containers and their lifecycle.
///
/// The `container` module provides:
/// - [`ContainerState`] - lifecycle states and allowed transitions
/// - [`JobContainer`] - the per-job state machine
/// - [`ContainerProxy`] - serialized, retrying access to a container
/// - [`ClusterClient`] - trait for the cluster job API
/// - [`SubmitStrategy`] and [`ArtifactSubmitter`] - how jobs get submitted
/// - [`RetryPolicy`] - recovery backoff
/// - [`LocalCluster`] - runs jobs in local worker processes
pub mod container;

/// Error taxonomy for launches, cluster calls and containers.
pub mod error;

/// Container lifecycle events.
///
/// The `events` module provides [`ContainerEvent`],
/// [`ContainerEventPayload`] and the broadcasting [`ContainerEventBus`].
pub mod events;

/// Job identity and build artifact types.
pub mod job;

/// Worker process launching.
///
/// The `launcher` module provides:
/// - [`LaunchConfiguration`] and its builder
/// - [`WorkerLauncher`] and [`LaunchHandle`]
/// - [`ExecutionResult`] and [`FailureCause`]
/// - Console sinks such as [`PrefixedConsole`]
/// - The payload/result wire protocol
pub mod launcher;

#[cfg(feature = "metrics")]
/// Prometheus metrics.
pub mod metrics;

/// Container runtime and supervision.
///
/// The `runtime` module provides [`ContainerRuntime`], its builder and the
/// [`ShutdownToken`] used to stop background tasks.
pub mod runtime;

/// Tracing spans and outcome recording helpers.
pub mod telemetry;

/// Built-in work units.
pub mod units;

/// Worker-side traits and bootstrap.
///
/// The `worker` module provides the [`WorkUnit`] trait, the
/// [`WorkRegistry`] of handlers and [`run_worker`], the body of the worker
/// binary.
pub mod worker;

pub use config::*;
pub use container::*;
pub use error::*;
pub use events::*;
pub use job::*;
pub use launcher::*;
pub use runtime::*;
pub use units::*;
pub use worker::*;
