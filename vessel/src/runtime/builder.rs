use std::fmt;
use std::sync::Arc;

use crate::config::SupervisorConfig;
use crate::container::{ArtifactSubmitter, ClusterClient, RetryPolicy, SubmitStrategy};
use crate::events::ContainerEventBus;
use crate::launcher::WorkerLauncher;

use super::supervisor::ContainerRuntime;

/// Builder for a [`ContainerRuntime`] with explicit dependencies.
///
/// A cluster client is always required. The submit strategy is either set
/// directly or derived from a launcher, in which case jobs are built with
/// an [`ArtifactSubmitter`].
///
/// # Example
///
/// ```ignore
/// use vessel::*;
///
/// let runtime = ContainerRuntimeBuilder::new(SupervisorConfig::default())
///     .with_cluster(cluster)
///     .with_launcher(WorkerLauncher::new(LauncherConfig::default()))
///     .build()?;
/// ```
pub struct ContainerRuntimeBuilder {
    config: SupervisorConfig,
    retry: RetryPolicy,
    cluster: Option<Arc<dyn ClusterClient>>,
    strategy: Option<Arc<dyn SubmitStrategy>>,
    launcher: Option<WorkerLauncher>,
    events: Option<Arc<ContainerEventBus>>,
}

impl fmt::Debug for ContainerRuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerRuntimeBuilder")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .field("cluster_set", &self.cluster.is_some())
            .field("strategy_set", &self.strategy.is_some())
            .field("launcher_set", &self.launcher.is_some())
            .field("events_set", &self.events.is_some())
            .finish()
    }
}

impl Default for ContainerRuntimeBuilder {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl ContainerRuntimeBuilder {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            retry: RetryPolicy::default(),
            cluster: None,
            strategy: None,
            launcher: None,
            events: None,
        }
    }

    /// Set the recovery retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the cluster client.
    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Set the submit strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn SubmitStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Build artifacts with `launcher` when no strategy is set.
    pub fn with_launcher(mut self, launcher: WorkerLauncher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Share an existing event bus.
    pub fn with_events(mut self, events: Arc<ContainerEventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster client is missing, if neither a
    /// strategy nor a launcher was supplied, or if the event capacity is
    /// zero.
    pub fn build(self) -> anyhow::Result<ContainerRuntime> {
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("cluster dependency missing"))?;
        let strategy = match (self.strategy, self.launcher) {
            (Some(strategy), _) => strategy,
            (None, Some(launcher)) => {
                Arc::new(ArtifactSubmitter::new(launcher, Arc::clone(&cluster)))
                    as Arc<dyn SubmitStrategy>
            }
            (None, None) => anyhow::bail!("submit strategy dependency missing"),
        };
        let events = match self.events {
            Some(events) => events,
            None => {
                anyhow::ensure!(
                    self.config.event_capacity > 0,
                    "event capacity must be positive"
                );
                Arc::new(ContainerEventBus::new(self.config.event_capacity))
            }
        };

        Ok(ContainerRuntime::new(
            self.config,
            self.retry,
            cluster,
            strategy,
            events,
        ))
    }
}
