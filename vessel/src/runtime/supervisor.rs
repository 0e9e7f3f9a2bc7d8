use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail};
use parking_lot::RwLock;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::SupervisorConfig;
use crate::container::{
    ClusterClient, ContainerProxy, ContainerSnapshot, JobContainer, RetryPolicy,
    SubmitStrategy,
};
use crate::events::{ContainerEvent, ContainerEventBus};
use crate::job::{JobId, JobIdentity, RunId};
use crate::telemetry;

/// Token for signaling cancellation to background tasks.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Polling task of one container and the token that detaches it.
struct Supervision {
    handle: JoinHandle<()>,
    detach: ShutdownToken,
}

/// Owns the job containers of one control plane and supervises them.
///
/// Each started container gets a polling task that runs until the container
/// reaches a terminal state, its supervision is cancelled with
/// [`ContainerRuntime::unsupervise`] or the runtime shuts down. Cancelling
/// supervision stops polling only; remote runs are left alone.
pub struct ContainerRuntime {
    config: SupervisorConfig,
    retry: RetryPolicy,
    cluster: Arc<dyn ClusterClient>,
    strategy: Arc<dyn SubmitStrategy>,
    events: Arc<ContainerEventBus>,
    containers: RwLock<HashMap<JobId, ContainerProxy>>,
    supervisors: Mutex<HashMap<JobId, Supervision>>,
    shutdown_token: ShutdownToken,
}

impl fmt::Debug for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let supervisor_count = self
            .supervisors
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("ContainerRuntime")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .field("container_count", &self.containers.read().len())
            .field("supervisor_count", &supervisor_count)
            .field("events", &self.events)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl ContainerRuntime {
    pub fn new(
        config: SupervisorConfig,
        retry: RetryPolicy,
        cluster: Arc<dyn ClusterClient>,
        strategy: Arc<dyn SubmitStrategy>,
        events: Arc<ContainerEventBus>,
    ) -> Self {
        Self {
            config,
            retry,
            cluster,
            strategy,
            events,
            containers: RwLock::new(HashMap::new()),
            supervisors: Mutex::new(HashMap::new()),
            shutdown_token: ShutdownToken::new(),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn events(&self) -> Arc<ContainerEventBus> {
        Arc::clone(&self.events)
    }

    /// Subscribe to lifecycle events of every container.
    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.events.subscribe()
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown_token.clone()
    }

    /// Register a new container for `identity`.
    ///
    /// # Errors
    ///
    /// Fails if a container for the same job id already exists.
    pub fn create_container(&self, identity: JobIdentity) -> anyhow::Result<ContainerProxy> {
        let container = JobContainer::new(
            identity,
            Arc::clone(&self.strategy),
            Arc::clone(&self.cluster),
        );
        self.insert(container)
    }

    /// Re-attach to a job submitted by an earlier instance and start
    /// supervising it.
    pub async fn restore_container(
        &self,
        identity: JobIdentity,
        run_id: RunId,
    ) -> anyhow::Result<ContainerProxy> {
        self.ensure_running()?;
        let container = JobContainer::restore(
            identity,
            run_id,
            Arc::clone(&self.strategy),
            Arc::clone(&self.cluster),
        );
        let proxy = self.insert(container)?;
        self.spawn_supervisor(proxy.clone()).await;
        Ok(proxy)
    }

    pub fn container(&self, job_id: &JobId) -> Option<ContainerProxy> {
        self.containers.read().get(job_id).cloned()
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.containers.read().keys().cloned().collect()
    }

    /// Submit the job and start polling it.
    pub async fn start(&self, job_id: &JobId) -> anyhow::Result<ContainerSnapshot> {
        self.ensure_running()?;
        let proxy = self.lookup(job_id)?;
        let snapshot = proxy.run().await?;
        if !snapshot.state.is_terminal() {
            self.spawn_supervisor(proxy).await;
        }
        Ok(snapshot)
    }

    /// Request remote termination of the job.
    pub async fn stop(&self, job_id: &JobId) -> anyhow::Result<ContainerSnapshot> {
        let proxy = self.lookup(job_id)?;
        Ok(proxy.stop().await?)
    }

    pub async fn status(&self, job_id: &JobId) -> anyhow::Result<ContainerSnapshot> {
        Ok(self.lookup(job_id)?.status().await)
    }

    /// Forget a container that has reached a terminal state.
    pub async fn release(&self, job_id: &JobId) -> anyhow::Result<ContainerSnapshot> {
        let snapshot = self.status(job_id).await?;
        if !snapshot.state.is_terminal() {
            bail!("job {job_id} is {} and cannot be released", snapshot.state);
        }
        self.containers.write().remove(job_id);
        if let Some(supervision) = self.supervisors.lock().await.remove(job_id) {
            supervision.detach.cancel();
            supervision.handle.abort();
        }
        tracing::debug!(job_id = %job_id, "container released");
        Ok(snapshot)
    }

    /// Stop polling `job_id` without touching its remote run.
    ///
    /// The container stays registered in its current state; a later
    /// [`start`](Self::start) resumes polling it.
    pub async fn unsupervise(&self, job_id: &JobId) -> anyhow::Result<ContainerSnapshot> {
        let proxy = self.lookup(job_id)?;
        let supervision = self.supervisors.lock().await.remove(job_id);
        if let Some(supervision) = supervision {
            supervision.detach.cancel();
            match tokio::time::timeout(self.config.shutdown_grace(), supervision.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(job_id = %job_id, "supervisor task failed: {err:?}"),
                Err(_) => tracing::warn!(job_id = %job_id, "supervisor task did not stop in time"),
            }
            tracing::debug!(job_id = %job_id, "supervision cancelled");
        }
        Ok(proxy.status().await)
    }

    /// Wait for the polling task of `job_id` to finish, then report status.
    pub async fn join(&self, job_id: &JobId) -> anyhow::Result<ContainerSnapshot> {
        let supervision = self.supervisors.lock().await.remove(job_id);
        if let Some(supervision) = supervision {
            if let Err(err) = supervision.handle.await {
                tracing::warn!(job_id = %job_id, "supervisor task failed: {err:?}");
            }
        }
        self.status(job_id).await
    }

    /// Number of polling tasks still running.
    pub async fn active_supervisors(&self) -> usize {
        self.supervisors
            .lock()
            .await
            .values()
            .filter(|supervision| !supervision.handle.is_finished())
            .count()
    }

    /// Stop all polling tasks. Remote runs are not touched.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("Initiating shutdown of container runtime");

        self.shutdown_token.cancel();

        let handles: Vec<_> = {
            let mut guard = self.supervisors.lock().await;
            guard.drain().collect()
        };

        for (job_id, supervision) in handles {
            match tokio::time::timeout(self.config.shutdown_grace(), supervision.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(job_id = %job_id, "supervisor task failed: {:?}", e),
                Err(_) => {
                    tracing::warn!(job_id = %job_id, "supervisor task timed out during shutdown")
                }
            }
        }

        tracing::info!("Container runtime shutdown complete");
        Ok(())
    }

    fn insert(&self, container: JobContainer) -> anyhow::Result<ContainerProxy> {
        let container = container.with_events(Arc::clone(&self.events));
        let job_id = container.job_id().clone();
        let mut containers = self.containers.write();
        if containers.contains_key(&job_id) {
            bail!("a container for job {job_id} already exists");
        }
        let proxy = ContainerProxy::new(container, self.retry.clone());
        containers.insert(job_id, proxy.clone());
        Ok(proxy)
    }

    fn lookup(&self, job_id: &JobId) -> anyhow::Result<ContainerProxy> {
        self.container(job_id)
            .ok_or_else(|| anyhow!("no container for job {job_id}"))
    }

    fn ensure_running(&self) -> anyhow::Result<()> {
        if self.shutdown_token.is_cancelled() {
            bail!("container runtime is shut down");
        }
        Ok(())
    }

    async fn spawn_supervisor(&self, proxy: ContainerProxy) {
        let mut supervisors = self.supervisors.lock().await;
        supervisors.retain(|_, supervision| !supervision.handle.is_finished());
        if supervisors.contains_key(proxy.job_id()) {
            return;
        }

        let job_id = proxy.job_id().clone();
        let detach = ShutdownToken::new();
        let span = telemetry::container_span(job_id.as_str(), "supervise");
        let handle = tokio::spawn(
            supervise(
                proxy,
                self.config.poll_interval(),
                self.shutdown_token.clone(),
                detach.clone(),
            )
            .instrument(span),
        );
        supervisors.insert(job_id, Supervision { handle, detach });
    }
}

async fn supervise(
    proxy: ContainerProxy,
    interval: Duration,
    shutdown: ShutdownToken,
    detach: ShutdownToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("supervisor shutting down");
                break;
            }
            _ = detach.cancelled() => {
                tracing::debug!("supervision cancelled");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::debug!("supervisor shutting down mid-poll");
                break;
            }
            _ = detach.cancelled() => {
                tracing::debug!("supervision cancelled mid-poll");
                break;
            }
            result = proxy.poll() => result,
        };

        match result {
            Ok(snapshot) if snapshot.state.is_terminal() => {
                tracing::info!(state = %snapshot.state, run_id = ?snapshot.run_id, "container finished");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "container poll failed");
                if proxy.state().await.is_terminal() {
                    break;
                }
            }
        }
    }
}
