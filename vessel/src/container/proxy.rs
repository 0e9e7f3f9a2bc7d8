use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::container::job_container::{ContainerSnapshot, JobContainer};
use crate::container::retry::{RecoveryDecision, RetryPolicy};
use crate::container::state::ContainerState;
use crate::error::ContainerError;
use crate::job::{JobId, RunId};

/// Shared handle to a [`JobContainer`].
///
/// Every lifecycle step runs under the container's lock, so transitions of
/// one container never interleave. Inconclusive polls are retried through
/// recovery with exponential backoff before the container is failed; the
/// lock is free while a retry waits out its delay.
#[derive(Clone)]
pub struct ContainerProxy {
    job_id: JobId,
    inner: Arc<Mutex<JobContainer>>,
    retry: RetryPolicy,
}

impl fmt::Debug for ContainerProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .inner
            .try_lock()
            .map(|container| container.state().as_str())
            .unwrap_or("busy");
        f.debug_struct("ContainerProxy")
            .field("job_id", &self.job_id)
            .field("state", &state)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ContainerProxy {
    pub fn new(container: JobContainer, retry: RetryPolicy) -> Self {
        Self {
            job_id: container.job_id().clone(),
            inner: Arc::new(Mutex::new(container)),
            retry,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Submit the job if it has not been submitted yet.
    pub async fn run(&self) -> Result<ContainerSnapshot, ContainerError> {
        let mut container = self.inner.lock().await;
        container.run().await?;
        Ok(container.snapshot())
    }

    /// Poll the remote run, recovering through transient failures.
    ///
    /// Returns [`ContainerError::RecoveryExhausted`] once the retry budget is
    /// spent; the container is `Failed` from then on.
    pub async fn poll(&self) -> Result<ContainerSnapshot, ContainerError> {
        {
            let mut container = self.inner.lock().await;
            match container.poll().await {
                Ok(_) => return Ok(container.snapshot()),
                Err(err) if err.is_transient() => {}
                Err(err) => return Err(err),
            }
        }
        self.recover_with_backoff(true).await
    }

    /// Run the recovery loop now, whatever the last poll said.
    pub async fn recover(&self) -> Result<ContainerSnapshot, ContainerError> {
        self.recover_with_backoff(false).await
    }

    /// Request remote termination.
    pub async fn stop(&self) -> Result<ContainerSnapshot, ContainerError> {
        let mut container = self.inner.lock().await;
        container.stop().await?;
        Ok(container.snapshot())
    }

    pub async fn status(&self) -> ContainerSnapshot {
        self.inner.lock().await.snapshot()
    }

    pub async fn state(&self) -> ContainerState {
        self.inner.lock().await.state()
    }

    pub async fn run_id(&self) -> Option<RunId> {
        self.inner.lock().await.run_id().cloned()
    }

    /// Recovery attempts separated by backoff sleeps.
    ///
    /// The lock is released while sleeping, so status queries and `stop()`
    /// are served between attempts. Each attempt re-checks the state under
    /// the lock and ends the loop once the container is terminal.
    async fn recover_with_backoff(
        &self,
        mut attempted: bool,
    ) -> Result<ContainerSnapshot, ContainerError> {
        loop {
            let delay = {
                let mut container = self.inner.lock().await;
                if !Self::needs_recovery(&container, attempted) {
                    return Ok(container.snapshot());
                }
                match self.retry.decide(container.recovery_attempts()) {
                    RecoveryDecision::Escalate => return Err(self.escalate(&mut container)),
                    RecoveryDecision::Retry { attempt, delay } => {
                        tracing::debug!(job_id = %self.job_id, attempt, delay_ms = delay.as_millis() as u64, "backing off before recovery");
                        delay
                    }
                }
            };

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut container = self.inner.lock().await;
            if !Self::needs_recovery(&container, attempted) {
                return Ok(container.snapshot());
            }
            attempted = true;
            match container.recover().await {
                Ok(_) => return Ok(container.snapshot()),
                Err(err) if err.is_transient() => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn needs_recovery(container: &JobContainer, attempted: bool) -> bool {
        match container.state() {
            ContainerState::Recovering => true,
            ContainerState::Running => !attempted,
            _ => false,
        }
    }

    fn escalate(&self, container: &mut JobContainer) -> ContainerError {
        let attempts = container.recovery_attempts();
        let run_id = container.run_id().cloned();
        let reason = format!(
            "recovery gave up after {attempts} attempts: {}",
            container.last_error().unwrap_or("no answer from cluster")
        );
        tracing::error!(job_id = %self.job_id, run_id = ?run_id, "{reason}");
        if let Err(err) = container.fail(reason) {
            return err;
        }
        ContainerError::RecoveryExhausted {
            job_id: self.job_id.clone(),
            run_id,
            attempts,
        }
    }
}
