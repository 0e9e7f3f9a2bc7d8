use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use crate::container::cluster::{ClusterClient, RemoteStatus};
use crate::container::state::ContainerState;
use crate::container::submit::SubmitStrategy;
use crate::error::ContainerError;
use crate::events::{ContainerEvent, ContainerEventBus, ContainerEventPayload};
use crate::job::{JobId, JobIdentity, RunId};
use crate::telemetry;

/// Point-in-time view of a container.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContainerSnapshot {
    pub job_id: JobId,
    pub state: ContainerState,
    pub run_id: Option<RunId>,
    pub last_error: Option<String>,
    pub recovery_attempts: u16,
}

/// One submitted cluster job and the state machine over its remote
/// lifecycle.
///
/// All operations take `&mut self`; wrap the container in a
/// [`ContainerProxy`](crate::container::ContainerProxy) to share it.
pub struct JobContainer {
    identity: JobIdentity,
    run_id: Option<RunId>,
    state: ContainerState,
    strategy: Arc<dyn SubmitStrategy>,
    cluster: Arc<dyn ClusterClient>,
    events: Option<Arc<ContainerEventBus>>,
    last_error: Option<String>,
    recovery_attempts: u16,
}

impl fmt::Debug for JobContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContainer")
            .field("job_id", &self.identity.job_id)
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .field("recovery_attempts", &self.recovery_attempts)
            .field("events_set", &self.events.is_some())
            .finish()
    }
}

impl JobContainer {
    pub fn new(
        identity: JobIdentity,
        strategy: Arc<dyn SubmitStrategy>,
        cluster: Arc<dyn ClusterClient>,
    ) -> Self {
        Self {
            identity,
            run_id: None,
            state: ContainerState::Created,
            strategy,
            cluster,
            events: None,
            last_error: None,
            recovery_attempts: 0,
        }
    }

    /// Re-attach to a run submitted by an earlier control-plane instance.
    ///
    /// The container starts in `Running`; the next poll confirms the run or
    /// recovers it. It is never resubmitted.
    pub fn restore(
        identity: JobIdentity,
        run_id: RunId,
        strategy: Arc<dyn SubmitStrategy>,
        cluster: Arc<dyn ClusterClient>,
    ) -> Self {
        Self {
            run_id: Some(run_id),
            state: ContainerState::Running,
            ..Self::new(identity, strategy, cluster)
        }
    }

    pub fn with_events(mut self, events: Arc<ContainerEventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn identity(&self) -> &JobIdentity {
        &self.identity
    }

    pub fn job_id(&self) -> &JobId {
        &self.identity.job_id
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn recovery_attempts(&self) -> u16 {
        self.recovery_attempts
    }

    pub fn snapshot(&self) -> ContainerSnapshot {
        ContainerSnapshot {
            job_id: self.identity.job_id.clone(),
            state: self.state,
            run_id: self.run_id.clone(),
            last_error: self.last_error.clone(),
            recovery_attempts: self.recovery_attempts,
        }
    }

    /// Submit the job. Only a `Created` container submits; in any other
    /// state this returns the current state without side effects.
    pub async fn run(&mut self) -> Result<ContainerState, ContainerError> {
        if self.state != ContainerState::Created {
            return Ok(self.state);
        }

        let span = telemetry::container_span(self.identity.job_id.as_str(), "run");
        async {
            self.transition(ContainerState::Submitting)?;
            match self.strategy.submit(&self.identity).await {
                Ok(run_id) => {
                    tracing::info!(run_id = %run_id, "job submitted");
                    self.run_id = Some(run_id.clone());
                    self.publish(ContainerEventPayload::Submitted { run_id });
                    self.transition(ContainerState::Running)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "job submission failed");
                    self.last_error = Some(err.to_string());
                    self.transition(ContainerState::Failed)?;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Query the remote run once.
    ///
    /// An unreachable cluster or an `Unknown` status moves the container to
    /// `Recovering` and returns [`ContainerError::TransientQuery`].
    pub async fn poll(&mut self) -> Result<ContainerState, ContainerError> {
        match self.state {
            ContainerState::Running => {}
            ContainerState::Recovering => return self.recover().await,
            state => return Ok(state),
        }

        let span = telemetry::container_span(self.identity.job_id.as_str(), "poll");
        async {
            let Some(run_id) = self.run_id.clone() else {
                return self.enter_recovering("no run id recorded".to_string());
            };
            match self.cluster.poll(&run_id).await {
                Ok(RemoteStatus::Running) => Ok(ContainerState::Running),
                Ok(RemoteStatus::Succeeded) => self.transition(ContainerState::Succeeded),
                Ok(RemoteStatus::Failed) => {
                    self.last_error = Some(format!("run {run_id} failed on the cluster"));
                    self.transition(ContainerState::Failed)
                }
                Ok(RemoteStatus::Killed) => self.transition(ContainerState::Killed),
                Ok(RemoteStatus::Unknown) => {
                    self.enter_recovering(format!("cluster reported run {run_id} as unknown"))
                }
                Err(err) => self.enter_recovering(err.to_string()),
            }
        }
        .instrument(span)
        .await
    }

    /// Make one attempt to re-locate the remote run.
    ///
    /// Polls the recorded run id, then asks the cluster for the job's
    /// current run. A live run returns the container to `Running`, a
    /// finished one moves it to the matching terminal state. Anything
    /// inconclusive leaves it in `Recovering`.
    pub async fn recover(&mut self) -> Result<ContainerState, ContainerError> {
        match self.state {
            ContainerState::Recovering => {}
            ContainerState::Running => {
                self.transition(ContainerState::Recovering)?;
            }
            state => return Ok(state),
        }

        let span = telemetry::container_span(self.identity.job_id.as_str(), "recover");
        async {
            self.recovery_attempts = self.recovery_attempts.saturating_add(1);
            telemetry::record_recovery_attempt(self.identity.job_id.as_str(), self.recovery_attempts);
            self.publish(ContainerEventPayload::RecoveryAttempt {
                attempt: self.recovery_attempts,
                run_id: self.run_id.clone(),
            });

            let previous = self.run_id.clone();
            if let Some(run_id) = &previous {
                if let Some(settled) = self.settle(run_id).await {
                    return settled;
                }
            }

            match self.cluster.find_run(&self.identity).await {
                Ok(Some(found)) if Some(&found) == previous.as_ref() => {}
                Ok(Some(found)) => {
                    tracing::info!(previous = ?previous, run_id = %found, "job found under a new run id");
                    self.run_id = Some(found.clone());
                    if let Some(settled) = self.settle(&found).await {
                        return settled;
                    }
                }
                Ok(None) => {
                    self.last_error = Some("cluster has no run for this job".to_string());
                }
                Err(err) => {
                    self.last_error = Some(err.to_string());
                }
            }

            Err(self.transient_error())
        }
        .instrument(span)
        .await
    }

    /// Request remote termination. Best effort: the run may finish on its
    /// own before the kill lands.
    pub async fn stop(&mut self) -> Result<ContainerState, ContainerError> {
        match self.state {
            ContainerState::Running | ContainerState::Recovering => {}
            state if state.is_terminal() => return Ok(state),
            state => return Err(self.invalid(state, ContainerState::Killed)),
        }

        let span = telemetry::container_span(self.identity.job_id.as_str(), "stop");
        async {
            if let Some(run_id) = self.run_id.clone() {
                if let Err(err) = self.cluster.kill(&run_id).await {
                    return Err(ContainerError::Kill {
                        job_id: self.identity.job_id.clone(),
                        run_id,
                        message: err.to_string(),
                    });
                }
            }
            self.publish(ContainerEventPayload::Stopped {
                run_id: self.run_id.clone(),
            });
            self.transition(ContainerState::Killed)
        }
        .instrument(span)
        .await
    }

    /// Force the container to `Failed`, recording `reason`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<ContainerState, ContainerError> {
        self.transition(ContainerState::Failed)?;
        self.last_error = Some(reason.into());
        Ok(self.state)
    }

    async fn settle(
        &mut self,
        run_id: &RunId,
    ) -> Option<Result<ContainerState, ContainerError>> {
        let next = match self.cluster.poll(run_id).await {
            Ok(RemoteStatus::Running) => ContainerState::Running,
            Ok(RemoteStatus::Succeeded) => ContainerState::Succeeded,
            Ok(RemoteStatus::Failed) => ContainerState::Failed,
            Ok(RemoteStatus::Killed) => ContainerState::Killed,
            Ok(RemoteStatus::Unknown) => {
                self.last_error = Some(format!("cluster reported run {run_id} as unknown"));
                return None;
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                return None;
            }
        };
        if next == ContainerState::Running {
            self.recovery_attempts = 0;
            self.last_error = None;
        }
        Some(self.transition(next))
    }

    fn enter_recovering(&mut self, message: String) -> Result<ContainerState, ContainerError> {
        tracing::warn!(run_id = ?self.run_id, reason = %message, "poll inconclusive");
        self.last_error = Some(message);
        self.transition(ContainerState::Recovering)?;
        Err(self.transient_error())
    }

    fn transient_error(&self) -> ContainerError {
        ContainerError::TransientQuery {
            job_id: self.identity.job_id.clone(),
            state: self.state,
            run_id: self.run_id.clone(),
            message: self.last_error.clone().unwrap_or_default(),
        }
    }

    fn invalid(&self, from: ContainerState, to: ContainerState) -> ContainerError {
        ContainerError::InvalidTransition {
            job_id: self.identity.job_id.clone(),
            from,
            to,
        }
    }

    fn transition(&mut self, next: ContainerState) -> Result<ContainerState, ContainerError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(self.invalid(from, next));
        }
        self.state = next;
        telemetry::record_transition(self.identity.job_id.as_str(), from.as_str(), next.as_str());
        self.publish(ContainerEventPayload::StateChanged {
            from,
            to: next,
            run_id: self.run_id.clone(),
        });
        Ok(next)
    }

    fn publish(&self, payload: ContainerEventPayload) {
        if let Some(events) = &self.events {
            let event = ContainerEvent::new(self.identity.job_id.clone(), payload);
            if let Err(err) = events.publish(event) {
                tracing::warn!(error = %err, "failed to publish container event");
            }
        }
    }
}
