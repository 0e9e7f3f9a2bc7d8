use std::time::Duration;

use thiserror::Error;

use crate::container::ContainerState;
use crate::job::{JobId, RunId};
use crate::launcher::FailureCause;

/// Errors raised while launching a work unit in a worker process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The launch was mis-specified; no process was spawned.
    #[error("launch configuration error: {0}")]
    Configuration(String),
    /// The worker process crashed, exited abnormally or violated the protocol.
    #[error("worker process failed: {message}")]
    Launcher {
        message: String,
        exit_code: Option<i32>,
        /// Last lines the worker wrote to stderr.
        diagnostics: Vec<String>,
    },
    /// The worker ran to completion but the unit itself reported a failure.
    #[error("work unit failed: {cause}")]
    WorkUnit {
        cause: FailureCause,
        transcript: Vec<String>,
    },
    /// The caller cancelled the launch and the worker was killed.
    #[error("launch cancelled")]
    Cancelled,
    /// The worker was still running when the wait timed out.
    #[error("worker did not finish within {0:?}")]
    TimedOut(Duration),
}

impl LaunchError {
    pub(crate) fn launcher(message: impl Into<String>) -> Self {
        Self::Launcher {
            message: message.into(),
            exit_code: None,
            diagnostics: Vec::new(),
        }
    }
}

/// Errors reported by a cluster client.
#[derive(Clone, Debug, Error)]
pub enum ClusterError {
    /// The cluster rejected the artifact. Not retried.
    #[error("cluster rejected submission: {0}")]
    Submission(String),
    /// The cluster could not be reached or answered inconclusively.
    #[error("cluster query failed: {0}")]
    Transient(String),
}

/// Errors raised by job container lifecycle operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("job {job_id}: artifact build failed: {source}")]
    Build {
        job_id: JobId,
        #[source]
        source: LaunchError,
    },
    #[error("job {job_id}: submission rejected: {message}")]
    Submission { job_id: JobId, message: String },
    #[error("job {job_id}: transient query failure in state {state} (run {run_id:?}): {message}")]
    TransientQuery {
        job_id: JobId,
        state: ContainerState,
        run_id: Option<RunId>,
        message: String,
    },
    #[error("job {job_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: ContainerState,
        to: ContainerState,
    },
    #[error("job {job_id}: recovery gave up after {attempts} attempts (last run {run_id:?})")]
    RecoveryExhausted {
        job_id: JobId,
        run_id: Option<RunId>,
        attempts: u16,
    },
    #[error("job {job_id}: kill of run {run_id} failed: {message}")]
    Kill {
        job_id: JobId,
        run_id: RunId,
        message: String,
    },
}

impl ContainerError {
    /// Whether the proxy should retry the operation through recovery.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientQuery { .. })
    }
}
