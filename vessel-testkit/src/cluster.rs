use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use vessel::*;

/// In-memory cluster with scripted poll answers.
///
/// Polls consume the script front to back; once it is empty every poll
/// answers the default status (`Running` unless changed).
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
}

#[derive(Clone, Debug)]
pub struct SubmissionRecord {
    pub job_id: JobId,
    pub run_id: RunId,
    pub flow_digest: String,
}

#[derive(Default)]
struct ClusterState {
    next_run: u32,
    submit_delay: Option<Duration>,
    submit_error: Option<ClusterError>,
    submissions: Vec<SubmissionRecord>,
    poll_script: VecDeque<Result<RemoteStatus, ClusterError>>,
    default_status: Option<RemoteStatus>,
    polled: Vec<RunId>,
    kill_error: Option<ClusterError>,
    kills: Vec<RunId>,
    found_run: Option<RunId>,
    find_calls: usize,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue poll answers, consumed in order.
    pub fn script_polls<I>(&self, statuses: I)
    where
        I: IntoIterator<Item = RemoteStatus>,
    {
        self.state
            .lock()
            .poll_script
            .extend(statuses.into_iter().map(Ok));
    }

    /// Queue one transient poll failure.
    pub fn push_poll_error(&self, message: &str) {
        self.state
            .lock()
            .poll_script
            .push_back(Err(ClusterError::Transient(message.to_string())));
    }

    pub fn set_default_status(&self, status: RemoteStatus) {
        self.state.lock().default_status = Some(status);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        self.state.lock().submit_delay = Some(delay);
    }

    pub fn reject_submissions(&self, message: &str) {
        self.state.lock().submit_error =
            Some(ClusterError::Submission(message.to_string()));
    }

    pub fn fail_kills(&self, message: &str) {
        self.state.lock().kill_error =
            Some(ClusterError::Transient(message.to_string()));
    }

    /// What `find_run` answers during recovery.
    pub fn set_found_run(&self, run_id: Option<RunId>) {
        self.state.lock().found_run = run_id;
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    pub fn polled_runs(&self) -> Vec<RunId> {
        self.state.lock().polled.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.state.lock().polled.len()
    }

    pub fn kills(&self) -> Vec<RunId> {
        self.state.lock().kills.clone()
    }

    pub fn find_calls(&self) -> usize {
        self.state.lock().find_calls
    }

    pub fn assert_submission_count_eq(&self, expected: usize) {
        let actual = self.submission_count();
        assert_eq!(
            actual, expected,
            "Expected {} submissions, got {}",
            expected, actual
        );
    }

    /// Next run id, as the cluster would assign it: `app_001`, `app_002`...
    pub fn allocate_run_id(&self) -> RunId {
        let mut state = self.state.lock();
        state.next_run += 1;
        RunId::new(format!("app_{:03}", state.next_run))
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn submit(
        &self,
        artifact: &JobArtifact,
        identity: &JobIdentity,
    ) -> Result<RunId, ClusterError> {
        let delay = self.state.lock().submit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.state.lock().submit_error.clone() {
            return Err(err);
        }

        let run_id = self.allocate_run_id();
        self.state.lock().submissions.push(SubmissionRecord {
            job_id: identity.job_id.clone(),
            run_id: run_id.clone(),
            flow_digest: artifact.flow_digest.clone(),
        });
        Ok(run_id)
    }

    async fn poll(&self, run_id: &RunId) -> Result<RemoteStatus, ClusterError> {
        let mut state = self.state.lock();
        state.polled.push(run_id.clone());
        match state.poll_script.pop_front() {
            Some(answer) => answer,
            None => Ok(state.default_status.unwrap_or(RemoteStatus::Running)),
        }
    }

    async fn kill(&self, run_id: &RunId) -> Result<(), ClusterError> {
        let mut state = self.state.lock();
        if let Some(err) = state.kill_error.clone() {
            return Err(err);
        }
        state.kills.push(run_id.clone());
        Ok(())
    }

    async fn find_run(
        &self,
        _identity: &JobIdentity,
    ) -> Result<Option<RunId>, ClusterError> {
        let mut state = self.state.lock();
        state.find_calls += 1;
        Ok(state.found_run.clone())
    }
}
