use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use vessel::*;

use crate::MockCluster;

/// Submit strategy that skips the artifact build and asks the mock
/// cluster for a run id directly.
#[derive(Clone)]
pub struct MockSubmitStrategy {
    cluster: MockCluster,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    failure: Arc<Mutex<Option<String>>>,
}

impl MockSubmitStrategy {
    pub fn new(cluster: MockCluster) -> Self {
        Self {
            cluster,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Hold every submission for `delay`, widening race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every submission fail with `message`.
    pub fn set_failure(&self, message: &str) {
        *self.failure.lock() = Some(message.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn assert_call_count_eq(&self, expected: usize) {
        assert_eq!(
            self.call_count(),
            expected,
            "Expected {} submissions, got {}",
            expected,
            self.call_count()
        );
    }
}

#[async_trait]
impl SubmitStrategy for MockSubmitStrategy {
    async fn submit(&self, identity: &JobIdentity) -> Result<RunId, ContainerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().clone();
        if let Some(message) = failure {
            return Err(ContainerError::Submission {
                job_id: identity.job_id.clone(),
                message,
            });
        }
        Ok(self.cluster.allocate_run_id())
    }
}

/// Console sink that keeps every line it receives.
#[derive(Clone, Default)]
pub struct RecordingConsole {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl ConsoleSink for RecordingConsole {
    fn line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}
