use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::container::cluster::{ClusterClient, RemoteStatus};
use crate::error::{ClusterError, LaunchError};
use crate::job::{JobArtifact, JobId, JobIdentity, RunId};
use crate::launcher::{
    ConsoleSink, ExecutionResult, HeapSize, LaunchConfiguration, LaunchHandle, PrefixedConsole,
    TracingConsole, WorkerLauncher,
};
use crate::worker::WorkUnit;

/// Default initial and maximum heap of a local run.
pub const LOCAL_HEAP_MIB: u64 = 512;

type UnitFactory<W> = dyn Fn(&JobArtifact) -> W + Send + Sync;

enum LocalRun<T> {
    Active(LaunchHandle<T>),
    /// The worker exited and its outcome is being collected.
    Settling,
    Done(RemoteStatus),
}

/// A [`ClusterClient`] that runs each submitted job in a local worker
/// process instead of on a cluster.
///
/// The unit to run is produced from the built artifact by `factory`. The
/// worker gets the artifact's dependencies on its classpath ahead of the
/// launching process's own entries, and a fixed heap.
pub struct LocalCluster<W: WorkUnit> {
    launcher: WorkerLauncher,
    factory: Arc<UnitFactory<W>>,
    heap_initial: HeapSize,
    heap_max: HeapSize,
    console: Arc<dyn ConsoleSink>,
    next_run: AtomicU64,
    runs: Mutex<HashMap<RunId, LocalRun<W::Output>>>,
    latest: Mutex<HashMap<JobId, RunId>>,
    _unit: PhantomData<fn() -> W>,
}

impl<W: WorkUnit> fmt::Debug for LocalCluster<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCluster")
            .field("work_kind", &W::KIND)
            .field("heap_initial", &self.heap_initial)
            .field("heap_max", &self.heap_max)
            .field("run_count", &self.runs.lock().len())
            .finish()
    }
}

impl<W: WorkUnit> LocalCluster<W> {
    pub fn new<F>(launcher: WorkerLauncher, factory: F) -> Self
    where
        F: Fn(&JobArtifact) -> W + Send + Sync + 'static,
    {
        Self {
            launcher,
            factory: Arc::new(factory),
            heap_initial: HeapSize::from_mebibytes(LOCAL_HEAP_MIB),
            heap_max: HeapSize::from_mebibytes(LOCAL_HEAP_MIB),
            console: Arc::new(TracingConsole),
            next_run: AtomicU64::new(1),
            runs: Mutex::new(HashMap::new()),
            latest: Mutex::new(HashMap::new()),
            _unit: PhantomData,
        }
    }

    pub fn with_heap(mut self, initial: HeapSize, max: HeapSize) -> Self {
        self.heap_initial = initial;
        self.heap_max = max;
        self
    }

    /// Sink for run output; lines arrive prefixed with the job id.
    pub fn with_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = console;
        self
    }

    fn allocate_run_id(&self, job_id: &JobId) -> RunId {
        let n = self.next_run.fetch_add(1, Ordering::Relaxed);
        RunId::new(format!("local_{job_id}_{n:03}"))
    }
}

/// Cluster status of a finished local run.
pub fn local_status<T>(outcome: &Result<ExecutionResult<T>, LaunchError>) -> RemoteStatus {
    match outcome {
        Ok(result) if result.is_success() => RemoteStatus::Succeeded,
        Ok(_) => RemoteStatus::Failed,
        Err(LaunchError::Cancelled) => RemoteStatus::Killed,
        Err(_) => RemoteStatus::Failed,
    }
}

#[async_trait]
impl<W: WorkUnit> ClusterClient for LocalCluster<W> {
    async fn submit(
        &self,
        artifact: &JobArtifact,
        identity: &JobIdentity,
    ) -> Result<RunId, ClusterError> {
        let console = PrefixedConsole::new(identity.job_id.as_str(), Arc::clone(&self.console));
        let config = LaunchConfiguration::builder()
            .with_work((self.factory)(artifact))
            .with_heap_initial(self.heap_initial)
            .with_heap_max(self.heap_max)
            .not_dep_this_process_classpath()
            .add_user_jars(artifact.dependencies.iter().cloned())
            .with_work_dir(&identity.work_dir)
            .with_console(console)
            .build()
            .map_err(|err| ClusterError::Submission(err.to_string()))?;

        let handle = self
            .launcher
            .launch(config)
            .await
            .map_err(|err| ClusterError::Submission(err.to_string()))?;

        let run_id = self.allocate_run_id(&identity.job_id);
        tracing::info!(
            job_id = %identity.job_id,
            run_id = %run_id,
            pid = ?handle.pid(),
            "local run started"
        );
        self.runs
            .lock()
            .insert(run_id.clone(), LocalRun::Active(handle));
        self.latest
            .lock()
            .insert(identity.job_id.clone(), run_id.clone());
        Ok(run_id)
    }

    async fn poll(&self, run_id: &RunId) -> Result<RemoteStatus, ClusterError> {
        let handle = {
            let mut runs = self.runs.lock();
            let Some(run) = runs.get_mut(run_id) else {
                return Ok(RemoteStatus::Unknown);
            };
            match run {
                LocalRun::Done(status) => return Ok(*status),
                LocalRun::Active(handle) if !handle.is_finished() => {
                    return Ok(RemoteStatus::Running)
                }
                _ => {}
            }
            match std::mem::replace(run, LocalRun::Settling) {
                LocalRun::Active(handle) => handle,
                _ => return Ok(RemoteStatus::Running),
            }
        };

        let outcome = handle.wait().await;
        let status = local_status(&outcome);
        if let Err(err) = &outcome {
            tracing::debug!(run_id = %run_id, error = %err, "local run ended without a value");
        }
        self.runs.lock().insert(run_id.clone(), LocalRun::Done(status));
        Ok(status)
    }

    async fn kill(&self, run_id: &RunId) -> Result<(), ClusterError> {
        match self.runs.lock().get(run_id) {
            Some(LocalRun::Active(handle)) => {
                handle.cancel();
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(ClusterError::Transient(format!("no local run {run_id}"))),
        }
    }

    async fn find_run(&self, identity: &JobIdentity) -> Result<Option<RunId>, ClusterError> {
        Ok(self.latest.lock().get(&identity.job_id).cloned())
    }
}
