use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::container::cluster::ClusterClient;
use crate::error::{ContainerError, LaunchError};
use crate::job::{JobArtifact, JobIdentity, RunId};
use crate::launcher::{
    ClasspathChain, ConsoleSink, HeapSize, LaunchConfiguration, PrefixedConsole,
    TracingConsole, WorkerLauncher,
};
use crate::units::BuildManifest;

/// How a container turns its job into a cluster run.
#[async_trait]
pub trait SubmitStrategy: Send + Sync {
    async fn submit(&self, identity: &JobIdentity) -> Result<RunId, ContainerError>;
}

type SubmitFuture = Pin<Box<dyn Future<Output = Result<RunId, ContainerError>> + Send>>;

/// Strategy backed by a closure.
pub struct FnStrategy<F> {
    f: F,
}

/// Wrap a closure as a [`SubmitStrategy`].
pub fn submit_with<F, Fut>(f: F) -> FnStrategy<impl Fn(JobIdentity) -> SubmitFuture + Send + Sync>
where
    F: Fn(JobIdentity) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RunId, ContainerError>> + Send + 'static,
{
    FnStrategy {
        f: move |identity: JobIdentity| -> SubmitFuture { Box::pin(f(identity)) },
    }
}

impl<F> fmt::Debug for FnStrategy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStrategy").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> SubmitStrategy for FnStrategy<F>
where
    F: Fn(JobIdentity) -> SubmitFuture + Send + Sync,
{
    async fn submit(&self, identity: &JobIdentity) -> Result<RunId, ContainerError> {
        (self.f)(identity.clone()).await
    }
}

/// Default strategy: build the artifact in a worker process, then submit it
/// to the cluster.
pub struct ArtifactSubmitter {
    launcher: WorkerLauncher,
    cluster: Arc<dyn ClusterClient>,
    classpath: ClasspathChain,
    heap_max: Option<HeapSize>,
    console: Arc<dyn ConsoleSink>,
    build_timeout: Option<Duration>,
}

impl fmt::Debug for ArtifactSubmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactSubmitter")
            .field("launcher", &self.launcher)
            .field("classpath", &self.classpath)
            .field("heap_max", &self.heap_max)
            .field("build_timeout", &self.build_timeout)
            .finish()
    }
}

impl ArtifactSubmitter {
    pub fn new(launcher: WorkerLauncher, cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            launcher,
            cluster,
            classpath: ClasspathChain::default(),
            heap_max: None,
            console: Arc::new(TracingConsole),
            build_timeout: None,
        }
    }

    pub fn with_classpath(mut self, classpath: ClasspathChain) -> Self {
        self.classpath = classpath;
        self
    }

    pub fn with_heap_max(mut self, size: HeapSize) -> Self {
        self.heap_max = Some(size);
        self
    }

    /// Sink for build output; lines arrive prefixed with the job id.
    pub fn with_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = console;
        self
    }

    /// Cancel builds that run longer than `timeout`.
    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = Some(timeout);
        self
    }

    async fn build(
        &self,
        identity: &JobIdentity,
    ) -> Result<JobArtifact, LaunchError> {
        let console = PrefixedConsole::new(identity.job_id.as_str(), Arc::clone(&self.console));
        let mut builder = LaunchConfiguration::builder()
            .with_work(BuildManifest::for_job(identity))
            .add_classpath_chain(&self.classpath)
            .with_work_dir(&identity.work_dir)
            .with_console(console);
        if let Some(size) = self.heap_max {
            builder = builder.with_heap_max(size);
        }

        let mut handle = self.launcher.launch(builder.build()?).await?;
        let result = match self.build_timeout {
            Some(timeout) => match handle.wait_timeout(timeout).await {
                Err(LaunchError::TimedOut(elapsed)) => {
                    handle.cancel();
                    let _ = handle.wait().await;
                    return Err(LaunchError::TimedOut(elapsed));
                }
                other => other?,
            },
            None => handle.wait().await?,
        };
        result.into_value()
    }
}

#[async_trait]
impl SubmitStrategy for ArtifactSubmitter {
    async fn submit(&self, identity: &JobIdentity) -> Result<RunId, ContainerError> {
        let artifact = self
            .build(identity)
            .await
            .map_err(|source| ContainerError::Build {
                job_id: identity.job_id.clone(),
                source,
            })?;
        tracing::info!(
            job_id = %identity.job_id,
            flow_digest = %artifact.flow_digest,
            "artifact built, submitting"
        );

        self.cluster
            .submit(&artifact, identity)
            .await
            .map_err(|err| ContainerError::Submission {
                job_id: identity.job_id.clone(),
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_strategy_receives_identity() {
        let strategy = submit_with(|identity: JobIdentity| async move {
            Ok(RunId::new(format!("run-{}", identity.job_id)))
        });
        let identity = JobIdentity::new("job_a", json!({}), "/tmp");
        assert_eq!(
            strategy.submit(&identity).await.unwrap(),
            RunId::new("run-job_a")
        );
    }
}
