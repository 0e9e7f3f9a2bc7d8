use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClusterError;
use crate::job::{JobArtifact, JobIdentity, RunId};

/// Status of a run as reported by the cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Running,
    Succeeded,
    Failed,
    Killed,
    /// The cluster answered but could not say what the run is doing.
    Unknown,
}

/// Client for the cluster's job API.
///
/// One client is shared by every container, so implementations must be
/// safe to call concurrently.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Submit a built artifact and return the id of the new run.
    async fn submit(
        &self,
        artifact: &JobArtifact,
        identity: &JobIdentity,
    ) -> Result<RunId, ClusterError>;

    /// Query the status of a run.
    async fn poll(&self, run_id: &RunId) -> Result<RemoteStatus, ClusterError>;

    /// Ask the cluster to kill a run.
    async fn kill(&self, run_id: &RunId) -> Result<(), ClusterError>;

    /// Locate the current run of a job, which may have been resubmitted
    /// under a new id. Used during recovery.
    async fn find_run(&self, identity: &JobIdentity) -> Result<Option<RunId>, ClusterError>;
}
