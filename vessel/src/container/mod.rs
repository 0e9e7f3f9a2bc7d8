/// Cluster job API abstraction.
pub mod cluster;
/// The per-job state machine.
pub mod job_container;
/// Cluster client that runs jobs in local worker processes.
pub mod local;
/// Serialized, retrying access to a container.
pub mod proxy;
/// Recovery backoff policy.
pub mod retry;
/// Container lifecycle states and allowed transitions.
pub mod state;
/// Strategies that turn a job into a cluster run.
pub mod submit;

pub use cluster::{ClusterClient, RemoteStatus};
pub use job_container::{ContainerSnapshot, JobContainer};
pub use local::{LocalCluster, LOCAL_HEAP_MIB, local_status};
pub use proxy::ContainerProxy;
pub use retry::{RecoveryDecision, RetryPolicy};
pub use state::ContainerState;
pub use submit::{ArtifactSubmitter, FnStrategy, SubmitStrategy, submit_with};
