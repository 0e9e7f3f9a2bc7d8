use serde_json::json;
use std::sync::Arc;
use vessel::*;

use crate::{MockCluster, MockSubmitStrategy};

/// A job identity with a small object flow.
pub fn identity(job_id: &str) -> JobIdentity {
    JobIdentity::new(
        job_id,
        json!({
            "source": {"type": "kafka", "topic": job_id},
            "sink": {"type": "console"},
        }),
        std::env::temp_dir(),
    )
}

/// Retry policy without delays.
pub fn immediate_retry(max_attempts: u16) -> RetryPolicy {
    RetryPolicy::immediate(max_attempts)
}

/// A fresh container wired to the given mocks.
pub fn container(
    job_id: &str,
    cluster: &MockCluster,
    strategy: &MockSubmitStrategy,
) -> JobContainer {
    JobContainer::new(
        identity(job_id),
        Arc::new(strategy.clone()),
        Arc::new(cluster.clone()),
    )
}

/// A runtime polling every `poll_interval_ms`, backed by the given mocks.
pub fn runtime(
    cluster: &MockCluster,
    strategy: &MockSubmitStrategy,
    poll_interval_ms: u64,
    retry: RetryPolicy,
) -> anyhow::Result<ContainerRuntime> {
    ContainerRuntimeBuilder::new(
        SupervisorConfig::default()
            .with_poll_interval_ms(poll_interval_ms)
            .with_shutdown_grace_ms(2_000),
    )
    .with_retry(retry)
    .with_cluster(Arc::new(cluster.clone()))
    .with_strategy(Arc::new(strategy.clone()))
    .build()
}
