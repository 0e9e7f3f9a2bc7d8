//! Job container lifecycle tests against the mock cluster.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use vessel::*;
use vessel_testkit::{fixtures, MockCluster, MockSubmitStrategy};

fn mocks() -> (MockCluster, MockSubmitStrategy) {
    let cluster = MockCluster::new();
    let strategy = MockSubmitStrategy::new(cluster.clone());
    (cluster, strategy)
}

fn proxy(job_id: &str, cluster: &MockCluster, strategy: &MockSubmitStrategy) -> ContainerProxy {
    ContainerProxy::new(
        fixtures::container(job_id, cluster, strategy),
        fixtures::immediate_retry(3),
    )
}

#[tokio::test]
async fn run_submits_and_enters_running() {
    let (cluster, strategy) = mocks();
    let proxy = proxy("job_a", &cluster, &strategy);
    assert_eq!(proxy.state().await, ContainerState::Created);

    let snapshot = proxy.run().await.unwrap();

    assert_eq!(snapshot.state, ContainerState::Running);
    assert_eq!(snapshot.run_id, Some(RunId::new("app_001")));
    assert_eq!(snapshot.recovery_attempts, 0);
    strategy.assert_call_count_eq(1);

    cluster.script_polls([RemoteStatus::Running, RemoteStatus::Succeeded]);
    assert_eq!(proxy.poll().await.unwrap().state, ContainerState::Running);
    assert_eq!(proxy.poll().await.unwrap().state, ContainerState::Succeeded);
    assert_eq!(
        cluster.polled_runs(),
        vec![RunId::new("app_001"), RunId::new("app_001")]
    );

    assert_eq!(proxy.run().await.unwrap().state, ContainerState::Succeeded);
    strategy.assert_call_count_eq(1);
}

#[tokio::test]
async fn poll_before_run_is_a_no_op() {
    let (cluster, strategy) = mocks();
    let proxy = proxy("job_a", &cluster, &strategy);

    assert_eq!(proxy.poll().await.unwrap().state, ContainerState::Created);
    assert_eq!(cluster.poll_count(), 0);
}

#[tokio::test]
async fn concurrent_run_submits_once() {
    let cluster = MockCluster::new();
    let strategy = MockSubmitStrategy::new(cluster.clone()).with_delay(Duration::from_millis(50));
    let proxy = proxy("job_a", &cluster, &strategy);

    let results = join_all((0..8).map(|_| {
        let proxy = proxy.clone();
        async move { proxy.run().await }
    }))
    .await;

    strategy.assert_call_count_eq(1);
    for result in results {
        let snapshot = result.unwrap();
        assert_eq!(snapshot.state, ContainerState::Running);
        assert_eq!(snapshot.run_id, Some(RunId::new("app_001")));
    }
}

#[tokio::test]
async fn unknown_status_beyond_bound_fails_the_container() {
    let (cluster, strategy) = mocks();
    cluster.set_default_status(RemoteStatus::Unknown);
    let proxy = proxy("job_a", &cluster, &strategy);
    proxy.run().await.unwrap();

    let err = proxy.poll().await.unwrap_err();

    match err {
        ContainerError::RecoveryExhausted {
            attempts, run_id, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(run_id, Some(RunId::new("app_001")));
        }
        other => panic!("expected exhausted recovery, got {other:?}"),
    }
    let snapshot = proxy.status().await;
    assert_eq!(snapshot.state, ContainerState::Failed);
    assert!(snapshot
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("recovery gave up after 3 attempts"));
    // One regular poll plus one per recovery attempt.
    assert_eq!(cluster.poll_count(), 4);
    assert_eq!(cluster.find_calls(), 3);

    assert_eq!(proxy.poll().await.unwrap().state, ContainerState::Failed);
    assert_eq!(cluster.poll_count(), 4);
}

#[tokio::test]
async fn recovery_adopts_a_new_run_id() {
    let (cluster, strategy) = mocks();
    let proxy = proxy("job_a", &cluster, &strategy);
    proxy.run().await.unwrap();

    cluster.script_polls([RemoteStatus::Unknown, RemoteStatus::Unknown]);
    cluster.set_found_run(Some(RunId::new("app_007")));

    let snapshot = proxy.poll().await.unwrap();

    assert_eq!(snapshot.state, ContainerState::Running);
    assert_eq!(snapshot.run_id, Some(RunId::new("app_007")));
    assert_eq!(snapshot.recovery_attempts, 0);
    assert!(snapshot.last_error.is_none());
    assert_eq!(
        cluster.polled_runs(),
        vec![
            RunId::new("app_001"),
            RunId::new("app_001"),
            RunId::new("app_007"),
        ]
    );
}

#[tokio::test]
async fn transient_poll_error_recovers() {
    let (cluster, strategy) = mocks();
    let proxy = proxy("job_a", &cluster, &strategy);
    proxy.run().await.unwrap();

    cluster.push_poll_error("connection reset");
    let snapshot = proxy.poll().await.unwrap();

    assert_eq!(snapshot.state, ContainerState::Running);
    assert_eq!(snapshot.recovery_attempts, 0);
    assert_eq!(cluster.poll_count(), 2);
    assert_eq!(cluster.find_calls(), 0);
}

#[tokio::test]
async fn recovery_can_land_in_a_terminal_state() {
    let (cluster, strategy) = mocks();
    let proxy = proxy("job_a", &cluster, &strategy);
    proxy.run().await.unwrap();

    cluster.script_polls([RemoteStatus::Unknown, RemoteStatus::Succeeded]);
    let snapshot = proxy.poll().await.unwrap();

    assert_eq!(snapshot.state, ContainerState::Succeeded);
    assert_eq!(snapshot.recovery_attempts, 1);
}

#[tokio::test]
async fn explicit_recover_on_running_container() {
    let (cluster, strategy) = mocks();
    let proxy = proxy("job_a", &cluster, &strategy);
    proxy.run().await.unwrap();

    let snapshot = proxy.recover().await.unwrap();

    assert_eq!(snapshot.state, ContainerState::Running);
    assert_eq!(cluster.poll_count(), 1);
}

#[tokio::test]
async fn failed_submission_is_terminal() {
    let (cluster, strategy) = mocks();
    strategy.set_failure("quota exceeded");
    let proxy = proxy("job_a", &cluster, &strategy);

    let err = proxy.run().await.unwrap_err();
    assert!(matches!(err, ContainerError::Submission { .. }), "got {err:?}");

    let snapshot = proxy.status().await;
    assert_eq!(snapshot.state, ContainerState::Failed);
    assert!(snapshot.run_id.is_none());
    assert!(snapshot.last_error.unwrap().contains("quota exceeded"));

    assert_eq!(proxy.run().await.unwrap().state, ContainerState::Failed);
    strategy.assert_call_count_eq(1);
}

#[tokio::test]
async fn stop_kills_the_remote_run() {
    let (cluster, strategy) = mocks();
    let proxy = proxy("job_a", &cluster, &strategy);
    proxy.run().await.unwrap();

    assert_eq!(proxy.stop().await.unwrap().state, ContainerState::Killed);
    assert_eq!(cluster.kills(), vec![RunId::new("app_001")]);

    assert_eq!(proxy.stop().await.unwrap().state, ContainerState::Killed);
    assert_eq!(cluster.kills().len(), 1);
}

#[tokio::test]
async fn stop_before_run_is_rejected() {
    let (cluster, strategy) = mocks();
    let proxy = proxy("job_a", &cluster, &strategy);

    let err = proxy.stop().await.unwrap_err();

    match err {
        ContainerError::InvalidTransition { from, to, .. } => {
            assert_eq!(from, ContainerState::Created);
            assert_eq!(to, ContainerState::Killed);
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
    assert_eq!(proxy.state().await, ContainerState::Created);
}

#[tokio::test]
async fn failed_kill_leaves_container_running() {
    let (cluster, strategy) = mocks();
    cluster.fail_kills("permission denied");
    let proxy = proxy("job_a", &cluster, &strategy);
    proxy.run().await.unwrap();

    let err = proxy.stop().await.unwrap_err();

    assert!(matches!(err, ContainerError::Kill { .. }), "got {err:?}");
    assert_eq!(proxy.state().await, ContainerState::Running);
}

#[tokio::test]
async fn restored_container_never_resubmits() {
    let (cluster, strategy) = mocks();
    let container = JobContainer::restore(
        fixtures::identity("job_a"),
        RunId::new("app_042"),
        Arc::new(strategy.clone()),
        Arc::new(cluster.clone()),
    );
    let proxy = ContainerProxy::new(container, fixtures::immediate_retry(3));

    let snapshot = proxy.run().await.unwrap();
    assert_eq!(snapshot.state, ContainerState::Running);
    assert_eq!(snapshot.run_id, Some(RunId::new("app_042")));

    proxy.poll().await.unwrap();
    assert_eq!(cluster.polled_runs(), vec![RunId::new("app_042")]);
    strategy.assert_call_count_eq(0);
}

#[tokio::test]
async fn lifecycle_publishes_events_in_order() {
    let (cluster, strategy) = mocks();
    let events = Arc::new(ContainerEventBus::new(16));
    let mut rx = events.subscribe();
    let container = fixtures::container("job_a", &cluster, &strategy).with_events(events);
    let proxy = ContainerProxy::new(container, fixtures::immediate_retry(3));

    proxy.run().await.unwrap();
    proxy.stop().await.unwrap();

    let app = Some(RunId::new("app_001"));
    let expected = vec![
        ContainerEventPayload::StateChanged {
            from: ContainerState::Created,
            to: ContainerState::Submitting,
            run_id: None,
        },
        ContainerEventPayload::Submitted {
            run_id: RunId::new("app_001"),
        },
        ContainerEventPayload::StateChanged {
            from: ContainerState::Submitting,
            to: ContainerState::Running,
            run_id: app.clone(),
        },
        ContainerEventPayload::Stopped {
            run_id: app.clone(),
        },
        ContainerEventPayload::StateChanged {
            from: ContainerState::Running,
            to: ContainerState::Killed,
            run_id: app,
        },
    ];

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.meta.job_id, JobId::new("job_a"));
        seen.push(event.payload);
    }
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn status_and_stop_are_served_during_recovery_backoff() {
    let (cluster, strategy) = mocks();
    cluster.set_default_status(RemoteStatus::Unknown);
    let proxy = ContainerProxy::new(
        fixtures::container("job_a", &cluster, &strategy),
        RetryPolicy::new(3, 400, 2_000),
    );
    proxy.run().await.unwrap();

    let polling = tokio::spawn({
        let proxy = proxy.clone();
        async move { proxy.poll().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = timeout(Duration::from_millis(200), proxy.status())
        .await
        .expect("status blocked behind recovery backoff");
    assert_eq!(snapshot.state, ContainerState::Recovering);

    let stopped = timeout(Duration::from_millis(200), proxy.stop())
        .await
        .expect("stop blocked behind recovery backoff")
        .unwrap();
    assert_eq!(stopped.state, ContainerState::Killed);
    assert_eq!(cluster.kills(), vec![RunId::new("app_001")]);

    let snapshot = timeout(Duration::from_secs(5), polling)
        .await
        .expect("recovery loop did not end")
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.state, ContainerState::Killed);
    assert_eq!(cluster.find_calls(), 0);
}
