use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::container::ContainerState;
use crate::job::{JobId, RunId};

/// Metadata envelope attached to every container event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub event_id: Uuid,
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(job_id: JobId) -> Self {
        Self {
            version: 1,
            event_id: Uuid::now_v7(),
            job_id,
            timestamp: Utc::now(),
        }
    }
}

/// Container lifecycle event with metadata and payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerEvent {
    pub meta: EventMeta,
    pub payload: ContainerEventPayload,
}

impl ContainerEvent {
    pub fn new(job_id: JobId, payload: ContainerEventPayload) -> Self {
        Self {
            meta: EventMeta::new(job_id),
            payload,
        }
    }
}

/// Event payload emitted for container lifecycle changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ContainerEventPayload {
    /// The cluster accepted the job under `run_id`.
    Submitted { run_id: RunId },
    /// The container moved between states.
    StateChanged {
        from: ContainerState,
        to: ContainerState,
        run_id: Option<RunId>,
    },
    /// A recovery attempt started after an inconclusive poll.
    RecoveryAttempt { attempt: u16, run_id: Option<RunId> },
    /// The container was stopped by its owner.
    Stopped { run_id: Option<RunId> },
}

/// In-process container event bus on a tokio broadcast channel.
///
/// Publishing never waits for subscribers. A subscriber that falls more than
/// `capacity` events behind receives `RecvError::Lagged` and resumes with
/// the oldest retained event.
pub struct ContainerEventBus {
    sender: broadcast::Sender<ContainerEvent>,
    capacity: usize,
}

impl std::fmt::Debug for ContainerEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl ContainerEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event to all current subscribers. Events published with
    /// no subscribers are dropped.
    pub fn publish(&self, event: ContainerEvent) -> anyhow::Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn changed(job: &str, to: ContainerState) -> ContainerEvent {
        ContainerEvent::new(
            JobId::new(job),
            ContainerEventPayload::StateChanged {
                from: ContainerState::Running,
                to,
                run_id: Some(RunId::new("app_001")),
            },
        )
    }

    #[tokio::test]
    async fn test_event_bus_broadcast_to_multiple_subscribers() {
        let bus = ContainerEventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        for _ in 0..3 {
            bus.publish(changed("job_a", ContainerState::Succeeded)).unwrap();
        }

        for _ in 0..3 {
            let a = timeout(Duration::from_millis(100), rx1.recv())
                .await
                .unwrap()
                .unwrap();
            let b = timeout(Duration::from_millis(100), rx2.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(a.meta.event_id, b.meta.event_id);
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_doesnt_block_publisher() {
        let bus = ContainerEventBus::new(2);
        let mut rx = bus.subscribe();

        for _ in 0..5 {
            bus.publish(changed("job_a", ContainerState::Recovering)).unwrap();
        }

        match timeout(Duration::from_millis(100), rx.recv()).await.unwrap() {
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                assert_eq!(skipped, 3)
            }
            other => panic!("expected lag, got {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = ContainerEventBus::new(4);
        assert!(bus.publish(changed("job_a", ContainerState::Killed)).is_ok());
        let debug = format!("{bus:?}");
        assert!(debug.contains("capacity: 4"));
        assert!(debug.contains("subscribers: 0"));
    }

    #[test]
    fn test_event_meta_creation() {
        let first = EventMeta::new(JobId::new("job_a"));
        let second = EventMeta::new(JobId::new("job_a"));
        assert_eq!(first.version, 1);
        assert_ne!(first.event_id, second.event_id);
        assert_eq!(first.event_id.get_version_num(), 7);
        assert!(first.timestamp <= Utc::now());
    }

    #[test]
    fn test_payload_serializes_with_type_tag() {
        let value = serde_json::to_value(ContainerEventPayload::Submitted {
            run_id: RunId::new("app_001"),
        })
        .unwrap();
        assert_eq!(value["type"], "submitted");
        assert_eq!(value["run_id"], "app_001");
    }
}
