use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for spawning worker processes.
///
/// Controls which binary is launched, where exchange files live and how
/// much worker output is retained.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Path of the worker bootstrap binary.
    pub worker_program: PathBuf,
    /// Parent directory for per-launch exchange directories. Uses the
    /// system temp directory when unset.
    pub exchange_dir: Option<PathBuf>,
    /// Maximum number of console lines kept in a transcript.
    pub transcript_limit: usize,
    /// Maximum number of stderr lines kept for launcher diagnostics.
    pub diagnostic_tail: usize,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            worker_program: PathBuf::from("vessel-worker"),
            exchange_dir: None,
            transcript_limit: 10_000,
            diagnostic_tail: 64,
        }
    }
}

impl LauncherConfig {
    pub fn new(worker_program: impl Into<PathBuf>) -> Self {
        Self {
            worker_program: worker_program.into(),
            ..Self::default()
        }
    }

    pub fn with_exchange_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exchange_dir = Some(dir.into());
        self
    }

    pub fn with_transcript_limit(mut self, limit: usize) -> Self {
        self.transcript_limit = limit;
        self
    }

    pub fn with_diagnostic_tail(mut self, lines: usize) -> Self {
        self.diagnostic_tail = lines;
        self
    }
}

/// Configuration for container supervision.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Interval between status polls of a running container.
    pub poll_interval_ms: u64,
    /// How long shutdown waits for each polling task.
    pub shutdown_grace_ms: u64,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            shutdown_grace_ms: 30_000,
            event_capacity: 1_024,
        }
    }
}

impl SupervisorConfig {
    pub fn with_poll_interval_ms(mut self, millis: u64) -> Self {
        self.poll_interval_ms = millis;
        self
    }

    pub fn with_shutdown_grace_ms(mut self, millis: u64) -> Self {
        self.shutdown_grace_ms = millis;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: SupervisorConfig =
            serde_json::from_str(r#"{"poll_interval_ms": 250}"#).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.shutdown_grace_ms, 30_000);
        assert_eq!(config.event_capacity, 1_024);

        let launcher: LauncherConfig =
            serde_json::from_str(r#"{"worker_program": "/usr/bin/vw"}"#)
                .unwrap();
        assert_eq!(launcher.worker_program, PathBuf::from("/usr/bin/vw"));
        assert!(launcher.exchange_dir.is_none());
    }
}
