use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job container.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Created,
    Submitting,
    Running,
    /// The last poll was inconclusive; the run is being re-located.
    Recovering,
    Succeeded,
    Failed,
    Killed,
}

impl ContainerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Killed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Submitting => "submitting",
            Self::Running => "running",
            Self::Recovering => "recovering",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Killed => "killed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ContainerState) -> bool {
        use ContainerState::*;
        matches!(
            (*self, next),
            (Created, Submitting)
                | (Submitting, Running | Failed)
                | (Running, Succeeded | Failed | Killed | Recovering)
                | (Recovering, Running | Succeeded | Failed | Killed)
        )
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
