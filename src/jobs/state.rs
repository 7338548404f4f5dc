//! Job status state machine.

use serde::{Deserialize, Serialize};

/// Status of an agent job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is created and waiting for the orchestrator to pick it up.
    Queued,
    /// The orchestrator is driving the tool-calling loop.
    Running,
    /// Job finished with a user-visible reply (possibly with zero results).
    Completed,
    /// Job hit an unrecoverable error.
    Failed,
}

impl JobStatus {
    /// Check if this status allows transitioning to another status.
    ///
    /// Transitions move strictly forward and never skip `Running`;
    /// terminal statuses allow no further transitions.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Queued, Running) | (Running, Completed) | (Running, Failed)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if the job is still live (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}
