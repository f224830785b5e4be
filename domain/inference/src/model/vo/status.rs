use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a server, client run or monitor instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Created, not yet handed to the scheduler.
    Pending,
    /// Registered and being submitted.
    Submitted,
    /// Accepted by the scheduler, waiting for resources.
    Queued,
    Running,
    Stopping,
    Stopped,
    /// Client run finished and produced results.
    Completed,
    Error,
    Canceled,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::Completed | Self::Error | Self::Canceled
        )
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Submitted => 1,
            Self::Queued => 2,
            Self::Running => 3,
            Self::Stopping => 4,
            Self::Stopped | Self::Completed | Self::Error | Self::Canceled => 5,
        }
    }

    /// Whether the instance has reached (or passed) the running phase,
    /// i.e. node and endpoints may be recorded.
    pub fn has_started(self) -> bool {
        self.rank() >= Self::Running.rank()
    }

    /// Status only moves forward. `ERROR` and `CANCELED` are reachable from
    /// any non-terminal status; re-applying the current status is a no-op.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        matches!(next, Self::Error | Self::Canceled) || next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler state normalized to the vocabulary the lifecycle understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Stopping,
    Stopped,
    Error,
    /// Unrecognized or no longer visible to the scheduler. Never terminal.
    Unknown,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::InstanceStatus::{self, *};

    const ALL: [InstanceStatus; 9] = [
        Pending, Submitted, Queued, Running, Stopping, Stopped, Completed, Error, Canceled,
    ];

    #[test]
    fn forward_path_is_allowed() {
        let path = [Pending, Submitted, Queued, Running, Stopping, Stopped];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Running.can_transition_to(Completed));
        assert!(Queued.can_transition_to(Running));
    }

    #[test]
    fn status_never_moves_backwards() {
        assert!(!Running.can_transition_to(Queued));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Queued.can_transition_to(Submitted));
    }

    #[test]
    fn terminal_statuses_are_final() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL.into_iter().filter(|to| *to != from) {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
            assert!(from.can_transition_to(from));
        }
    }

    #[test]
    fn error_and_cancel_reachable_from_any_live_status() {
        for from in ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(from.can_transition_to(Error));
            assert!(from.can_transition_to(Canceled));
        }
    }

    #[test]
    fn serializes_as_upper_case() {
        assert_eq!(serde_json::to_string(&Canceled).unwrap(), "\"CANCELED\"");
        let parsed: InstanceStatus = serde_json::from_str("\"QUEUED\"").unwrap();
        assert_eq!(parsed, Queued);
    }
}
