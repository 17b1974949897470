/// Task state definitions for tracking pipeline progress
use std::fmt;

/// Represents where a task currently is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    // ===== Active States =====
    /// Task is waiting in a group queue
    Queued,

    /// Task has been admitted and holds a slot in its group
    Admitted,

    /// The pre-request hook is running
    PreRequest,

    /// The transport call is in flight
    Fetching,

    /// A response was received and is being encoded/transformed
    Succeeded,

    /// The fetch or the pre-request hook failed
    Failed,

    /// Waiting out the retry timeout before going back to the queue
    Retrying,

    // ===== Terminal States =====
    /// Dropped because an identical request was already seen
    Deduplicated,

    /// The pre-request hook aborted the task
    Aborted,

    /// The callback has been invoked
    Completed,
}

impl TaskState {
    /// Returns true if no further processing will happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deduplicated | Self::Aborted | Self::Completed)
    }

    /// Returns true if the task currently occupies a group slot
    pub fn holds_slot(&self) -> bool {
        matches!(
            self,
            Self::Admitted | Self::PreRequest | Self::Fetching | Self::Succeeded | Self::Failed | Self::Retrying
        )
    }

    /// Returns whether moving from `self` to `to` is a legal transition
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, to),
            (Queued, Deduplicated)
                | (Queued, Admitted)
                | (Admitted, PreRequest)
                | (Admitted, Fetching)
                // Inline content skips the transport
                | (Admitted, Succeeded)
                | (PreRequest, Fetching)
                | (PreRequest, Failed)
                | (PreRequest, Aborted)
                | (PreRequest, Queued)
                | (Fetching, Succeeded)
                | (Fetching, Failed)
                | (Succeeded, Completed)
                | (Failed, Retrying)
                | (Failed, Completed)
                | (Retrying, Queued)
        )
    }

    /// Short lowercase name used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Admitted => "admitted",
            Self::PreRequest => "pre_request",
            Self::Fetching => "fetching",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Deduplicated => "deduplicated",
            Self::Aborted => "aborted",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
