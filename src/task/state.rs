//! Task identity and lifecycle state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable handle identifying a task for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a task. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Created, not yet accepted by a queue.
    Initial,
    /// Accepted by a queue, waiting for dependencies and a worker.
    Pending,
    /// Body started.
    Executing,
    /// Result stored. Terminal.
    Finished,
}

impl State {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Initial, Pending)
                | (Initial, Finished)   // rejected or cancelled before scheduling
                | (Pending, Executing)
                | (Pending, Finished)   // rejected or cancelled while waiting
                | (Executing, Finished)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == State::Finished
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Initial => "initial",
            State::Pending => "pending",
            State::Executing => "executing",
            State::Finished => "finished",
        };
        write!(f, "{s}")
    }
}
