//! Task execution span helpers.
//!
//! Provides span creation and state-transition recording for tasks
//! flowing through a queue.

use tracing::Span;

use crate::task::{State, TaskId};

/// Start a span for one task execution on a queue.
///
/// The `task.state` field is declared empty and is filled in by
/// [`record_state_transition`].
pub fn start_task_span(queue: &str, task_id: TaskId) -> Span {
    tracing::debug_span!(
        "task.execute",
        "task.queue" = queue,
        "task.id" = %task_id,
        "task.state" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: State, to: State) {
    span.record("task.state", tracing::field::display(to));
    span.in_scope(|| {
        tracing::debug!(%from, %to, "state_transition");
    });
}
