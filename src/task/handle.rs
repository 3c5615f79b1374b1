//! Type-erased task handles.
//!
//! Queues, dependency lists and groups deal with tasks of any result type.
//! They only need the lifecycle, never the value, so they go through
//! [`AnyTask`] instead of downcasting results.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::RunError;
use crate::progress::Progress;
use crate::task::{Output, State, Task, TaskId};

pub(crate) type Callback = Box<dyn FnOnce() + Send>;

/// Lifecycle operations shared by every `Task<T>`.
pub(crate) trait Node: Send + Sync + 'static {
    fn id(&self) -> TaskId;
    fn state(&self) -> State;
    fn error(&self) -> Option<RunError>;
    fn progress(&self) -> Progress;
    fn dependencies(&self) -> Vec<AnyTask>;
    /// Mark the task pending on `queue`. False if some queue already has it
    /// or it can no longer be scheduled.
    fn accept(&self, queue: &str) -> bool;
    fn start(self: Arc<Self>);
    fn reject(&self, error: RunError);
    fn cancel(&self);
    fn add_completion(&self, callback: Callback);
    fn finished(&self) -> watch::Receiver<bool>;
}

/// A task of any result type.
#[derive(Clone)]
pub struct AnyTask(pub(crate) Arc<dyn Node>);

impl AnyTask {
    pub fn id(&self) -> TaskId {
        self.0.id()
    }

    pub fn state(&self) -> State {
        self.0.state()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// The error the task finished with, if it failed.
    pub fn error(&self) -> Option<RunError> {
        self.0.error()
    }

    pub fn progress(&self) -> Progress {
        self.0.progress()
    }

    pub fn cancel(&self) {
        self.0.cancel()
    }

    pub fn add_completion(&self, callback: impl FnOnce() + Send + 'static) {
        self.0.add_completion(Box::new(callback))
    }

    /// Resolves once the task is `Finished`.
    pub async fn finished(&self) {
        let mut rx = self.0.finished();
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl<T: Output> From<Task<T>> for AnyTask {
    fn from(task: Task<T>) -> Self {
        AnyTask(task.inner)
    }
}

impl<T: Output> From<&Task<T>> for AnyTask {
    fn from(task: &Task<T>) -> Self {
        AnyTask(task.inner.clone())
    }
}

impl fmt::Debug for AnyTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyTask")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
