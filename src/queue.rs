//! Task queues: dependency ordering and bounded concurrency.
//!
//! Adding a task marks it pending and spawns a driver on the engine runtime.
//! The driver waits until every declared dependency has finished (in any
//! outcome), takes a permit, and starts the body on a blocking worker. The
//! permit is held only while the body executes; asynchronous bodies release
//! it as soon as they hand off.

use std::sync::{Arc, LazyLock};

use tokio::sync::Semaphore;
use tracing::{debug, error, trace};

use crate::error::RunError;
use crate::runtime;
use crate::task::{AnyTask, State};
use crate::telemetry::task::{record_state_transition, start_task_span};

static SHARED: LazyLock<TaskQueue> =
    LazyLock::new(|| TaskQueue::new("shared", crate::config::get().shared_concurrency));

/// An executor for tasks. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    name: String,
    max_concurrent: usize,
    permits: Arc<Semaphore>,
}

impl TaskQueue {
    /// Queue running at most `max_concurrent` bodies at once (min 1).
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                max_concurrent,
                permits: Arc::new(Semaphore::new(max_concurrent)),
            }),
        }
    }

    /// Queue that runs one body at a time, in dependency order.
    pub fn serial(name: impl Into<String>) -> Self {
        Self::new(name, 1)
    }

    /// The process-wide default queue.
    pub fn shared() -> &'static TaskQueue {
        &SHARED
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Schedule `task`. Dependencies not yet on any queue go to the shared
    /// queue. A task already scheduled or finished is left alone.
    pub fn add(&self, task: impl Into<AnyTask>) {
        let task = task.into();
        if !task.0.accept(&self.inner.name) {
            trace!(task_id = %task.id(), queue = %self.inner.name, "task already scheduled or finished");
            return;
        }

        let dependencies = task.0.dependencies();
        for dependency in &dependencies {
            TaskQueue::shared().add(dependency.clone());
        }

        debug!(
            task_id = %task.id(),
            queue = %self.inner.name,
            dependencies = dependencies.len(),
            "task queued"
        );

        let queue = Arc::clone(&self.inner);
        runtime::handle().spawn(async move {
            for dependency in &dependencies {
                dependency.finished().await;
            }

            let Ok(permit) = Arc::clone(&queue.permits).acquire_owned().await else {
                task.0.reject(RunError::Cancelled);
                return;
            };

            let span = start_task_span(&queue.name, task.id());
            record_state_transition(&span, State::Pending, State::Executing);

            let node = Arc::clone(&task.0);
            let worker_span = span.clone();
            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                worker_span.in_scope(|| node.start());
            })
            .await;

            if let Err(e) = joined {
                error!(task_id = %task.id(), queue = %queue.name, "task body panicked: {e}");
                task.0.reject(RunError::custom(format!("task body panicked: {e}")));
            }
            if task.is_finished() {
                record_state_transition(&span, State::Executing, State::Finished);
            }
        });
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.inner.name)
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("available", &self.inner.permits.available_permits())
            .finish()
    }
}
