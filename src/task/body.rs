//! What a task runs.
//!
//! The runtime first offers the synchronous path; a body that does not
//! provide one answers [`RunError::NotImplemented`] and is then handed the
//! task to resolve asynchronously.

use std::future::Future;

use crate::error::{RunError, TaskResult};
use crate::task::{Output, Task};

/// Body of a task.
///
/// Implement `execute_sync` for work that produces its value on the calling
/// worker, or `execute` for work that completes later; in the latter case the
/// implementation must eventually call [`Task::resolve`] or
/// [`Task::reject`] exactly once.
pub trait Execute<T: Output>: Send + 'static {
    fn execute_sync(&mut self, task: &Task<T>) -> TaskResult<T> {
        let _ = task;
        Err(RunError::NotImplemented)
    }

    fn execute(self: Box<Self>, task: Task<T>) {
        tracing::error!(task_id = %task.id(), "task body provides neither execution path");
        task.reject(RunError::NotImplemented);
    }
}

/// Synchronous closure body.
pub(crate) struct Block<F>(pub(crate) Option<F>);

impl<T, F> Execute<T> for Block<F>
where
    T: Output,
    F: FnOnce(&Task<T>) -> TaskResult<T> + Send + 'static,
{
    fn execute_sync(&mut self, task: &Task<T>) -> TaskResult<T> {
        match self.0.take() {
            Some(f) => f(task),
            None => Err(RunError::Cancelled),
        }
    }
}

/// Closure body that receives the task and resolves it whenever it likes.
/// Returning an error rejects the task immediately.
pub(crate) struct AsyncBlock<F>(pub(crate) F);

impl<T, F> Execute<T> for AsyncBlock<F>
where
    T: Output,
    F: FnOnce(Task<T>) -> Result<(), RunError> + Send + 'static,
{
    fn execute(self: Box<Self>, task: Task<T>) {
        if let Err(e) = (self.0)(task.clone()) {
            task.reject(e);
        }
    }
}

/// Future body, polled on the engine runtime and raced against the task's
/// cancellation token.
pub(crate) struct FutureBody<Fut>(pub(crate) Fut);

impl<T, Fut> Execute<T> for FutureBody<Fut>
where
    T: Output,
    Fut: Future<Output = TaskResult<T>> + Send + 'static,
{
    fn execute(self: Box<Self>, task: Task<T>) {
        let token = task.cancellation_token();
        let future = self.0;
        crate::runtime::handle().spawn(async move {
            tokio::select! {
                _ = token.cancelled() => task.reject(RunError::Cancelled),
                result = future => task.finish(result),
            }
        });
    }
}
