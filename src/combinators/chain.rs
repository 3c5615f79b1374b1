//! Sequencing combinators.
//!
//! Each combinator returns a new wrapper task that depends on its
//! predecessor. Cancelling the wrapper cancels the predecessor; when the
//! wrapper finishes, whatever inner task it spawned is cancelled if still
//! running. Wrapper progress is chained to the predecessor's, and an inner
//! task's progress is re-parented into the wrapper's range.

use crate::error::{RunError, TaskResult};
use crate::progress::{Progress, SubWeight};
use crate::task::{AsyncBlock, Output, Task};

impl<T: Output> Task<T> {
    /// On success, run the task returned by `body`. The wrapper resolves with
    /// the inner task's result. A failed predecessor fails the wrapper
    /// without calling `body`.
    pub fn chain<R, F>(&self, weight: SubWeight, body: F) -> Task<R>
    where
        R: Output,
        F: FnOnce(T) -> TaskResult<Task<R>> + Send + 'static,
    {
        self.follow(weight, move |wrapper: &Task<R>, upstream: TaskResult<T>| {
            match upstream {
                Ok(value) => {
                    let inner = body(value)?;
                    attach(wrapper, &inner, true);
                    Ok(())
                }
                Err(e) => {
                    wrapper.reject(e);
                    Ok(())
                }
            }
        })
    }

    /// Recover from failure: on error run the task returned by `recover`,
    /// on success pass the value through. The recovery task is not cancelled
    /// when the wrapper finishes.
    pub fn seize<F>(&self, recover: F) -> Task<T>
    where
        F: FnOnce(RunError) -> TaskResult<Task<T>> + Send + 'static,
    {
        self.follow(SubWeight::Skip, move |wrapper: &Task<T>, upstream| {
            match upstream {
                Ok(value) => wrapper.resolve(value),
                Err(e) => {
                    let inner = recover(e)?;
                    attach(wrapper, &inner, false);
                }
            }
            Ok(())
        })
    }

    /// Transform the value. Takes no visible progress.
    pub fn convert<R, F>(&self, f: F) -> Task<R>
    where
        R: Output,
        F: FnOnce(T) -> TaskResult<R> + Send + 'static,
    {
        self.chain(SubWeight::Skip, move |value| Ok(Task::value(f(value)?)))
    }

    /// Infallible [`Task::convert`].
    pub fn map<R, F>(&self, f: F) -> Task<R>
    where
        R: Output,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.convert(move |value| Ok(f(value)))
    }

    /// [`Task::chain`] to a task whose value is discarded.
    pub fn then<U, F>(&self, weight: SubWeight, body: F) -> Task<()>
    where
        U: Output,
        F: FnOnce(T) -> TaskResult<Task<U>> + Send + 'static,
    {
        self.chain(weight, move |value| Ok(body(value)?.discard()))
    }

    /// Drop the value, keep success or failure.
    pub fn discard(&self) -> Task<()> {
        self.convert(|_| Ok(()))
    }

    /// Like [`Task::chain`], but `body` may decline to continue by returning
    /// `None`, which finishes the wrapper as cancelled.
    pub fn chain_or_cancel<R, F>(&self, weight: SubWeight, body: F) -> Task<R>
    where
        R: Output,
        F: FnOnce(T) -> TaskResult<Option<Task<R>>> + Send + 'static,
    {
        self.chain(weight, move |value| body(value)?.ok_or(RunError::Cancelled))
    }

    /// Run `f` with the value once the task succeeds. Returns the same task.
    pub fn success(&self, f: impl FnOnce(&T) + Send + 'static) -> Task<T> {
        self.always(move |result| {
            if let Ok(value) = result {
                f(value)
            }
        })
    }

    /// Run `f` with the error once the task fails. Returns the same task.
    pub fn fail(&self, f: impl FnOnce(&RunError) + Send + 'static) -> Task<T> {
        self.always(move |result| {
            if let Err(e) = result {
                f(e)
            }
        })
    }

    /// Run `f` with the result once the task finishes. Returns the same task.
    pub fn always(&self, f: impl FnOnce(&TaskResult<T>) + Send + 'static) -> Task<T> {
        let weak = self.downgrade();
        self.add_completion(move || {
            if let Some(task) = weak.upgrade() {
                f(&task.finished_value())
            }
        });
        self.clone()
    }

    /// A new task that mirrors this one's result but whose cancellation does
    /// not reach this one. Intended for observing a shared task that some
    /// other owner schedules; cancelling the returned task only stops the
    /// observation.
    pub fn with_detached_cancel(&self) -> Task<T> {
        let source = self.clone();
        Task::from_async(move |detached: Task<T>| {
            let weak = source.downgrade();
            source.add_completion(move || match weak.upgrade() {
                Some(source) => detached.finish(source.finished_value()),
                None => detached.reject(RunError::Cancelled),
            });
            Ok(())
        })
    }

    /// Wrapper whose body runs `step` with the predecessor's result once the
    /// predecessor has finished.
    fn follow<R, F>(&self, weight: SubWeight, step: F) -> Task<R>
    where
        R: Output,
        F: FnOnce(&Task<R>, TaskResult<T>) -> Result<(), RunError> + Send + 'static,
    {
        let upstream = self.clone();
        let progress = Progress::chained(weight, self.progress());
        let wrapper = Task::with_progress(
            AsyncBlock(move |wrapper: Task<R>| {
                if wrapper.is_finished() {
                    return Ok(());
                }
                step(&wrapper, upstream.finished_value())
            }),
            progress,
        );
        wrapper.add_dependency(self);
        wrapper
    }
}

/// Forward `inner`'s result to `wrapper` and run it inside the wrapper's
/// progress range.
fn attach<R: Output>(wrapper: &Task<R>, inner: &Task<R>, cancel_inner: bool) {
    let forward = wrapper.clone();
    let source = inner.downgrade();
    inner.add_completion(move || {
        if let Some(inner) = source.upgrade() {
            forward.finish(inner.finished_value());
        }
    });

    if cancel_inner {
        let target = inner.downgrade();
        wrapper.add_completion(move || {
            if let Some(inner) = target.upgrade().filter(|inner| !inner.is_finished()) {
                inner.cancel();
            }
        });
    }

    inner.progress().reset(Some(wrapper.progress()));
    inner.run();
}
