//! The task: a typed unit of work that resolves exactly once.
//!
//! A [`Task`] is a cheap handle (`Arc`) to shared lifecycle state. Every
//! clone observes the same state, the same progress and the same result.
//! Tasks move `Initial -> Pending -> Executing -> Finished`; `Finished` can
//! also be reached directly by rejection or cancellation before execution.
//!
//! The first call to [`Task::finish`] (or `resolve` / `reject` / `cancel`)
//! decides the result; later calls are ignored. Completion callbacks run
//! exactly once, in registration order, after the result is stored.

mod body;
mod handle;
mod state;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{RunError, TaskResult};
use crate::progress::Progress;
use crate::queue::TaskQueue;
use crate::telemetry::metrics;
use crate::{config, delivery, runtime};

pub use body::Execute;
pub(crate) use body::{AsyncBlock, Block, FutureBody};
pub use handle::AnyTask;
pub(crate) use handle::{Callback, Node};
pub use state::{State, TaskId};

/// Values a task can produce. The result is cloned out to every observer.
pub trait Output: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Output for T {}

pub struct Task<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

/// Non-owning task handle.
pub struct WeakTask<T> {
    inner: Weak<Inner<T>>,
}

pub(crate) struct Inner<T> {
    id: TaskId,
    progress: Progress,
    cancel: CancellationToken,
    body: Mutex<Option<Box<dyn Execute<T>>>>,
    lifecycle: Mutex<Lifecycle<T>>,
    finished: watch::Sender<bool>,
    created_at: DateTime<Utc>,
}

struct Lifecycle<T> {
    state: State,
    result: Option<TaskResult<T>>,
    callbacks: Vec<Callback>,
    /// Must finish before this task may start. Cancelled along with it.
    dependencies: Vec<AnyTask>,
    /// Cancelled along with this task, but not waited for.
    linked: Vec<AnyTask>,
    queue: Option<String>,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    finished_at: Option<DateTime<Utc>>,
    watchdog: Option<AbortHandle>,
}

/// Point-in-time view of a task, for logs and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub state: State,
    pub progress: f64,
    pub queue: Option<String>,
    pub dependencies: Vec<TaskId>,
    pub cancelled: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl<T: Output> Task<T> {
    /// Task running a custom [`Execute`] body.
    pub fn new(body: impl Execute<T>) -> Self {
        Self::with_progress(body, Progress::new())
    }

    pub(crate) fn with_progress(body: impl Execute<T>, progress: Progress) -> Self {
        Self::build(Some(Box::new(body)), None, progress)
    }

    /// Task whose body is a synchronous closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        Self::new(Block(Some(move |_: &Task<T>| f())))
    }

    /// Like [`Task::from_fn`], but the closure gets the task, e.g. to report
    /// progress or poll cancellation.
    pub fn from_fn_with<F>(f: F) -> Self
    where
        F: FnOnce(&Task<T>) -> TaskResult<T> + Send + 'static,
    {
        Self::new(Block(Some(f)))
    }

    /// Task whose body is handed the task and resolves it later.
    pub fn from_async<F>(f: F) -> Self
    where
        F: FnOnce(Task<T>) -> Result<(), RunError> + Send + 'static,
    {
        Self::new(AsyncBlock(f))
    }

    /// Task backed by a future. The future is not polled until the task
    /// executes, and is dropped if the task is cancelled.
    pub fn from_future<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        Self::new(FutureBody(future))
    }

    /// Task already holding a value. Running it finishes immediately.
    pub fn value(value: T) -> Self {
        Self::build(None, Some(Ok(value)), Progress::new())
    }

    /// Task already holding an error. Running it finishes immediately.
    pub fn failed(error: RunError) -> Self {
        Self::build(None, Some(Err(error)), Progress::new())
    }

    fn build(
        body: Option<Box<dyn Execute<T>>>,
        preset: Option<TaskResult<T>>,
        progress: Progress,
    ) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                id: TaskId::new(),
                progress,
                cancel: CancellationToken::new(),
                body: Mutex::new(body),
                lifecycle: Mutex::new(Lifecycle {
                    state: State::Initial,
                    result: preset,
                    callbacks: Vec::new(),
                    dependencies: Vec::new(),
                    linked: Vec::new(),
                    queue: None,
                    started_at: None,
                    started: None,
                    finished_at: None,
                    watchdog: None,
                }),
                finished,
                created_at: Utc::now(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

impl<T: Output> Task<T> {
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn state(&self) -> State {
        self.inner.lifecycle().state
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// True once cancellation was requested, even if the task is still
    /// unwinding.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Token that fires when this task is cancelled. Long-running bodies can
    /// select on it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// The stored result. Tasks created with [`Task::value`] or
    /// [`Task::failed`] hold it before they run.
    pub fn result(&self) -> Option<TaskResult<T>> {
        self.inner.lifecycle().result.clone()
    }

    pub fn error(&self) -> Option<RunError> {
        self.inner.error()
    }

    pub fn progress(&self) -> &Progress {
        &self.inner.progress
    }

    pub fn downgrade(&self) -> WeakTask<T> {
        WeakTask {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let lc = self.inner.lifecycle();
        TaskSnapshot {
            id: self.inner.id,
            state: lc.state,
            progress: self.inner.progress.absolute_value(),
            queue: lc.queue.clone(),
            dependencies: lc.dependencies.iter().map(AnyTask::id).collect(),
            cancelled: self.inner.cancel.is_cancelled(),
            error: lc
                .result
                .as_ref()
                .and_then(|r| r.as_ref().err())
                .map(ToString::to_string),
            created_at: self.inner.created_at,
            started_at: lc.started_at,
            finished_at: lc.finished_at,
        }
    }

    /// The value of a finished task. Used by combinators that only read
    /// results after a completion callback fired.
    pub(crate) fn finished_value(&self) -> TaskResult<T> {
        self.result()
            .unwrap_or_else(|| Err(RunError::custom("result read before the task finished")))
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

impl<T: Output> Task<T> {
    pub fn resolve(&self, value: T) {
        self.inner.finish(Ok(value))
    }

    pub fn reject(&self, error: RunError) {
        self.inner.finish(Err(error))
    }

    /// Store `result` and finish the task. No effect if it already finished.
    pub fn finish(&self, result: TaskResult<T>) {
        self.inner.finish(result)
    }

    /// Cancel the task and, transitively, everything it depends on or is
    /// linked to. No effect on a finished task.
    pub fn cancel(&self) {
        self.inner.cancel_all()
    }

    /// Run `callback` once the task finishes. If it already has, the callback
    /// runs immediately on the calling thread.
    pub fn add_completion(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.add_completion(Box::new(callback))
    }

    /// Declare that `dependency` must finish before this task starts. Queues
    /// schedule undeclared dependencies on the shared queue.
    pub fn add_dependency(&self, dependency: impl Into<AnyTask>) {
        self.inner.lifecycle().dependencies.push(dependency.into());
    }

    /// Cancel `other` whenever this task is cancelled.
    pub(crate) fn link_cancellation(&self, other: AnyTask) {
        self.inner.lifecycle().linked.push(other);
    }
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

impl<T: Output> Task<T> {
    /// Schedule on the shared queue.
    pub fn run(&self) -> Self {
        TaskQueue::shared().add(self);
        self.clone()
    }

    /// Schedule on `queue`.
    pub fn on(&self, queue: &TaskQueue) -> Self {
        queue.add(self);
        self.clone()
    }

    /// Schedule on the shared queue, reporting the absolute progress to
    /// `observer` on the delivery context.
    pub fn run_with_progress(&self, observer: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.inner.progress.observe(observer);
        self.run()
    }

    /// Schedule on the shared queue and hand the result to `callback` on the
    /// delivery context.
    pub fn run_then(&self, callback: impl FnOnce(TaskResult<T>) + Send + 'static) -> Self {
        let weak = self.downgrade();
        self.add_completion(move || {
            if let Some(task) = weak.upgrade() {
                let result = task.finished_value();
                delivery::dispatch(move || callback(result));
            }
        });
        self.run()
    }

    /// Wait for the task to finish and return its result. Does not schedule
    /// the task.
    pub async fn wait(&self) -> TaskResult<T> {
        let mut rx = self.inner.finished.subscribe();
        let _ = rx.wait_for(|done| *done).await;
        self.finished_value()
    }

    /// Run the body. Called by a queue once dependencies are done and a
    /// worker is free.
    fn main(&self) {
        let preset = self.inner.lifecycle().result.clone();
        if let Some(preset) = preset {
            self.inner.finish(preset);
            return;
        }

        let body = self.inner.body.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(mut body) = body else {
            warn!(task_id = %self.id(), "task started without a body");
            self.reject(RunError::Cancelled);
            return;
        };

        match body.execute_sync(self) {
            Err(RunError::NotImplemented) => body.execute(self.clone()),
            result => self.finish(result),
        }
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Output> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl<T: Output> WeakTask<T> {
    pub fn upgrade(&self) -> Option<Task<T>> {
        self.inner.upgrade().map(|inner| Task { inner })
    }
}

impl<T> Clone for WeakTask<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

impl<T: Output> Inner<T> {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle<T>> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn error(&self) -> Option<RunError> {
        match &self.lifecycle().result {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    fn finish(&self, result: TaskResult<T>) {
        if matches!(result, Err(RunError::Cancelled)) {
            self.cancel.cancel();
        }

        let (callbacks, outcome, from, elapsed) = {
            let mut lc = self.lifecycle();
            if lc.state.is_terminal() {
                return;
            }
            let from = lc.state;
            let outcome = outcome_label(lc.result.get_or_insert(result));
            lc.state = State::Finished;
            lc.finished_at = Some(Utc::now());
            if let Some(watchdog) = lc.watchdog.take() {
                watchdog.abort();
            }
            (
                std::mem::take(&mut lc.callbacks),
                outcome,
                from,
                lc.started.map(|s| s.elapsed()),
            )
        };

        if outcome == "success" {
            self.progress.update(1.0);
        }

        debug!(task_id = %self.id, %from, outcome, "task finished");
        metrics::tasks_finished().add(1, &[KeyValue::new("outcome", outcome)]);
        if let Some(elapsed) = elapsed {
            metrics::task_duration_ms().record(
                elapsed.as_secs_f64() * 1000.0,
                &[KeyValue::new("outcome", outcome)],
            );
        }

        for callback in callbacks {
            callback();
        }
        self.finished.send_replace(true);
    }

    fn cancel_all(&self) {
        self.cancel.cancel();
        let targets: Vec<AnyTask> = {
            let lc = self.lifecycle();
            if lc.state.is_terminal() {
                return;
            }
            lc.dependencies.iter().chain(&lc.linked).cloned().collect()
        };

        debug!(task_id = %self.id, targets = targets.len(), "cancelling task");
        self.finish(Err(RunError::Cancelled));
        for target in targets {
            target.cancel();
        }
    }

    fn add_completion(&self, callback: Callback) {
        let mut lc = self.lifecycle();
        if lc.state.is_terminal() {
            drop(lc);
            callback();
        } else {
            lc.callbacks.push(callback);
        }
    }

    /// Report the task if it is still running after the configured delay.
    fn arm_watchdog(self: &Arc<Self>) {
        let timeout = config::get().watchdog_timeout;
        let weak = Arc::downgrade(self);
        let id = self.id;
        let handle = runtime::handle().spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else { return };
            if !inner.lifecycle().state.is_terminal() {
                warn!(
                    task_id = %id,
                    elapsed_secs = timeout.as_secs(),
                    "task still running after watchdog delay"
                );
                metrics::watchdog_warnings().add(1, &[]);
            }
        });
        self.lifecycle().watchdog = Some(handle.abort_handle());
    }
}

impl<T: Output> Node for Inner<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn state(&self) -> State {
        self.lifecycle().state
    }

    fn error(&self) -> Option<RunError> {
        Inner::error(self)
    }

    fn progress(&self) -> Progress {
        self.progress.clone()
    }

    fn dependencies(&self) -> Vec<AnyTask> {
        self.lifecycle().dependencies.clone()
    }

    fn accept(&self, queue: &str) -> bool {
        let mut lc = self.lifecycle();
        if lc.queue.is_some() || !lc.state.can_transition_to(State::Pending) {
            return false;
        }
        lc.queue = Some(queue.to_owned());
        lc.state = State::Pending;
        true
    }

    fn start(self: Arc<Self>) {
        {
            let mut lc = self.lifecycle();
            if !lc.state.can_transition_to(State::Executing) {
                trace!(task_id = %self.id, state = %lc.state, "skipping start");
                return;
            }
            lc.state = State::Executing;
            lc.started_at = Some(Utc::now());
            lc.started = Some(Instant::now());
        }
        self.arm_watchdog();

        let task = Task { inner: self };
        if task.is_cancelled() {
            task.reject(RunError::Cancelled);
            return;
        }
        task.main();
    }

    fn reject(&self, error: RunError) {
        self.finish(Err(error))
    }

    fn cancel(&self) {
        self.cancel_all()
    }

    fn add_completion(&self, callback: Callback) {
        Inner::add_completion(self, callback)
    }

    fn finished(&self) -> watch::Receiver<bool> {
        self.finished.subscribe()
    }
}

fn outcome_label<T>(result: &TaskResult<T>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(RunError::Cancelled) => "cancelled",
        Err(_) => "failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn first_result_wins() {
        let task = Task::from_fn(|| Ok(1));
        task.resolve(2);
        task.resolve(3);
        task.reject(RunError::Timeout);
        assert_eq!(task.result(), Some(Ok(2)));
        assert_eq!(task.state(), State::Finished);
    }

    #[test]
    fn completions_fire_once_in_order() {
        let task: Task<u8> = Task::from_fn(|| Ok(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            task.add_completion(move || order.lock().unwrap().push(i));
        }
        task.resolve(9);
        task.resolve(10);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn late_completion_fires_immediately() {
        let task = Task::value(1);
        task.reject(RunError::Timeout);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        task.add_completion(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn preset_value_is_kept_when_finished_otherwise() {
        let task = Task::value(5);
        task.reject(RunError::Timeout);
        assert_eq!(task.result(), Some(Ok(5)));
    }

    #[test]
    fn cancel_sets_token_and_result() {
        let task: Task<()> = Task::from_fn(|| Ok(()));
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(task.error(), Some(RunError::Cancelled));
    }

    #[test]
    fn cancel_of_finished_task_keeps_result_but_marks_token() {
        let task = Task::from_fn(|| Ok(1));
        task.resolve(1);
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(task.result(), Some(Ok(1)));
    }

    #[test]
    fn late_cancelled_rejection_marks_token() {
        let task = Task::from_fn(|| Ok(1));
        task.resolve(1);
        task.reject(RunError::Cancelled);
        assert!(task.is_cancelled());
        assert_eq!(task.result(), Some(Ok(1)));
    }

    #[test]
    fn cancel_after_finish_does_not_reach_dependencies() {
        let dep: Task<u8> = Task::from_fn(|| Ok(1));
        let task: Task<u8> = Task::from_fn(|| Ok(2));
        task.add_dependency(&dep);
        task.resolve(2);
        task.cancel();
        assert!(task.is_cancelled());
        assert!(!dep.is_cancelled());
        assert_eq!(dep.state(), State::Initial);
    }

    #[test]
    fn cancel_reaches_dependencies() {
        let dep: Task<u8> = Task::from_fn(|| Ok(1));
        let task: Task<u8> = Task::from_fn(|| Ok(2));
        task.add_dependency(&dep);
        task.cancel();
        assert!(dep.is_cancelled());
        assert_eq!(dep.error(), Some(RunError::Cancelled));
    }

    #[test]
    fn success_moves_progress_to_one() {
        let task = Task::from_fn(|| Ok(()));
        task.resolve(());
        assert_eq!(task.progress().value(), 1.0);
    }

    #[test]
    fn failure_leaves_progress() {
        let task: Task<()> = Task::from_fn(|| Ok(()));
        task.progress().update(0.3);
        task.reject(RunError::custom("boom"));
        assert_eq!(task.progress().value(), 0.3);
    }

    #[test]
    fn snapshot_reports_error_and_state() {
        let task: Task<()> = Task::failed(RunError::custom("boom"));
        let snap = task.snapshot();
        assert_eq!(snap.state, State::Initial);
        assert_eq!(snap.error.as_deref(), Some("boom"));
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["state"], "initial");
    }
}
