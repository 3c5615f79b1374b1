//! Run many tasks as one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{RunError, TaskResult};
use crate::progress::{Progress, SubWeight};
use crate::queue::TaskQueue;
use crate::task::{AnyTask, AsyncBlock, Output, Task};
use crate::{config, runtime};

/// Outcome of a group: every member error, in member order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupReport {
    pub errors: Vec<RunError>,
}

impl GroupReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn first_error(&self) -> Option<&RunError> {
        self.errors.first()
    }

    /// `Ok` if no member failed, otherwise the first member error.
    pub fn into_result(self) -> TaskResult<()> {
        match self.errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A task that runs `members` on the shared queue, at most
/// `group_concurrency` (from config) at once, and resolves once all have
/// finished. It never fails on its own account: member failures are
/// reported in the [`GroupReport`]. Its progress is the mean of the members'
/// absolute progress. Cancelling the group cancels every member.
pub fn group<I>(members: I) -> Task<GroupReport>
where
    I: IntoIterator,
    I::Item: Into<AnyTask>,
{
    group_with_limit(members, config::get().group_concurrency)
}

/// [`group`] with an explicit bound on members in flight.
pub fn group_with_limit<I>(members: I, max_concurrent: usize) -> Task<GroupReport>
where
    I: IntoIterator,
    I::Item: Into<AnyTask>,
{
    let members: Vec<AnyTask> = members.into_iter().map(Into::into).collect();
    let progress = Progress::new();
    track_mean(&progress, &members);

    let linked = members.clone();
    let limit = max_concurrent.max(1);
    let task = Task::with_progress(
        AsyncBlock(move |group: Task<GroupReport>| {
            drive(group, members, limit);
            Ok(())
        }),
        progress,
    );
    for member in linked {
        task.link_cancellation(member);
    }
    task
}

/// [`group`] that fails with the first member error.
pub fn group_void<I>(members: I) -> Task<()>
where
    I: IntoIterator,
    I::Item: Into<AnyTask>,
{
    group(members).convert(GroupReport::into_result)
}

/// Run two tasks together and combine their values.
pub fn join<A, B, R, F>(a: &Task<A>, b: &Task<B>, combine: F) -> Task<R>
where
    A: Output,
    B: Output,
    R: Output,
    F: FnOnce(A, B) -> TaskResult<R> + Send + 'static,
{
    let (ta, tb) = (a.clone(), b.clone());
    group_void([AnyTask::from(a), AnyTask::from(b)])
        .convert(move |()| combine(ta.finished_value()?, tb.finished_value()?))
}

/// Three-way [`join`].
pub fn join3<A, B, C, R, F>(a: &Task<A>, b: &Task<B>, c: &Task<C>, combine: F) -> Task<R>
where
    A: Output,
    B: Output,
    C: Output,
    R: Output,
    F: FnOnce(A, B, C) -> TaskResult<R> + Send + 'static,
{
    let (ta, tb, tc) = (a.clone(), b.clone(), c.clone());
    group_void([AnyTask::from(a), AnyTask::from(b), AnyTask::from(c)]).convert(move |()| {
        combine(
            ta.finished_value()?,
            tb.finished_value()?,
            tc.finished_value()?,
        )
    })
}

impl<T: Output> Task<T> {
    /// Run `others` alongside this task once it has succeeded; the result
    /// is this task's value, or the first failure.
    pub fn with<I>(&self, weight: SubWeight, others: I) -> Task<T>
    where
        I: IntoIterator,
        I::Item: Into<AnyTask>,
    {
        let others: Vec<AnyTask> = others.into_iter().map(Into::into).collect();
        self.chain(weight, move |value| {
            Ok(group_void(others).map(move |()| value))
        })
    }
}

fn track_mean(progress: &Progress, members: &[AnyTask]) {
    if members.is_empty() {
        return;
    }
    let slots = Arc::new(Mutex::new(vec![0.0_f64; members.len()]));
    for (index, member) in members.iter().enumerate() {
        let slots = Arc::clone(&slots);
        let group_progress = progress.clone();
        member.progress().add_observer(Arc::new(move |changed: &Progress| {
            let mean = {
                let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
                slots[index] = changed.absolute_value();
                slots.iter().sum::<f64>() / slots.len() as f64
            };
            group_progress.update(mean);
        }));
    }
}

fn drive(group: Task<GroupReport>, members: Vec<AnyTask>, limit: usize) {
    if members.is_empty() {
        group.resolve(GroupReport::default());
        return;
    }

    debug!(group_id = %group.id(), members = members.len(), limit, "starting group");
    let remaining = Arc::new(AtomicUsize::new(members.len()));
    let all = Arc::new(members.clone());
    let permits = Arc::new(Semaphore::new(limit));

    runtime::handle().spawn(async move {
        for member in members {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                return;
            };
            let group = group.clone();
            let remaining = Arc::clone(&remaining);
            let all = Arc::clone(&all);
            member.add_completion(move || {
                drop(permit);
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let errors = all.iter().filter_map(AnyTask::error).collect();
                    group.resolve(GroupReport { errors });
                }
            });
            TaskQueue::shared().add(member);
        }
    });
}
