//! # work-engine
//!
//! Cancellable, progress-tracked units of work with queue scheduling.
//!
//! Build a [`Task`], compose it (`chain`, `seize`, `convert`, [`group`],
//! `singleton`, ...) and submit the head of the composition with
//! [`Task::run`]. Queues start a task only after its dependencies finished;
//! a task resolves exactly once; cancelling a composed task cancels
//! everything it depends on. Progress of chained and grouped tasks is
//! combined into one weighted bar.
//!
//! For async callers, [`flight`] provides keyed coordinators: per-key FIFO
//! ([`SerialRunner`]), per-key de-duplication ([`SingleFlightRunner`]) and
//! per-key preemption ([`ExclusiveRunner`]).

pub mod combinators;
pub mod config;
pub mod delivery;
pub mod error;
pub mod flight;
pub mod progress;
pub mod queue;
mod runtime;
pub mod task;
pub mod telemetry;

pub use combinators::{GroupReport, group, group_void, group_with_limit, join, join3};
pub use error::{Error, Result, RunError, TaskResult};
pub use flight::{ExclusiveRunner, SerialRunner, SingleFlightRunner};
pub use progress::{Progress, SubWeight};
pub use queue::TaskQueue;
pub use task::{AnyTask, Execute, Output, State, Task, TaskId, TaskSnapshot, WeakTask};
