//! Composition of tasks.
//!
//! Sequencing (`chain`, `seize`, `convert`, `then`, ...) and singleton
//! registration are methods on [`Task`](crate::task::Task); grouping is
//! provided by the free functions re-exported here.

mod chain;
mod group;
mod singleton;

pub use group::{GroupReport, group, group_void, group_with_limit, join, join3};
