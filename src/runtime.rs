//! The engine-owned tokio runtime.
//!
//! Queues, the progress delivery context and task watchdogs all run here, so
//! the callback-style API can be driven from code that is not async.

use std::sync::LazyLock;

use tokio::runtime::{Builder, Handle, Runtime};

static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    let config = crate::config::get();
    let mut builder = Builder::new_multi_thread();
    builder.thread_name("work-engine").enable_all();
    if let Some(threads) = config.runtime_threads {
        builder.worker_threads(threads);
    }
    tracing::debug!(threads = ?config.runtime_threads, "starting engine runtime");
    builder
        .build()
        .expect("failed to build the work-engine runtime")
});

pub(crate) fn handle() -> &'static Handle {
    RUNTIME.handle()
}
