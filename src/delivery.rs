//! Single serial delivery context.
//!
//! Progress observers and `run_then` callbacks are delivered here, one at a
//! time and in submission order, so observers never see interleaved partial
//! updates.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::LazyLock;

use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send>;

static DELIVERY: LazyLock<mpsc::UnboundedSender<Job>> = LazyLock::new(|| {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    crate::runtime::handle().spawn(async move {
        while let Some(job) = rx.recv().await {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!("delivery callback panicked");
            }
        }
    });
    tx
});

/// Queue `job` on the delivery context.
pub(crate) fn dispatch(job: impl FnOnce() + Send + 'static) {
    if DELIVERY.send(Box::new(job)).is_err() {
        tracing::warn!("delivery context is gone, dropping callback");
    }
}

/// Wait until everything dispatched before this call has been delivered.
pub async fn flush() {
    let (tx, rx) = oneshot::channel();
    dispatch(move || {
        let _ = tx.send(());
    });
    let _ = rx.await;
}
