//! Keyed coordinators for async callers.
//!
//! Each coordinator keeps a `key -> in-flight unit` table behind one lock.
//! A unit is the caller's future, spawned on the caller's runtime together
//! with a `CancellationToken` it may observe. Table entries are removed
//! however the unit ends: success, failure, cancellation or panic.
//!
//! - [`SerialRunner`]: same-key units run one at a time, in arrival order.
//! - [`SingleFlightRunner`]: overlapping same-key requests share one unit.
//! - [`ExclusiveRunner`]: a new request cancels the in-flight same-key unit.

mod exclusive;
mod serial;
mod single;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use opentelemetry::KeyValue;
use tokio::task::{AbortHandle, JoinError};
use uuid::Uuid;

use crate::error::RunError;
use crate::telemetry::metrics;

pub use exclusive::ExclusiveRunner;
pub use serial::SerialRunner;
pub use single::SingleFlightRunner;

/// Table entry tagged with the id of the unit that owns it.
struct Slot<V> {
    id: Uuid,
    value: V,
}

type Table<V> = Arc<Mutex<HashMap<String, Slot<V>>>>;

fn lock<V>(table: &Mutex<HashMap<String, Slot<V>>>) -> MutexGuard<'_, HashMap<String, Slot<V>>> {
    table.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes `key` from the table on drop, unless another unit has taken the
/// slot over in the meantime.
struct Release<V> {
    table: Table<V>,
    key: String,
    id: Uuid,
}

impl<V> Drop for Release<V> {
    fn drop(&mut self) {
        let mut table = lock(&self.table);
        if table.get(&self.key).is_some_and(|slot| slot.id == self.id) {
            table.remove(&self.key);
        }
    }
}

/// Aborts a spawned unit when the caller stops waiting for it.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn join_error(err: JoinError) -> RunError {
    if err.is_cancelled() {
        RunError::Cancelled
    } else {
        tracing::error!("coordinated unit panicked: {err}");
        RunError::custom(format!("unit panicked: {err}"))
    }
}

fn record(runner: &'static str, outcome: &'static str) {
    metrics::coordinator_requests().add(
        1,
        &[
            KeyValue::new("runner", runner),
            KeyValue::new("outcome", outcome),
        ],
    );
}
