//! Per-key request de-duplication.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{Release, Slot, Table, join_error, lock, record};
use crate::error::{RunError, TaskResult};
use crate::task::Output;

/// Process-wide runners, one per result type.
static SHARED: LazyLock<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Overlapping same-key requests share one execution and all observe its
/// result. A request arriving after the unit finished starts a new one.
pub struct SingleFlightRunner<T> {
    flights: Table<Flight<T>>,
}

struct Flight<T> {
    result: Shared<BoxFuture<'static, TaskResult<T>>>,
    token: CancellationToken,
    abort: AbortHandle,
}

impl<T: Output> SingleFlightRunner<T> {
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The process-wide runner for result type `T`. Every call returns a
    /// handle onto the same key table.
    pub fn shared() -> Self {
        let mut runners = SHARED.lock().unwrap_or_else(|e| e.into_inner());
        let entry = runners
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Self::new()));
        match entry.downcast_ref::<Self>() {
            Some(runner) => runner.clone(),
            None => Self::new(),
        }
    }

    /// Join the in-flight `key` unit, or start `body` as the new one.
    /// `body` is not called when joining. Dropping the returned future only
    /// stops waiting; the unit keeps running for the other callers.
    pub async fn run<F, Fut>(&self, key: &str, body: F) -> TaskResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        let result = {
            let mut flights = lock(&self.flights);
            match flights.get(key) {
                Some(slot) => {
                    record("single_flight", "joined");
                    debug!(key, unit = %slot.id, "joining in-flight unit");
                    slot.value.result.clone()
                }
                None => {
                    record("single_flight", "started");
                    let id = Uuid::new_v4();
                    let token = CancellationToken::new();
                    let release = Release {
                        table: Arc::clone(&self.flights),
                        key: key.to_owned(),
                        id,
                    };
                    let unit_token = token.clone();
                    // The body is first called on the spawned unit, outside
                    // the table lock.
                    let handle = tokio::spawn(async move {
                        let _release = release;
                        body(unit_token).await
                    });
                    let abort = handle.abort_handle();
                    let cancelled = token.clone();
                    let result = async move {
                        let result = handle.await.unwrap_or_else(|e| Err(join_error(e)));
                        if cancelled.is_cancelled() {
                            return Err(RunError::Cancelled);
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    flights.insert(
                        key.to_owned(),
                        Slot {
                            id,
                            value: Flight {
                                result: result.clone(),
                                token,
                                abort,
                            },
                        },
                    );
                    result
                }
            }
        };
        result.await
    }

    /// Cancel and forget the in-flight `key` unit. Its waiters observe
    /// `Cancelled`. Returns whether a unit was cancelled.
    pub fn cancel(&self, key: &str) -> bool {
        let Some(slot) = lock(&self.flights).remove(key) else {
            return false;
        };
        debug!(key, unit = %slot.id, "cancelling single-flight unit");
        slot.value.token.cancel();
        slot.value.abort.abort();
        true
    }

    /// Number of keys with a unit in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.flights).len()
    }
}

impl<T: Output> Default for SingleFlightRunner<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SingleFlightRunner<T> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
        }
    }
}
