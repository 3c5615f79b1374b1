//! Per-key preemption: the latest request wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{AbortOnDrop, Release, Slot, Table, join_error, lock, record};
use crate::error::{RunError, TaskResult};

/// Starting a unit cancels the in-flight unit under the same key, so only
/// the most recent request can complete; preempted callers get
/// [`RunError::Cancelled`].
#[derive(Clone)]
pub struct ExclusiveRunner {
    units: Table<Unit>,
}

struct Unit {
    token: CancellationToken,
    abort: AbortHandle,
}

impl ExclusiveRunner {
    pub fn new() -> Self {
        Self {
            units: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Cancel whatever runs under `key`, then run `body`. Dropping the
    /// returned future cancels this unit.
    pub async fn run<R, F, Fut>(&self, key: &str, body: F) -> TaskResult<R>
    where
        R: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = TaskResult<R>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let unit = body(token.clone());
        let handle = {
            let mut units = lock(&self.units);
            match units.remove(key) {
                Some(previous) => {
                    record("exclusive", "preempted");
                    debug!(key, unit = %previous.id, "preempting in-flight unit");
                    previous.value.token.cancel();
                    previous.value.abort.abort();
                }
                None => record("exclusive", "started"),
            }

            let release = Release {
                table: Arc::clone(&self.units),
                key: key.to_owned(),
                id,
            };
            let handle = tokio::spawn(async move {
                let _release = release;
                unit.await
            });
            units.insert(
                key.to_owned(),
                Slot {
                    id,
                    value: Unit {
                        token: token.clone(),
                        abort: handle.abort_handle(),
                    },
                },
            );
            handle
        };

        let _abort = AbortOnDrop(handle.abort_handle());
        let result = handle.await.unwrap_or_else(|e| Err(join_error(e)));
        if token.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        result
    }

    /// Number of keys with a unit in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.units).len()
    }
}

impl Default for ExclusiveRunner {
    fn default() -> Self {
        Self::new()
    }
}
