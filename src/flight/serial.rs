//! Per-key FIFO execution.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{AbortOnDrop, join_error, record};
use crate::error::{RunError, TaskResult};

/// Runs same-key units strictly one at a time, in arrival order. Units under
/// different keys run concurrently.
#[derive(Clone)]
pub struct SerialRunner {
    lanes: Arc<Mutex<HashMap<String, Lane>>>,
    default_key: String,
}

struct Lane {
    /// Fair (FIFO) lock: holding it is the lane's turn.
    gate: Arc<tokio::sync::Mutex<()>>,
    /// Callers that hold or wait for the gate.
    waiters: usize,
    current: Option<Running>,
}

struct Running {
    id: Uuid,
    token: CancellationToken,
    abort: AbortHandle,
}

/// A caller's place in a lane. Dropping it leaves the lane and removes the
/// lane once nobody is left.
struct Ticket {
    lanes: Arc<Mutex<HashMap<String, Lane>>>,
    key: String,
    id: Uuid,
}

impl SerialRunner {
    pub fn new() -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            default_key: Uuid::new_v4().to_string(),
        }
    }

    fn lanes(&self) -> MutexGuard<'_, HashMap<String, Lane>> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for every earlier `key` unit to finish, then run `body` and
    /// return its result. Dropping the returned future cancels the unit; the
    /// next `key` unit still waits until the cancelled one has stopped.
    pub async fn run<R, F, Fut>(&self, key: &str, body: F) -> TaskResult<R>
    where
        R: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = TaskResult<R>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let gate = {
            let mut lanes = self.lanes();
            let lane = lanes.entry(key.to_owned()).or_insert_with(|| Lane {
                gate: Arc::new(tokio::sync::Mutex::new(())),
                waiters: 0,
                current: None,
            });
            lane.waiters += 1;
            Arc::clone(&lane.gate)
        };
        let ticket = Ticket {
            lanes: Arc::clone(&self.lanes),
            key: key.to_owned(),
            id,
        };

        let turn = match Arc::clone(&gate).try_lock_owned() {
            Ok(turn) => {
                record("serial", "started");
                turn
            }
            Err(_) => {
                record("serial", "queued");
                debug!(key, unit = %id, "waiting for serial lane");
                gate.lock_owned().await
            }
        };

        let token = CancellationToken::new();
        let unit = body(token.clone());
        // The lane's turn is released by the unit itself, not by the caller.
        let handle = {
            let mut lanes = self.lanes();
            let handle = tokio::spawn(async move {
                let _turn = turn;
                let _ticket = ticket;
                unit.await
            });
            if let Some(lane) = lanes.get_mut(key) {
                lane.current = Some(Running {
                    id,
                    token: token.clone(),
                    abort: handle.abort_handle(),
                });
            }
            handle
        };
        let _abort = AbortOnDrop(handle.abort_handle());

        let result = handle.await.unwrap_or_else(|e| Err(join_error(e)));
        if token.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        result
    }

    /// [`SerialRunner::run`] on this runner's default key.
    pub async fn run_default<R, F, Fut>(&self, body: F) -> TaskResult<R>
    where
        R: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = TaskResult<R>> + Send + 'static,
    {
        self.run(&self.default_key, body).await
    }

    /// Cancel the unit currently running under `key`. Waiting units are not
    /// affected. Returns whether a unit was cancelled.
    pub fn cancel(&self, key: &str) -> bool {
        let lanes = self.lanes();
        let Some(running) = lanes.get(key).and_then(|lane| lane.current.as_ref()) else {
            return false;
        };
        debug!(key, unit = %running.id, "cancelling serial unit");
        running.token.cancel();
        running.abort.abort();
        true
    }
}

impl Default for SerialRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        let Some(lane) = lanes.get_mut(&self.key) else {
            return;
        };
        if lane.current.as_ref().is_some_and(|running| running.id == self.id) {
            lane.current = None;
        }
        lane.waiters -= 1;
        if lane.waiters == 0 {
            lanes.remove(&self.key);
        }
    }
}
