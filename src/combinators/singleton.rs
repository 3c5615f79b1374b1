//! Collapse concurrent identical work into one execution.
//!
//! Tasks are registered per category and result type. The first task to
//! reach the queue becomes the canonical one; tasks of the same key that
//! arrive while it is in flight never run their body and finish with its
//! result. The entry is cleared when the canonical task finishes.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, MutexGuard};

use tracing::debug;

use crate::error::RunError;
use crate::task::{Output, Task, TaskId, WeakTask};

struct Entry {
    id: TaskId,
    /// A `WeakTask<T>` for the `T` named in the key.
    task: Box<dyn Any + Send + Sync>,
}

static REGISTRY: LazyLock<Mutex<HashMap<String, Entry>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn registry() -> MutexGuard<'static, HashMap<String, Entry>> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: Output> Task<T> {
    /// Make this task a singleton within `category`. Returns the same task.
    pub fn singleton(&self, category: &str) -> Task<T> {
        let key = format!("{category}/{}", type_name::<T>());
        let owner = self.downgrade();
        let condition: Task<()> = Task::from_async(move |condition| {
            claim(key, owner, condition);
            Ok(())
        });
        self.add_dependency(&condition);
        self.clone()
    }
}

/// Decide whether `owner` runs or follows the in-flight task for `key`.
fn claim<T: Output>(key: String, owner: WeakTask<T>, condition: Task<()>) {
    let Some(owner) = owner.upgrade() else {
        condition.reject(RunError::Cancelled);
        return;
    };

    let mut table = registry();
    let canonical = table
        .get(&key)
        .and_then(|entry| entry.task.downcast_ref::<WeakTask<T>>())
        .and_then(WeakTask::upgrade)
        .filter(|task| task.id() != owner.id() && !task.is_finished());

    match canonical {
        Some(canonical) => {
            drop(table);
            debug!(
                singleton = %key,
                canonical = %canonical.id(),
                follower = %owner.id(),
                "joining in-flight singleton"
            );
            let source = canonical.downgrade();
            canonical.add_completion(move || {
                let Some(canonical) = source.upgrade() else {
                    return;
                };
                let result = canonical.finished_value();
                let gate = result.as_ref().map(|_| ()).map_err(Clone::clone);
                owner.finish(result);
                condition.finish(gate);
            });
        }
        None => {
            let id = owner.id();
            table.insert(
                key.clone(),
                Entry {
                    id,
                    task: Box::new(owner.downgrade()),
                },
            );
            drop(table);
            debug!(singleton = %key, canonical = %id, "registered singleton");
            owner.add_completion(move || {
                let mut table = registry();
                if table.get(&key).is_some_and(|entry| entry.id == id) {
                    table.remove(&key);
                }
            });
            condition.resolve(());
        }
    }
}
