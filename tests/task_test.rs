//! Integration tests for the task lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use work_engine::{Execute, RunError, State, Task, TaskResult, delivery};

#[tokio::test(flavor = "multi_thread")]
async fn sync_body_resolves() {
    let task = Task::from_fn(|| Ok(21 * 2)).run();
    assert_eq!(task.wait().await, Ok(42));
    assert_eq!(task.state(), State::Finished);
    assert_eq!(task.progress().value(), 1.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn future_body_resolves() {
    let task = Task::from_future(async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok("done".to_string())
    })
    .run();
    assert_eq!(task.wait().await, Ok("done".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn async_body_resolves_later() {
    let task = Task::from_async(|task: Task<u32>| {
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            task.resolve(7);
        });
        Ok(())
    })
    .run();
    assert_eq!(task.wait().await, Ok(7));
}

#[tokio::test(flavor = "multi_thread")]
async fn async_body_error_rejects() {
    let task: Task<u32> = Task::from_async(|_| Err(RunError::Timeout)).run();
    assert_eq!(task.wait().await, Err(RunError::Timeout));
}

#[tokio::test(flavor = "multi_thread")]
async fn preset_results_finish_on_run() {
    let ok = Task::value(3).run();
    let failed: Task<u8> = Task::failed(RunError::custom("nope")).run();
    assert_eq!(ok.wait().await, Ok(3));
    assert_eq!(failed.wait().await, Err(RunError::custom("nope")));
    assert_eq!(failed.state(), State::Finished);
}

#[test]
fn concurrent_resolution_is_exactly_once() {
    let task: Task<usize> = Task::from_fn(|| Ok(0));
    let completions = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&completions);
    task.add_completion(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });

    let barrier = Arc::new(Barrier::new(16));
    let threads: Vec<_> = (0..16)
        .map(|i| {
            let task = task.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                if i % 2 == 0 {
                    task.resolve(i);
                } else {
                    task.reject(RunError::custom(format!("loser {i}")));
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(completions.load(Ordering::SeqCst), 1);
    let first = task.result().unwrap();
    for _ in 0..3 {
        task.resolve(99);
        assert_eq!(task.result().unwrap(), first);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_before_run_skips_body() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let task = Task::from_fn(move || {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    task.cancel();
    task.run();

    assert_eq!(task.wait().await, Err(RunError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(task.is_cancelled());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_drops_running_future() {
    let task: Task<()> = Task::from_future(async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    })
    .run();

    while task.state() != State::Executing {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    task.cancel();
    assert_eq!(task.wait().await, Err(RunError::Cancelled));
}

#[tokio::test(flavor = "multi_thread")]
async fn body_can_poll_cancellation() {
    let task: Task<()> = Task::from_fn_with(|task: &Task<()>| {
        while !task.is_cancelled() {
            std::thread::sleep(Duration::from_millis(2));
        }
        Err(RunError::Cancelled)
    })
    .run();

    while task.state() != State::Executing {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    task.cancel();
    assert_eq!(task.wait().await, Err(RunError::Cancelled));
}

struct Doubler(u64);

impl Execute<u64> for Doubler {
    fn execute_sync(&mut self, _task: &Task<u64>) -> TaskResult<u64> {
        Ok(self.0 * 2)
    }
}

struct Deferred;

impl Execute<u64> for Deferred {
    fn execute(self: Box<Self>, task: Task<u64>) {
        task.resolve(11);
    }
}

struct Empty;

impl Execute<u64> for Empty {}

#[tokio::test(flavor = "multi_thread")]
async fn custom_bodies_pick_execution_path() {
    assert_eq!(Task::new(Doubler(4)).run().wait().await, Ok(8));
    assert_eq!(Task::new(Deferred).run().wait().await, Ok(11));
    assert_eq!(
        Task::new(Empty).run().wait().await,
        Err(RunError::NotImplemented)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_body_fails_task() {
    let task: Task<()> = Task::from_fn(|| panic!("boom")).run();
    match task.wait().await {
        Err(RunError::Custom(message)) => assert!(message.contains("panicked")),
        other => panic!("expected panic error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn run_then_delivers_result() {
    let seen = Arc::new(Mutex::new(None));
    let s = Arc::clone(&seen);
    let task = Task::from_fn(|| Ok(5)).run_then(move |result| {
        *s.lock().unwrap() = Some(result);
    });
    task.wait().await.unwrap();
    delivery::flush().await;
    assert_eq!(*seen.lock().unwrap(), Some(Ok(5)));
}

#[tokio::test(flavor = "multi_thread")]
async fn completion_after_finish_fires_immediately() {
    let task = Task::from_fn(|| Ok(1)).run();
    task.wait().await.unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    task.add_completion(move || {
        f.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_tracks_lifecycle() {
    let task = Task::from_fn(|| Ok(())).run();
    task.wait().await.unwrap();

    let snap = task.snapshot();
    assert_eq!(snap.state, State::Finished);
    assert_eq!(snap.queue.as_deref(), Some("shared"));
    assert!(snap.started_at.is_some());
    assert!(snap.finished_at.is_some());
    assert!(snap.error.is_none());
    assert_eq!(snap.progress, 1.0);
}
