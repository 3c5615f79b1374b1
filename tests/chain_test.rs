//! Integration tests for sequencing combinators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use work_engine::{RunError, State, SubWeight, Task};

async fn wait_for_state<T: work_engine::Output>(task: &Task<T>, state: State) {
    while task.state() != state {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn chain_passes_value_to_next_step() {
    let task = Task::from_fn(|| Ok(2))
        .chain(SubWeight::default(), |v| Ok(Task::from_fn(move || Ok(v * 10))))
        .chain(SubWeight::default(), |v| Ok(Task::value(format!("{v}!"))));
    assert_eq!(task.run().wait().await, Ok("20!".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_short_circuits_chain() {
    let called = Arc::new(AtomicBool::new(false));
    let c = Arc::clone(&called);
    let task = Task::<u8>::failed(RunError::custom("first failed")).chain(
        SubWeight::default(),
        move |v| {
            c.store(true, Ordering::SeqCst);
            Ok(Task::value(v))
        },
    );

    assert_eq!(task.run().wait().await, Err(RunError::custom("first failed")));
    assert!(!called.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn body_error_fails_wrapper() {
    let task: Task<u8> = Task::value(1).chain(SubWeight::default(), |_| Err(RunError::Timeout));
    assert_eq!(task.run().wait().await, Err(RunError::Timeout));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_tail_cancels_whole_chain() {
    let later = Arc::new(AtomicUsize::new(0));
    let first: Task<u32> = Task::from_fn_with(|task: &Task<u32>| {
        while !task.is_cancelled() {
            std::thread::sleep(Duration::from_millis(2));
        }
        Err(RunError::Cancelled)
    });
    let l = Arc::clone(&later);
    let second = first.chain(SubWeight::default(), move |v| {
        l.fetch_add(1, Ordering::SeqCst);
        Ok(Task::value(v))
    });
    let l = Arc::clone(&later);
    let third = second.chain(SubWeight::default(), move |v| {
        l.fetch_add(1, Ordering::SeqCst);
        Ok(Task::value(v))
    });

    third.run();
    wait_for_state(&first, State::Executing).await;
    third.cancel();

    assert_eq!(third.wait().await, Err(RunError::Cancelled));
    assert_eq!(second.wait().await, Err(RunError::Cancelled));
    assert_eq!(first.wait().await, Err(RunError::Cancelled));
    assert_eq!(later.load(Ordering::SeqCst), 0);
    assert!(first.is_cancelled() && second.is_cancelled() && third.is_cancelled());
}

#[tokio::test(flavor = "multi_thread")]
async fn finishing_wrapper_cancels_inner_task() {
    let inner_slot: Arc<Mutex<Option<Task<()>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&inner_slot);
    let wrapper = Task::value(()).chain(SubWeight::default(), move |()| {
        let inner: Task<()> = Task::from_future(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        *slot.lock().unwrap() = Some(inner.clone());
        Ok(inner)
    });
    wrapper.run();

    let inner = loop {
        if let Some(inner) = inner_slot.lock().unwrap().clone() {
            break inner;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    };
    wrapper.cancel();

    assert_eq!(wrapper.wait().await, Err(RunError::Cancelled));
    assert_eq!(inner.wait().await, Err(RunError::Cancelled));
}

#[tokio::test(flavor = "multi_thread")]
async fn seize_recovers_from_failure() {
    let task = Task::<u8>::failed(RunError::custom("broken"))
        .seize(|e| {
            assert_eq!(e, RunError::custom("broken"));
            Ok(Task::value(42))
        });
    assert_eq!(task.run().wait().await, Ok(42));
}

#[tokio::test(flavor = "multi_thread")]
async fn seize_passes_success_through() {
    let called = Arc::new(AtomicBool::new(false));
    let c = Arc::clone(&called);
    let task = Task::value(5).seize(move |_| {
        c.store(true, Ordering::SeqCst);
        Ok(Task::value(0))
    });
    assert_eq!(task.run().wait().await, Ok(5));
    assert!(!called.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn convert_map_then_and_discard() {
    let converted = Task::value(3).convert(|v| Ok(v + 1));
    assert_eq!(converted.run().wait().await, Ok(4));

    let rejected: Task<u8> = Task::value(3u8).convert(|_| Err(RunError::custom("bad value")));
    assert_eq!(rejected.run().wait().await, Err(RunError::custom("bad value")));

    let mapped = Task::value("abc").map(str::len);
    assert_eq!(mapped.run().wait().await, Ok(3));

    let ran = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&ran);
    let unit = Task::value(1).then(SubWeight::default(), move |v| {
        r.store(true, Ordering::SeqCst);
        Ok(Task::value(v * 2))
    });
    assert_eq!(unit.run().wait().await, Ok(()));
    assert!(ran.load(Ordering::SeqCst));

    assert_eq!(Task::value(9).discard().run().wait().await, Ok(()));
}

#[tokio::test(flavor = "multi_thread")]
async fn chain_or_cancel_cancels_on_none() {
    let declined: Task<u8> = Task::value(1).chain_or_cancel(SubWeight::default(), |_| Ok(None));
    assert_eq!(declined.run().wait().await, Err(RunError::Cancelled));

    let accepted = Task::value(1).chain_or_cancel(SubWeight::default(), |v| Ok(Some(Task::value(v + 1))));
    assert_eq!(accepted.run().wait().await, Ok(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn observers_do_not_alter_result() {
    let successes = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));
    let always = Arc::new(AtomicUsize::new(0));

    let (s, f, a) = (Arc::clone(&successes), Arc::clone(&failures), Arc::clone(&always));
    let ok = Task::value(1)
        .success(move |v| {
            assert_eq!(*v, 1);
            s.fetch_add(1, Ordering::SeqCst);
        })
        .fail(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .always(move |result| {
            assert!(result.is_ok());
            a.fetch_add(1, Ordering::SeqCst);
        });
    assert_eq!(ok.run().wait().await, Ok(1));

    let f = Arc::clone(&failures);
    let bad: Task<u8> = Task::failed(RunError::Timeout).fail(move |e| {
        assert_eq!(*e, RunError::Timeout);
        f.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(bad.run().wait().await, Err(RunError::Timeout));

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(always.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn detached_cancel_leaves_source_running() {
    let source = Task::from_future(async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(7)
    });
    let detached = source.with_detached_cancel();
    source.run();
    detached.run();
    detached.cancel();

    assert_eq!(detached.wait().await, Err(RunError::Cancelled));
    assert_eq!(source.wait().await, Ok(7));
    assert!(!source.is_cancelled());
}

#[tokio::test(flavor = "multi_thread")]
async fn detached_task_mirrors_source_result() {
    let source: Task<u8> = Task::failed(RunError::custom("source failed"));
    let detached = source.with_detached_cancel().run();
    source.run();
    assert_eq!(detached.wait().await, Err(RunError::custom("source failed")));
}
