//! Integration tests for progress reporting through compositions.

use std::sync::{Arc, Mutex};

use work_engine::{Progress, SubWeight, Task, delivery, group};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn observed() -> (Arc<Mutex<Vec<f64>>>, impl Fn(f64) + Send + Sync + 'static) {
    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&values);
    (values, move |v| sink.lock().unwrap().push(v))
}

#[tokio::test(flavor = "multi_thread")]
async fn weighted_chain_reports_monotonic_progress() {
    let (values, observer) = observed();
    let head = Task::from_fn(|| Ok(1));
    let tail = head.chain(SubWeight::Weight(0.4), |v| Ok(Task::from_fn(move || Ok(v + 1))));

    assert!(approx(head.progress().weight(), 0.6));
    assert!(approx(tail.progress().start(), 0.6));

    assert_eq!(tail.run_with_progress(observer).wait().await, Ok(2));
    delivery::flush().await;

    let values = values.lock().unwrap();
    assert!(!values.is_empty());
    assert!(values.iter().any(|v| approx(*v, 0.6)));
    assert!(values.windows(2).all(|w| w[0] <= w[1] + 1e-9));
    assert!(approx(*values.last().unwrap(), 1.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn inner_task_progress_maps_into_wrapper_range() {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let head = Task::from_fn(|| Ok(()));
    let tail = head.chain(SubWeight::Weight(0.5), move |()| {
        Ok(Task::from_fn_with(move |task: &Task<()>| {
            task.progress().update(0.5);
            *sink.lock().unwrap() = Some(task.progress().absolute_value());
            Ok(())
        }))
    });

    tail.run().wait().await.unwrap();
    let seen = seen.lock().unwrap().unwrap();
    assert!(approx(seen, 0.75), "{seen}");
    assert!(approx(tail.progress().absolute_value(), 1.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn group_progress_is_mean_of_members() {
    let members: Vec<Task<()>> = (0..4).map(|_| Task::from_fn(|| Ok(()))).collect();
    let (values, observer) = observed();
    group(&members).run_with_progress(observer).wait().await.unwrap();
    delivery::flush().await;

    let values = values.lock().unwrap();
    assert!(values.windows(2).all(|w| w[0] <= w[1] + 1e-9));
    assert!(approx(*values.last().unwrap(), 1.0));
}

#[test]
fn group_progress_tracks_member_updates() {
    let members: Vec<Task<()>> = (0..4).map(|_| Task::from_fn(|| Ok(()))).collect();
    let grouped = group(&members);
    members[0].progress().update(1.0);
    members[1].progress().update(0.5);

    let expected = (1.0 + 0.5) / 4.0;
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !approx(grouped.progress().value(), expected) {
        assert!(std::time::Instant::now() < deadline, "group progress never reached {expected}");
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn observers_get_one_delivery_per_change() {
    let progress = Progress::new();
    let (values, observer) = observed();
    progress.observe(observer);

    for i in 1..=10 {
        progress.update(i as f64 / 10.0);
    }
    progress.update(1.0);
    delivery::flush().await;

    let values = values.lock().unwrap();
    assert_eq!(values.len(), 10);
    assert!(approx(values[9], 1.0));
}
