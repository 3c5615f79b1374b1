//! Metric instrument factories for work-engine.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider every instrument is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for work-engine instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("work-engine")
}

/// Counter: tasks reaching `Finished`.
/// Labels: `outcome` ("success" | "failure" | "cancelled").
pub fn tasks_finished() -> Counter<u64> {
    meter()
        .u64_counter("work.task.finished")
        .with_description("Number of tasks that finished")
        .build()
}

/// Histogram: time from `Executing` to `Finished` in milliseconds.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("work.task.duration_ms")
        .with_description("Task execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: tasks flagged by the watchdog.
pub fn watchdog_warnings() -> Counter<u64> {
    meter()
        .u64_counter("work.task.watchdog_warnings")
        .with_description("Tasks still running after the watchdog delay")
        .build()
}

/// Counter: keyed coordinator requests.
/// Labels: `runner` ("serial" | "single_flight" | "exclusive"),
/// `outcome` ("started" | "joined" | "queued" | "preempted").
pub fn coordinator_requests() -> Counter<u64> {
    meter()
        .u64_counter("work.coordinator.requests")
        .with_description("Requests handled by keyed coordinators")
        .build()
}
