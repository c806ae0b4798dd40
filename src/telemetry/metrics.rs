//! Metric instrument factories for the assessment queue.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"vivavoce"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for vivavoce instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("vivavoce")
}

/// Counter: submissions accepted into the queue.
pub fn items_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("viva.queue.enqueued")
        .with_description("Queue items accepted for assessment")
        .build()
}

/// Counter: items claimed by a worker.
pub fn items_claimed() -> Counter<u64> {
    meter()
        .u64_counter("viva.queue.claimed")
        .with_description("Queue items claimed for processing")
        .build()
}

/// Counter: queue item status transitions.
/// Labels: `from`, `to`.
pub fn status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("viva.queue.status_transitions")
        .with_description("Queue item status transitions")
        .build()
}

/// Counter: scorer calls retried inside a single attempt.
/// Labels: `class` (failure classification).
pub fn scoring_retries() -> Counter<u64> {
    meter()
        .u64_counter("viva.scoring.retries")
        .with_description("Scorer calls retried within an attempt")
        .build()
}

/// Histogram: wall time of one scoring attempt, retries included.
/// Labels: `outcome` ("ok" or a failure classification).
pub fn scoring_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("viva.scoring.duration_ms")
        .with_description("Scoring attempt duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: stuck processing items returned to pending by the monitor.
pub fn stuck_resets() -> Counter<u64> {
    meter()
        .u64_counter("viva.monitor.stuck_resets")
        .with_description("Stuck processing items returned to pending")
        .build()
}

/// Counter: health alerts raised.
/// Labels: `severity`.
pub fn alerts_raised() -> Counter<u64> {
    meter()
        .u64_counter("viva.monitor.alerts")
        .with_description("Health alerts raised")
        .build()
}
