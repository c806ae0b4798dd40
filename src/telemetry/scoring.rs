//! Span helpers for queue item processing.

use tracing::Span;

use crate::model::QueueItem;

/// Start a span covering one processing attempt for a queue item.
///
/// The `item.outcome` field is declared empty and filled in via
/// [`record_outcome`] when the attempt resolves.
pub fn start_item_span(item: &QueueItem) -> Span {
    tracing::info_span!(
        "queue.process",
        "item.id" = %item.id,
        "item.submission" = %item.submission_id,
        "item.outcome" = tracing::field::Empty,
    )
}

/// Record how the attempt resolved on its span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("item.outcome", outcome);
    span.in_scope(|| {
        tracing::debug!(outcome, "attempt resolved");
    });
}
