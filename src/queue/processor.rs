//! Per-item execution: resolve the recording, score it with in-attempt
//! retries, then persist the verdict or classify the failure.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{Instrument, error, info, warn};

use crate::db::Db;
use crate::model::{AssessmentResult, QueueItem};
use crate::scorer::{ScoreRequest, Scorer};
use crate::store::{ArtifactStore, SubmissionStore};
use crate::telemetry::metrics;
use crate::telemetry::scoring::{record_outcome, start_item_span};

use super::retry::{self, RetryPolicy};

/// Executes one claimed queue item at a time. Shared by all worker tasks.
pub struct ItemProcessor {
    db: Arc<Db>,
    submissions: Arc<dyn SubmissionStore>,
    artifacts: Arc<dyn ArtifactStore>,
    scorer: Arc<dyn Scorer>,
    retry: RetryPolicy,
    /// Queue-level retry budget per item.
    max_retries: u32,
}

impl ItemProcessor {
    pub fn new(
        db: Arc<Db>,
        submissions: Arc<dyn SubmissionStore>,
        artifacts: Arc<dyn ArtifactStore>,
        scorer: Arc<dyn Scorer>,
        retry: RetryPolicy,
        max_retries: u32,
    ) -> Self {
        Self {
            db,
            submissions,
            artifacts,
            scorer,
            retry,
            max_retries,
        }
    }

    /// Run one already-claimed item to its next status.
    ///
    /// `item` is the pre-claim snapshot; the claim only flipped status and
    /// cleared the error message, so the fields used here are current.
    pub async fn process(&self, item: QueueItem) {
        let span = start_item_span(&item);
        self.execute(item).instrument(span).await;
    }

    async fn execute(&self, item: QueueItem) {
        let audio_ref = match self.submissions.audio_ref(item.submission_id).await {
            Ok(audio_ref) => audio_ref,
            Err(e) => {
                // Claimed, but there is nothing to score. Retrying cannot
                // conjure the recording back, yet the failure path is the
                // same one permanent scorer rejections take.
                self.record_failure(&item, &format!("recording unavailable: {e}"), None)
                    .await;
                return;
            }
        };

        let request = ScoreRequest {
            submission_id: item.submission_id,
            audio_ref,
        };

        let start = Instant::now();
        let outcome = self.score_with_retry(&request).await;
        let elapsed_ms = start.elapsed().as_millis() as f64;

        match outcome {
            Ok(result) => {
                metrics::scoring_duration_ms()
                    .record(elapsed_ms, &[KeyValue::new("outcome", "ok")]);
                self.record_success(&item, &result).await;
            }
            Err(error) => {
                metrics::scoring_duration_ms()
                    .record(elapsed_ms, &[KeyValue::new("outcome", error.class())]);
                self.record_failure(&item, &error.to_string(), Some(&request.audio_ref))
                    .await;
            }
        }
    }

    /// Call the scorer, absorbing transient failures up to the retry cap.
    async fn score_with_retry(
        &self,
        request: &ScoreRequest,
    ) -> std::result::Result<AssessmentResult, crate::scorer::ScoreError> {
        let mut attempt = 0u32;
        loop {
            match self.scorer.score(request).await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !self.retry.should_retry(&error) || attempt >= self.retry.max_retries {
                        return Err(error);
                    }
                    let delay = self.retry.delay_for(&error, attempt);
                    metrics::scoring_retries()
                        .add(1, &[KeyValue::new("class", error.class())]);
                    warn!(
                        submission = %request.submission_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        class = error.class(),
                        "scoring call failed, retrying: {error}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn record_success(&self, item: &QueueItem, result: &AssessmentResult) {
        // Persist the verdict before flipping status: completed must imply
        // a stored result. If the item never gets marked, the monitor
        // resets it and the idempotent save absorbs the re-score.
        if let Err(e) = self.submissions.save_result(item.submission_id, result).await {
            error!(id = %item.id, "failed to persist assessment result: {e}");
            return;
        }

        match self.db.complete_item(item.id).await {
            Ok(_) => {
                record_outcome(&tracing::Span::current(), "completed");
                info!(
                    id = %item.id,
                    submission = %item.submission_id,
                    level = %result.level,
                    multiple_speakers = result.multiple_speakers,
                    "assessment completed"
                );
            }
            Err(e) => error!(id = %item.id, "failed to mark item completed: {e}"),
        }
    }

    async fn record_failure(&self, item: &QueueItem, cause: &str, audio_ref: Option<&str>) {
        let attempts_used = item.retry_count + 1;
        let terminal = attempts_used >= self.max_retries;
        let message = if terminal {
            format!("retries exhausted after {attempts_used} attempts: {cause}")
        } else {
            cause.to_string()
        };

        let failed = match self.db.fail_item(item.id, &message).await {
            Ok(failed) => failed,
            Err(e) => {
                // Usually a lost race with a monitor reset; the next
                // attempt owns the row now.
                error!(id = %item.id, "failed to record failure: {e}");
                return;
            }
        };

        if terminal {
            record_outcome(&tracing::Span::current(), "exhausted");
            warn!(
                id = %item.id,
                submission = %item.submission_id,
                retry_count = failed.retry_count,
                "retries exhausted, giving up: {cause}"
            );
            if let Some(audio_ref) = audio_ref {
                // Best effort: the assessment is already lost either way.
                if let Err(e) = self.artifacts.delete(audio_ref).await {
                    warn!(id = %item.id, "artifact cleanup failed: {e}");
                }
            }
        } else {
            record_outcome(&tracing::Span::current(), "failed");
            let delay = retry::requeue_delay(failed.retry_count);
            warn!(
                id = %item.id,
                retry_count = failed.retry_count,
                requeue_after_secs = delay.as_secs(),
                "attempt failed: {cause}"
            );
        }
    }
}
