//! End-to-end dispatch tests with scripted scoring services.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use vivavoce::db::Db;
use vivavoce::error::Error;
use vivavoce::model::{
    AssessmentResult, ItemId, ItemStatus, ProficiencyLevel, QueueItem, SubmissionId,
};
use vivavoce::queue::{AssessmentQueue, MonitorConfig, QueueConfig, RetryPolicy};
use vivavoce::scorer::{ScoreError, ScoreRequest, Scorer};
use vivavoce::store::{FsArtifactStore, SqlSubmissionStore, SubmissionStore};

// ---------------------------------------------------------------------------
// Scripted scorers
// ---------------------------------------------------------------------------

fn sample_result() -> AssessmentResult {
    AssessmentResult {
        level: ProficiencyLevel::B2,
        analysis: "Fluent narration, minor hesitations.".to_string(),
        strengths: "Connected discourse.".to_string(),
        improvements: "Article usage.".to_string(),
        justification: "Sustains complex turns without losing the thread.".to_string(),
        multiple_speakers: false,
    }
}

/// Fails the first `fail_first` calls with the scripted error, then
/// succeeds forever.
struct FlakyScorer {
    fail_first: usize,
    error: fn() -> ScoreError,
    calls: AtomicUsize,
}

impl FlakyScorer {
    fn new(fail_first: usize, error: fn() -> ScoreError) -> Self {
        Self {
            fail_first,
            error,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scorer for FlakyScorer {
    async fn score(
        &self,
        _request: &ScoreRequest,
    ) -> Result<AssessmentResult, ScoreError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            Err((self.error)())
        } else {
            Ok(sample_result())
        }
    }
}

/// Tracks how many scorer calls are running at once.
struct GaugeScorer {
    hold: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl GaugeScorer {
    fn new(hold: Duration) -> Self {
        Self {
            hold,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Scorer for GaugeScorer {
    async fn score(
        &self,
        _request: &ScoreRequest,
    ) -> Result<AssessmentResult, ScoreError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(sample_result())
    }
}

/// Records the order submissions reach the scorer.
struct RecordingScorer {
    seen: Mutex<Vec<SubmissionId>>,
}

#[async_trait]
impl Scorer for RecordingScorer {
    async fn score(
        &self,
        request: &ScoreRequest,
    ) -> Result<AssessmentResult, ScoreError> {
        self.seen.lock().await.push(request.submission_id);
        Ok(sample_result())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    queue: AssessmentQueue,
    db: Arc<Db>,
    submissions: Arc<SqlSubmissionStore>,
    dir: TempDir,
}

async fn harness(scorer: Arc<dyn Scorer>, config: QueueConfig) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("queue.db");
    let db = Arc::new(
        Db::connect(path.to_str().expect("utf8 path"))
            .await
            .expect("failed to open test database"),
    );
    let submissions = Arc::new(SqlSubmissionStore::new(&db));
    let artifacts = Arc::new(FsArtifactStore::new(dir.path()));
    let queue = AssessmentQueue::new(
        Arc::clone(&db),
        Arc::clone(&submissions) as Arc<dyn SubmissionStore>,
        artifacts,
        scorer,
        config,
        MonitorConfig::default(),
    );
    Harness {
        queue,
        db,
        submissions,
        dir,
    }
}

/// Poll loop stays quiet for the whole test; dispatch is driven through
/// tick() so assertions are deterministic.
fn fast_config(max_concurrent: usize, max_retries: u32) -> QueueConfig {
    QueueConfig {
        poll_interval: Duration::from_secs(600),
        max_concurrent,
        max_retries,
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10),
            jitter: 0.0,
        },
    }
}

async fn submit(h: &Harness, priority: i32) -> QueueItem {
    let submission = h
        .submissions
        .register("uploads/take.ogg")
        .await
        .expect("register");
    h.queue.enqueue(submission, priority).await.expect("enqueue")
}

async fn wait_for_item(
    db: &Db,
    id: ItemId,
    what: &str,
    pred: impl Fn(&QueueItem) -> bool,
) -> QueueItem {
    for _ in 0..300 {
        let item = db.get_item(id).await.expect("get item");
        if pred(&item) {
            return item;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("item never became {what}");
}

async fn wait_for_status(db: &Db, id: ItemId, status: ItemStatus) -> QueueItem {
    wait_for_item(db, id, status.as_str(), move |item| item.status == status).await
}

/// Keep ticking until the given number of items has completed.
async fn drain(h: &Harness, expect_completed: u64) {
    for _ in 0..300 {
        h.queue.dispatcher().tick().await.expect("tick");
        if h.db.counts().await.expect("counts").completed == expect_completed {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue never drained to {expect_completed} completed items");
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueued_submission_scores_and_completes() {
    let scorer = Arc::new(FlakyScorer::new(0, || ScoreError::Overloaded));
    let h = harness(scorer.clone(), fast_config(2, 5)).await;

    let item = submit(&h, 0).await;
    assert_eq!(item.status, ItemStatus::Pending);

    h.queue.dispatcher().tick().await.unwrap();
    let done = wait_for_status(&h.db, item.id, ItemStatus::Completed).await;
    assert_eq!(done.retry_count, 0);
    assert!(done.error_message.is_none());
    assert_eq!(scorer.calls(), 1);

    let result = h.submissions.result(item.submission_id).await.unwrap();
    assert_eq!(result.expect("result stored").level, ProficiencyLevel::B2);

    // Completed items never come back
    assert_eq!(h.queue.dispatcher().tick().await.unwrap(), 0);
}

#[tokio::test]
async fn enqueue_requires_a_registered_submission() {
    let scorer = Arc::new(FlakyScorer::new(0, || ScoreError::Overloaded));
    let h = harness(scorer, fast_config(1, 5)).await;

    let result = h.queue.enqueue(SubmissionId::new(), 0).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

// ---------------------------------------------------------------------------
// Ordering and concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatch_order_follows_priority_then_age() {
    let scorer = Arc::new(RecordingScorer {
        seen: Mutex::new(Vec::new()),
    });
    let h = harness(scorer.clone(), fast_config(1, 5)).await;

    let low = submit(&h, 0).await;
    let high = submit(&h, 9).await;
    let mid = submit(&h, 4).await;

    // One slot forces serial dispatch, so arrival order at the scorer is
    // exactly the eligibility ranking
    drain(&h, 3).await;

    let seen = scorer.seen.lock().await.clone();
    assert_eq!(
        seen,
        vec![high.submission_id, mid.submission_id, low.submission_id]
    );
}

#[tokio::test]
async fn workers_never_exceed_the_concurrency_cap() {
    let scorer = Arc::new(GaugeScorer::new(Duration::from_millis(50)));
    let h = harness(scorer.clone(), fast_config(2, 5)).await;

    for _ in 0..5 {
        submit(&h, 0).await;
    }
    drain(&h, 5).await;

    let peak = scorer.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency was {peak}");
}

#[tokio::test]
async fn tick_claims_at_most_the_free_slots() {
    let scorer = Arc::new(GaugeScorer::new(Duration::from_millis(200)));
    let h = harness(scorer, fast_config(2, 5)).await;

    for _ in 0..5 {
        submit(&h, 0).await;
    }

    assert_eq!(h.queue.dispatcher().tick().await.unwrap(), 2);
    assert_eq!(h.queue.dispatcher().in_flight(), 2);

    // Both slots busy: the next pass is a no-op
    assert_eq!(h.queue.dispatcher().tick().await.unwrap(), 0);

    drain(&h, 5).await;
}

// ---------------------------------------------------------------------------
// Retry behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_errors_retry_inside_one_attempt() {
    // Three overload responses, then success: one attempt, four calls
    let scorer = Arc::new(FlakyScorer::new(3, || ScoreError::Overloaded));
    let h = harness(scorer.clone(), fast_config(1, 5)).await;

    let item = submit(&h, 0).await;
    h.queue.dispatcher().tick().await.unwrap();

    let done = wait_for_status(&h.db, item.id, ItemStatus::Completed).await;
    assert_eq!(
        done.retry_count, 0,
        "in-attempt retries must not consume the queue budget"
    );
    assert_eq!(scorer.calls(), 4);
}

#[tokio::test]
async fn rejected_requests_fail_without_inner_retries() {
    let scorer = Arc::new(FlakyScorer::new(usize::MAX, || ScoreError::Client {
        status: 400,
        message: "unsupported audio container".to_string(),
    }));
    let h = harness(scorer.clone(), fast_config(1, 5)).await;

    let item = submit(&h, 0).await;
    h.queue.dispatcher().tick().await.unwrap();

    let failed = wait_for_status(&h.db, item.id, ItemStatus::Failed).await;
    assert_eq!(failed.retry_count, 1);
    assert_eq!(scorer.calls(), 1, "client errors are not retried in-attempt");
    assert!(
        failed
            .error_message
            .expect("failure recorded")
            .contains("unsupported audio container")
    );
}

#[tokio::test]
async fn permanent_rejections_burn_the_whole_budget_one_call_at_a_time() {
    let scorer = Arc::new(FlakyScorer::new(usize::MAX, || ScoreError::Client {
        status: 400,
        message: "unsupported audio container".to_string(),
    }));
    let h = harness(scorer.clone(), fast_config(1, 2)).await;

    let item = submit(&h, 0).await;

    // Each pick fails immediately and hands back the slot, so ticking
    // until the budget is spent walks through both attempts
    for _ in 0..100 {
        h.queue.dispatcher().tick().await.unwrap();
        let current = h.db.get_item(item.id).await.unwrap();
        if current.retry_count == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let exhausted = wait_for_item(&h.db, item.id, "exhausted", |i| i.retry_count == 2).await;
    assert_eq!(exhausted.status, ItemStatus::Failed);
    assert!(
        exhausted
            .error_message
            .expect("failure recorded")
            .contains("retries exhausted")
    );
    assert_eq!(
        scorer.calls(),
        2,
        "client errors take one call per attempt, never more"
    );
    assert_eq!(h.queue.dispatcher().tick().await.unwrap(), 0);
}

#[tokio::test]
async fn exhaustion_is_terminal_and_drops_the_recording() {
    let scorer = Arc::new(FlakyScorer::new(usize::MAX, || ScoreError::Server {
        status: 500,
        message: "internal".to_string(),
    }));
    let h = harness(scorer.clone(), fast_config(1, 2)).await;

    // A real file under the artifact root, registered by relative path
    let audio = h.dir.path().join("take.ogg");
    tokio::fs::write(&audio, b"not really audio").await.unwrap();
    let submission = h.submissions.register("take.ogg").await.unwrap();
    let item = h.queue.enqueue(submission, 0).await.unwrap();

    h.queue.dispatcher().tick().await.unwrap();
    let first = wait_for_status(&h.db, item.id, ItemStatus::Failed).await;
    assert_eq!(first.retry_count, 1);
    assert!(audio.exists(), "artifact must survive a retryable failure");

    // The first worker may still be winding down and holding its slot, so
    // keep ticking until the second attempt gets claimed
    for _ in 0..100 {
        if h.queue.dispatcher().tick().await.unwrap() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let exhausted = wait_for_item(&h.db, item.id, "exhausted", |i| i.retry_count == 2).await;
    assert_eq!(exhausted.status, ItemStatus::Failed);
    assert!(
        exhausted
            .error_message
            .expect("failure recorded")
            .contains("retries exhausted")
    );
    // Two attempts, four calls each (initial + three in-attempt retries)
    assert_eq!(scorer.calls(), 8);

    // Spent budget means no more dispatch
    assert_eq!(h.queue.dispatcher().tick().await.unwrap(), 0);

    // Terminal failure releases the stored recording
    for _ in 0..100 {
        if !audio.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!audio.exists(), "artifact should be gone after exhaustion");
}

#[tokio::test]
async fn missing_recording_consumes_a_retry() {
    struct NoAudioStore;

    #[async_trait]
    impl SubmissionStore for NoAudioStore {
        async fn exists(&self, _id: SubmissionId) -> Result<bool, Error> {
            Ok(true)
        }

        async fn audio_ref(&self, id: SubmissionId) -> Result<String, Error> {
            Err(Error::NotFound(format!("submission {id}")))
        }

        async fn save_result(
            &self,
            _id: SubmissionId,
            _result: &AssessmentResult,
        ) -> Result<(), Error> {
            Ok(())
        }
    }

    let scorer = Arc::new(FlakyScorer::new(0, || ScoreError::Overloaded));
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("queue.db");
    let db = Arc::new(
        Db::connect(path.to_str().expect("utf8 path"))
            .await
            .expect("failed to open test database"),
    );
    let queue = AssessmentQueue::new(
        Arc::clone(&db),
        Arc::new(NoAudioStore),
        Arc::new(FsArtifactStore::new(dir.path())),
        scorer.clone(),
        fast_config(1, 3),
        MonitorConfig::default(),
    );

    let item = queue.enqueue(SubmissionId::new(), 0).await.unwrap();
    queue.dispatcher().tick().await.unwrap();

    let failed = wait_for_status(&db, item.id, ItemStatus::Failed).await;
    assert_eq!(failed.retry_count, 1);
    assert!(
        failed
            .error_message
            .expect("failure recorded")
            .contains("recording unavailable")
    );
    assert_eq!(scorer.calls(), 0, "nothing to score without a recording");
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_waits_for_workers_in_flight() {
    let scorer = Arc::new(GaugeScorer::new(Duration::from_millis(150)));
    let h = harness(scorer, fast_config(1, 5)).await;

    let item = submit(&h, 0).await;
    h.queue.dispatcher().tick().await.unwrap();

    h.queue.shutdown().await;

    let done = h.db.get_item(item.id).await.unwrap();
    assert_eq!(
        done.status,
        ItemStatus::Completed,
        "shutdown must let the in-flight worker finish"
    );
}
