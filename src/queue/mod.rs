//! Persisted assessment queue: intake, bounded dispatch, scorer retries,
//! and health monitoring over the shared SQLite store.

pub mod alerts;
pub mod dispatcher;
pub mod monitor;
pub mod processor;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use alerts::{Alert, AlertBook, Severity};
pub use dispatcher::Dispatcher;
pub use monitor::{AuditReport, HealthMonitor, MonitorConfig};
pub use processor::ItemProcessor;
pub use retry::RetryPolicy;

use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::{ItemId, ItemStatus, NewQueueItem, QueueItem, SubmissionId};
use crate::scorer::Scorer;
use crate::store::{ArtifactStore, SubmissionStore};

/// Dispatch and retry settings for the queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Time between dispatch passes.
    pub poll_interval: Duration,
    /// Upper bound on concurrently processing items.
    pub max_concurrent: usize,
    /// Queue-level attempts per item before it fails for good.
    pub max_retries: u32,
    /// In-attempt retry policy for scorer calls.
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_concurrent: 3,
            max_retries: 5,
            retry: RetryPolicy::default(),
        }
    }
}

/// Facade tying intake, dispatch, and monitoring together. Cloning shares
/// the underlying loops.
#[derive(Clone)]
pub struct AssessmentQueue {
    db: Arc<Db>,
    submissions: Arc<dyn SubmissionStore>,
    dispatcher: Dispatcher,
    monitor: HealthMonitor,
}

impl AssessmentQueue {
    pub fn new(
        db: Arc<Db>,
        submissions: Arc<dyn SubmissionStore>,
        artifacts: Arc<dyn ArtifactStore>,
        scorer: Arc<dyn Scorer>,
        queue_config: QueueConfig,
        monitor_config: MonitorConfig,
    ) -> Self {
        let processor = Arc::new(ItemProcessor::new(
            Arc::clone(&db),
            Arc::clone(&submissions),
            artifacts,
            scorer,
            queue_config.retry.clone(),
            queue_config.max_retries,
        ));
        let dispatcher = Dispatcher::new(Arc::clone(&db), processor, queue_config);
        let monitor = HealthMonitor::new(Arc::clone(&db), monitor_config);
        Self {
            db,
            submissions,
            dispatcher,
            monitor,
        }
    }

    /// Queue a submission for assessment. The first enqueue also starts the
    /// dispatcher if nothing else has.
    pub async fn enqueue(&self, submission_id: SubmissionId, priority: i32) -> Result<QueueItem> {
        if !self.submissions.exists(submission_id).await? {
            return Err(Error::NotFound(format!("submission {submission_id}")));
        }
        let item = self
            .db
            .insert_item(NewQueueItem::new(submission_id).priority(priority))
            .await?;
        info!(
            id = %item.id,
            submission = %submission_id,
            priority,
            "queued submission for assessment"
        );
        self.dispatcher.ensure_started().await;
        Ok(item)
    }

    /// Start both background loops.
    pub async fn start(&self) {
        self.dispatcher.ensure_started().await;
        self.monitor.ensure_started().await;
    }

    /// Stop both loops. In-flight workers get the dispatcher's grace period.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        self.monitor.shutdown().await;
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub async fn item(&self, id: ItemId) -> Result<QueueItem> {
        self.db.get_item(id).await
    }

    pub async fn items(&self, status: Option<ItemStatus>, limit: i64) -> Result<Vec<QueueItem>> {
        self.db.list_items(status, limit).await
    }
}
