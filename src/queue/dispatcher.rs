//! Poll loop that leases eligible items to a bounded set of worker tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::Db;
use crate::error::Result;

use super::QueueConfig;
use super::processor::ItemProcessor;

/// How long shutdown waits for in-flight workers before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Claims eligible queue items and runs each in its own task, never more
/// than `max_concurrent` at once. Cloning shares the same loop and permits.
#[derive(Clone)]
pub struct Dispatcher {
    db: Arc<Db>,
    processor: Arc<ItemProcessor>,
    config: QueueConfig,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Dispatcher {
    pub(crate) fn new(db: Arc<Db>, processor: Arc<ItemProcessor>, config: QueueConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            db,
            processor,
            config,
            permits,
            cancel: CancellationToken::new(),
            loop_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the poll loop unless one is already running.
    pub async fn ensure_started(&self) {
        let mut handle = self.loop_handle.lock().await;
        if let Some(existing) = handle.as_ref() {
            if !existing.is_finished() {
                return;
            }
        }
        let dispatcher = self.clone();
        *handle = Some(tokio::spawn(async move { dispatcher.run().await }));
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_concurrent = self.config.max_concurrent,
            "dispatcher started"
        );
    }

    async fn run(self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("dispatcher loop stopped");
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.tick().await {
                        error!("dispatch pass failed: {e}");
                    }
                }
            }
        }
    }

    /// One dispatch pass: claim up to the number of free worker slots, in
    /// priority order, and spawn a worker per claim. Returns how many
    /// workers were spawned.
    pub async fn tick(&self) -> Result<usize> {
        let free = self.permits.available_permits();
        if free == 0 {
            debug!("all worker slots busy, skipping dispatch pass");
            return Ok(0);
        }

        let eligible = self
            .db
            .fetch_eligible(self.config.max_retries, free as i64)
            .await?;
        if eligible.is_empty() {
            return Ok(0);
        }

        let mut spawned = 0;
        for item in eligible {
            let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if !self.db.claim_item(item.id, self.config.max_retries).await? {
                // Lost the row to a concurrent pass; the slot goes back.
                drop(permit);
                continue;
            }
            let processor = Arc::clone(&self.processor);
            tokio::spawn(async move {
                let _permit = permit;
                processor.process(item).await;
            });
            spawned += 1;
        }

        if spawned > 0 {
            debug!(spawned, "dispatched queue items");
        }
        Ok(spawned)
    }

    /// Workers currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent - self.permits.available_permits()
    }

    /// Stop claiming new work, then wait out in-flight workers up to the
    /// grace period.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("dispatcher loop ended abnormally: {e}");
            }
        }

        let all = self.config.max_concurrent as u32;
        match tokio::time::timeout(SHUTDOWN_GRACE, self.permits.acquire_many(all)).await {
            Ok(Ok(_idle)) => {}
            Ok(Err(_)) => {}
            Err(_) => warn!(
                in_flight = self.in_flight(),
                "shutdown grace elapsed with workers still running"
            ),
        }
        info!("dispatcher stopped");
    }
}
