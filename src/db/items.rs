//! Queue item operations: enqueue, eligibility scan, claim, retirement.
//!
//! Claims and retirements are conditional UPDATEs checked via
//! `rows_affected`, so they stay correct even if a second dispatcher is
//! ever pointed at the same database.

use std::time::Duration;

use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::model::{ItemId, ItemStatus, NewQueueItem, QueueCounts, QueueItem, SubmissionId};
use crate::telemetry::metrics;

impl super::Db {
    /// Insert a new pending item.
    pub async fn insert_item(&self, new: NewQueueItem) -> Result<QueueItem> {
        let id = ItemId::new();
        let now = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO queue_items (id, submission_id, status, priority, retry_count, created_at, updated_at)
             VALUES (?, ?, 'pending', ?, 0, ?, ?)",
        )
        .bind(id.0.to_string())
        .bind(new.submission_id.0.to_string())
        .bind(new.priority)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        metrics::items_enqueued().add(1, &[]);

        self.get_item(id).await
    }

    /// Get a queue item by ID.
    pub async fn get_item(&self, id: ItemId) -> Result<QueueItem> {
        let row: Option<ItemRow> = sqlx::query_as(
            "SELECT id, submission_id, status, priority, retry_count, error_message, created_at, updated_at
             FROM queue_items WHERE id = ?",
        )
        .bind(id.0.to_string())
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("queue item {id}")))?
            .try_into_item()
    }

    /// List queue items, optionally filtered by status, newest first.
    pub async fn list_items(
        &self,
        status: Option<ItemStatus>,
        limit: i64,
    ) -> Result<Vec<QueueItem>> {
        let rows: Vec<ItemRow> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT id, submission_id, status, priority, retry_count, error_message, created_at, updated_at
                     FROM queue_items WHERE status = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, submission_id, status, priority, retry_count, error_message, created_at, updated_at
                     FROM queue_items ORDER BY created_at DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
        };

        rows.into_iter().map(ItemRow::try_into_item).collect()
    }

    /// Fetch items eligible for dispatch, in dispatch order.
    ///
    /// Eligible means `pending` or `failed` with retries remaining. Failed
    /// items whose retry budget is spent never match, which is what makes
    /// exhaustion terminal.
    pub async fn fetch_eligible(&self, max_retries: u32, limit: i64) -> Result<Vec<QueueItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT id, submission_id, status, priority, retry_count, error_message, created_at, updated_at
             FROM queue_items
             WHERE status IN ('pending', 'failed') AND retry_count < ?
             ORDER BY priority DESC, created_at ASC
             LIMIT ?",
        )
        .bind(max_retries as i64)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(ItemRow::try_into_item).collect()
    }

    /// Atomically claim an eligible item for processing.
    ///
    /// The eligibility conditions are re-checked inside the UPDATE, so two
    /// racing claims on the same item resolve to exactly one winner.
    /// Returns false when the item was already taken (or is no longer
    /// eligible); callers skip and move on.
    pub async fn claim_item(&self, id: ItemId, max_retries: u32) -> Result<bool> {
        let now = chrono::Utc::now();

        let rows_affected = sqlx::query(
            "UPDATE queue_items
             SET status = 'processing', error_message = NULL, updated_at = ?
             WHERE id = ? AND status IN ('pending', 'failed') AND retry_count < ?",
        )
        .bind(now)
        .bind(id.0.to_string())
        .bind(max_retries as i64)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 1 {
            metrics::items_claimed().add(1, &[]);
        }

        Ok(rows_affected == 1)
    }

    /// Complete an item: processing → completed.
    pub async fn complete_item(&self, id: ItemId) -> Result<QueueItem> {
        let now = chrono::Utc::now();

        let rows_affected = sqlx::query(
            "UPDATE queue_items SET status = 'completed', updated_at = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(now)
        .bind(id.0.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: ItemStatus::Processing,
                to: ItemStatus::Completed,
            });
        }

        metrics::status_transitions().add(
            1,
            &[
                KeyValue::new("from", "processing"),
                KeyValue::new("to", "completed"),
            ],
        );

        self.get_item(id).await
    }

    /// Fail an item: processing → failed, consuming one retry.
    pub async fn fail_item(&self, id: ItemId, message: &str) -> Result<QueueItem> {
        let now = chrono::Utc::now();

        let rows_affected = sqlx::query(
            "UPDATE queue_items
             SET status = 'failed', retry_count = retry_count + 1, error_message = ?, updated_at = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(message)
        .bind(now)
        .bind(id.0.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: ItemStatus::Processing,
                to: ItemStatus::Failed,
            });
        }

        metrics::status_transitions().add(
            1,
            &[
                KeyValue::new("from", "processing"),
                KeyValue::new("to", "failed"),
            ],
        );

        self.get_item(id).await
    }

    /// Aggregate occupancy by status.
    pub async fn counts(&self) -> Result<QueueCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM queue_items GROUP BY status")
                .fetch_all(self.pool())
                .await?;

        let mut counts = QueueCounts::default();
        for (status, n) in rows {
            match status.parse::<ItemStatus>()? {
                ItemStatus::Pending => counts.pending = n as u64,
                ItemStatus::Processing => counts.processing = n as u64,
                ItemStatus::Completed => counts.completed = n as u64,
                ItemStatus::Failed => counts.failed = n as u64,
            }
        }
        Ok(counts)
    }

    /// Reset processing items that have not been touched within
    /// `stale_after` back to pending. Returns how many were reset.
    ///
    /// A stale `processing` row means the worker died or hung mid-attempt;
    /// resetting makes the item dispatchable again without consuming a
    /// retry, since no failure was actually recorded.
    pub async fn reset_stuck(&self, stale_after: Duration, note: &str) -> Result<u64> {
        let now = chrono::Utc::now();
        let cutoff = now - chrono::Duration::milliseconds(stale_after.as_millis() as i64);

        let rows_affected = sqlx::query(
            "UPDATE queue_items SET status = 'pending', error_message = ?, updated_at = ?
             WHERE status = 'processing' AND updated_at < ?",
        )
        .bind(note)
        .bind(now)
        .bind(cutoff)
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(rows_affected)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ItemRow {
    id: String,
    submission_id: String,
    status: String,
    priority: i32,
    retry_count: i64,
    error_message: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl ItemRow {
    fn try_into_item(self) -> Result<QueueItem> {
        let id = self
            .id
            .parse()
            .map_err(|e: uuid::Error| Error::Other(format!("bad item id: {e}")))?;
        let submission_id = self
            .submission_id
            .parse()
            .map_err(|e: uuid::Error| Error::Other(format!("bad submission id: {e}")))?;

        Ok(QueueItem {
            id: ItemId(id),
            submission_id: SubmissionId(submission_id),
            status: self.status.parse()?,
            priority: self.priority,
            retry_count: self.retry_count as u32,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
