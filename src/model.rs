//! Core data model.
//!
//! A queue item tracks one assessment attempt lifecycle for a submitted
//! recording: who it belongs to, where it sits in the dispatch order, and
//! how many times scoring has failed so far.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ---------------------------------------------------------------------------
// Queue Item
// ---------------------------------------------------------------------------

/// A unit of assessment work tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique identifier.
    pub id: ItemId,

    /// The submission this item assesses. Multiple items may reference the
    /// same submission; the queue does not deduplicate.
    pub submission_id: SubmissionId,

    /// Current lifecycle status.
    pub status: ItemStatus,

    /// Priority. Higher dispatches first; ties break on creation order.
    pub priority: i32,

    /// Number of failed attempts so far. Bounded by the queue's max_retries.
    pub retry_count: u32,

    /// Cause of the most recent failure. Cleared when the item is claimed.
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    /// Touched on every status change; the basis for stuck-item detection.
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// A failed item whose retry budget is spent. Such items are never
    /// picked up again.
    pub fn retries_exhausted(&self, max_retries: u32) -> bool {
        self.status == ItemStatus::Failed && self.retry_count >= max_retries
    }
}

/// Newtype for queue item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

/// Newtype for submission IDs. Assigned by the portal when the recording
/// is uploaded; displayed in full because operators paste it into tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub Uuid);

impl SubmissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for SubmissionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(SubmissionId)
            .map_err(|e| Error::Other(format!("invalid submission id: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for a worker.
    Pending,
    /// Claimed by a worker, scoring in progress.
    Processing,
    /// Scored and result persisted. Terminal.
    Completed,
    /// Last attempt failed. Eligible again while retries remain.
    Failed,
}

impl ItemStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Failed, Processing)      // retry
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending) // stuck-item reset
        )
    }

    /// Is this a terminal status?
    ///
    /// `Failed` is not listed: whether a failed item is done for good
    /// depends on its retry count, not on the status value alone.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "processing" => Ok(ItemStatus::Processing),
            "completed" => Ok(ItemStatus::Completed),
            "failed" => Ok(ItemStatus::Failed),
            _ => Err(Error::Other(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Assessment Result
// ---------------------------------------------------------------------------

/// CEFR-style proficiency band reported by the scoring service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProficiencyLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl std::fmt::Display for ProficiencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProficiencyLevel::A1 => "A1",
            ProficiencyLevel::A2 => "A2",
            ProficiencyLevel::B1 => "B1",
            ProficiencyLevel::B2 => "B2",
            ProficiencyLevel::C1 => "C1",
            ProficiencyLevel::C2 => "C2",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ProficiencyLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A1" => Ok(ProficiencyLevel::A1),
            "A2" => Ok(ProficiencyLevel::A2),
            "B1" => Ok(ProficiencyLevel::B1),
            "B2" => Ok(ProficiencyLevel::B2),
            "C1" => Ok(ProficiencyLevel::C1),
            "C2" => Ok(ProficiencyLevel::C2),
            _ => Err(Error::Other(format!("unknown proficiency level: {s}"))),
        }
    }
}

/// The scoring service's verdict on one submission. Written once per
/// completed item; re-scoring the same submission overwrites it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub level: ProficiencyLevel,
    /// Narrative analysis of the recording.
    pub analysis: String,
    pub strengths: String,
    pub improvements: String,
    /// Why the level was assigned.
    pub justification: String,
    /// More than one voice detected on the recording. Flagged for review
    /// rather than failing the assessment.
    pub multiple_speakers: bool,
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

/// Aggregate queue occupancy by status.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueCounts {
    /// Share of the live workload that is currently failed.
    ///
    /// Completed items are excluded from the divisor so old successes do
    /// not dilute the signal. Zero when the queue is empty.
    pub fn error_rate(&self) -> f64 {
        let total = self.pending + self.processing + self.failed;
        if total == 0 {
            0.0
        } else {
            self.failed as f64 / total as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for enqueueing new assessment work.
pub struct NewQueueItem {
    pub(crate) submission_id: SubmissionId,
    pub(crate) priority: i32,
}

impl NewQueueItem {
    pub fn new(submission_id: SubmissionId) -> Self {
        Self {
            submission_id,
            priority: 0,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
