//! External collaborator seams: submission records and uploaded artifacts.
//!
//! The queue only ever touches submissions and recordings through these
//! traits. The shipped implementations (SQL table, local filesystem) make
//! the crate runnable end to end; a deployment backed by a real blob
//! store swaps in its own.

pub mod artifacts;
pub mod submissions;

pub use artifacts::FsArtifactStore;
pub use submissions::SqlSubmissionStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{AssessmentResult, SubmissionId};

/// Access to submission records owned by the portal.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Does this submission exist? Checked before enqueueing.
    async fn exists(&self, id: SubmissionId) -> Result<bool>;

    /// Reference to the submission's uploaded recording, in whatever form
    /// the scoring service can fetch (path or URL).
    async fn audio_ref(&self, id: SubmissionId) -> Result<String>;

    /// Persist the assessment verdict. Idempotent: re-scoring the same
    /// submission overwrites the previous result, which keeps at-least-once
    /// delivery safe.
    async fn save_result(&self, id: SubmissionId, result: &AssessmentResult) -> Result<()>;
}

/// Access to the uploaded recording blobs themselves.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Delete a recording. Missing artifacts are not an error; the point
    /// is that the blob is gone afterwards.
    async fn delete(&self, audio_ref: &str) -> Result<()>;
}
