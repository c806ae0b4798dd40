//! Scoring service contract.
//!
//! The queue hands a fetchable audio reference to the scorer and gets back
//! a structured verdict. Failures map onto a closed taxonomy so the retry
//! policy can match on every class exhaustively; there is no catch-all
//! variant to hide a new failure mode in.

pub mod http;

pub use http::HttpScorer;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{AssessmentResult, SubmissionId};

/// Why a scoring call failed.
#[derive(Debug, Error)]
pub enum ScoreError {
    /// Service shedding load (503). Transient; retry.
    #[error("scoring service overloaded")]
    Overloaded,

    /// Too many requests (429). Transient; retry, honoring any hint.
    #[error("scoring service rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Service-side fault (other 5xx). Transient; retry.
    #[error("scoring service error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Request rejected (4xx other than 429). Permanent; retrying the same
    /// request cannot succeed.
    #[error("scoring request rejected ({status}): {message}")]
    Client { status: u16, message: String },

    /// Response arrived but was unusable: malformed payload, missing
    /// fields, or a proficiency level outside the known bands. Permanent.
    #[error("invalid scoring response: {0}")]
    Invalid(String),

    /// Transport failure: DNS, connect, timeout. Transient; retry.
    #[error("network error: {0}")]
    Network(String),
}

impl ScoreError {
    /// Stable label for metrics and logs.
    pub fn class(&self) -> &'static str {
        match self {
            ScoreError::Overloaded => "overloaded",
            ScoreError::RateLimited { .. } => "rate_limited",
            ScoreError::Server { .. } => "server",
            ScoreError::Client { .. } => "client",
            ScoreError::Invalid(_) => "invalid",
            ScoreError::Network(_) => "network",
        }
    }
}

/// One scoring request.
#[derive(Debug, Clone)]
pub struct ScoreRequest {
    pub submission_id: SubmissionId,
    /// Where the recording lives, in a form the service can fetch.
    pub audio_ref: String,
}

/// The external assessment scoring service.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, request: &ScoreRequest)
    -> std::result::Result<AssessmentResult, ScoreError>;
}
