//! HTTP client for the scoring service.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::AssessmentResult;

use super::{ScoreError, ScoreRequest, Scorer};

const USER_AGENT: &str = concat!("vivavoce/", env!("CARGO_PKG_VERSION"));

/// How much of an error body to keep in messages.
const BODY_SNIPPET_LEN: usize = 200;

/// Scoring over HTTPS: one POST per submission, bearer-authenticated.
pub struct HttpScorer {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
}

#[derive(Serialize)]
struct ScorePayload<'a> {
    submission_id: String,
    audio_url: &'a str,
}

impl HttpScorer {
    /// Build a client for the given endpoint.
    ///
    /// The request timeout bounds the whole call including the service's
    /// own audio processing; a timeout surfaces as a Network error and is
    /// retried like any other transport fault.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: SecretString,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Other(format!("failed to build scoring client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    async fn score(
        &self,
        request: &ScoreRequest,
    ) -> std::result::Result<AssessmentResult, ScoreError> {
        debug!(submission = %request.submission_id, "scoring request");

        let payload = ScorePayload {
            submission_id: request.submission_id.to_string(),
            audio_url: &request.audio_ref,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ScoreError::Network(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            return response
                .json::<AssessmentResult>()
                .await
                .map_err(|e| ScoreError::Invalid(e.to_string()));
        }

        match status.as_u16() {
            429 => Err(ScoreError::RateLimited {
                retry_after: parse_retry_after(&response),
            }),
            503 => Err(ScoreError::Overloaded),
            s if (500..600).contains(&s) => Err(ScoreError::Server {
                status: s,
                message: body_snippet(response).await,
            }),
            s => Err(ScoreError::Client {
                status: s,
                message: body_snippet(response).await,
            }),
        }
    }
}

/// The seconds form of Retry-After. The HTTP-date form is rare enough from
/// rate limiters that it falls back to computed backoff.
fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn body_snippet(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > BODY_SNIPPET_LEN {
        let mut end = BODY_SNIPPET_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
