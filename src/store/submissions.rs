//! SQL-backed submission store.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::{AssessmentResult, SubmissionId};

use super::SubmissionStore;

/// Submission records and assessment results in the shared database.
pub struct SqlSubmissionStore {
    pool: SqlitePool,
}

impl SqlSubmissionStore {
    pub fn new(db: &Db) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Register a new submission pointing at an uploaded recording.
    ///
    /// In production the portal writes these rows; this exists for the CLI
    /// and for tests.
    pub async fn register(&self, audio_path: &str) -> Result<SubmissionId> {
        let id = SubmissionId::new();
        let now = chrono::Utc::now();

        sqlx::query("INSERT INTO submissions (id, audio_path, submitted_at) VALUES (?, ?, ?)")
            .bind(id.0.to_string())
            .bind(audio_path)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    /// Fetch the stored result for a submission, if it has been scored.
    pub async fn result(&self, id: SubmissionId) -> Result<Option<AssessmentResult>> {
        let row: Option<ResultRow> = sqlx::query_as(
            "SELECT level, analysis, strengths, improvements, justification, multiple_speakers
             FROM assessment_results WHERE submission_id = ?",
        )
        .bind(id.0.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ResultRow::try_into_result).transpose()
    }
}

#[async_trait]
impl SubmissionStore for SqlSubmissionStore {
    async fn exists(&self, id: SubmissionId) -> Result<bool> {
        let found: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM submissions WHERE id = ?)")
            .bind(id.0.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(found)
    }

    async fn audio_ref(&self, id: SubmissionId) -> Result<String> {
        let path: Option<String> = sqlx::query_scalar("SELECT audio_path FROM submissions WHERE id = ?")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        path.ok_or_else(|| Error::NotFound(format!("submission {id}")))
    }

    async fn save_result(&self, id: SubmissionId, result: &AssessmentResult) -> Result<()> {
        let now = chrono::Utc::now();

        sqlx::query(
            "INSERT OR REPLACE INTO assessment_results
             (submission_id, level, analysis, strengths, improvements, justification, multiple_speakers, scored_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.0.to_string())
        .bind(result.level.to_string())
        .bind(&result.analysis)
        .bind(&result.strengths)
        .bind(&result.improvements)
        .bind(&result.justification)
        .bind(result.multiple_speakers)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ResultRow {
    level: String,
    analysis: String,
    strengths: String,
    improvements: String,
    justification: String,
    multiple_speakers: bool,
}

impl ResultRow {
    fn try_into_result(self) -> Result<AssessmentResult> {
        Ok(AssessmentResult {
            level: self.level.parse()?,
            analysis: self.analysis,
            strengths: self.strengths,
            improvements: self.improvements,
            justification: self.justification,
            multiple_speakers: self.multiple_speakers,
        })
    }
}
