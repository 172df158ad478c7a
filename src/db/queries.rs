use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::job::{FailureReason, JobStatus, Measurements, PileJob};

const JOB_COLUMNS: &str = "id, user_id, status, model_path, volume, length, width, height, \
                           weight, error_code, error_message, created_at, updated_at";

/// Postgres-backed job records.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Resolve why a guarded update touched no rows.
    async fn rejected(&self, job_id: Uuid, to: JobStatus) -> StoreError {
        match self.get(job_id).await {
            Ok(Some(job)) => StoreError::InvalidTransition {
                job_id,
                from: job.status,
                to,
            },
            Ok(None) => StoreError::NotFound(job_id),
            Err(e) => e,
        }
    }
}

fn allowed_from(to: JobStatus) -> Vec<String> {
    JobStatus::predecessors(to)
        .into_iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

fn job_from_row(row: &PgRow) -> Result<PileJob, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(|_| StoreError::Corrupt {
        job_id: id,
        detail: format!("unknown status '{status_str}'"),
    })?;

    let fields: [Option<f64>; 5] = [
        row.try_get("volume")?,
        row.try_get("length")?,
        row.try_get("width")?,
        row.try_get("height")?,
        row.try_get("weight")?,
    ];
    let measurements = match fields {
        [Some(volume), Some(length), Some(width), Some(height), Some(weight)] => {
            Some(Measurements {
                volume,
                length,
                width,
                height,
                weight,
            })
        }
        [None, None, None, None, None] => None,
        _ => {
            return Err(StoreError::Corrupt {
                job_id: id,
                detail: "measurement fields partially populated".to_string(),
            })
        }
    };

    let error_code: Option<String> = row.try_get("error_code")?;
    let error_message: Option<String> = row.try_get("error_message")?;
    let error = error_code.map(|code| FailureReason {
        code,
        message: error_message.unwrap_or_default(),
    });

    Ok(PileJob {
        id,
        user_id: row.try_get("user_id")?,
        status,
        model_path: row.try_get("model_path")?,
        measurements,
        error,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl JobStore for PgJobStore {
    async fn create(&self, user_id: i64) -> Result<PileJob, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO pile_jobs (user_id, status) VALUES ($1, 'pending') RETURNING {JOB_COLUMNS}"
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        job_from_row(&row)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<PileJob>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM pile_jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<PileJob>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM pile_jobs WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn begin_reconstruction(&self, job_id: Uuid) -> Result<PileJob, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE pile_jobs
            SET status = 'processing', model_path = NULL, updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(allowed_from(JobStatus::Processing))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(self.rejected(job_id, JobStatus::Processing).await),
        }
    }

    async fn record_model(&self, job_id: Uuid, model_path: &str) -> Result<PileJob, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE pile_jobs
            SET status = 'reconstructed', model_path = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(model_path)
        .bind(allowed_from(JobStatus::Reconstructed))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(self.rejected(job_id, JobStatus::Reconstructed).await),
        }
    }

    async fn complete(
        &self,
        job_id: Uuid,
        measurements: Measurements,
    ) -> Result<PileJob, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE pile_jobs
            SET status = 'complete',
                volume = $2, length = $3, width = $4, height = $5, weight = $6,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($7)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(measurements.volume)
        .bind(measurements.length)
        .bind(measurements.width)
        .bind(measurements.height)
        .bind(measurements.weight)
        .bind(allowed_from(JobStatus::Complete))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(self.rejected(job_id, JobStatus::Complete).await),
        }
    }

    async fn fail(
        &self,
        job_id: Uuid,
        reason: FailureReason,
        clear_model_path: bool,
    ) -> Result<PileJob, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE pile_jobs
            SET status = 'failed',
                model_path = CASE WHEN $5 THEN NULL ELSE model_path END,
                error_code = $2,
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($4)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(&reason.code)
        .bind(&reason.message)
        .bind(allowed_from(JobStatus::Failed))
        .bind(clear_model_path)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(self.rejected(job_id, JobStatus::Failed).await),
        }
    }
}
