use sqlx::{postgres::PgPoolOptions, PgPool};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{FailureReason, JobStatus, Measurements, PileJob};

pub mod memory;
pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Transactional access to job records.
///
/// Every mutating call is a compare-and-set against the job's current status:
/// the update only applies when the state machine allows moving from the stored
/// status to the target one, otherwise [`StoreError::InvalidTransition`] is
/// returned and the record is left untouched.
pub trait JobStore: Send + Sync + 'static {
    fn create(&self, user_id: i64) -> impl Future<Output = Result<PileJob, StoreError>> + Send;

    fn get(&self, job_id: Uuid) -> impl Future<Output = Result<Option<PileJob>, StoreError>> + Send;

    fn list_for_user(
        &self,
        user_id: i64,
    ) -> impl Future<Output = Result<Vec<PileJob>, StoreError>> + Send;

    /// `pending → processing`, clearing any stale `model_path`.
    fn begin_reconstruction(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<PileJob, StoreError>> + Send;

    /// `processing → reconstructed`, recording the located mesh.
    fn record_model(
        &self,
        job_id: Uuid,
        model_path: &str,
    ) -> impl Future<Output = Result<PileJob, StoreError>> + Send;

    /// `reconstructed → complete`, writing all measurement fields at once.
    fn complete(
        &self,
        job_id: Uuid,
        measurements: Measurements,
    ) -> impl Future<Output = Result<PileJob, StoreError>> + Send;

    /// Any non-terminal state `→ failed`. With `clear_model_path` the recorded
    /// mesh is dropped as well; reconstruction failures always set it.
    fn fail(
        &self,
        job_id: Uuid,
        reason: FailureReason,
        clear_model_path: bool,
    ) -> impl Future<Output = Result<PileJob, StoreError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Corrupt job record {job_id}: {detail}")]
    Corrupt { job_id: Uuid, detail: String },
}
