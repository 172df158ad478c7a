use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::job::{FailureReason, JobStatus, Measurements, PileJob};

/// In-process job records for single-node runs and tests.
///
/// Each transition holds the write lock for the whole check-and-update, which
/// gives the same compare-and-set behaviour as the guarded SQL updates.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, PileJob>,
    history: HashMap<Uuid, Vec<JobStatus>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status the job has held, in order, starting with `pending`.
    pub async fn history(&self, job_id: Uuid) -> Vec<JobStatus> {
        self.inner
            .read()
            .await
            .history
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn transition<F>(&self, job_id: Uuid, to: JobStatus, apply: F) -> Result<PileJob, StoreError>
    where
        F: FnOnce(&mut PileJob),
    {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;

        if !job.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                job_id,
                from: job.status,
                to,
            });
        }

        apply(job);
        job.status = to;
        job.updated_at = Utc::now();
        let snapshot = job.clone();

        inner.history.entry(job_id).or_default().push(to);
        Ok(snapshot)
    }
}

impl JobStore for MemoryJobStore {
    async fn create(&self, user_id: i64) -> Result<PileJob, StoreError> {
        let job = PileJob::new(user_id);
        let mut inner = self.inner.write().await;
        inner.history.insert(job.id, vec![JobStatus::Pending]);
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<PileJob>, StoreError> {
        Ok(self.inner.read().await.jobs.get(&job_id).cloned())
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<PileJob>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<PileJob> = inner
            .jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn begin_reconstruction(&self, job_id: Uuid) -> Result<PileJob, StoreError> {
        self.transition(job_id, JobStatus::Processing, |job| {
            job.model_path = None;
        })
        .await
    }

    async fn record_model(&self, job_id: Uuid, model_path: &str) -> Result<PileJob, StoreError> {
        let model_path = model_path.to_string();
        self.transition(job_id, JobStatus::Reconstructed, move |job| {
            job.model_path = Some(model_path);
        })
        .await
    }

    async fn complete(
        &self,
        job_id: Uuid,
        measurements: Measurements,
    ) -> Result<PileJob, StoreError> {
        self.transition(job_id, JobStatus::Complete, move |job| {
            job.measurements = Some(measurements);
        })
        .await
    }

    async fn fail(
        &self,
        job_id: Uuid,
        reason: FailureReason,
        clear_model_path: bool,
    ) -> Result<PileJob, StoreError> {
        self.transition(job_id, JobStatus::Failed, move |job| {
            if clear_model_path {
                job.model_path = None;
            }
            job.error = Some(reason);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_measurements() -> Measurements {
        Measurements {
            volume: 1.0,
            length: 1.0,
            width: 1.0,
            height: 1.0,
            weight: 1300.0,
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = MemoryJobStore::new();
        let job = store.create(7).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        store.begin_reconstruction(job.id).await.unwrap();
        let job = store.record_model(job.id, "/out/mesh.obj").await.unwrap();
        assert_eq!(job.model_path.as_deref(), Some("/out/mesh.obj"));

        let job = store.complete(job.id, sample_measurements()).await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.measurements, Some(sample_measurements()));

        assert_eq!(
            store.history(job.id).await,
            vec![
                JobStatus::Pending,
                JobStatus::Processing,
                JobStatus::Reconstructed,
                JobStatus::Complete
            ]
        );
    }

    #[tokio::test]
    async fn test_guarded_update_rejects_out_of_order() {
        let store = MemoryJobStore::new();
        let job = store.create(1).await.unwrap();

        let err = store.complete(job.id, sample_measurements()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Complete,
                ..
            }
        ));

        let unchanged = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, JobStatus::Pending);
        assert!(unchanged.measurements.is_none());
    }

    #[tokio::test]
    async fn test_failed_is_terminal() {
        let store = MemoryJobStore::new();
        let job = store.create(1).await.unwrap();
        store.begin_reconstruction(job.id).await.unwrap();
        store
            .fail(
                job.id,
                FailureReason {
                    code: "timed_out".to_string(),
                    message: "too slow".to_string(),
                },
                true,
            )
            .await
            .unwrap();

        assert!(store.begin_reconstruction(job.id).await.is_err());
        assert!(store.record_model(job.id, "/x.obj").await.is_err());
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_measurement_failure_keeps_model_path() {
        let store = MemoryJobStore::new();
        let job = store.create(1).await.unwrap();
        store.begin_reconstruction(job.id).await.unwrap();
        store.record_model(job.id, "/out/mesh.obj").await.unwrap();

        let failed = store
            .fail(
                job.id,
                FailureReason {
                    code: "unusable_mesh".to_string(),
                    message: "bad".to_string(),
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(failed.model_path.as_deref(), Some("/out/mesh.obj"));
        assert!(failed.measurements.is_none());
    }

    #[tokio::test]
    async fn test_reconstruction_failure_clears_recorded_model() {
        let store = MemoryJobStore::new();
        let job = store.create(1).await.unwrap();
        store.begin_reconstruction(job.id).await.unwrap();
        store.record_model(job.id, "/out/mesh.obj").await.unwrap();

        let failed = store
            .fail(
                job.id,
                FailureReason {
                    code: "internal_error".to_string(),
                    message: "queue closed".to_string(),
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.model_path.is_none());
    }

    #[tokio::test]
    async fn test_missing_job() {
        let store = MemoryJobStore::new();
        let err = store.begin_reconstruction(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
