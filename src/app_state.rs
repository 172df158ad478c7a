use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;

use crate::db::queries::PgJobStore;
use crate::services::{pipeline::Pipeline, queue::JobQueue, reconstruction::MeshroomCli};

/// Pipeline wired to the production collaborators.
pub type ServicePipeline = Pipeline<PgJobStore, JobQueue, MeshroomCli>;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub pipeline: Arc<ServicePipeline>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        db: PgPool,
        pipeline: ServicePipeline,
        upload_dir: PathBuf,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            db,
            pipeline: Arc::new(pipeline),
            upload_dir,
            max_upload_bytes,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        self.pipeline.dispatcher()
    }
}
