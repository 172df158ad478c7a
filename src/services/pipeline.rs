//! Stage orchestration for pile measurement jobs.
//!
//! A job moves through two independently dispatched stages:
//!
//! 1. **Reconstruction**: `pending → processing`, run the photogrammetry tool,
//!    locate its mesh, `processing → reconstructed`, schedule measurement.
//! 2. **Measurement**: load the mesh, compute volume/extents/mass,
//!    `reconstructed → complete`.
//!
//! Any error inside a stage ends with the job persisted as `failed` and a
//! [`StageOutcome::Failed`] returned for logging. Nothing is retried.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineSettings;
use crate::db::{JobStore, StoreError};
use crate::models::job::{FailureReason, JobStatus, PileJob};
use crate::models::stage::{Stage, StageOutcome, StageTask};
use crate::services::measurement::{self, MeshReport};
use crate::services::mesh::{MeshError, TriangleMesh};
use crate::services::queue::{QueueError, StageDispatcher};
use crate::services::reconstruction::{
    locate_mesh, prepare_output_dir, ReconstructionError, ReconstructionTool,
};

/// Tail of the tool output kept in a failure result.
const MAX_DIAGNOSTIC_BYTES: usize = 8 * 1024;

pub struct Pipeline<S, D, T> {
    store: S,
    dispatcher: D,
    tool: T,
    settings: PipelineSettings,
}

impl<S, D, T> Pipeline<S, D, T>
where
    S: JobStore,
    D: StageDispatcher,
    T: ReconstructionTool,
{
    pub fn new(store: S, dispatcher: D, tool: T, settings: PipelineSettings) -> Self {
        Self {
            store,
            dispatcher,
            tool,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Create a `pending` job for an already stored capture and schedule its
    /// reconstruction.
    pub async fn submit(&self, user_id: i64, input_path: &Path) -> Result<PileJob, StageError> {
        let job = self.store.create(user_id).await?;
        self.dispatcher
            .schedule(StageTask::Reconstruct {
                job_id: job.id,
                input_path: input_path.to_string_lossy().into_owned(),
            })
            .await?;

        metrics::counter!("pile_jobs_submitted_total").increment(1);
        info!(job_id = %job.id, user_id, input = %input_path.display(), "Job submitted");
        Ok(job)
    }

    /// Run whichever stage `task` names.
    pub async fn handle(&self, task: StageTask) -> StageOutcome {
        match task {
            StageTask::Reconstruct { job_id, input_path } => {
                self.run_reconstruction(job_id, Path::new(&input_path)).await
            }
            StageTask::Measure { job_id, mesh_path } => {
                self.run_measurement(job_id, Path::new(&mesh_path)).await
            }
        }
    }

    /// Reconstruction stage entry point.
    pub async fn run_reconstruction(&self, job_id: Uuid, input: &Path) -> StageOutcome {
        let started = Instant::now();
        info!(job_id = %job_id, input = %input.display(), "Starting reconstruction");

        match self.reconstruct(job_id, input).await {
            Ok(model_path) => {
                let elapsed = started.elapsed().as_secs_f64();
                metrics::histogram!("pile_reconstruction_seconds").record(elapsed);
                metrics::counter!("pile_stage_completed_total", "stage" => "reconstruction")
                    .increment(1);
                info!(
                    job_id = %job_id,
                    model_path = %model_path,
                    duration_secs = elapsed,
                    "Reconstruction complete, measurement scheduled"
                );
                StageOutcome::Reconstructed { model_path }
            }
            Err(e) => self.fail(job_id, Stage::Reconstruction, e).await,
        }
    }

    /// Measurement stage entry point.
    pub async fn run_measurement(&self, job_id: Uuid, mesh_path: &Path) -> StageOutcome {
        info!(job_id = %job_id, mesh = %mesh_path.display(), "Starting measurement");

        match self.measure(job_id, mesh_path).await {
            Ok(report) => {
                metrics::counter!("pile_stage_completed_total", "stage" => "measurement")
                    .increment(1);
                metrics::counter!(
                    "pile_volume_fallback_total",
                    "source" => report.volume_source.to_string()
                )
                .increment(1);
                info!(
                    job_id = %job_id,
                    volume = report.measurements.volume,
                    weight = report.measurements.weight,
                    length = report.measurements.length,
                    width = report.measurements.width,
                    height = report.measurements.height,
                    volume_source = %report.volume_source,
                    watertight = report.watertight,
                    "Measurement complete"
                );
                StageOutcome::Measured {
                    measurements: report.measurements,
                    volume_source: report.volume_source,
                    vertices: report.vertices,
                    faces: report.faces,
                    surface_area: report.surface_area,
                }
            }
            Err(e) => self.fail(job_id, Stage::Measurement, e).await,
        }
    }

    /// Mark a job failed after its stage died without returning, e.g. a panic
    /// caught by the worker.
    pub async fn abort(&self, job_id: Uuid, stage: Stage, detail: String) -> StageOutcome {
        self.fail(job_id, stage, StageError::Unexpected(detail)).await
    }

    async fn reconstruct(&self, job_id: Uuid, input: &Path) -> Result<String, StageError> {
        // Persisted first so a crash mid-run shows up as a job stuck in `processing`.
        self.store
            .begin_reconstruction(job_id)
            .await
            .map_err(StageError::from_transition)?;

        self.tool.check_available().await.map_err(|e| match e {
            ReconstructionError::NotFound(_) | ReconstructionError::NotExecutable(_) => {
                StageError::Configuration(e.to_string())
            }
            other => StageError::Unexpected(other.to_string()),
        })?;

        if tokio::fs::metadata(input).await.is_err() {
            return Err(StageError::InputMissing(input.display().to_string()));
        }

        let output_dir = self.settings.output_dir_for(job_id);
        prepare_output_dir(&output_dir).await.map_err(|e| {
            StageError::Unexpected(format!(
                "cannot prepare output directory {}: {e}",
                output_dir.display()
            ))
        })?;

        let run = self
            .tool
            .run(input, &output_dir, self.settings.reconstruction_timeout)
            .await
            .map_err(|e| match e {
                ReconstructionError::TimedOut(limit) => StageError::TimedOut(limit.as_secs()),
                ReconstructionError::NotFound(_) | ReconstructionError::NotExecutable(_) => {
                    StageError::Configuration(e.to_string())
                }
                other => StageError::Unexpected(other.to_string()),
            })?;

        if !run.success {
            return Err(StageError::ToolFailed {
                exit_code: run.exit_code,
                output: output_tail(&run.output, MAX_DIAGNOSTIC_BYTES).to_string(),
            });
        }

        let search_dir = output_dir.clone();
        let mesh_path: PathBuf = tokio::task::spawn_blocking(move || locate_mesh(&search_dir))
            .await
            .map_err(|e| StageError::Unexpected(format!("mesh search aborted: {e}")))?
            .ok_or_else(|| StageError::NoModelProduced(output_dir.display().to_string()))?;
        let model_path = mesh_path.to_string_lossy().into_owned();

        self.store
            .record_model(job_id, &model_path)
            .await
            .map_err(StageError::from_transition)?;
        self.dispatcher
            .schedule(StageTask::Measure {
                job_id,
                mesh_path: model_path.clone(),
            })
            .await?;

        Ok(model_path)
    }

    async fn measure(&self, job_id: Uuid, mesh_path: &Path) -> Result<MeshReport, StageError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(StageError::JobNotFound(job_id))?;
        if job.status != JobStatus::Reconstructed {
            return Err(StageError::NotRunnable {
                job_id,
                status: job.status,
            });
        }

        // This stage may run on another host long after reconstruction.
        match tokio::fs::metadata(mesh_path).await {
            Ok(m) if m.is_file() => {}
            _ => return Err(StageError::MeshMissing(mesh_path.display().to_string())),
        }

        let density = self.settings.material_density;
        let path = mesh_path.to_path_buf();
        let report = tokio::task::spawn_blocking(move || {
            TriangleMesh::load_obj(&path).map(|mesh| measurement::measure(&mesh, density))
        })
        .await
        .map_err(|e| StageError::Unexpected(format!("measurement aborted: {e}")))?
        .map_err(StageError::UnusableMesh)?;

        // A duplicate delivery may have completed the job in the meantime.
        self.store
            .complete(job_id, report.measurements)
            .await
            .map_err(StageError::from_transition)?;
        Ok(report)
    }

    async fn fail(&self, job_id: Uuid, stage: Stage, err: StageError) -> StageOutcome {
        let reason = err.reason_code();
        metrics::counter!(
            "pile_stage_failed_total",
            "stage" => stage.to_string(),
            "reason" => reason
        )
        .increment(1);

        if err.should_persist() {
            error!(job_id = %job_id, stage = %stage, reason, error = %err, "Stage failed");
            let failure = FailureReason {
                code: reason.to_string(),
                message: err.to_string(),
            };
            let clear_model_path = stage == Stage::Reconstruction;
            if let Err(e) = self.store.fail(job_id, failure, clear_model_path).await {
                error!(job_id = %job_id, error = %e, "Failed to persist job failure");
            }
        } else {
            warn!(job_id = %job_id, stage = %stage, reason, error = %err, "Stage skipped");
        }

        StageOutcome::Failed {
            error: err.to_string(),
            reason: reason.to_string(),
            output: err.diagnostic_output().map(str::to_string),
        }
    }
}

/// Last `max` bytes of `output`, cut on a character boundary.
fn output_tail(output: &str, max: usize) -> &str {
    if output.len() <= max {
        return output;
    }
    let mut start = output.len() - max;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    &output[start..]
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "a signal".to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Job {job_id} is {status}, not ready for this stage")]
    NotRunnable { job_id: Uuid, status: JobStatus },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Input capture not found: {0}")]
    InputMissing(String),

    #[error("Reconstruction terminated with {}", describe_exit(.exit_code))]
    ToolFailed {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Reconstruction timed out after {0}s")]
    TimedOut(u64),

    #[error("Reconstruction produced no .obj mesh under {0}")]
    NoModelProduced(String),

    #[error("Mesh file not found: {0}")]
    MeshMissing(String),

    #[error("Mesh could not be loaded: {0}")]
    UnusableMesh(#[source] MeshError),

    #[error("Failed to dispatch next stage: {0}")]
    Dispatch(#[from] QueueError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Unexpected(String),
}

impl StageError {
    /// Stable machine-readable reason stored with the failed job.
    pub fn reason_code(&self) -> &'static str {
        match self {
            StageError::JobNotFound(_) => "job_not_found",
            StageError::NotRunnable { .. } => "not_runnable",
            StageError::Configuration(_) => "configuration_error",
            StageError::InputMissing(_) => "input_missing",
            StageError::ToolFailed { .. } => "tool_failed",
            StageError::TimedOut(_) => "timed_out",
            StageError::NoModelProduced(_) => "no_model_produced",
            StageError::MeshMissing(_) => "mesh_missing",
            StageError::UnusableMesh(_) => "unusable_mesh",
            StageError::Dispatch(_) | StageError::Store(_) | StageError::Unexpected(_) => {
                "internal_error"
            }
        }
    }

    /// Whether the failure belongs to the job. A missing job, or one another
    /// delivery already moved on, is left untouched.
    pub fn should_persist(&self) -> bool {
        !matches!(
            self,
            StageError::JobNotFound(_) | StageError::NotRunnable { .. }
        )
    }

    pub fn diagnostic_output(&self) -> Option<&str> {
        match self {
            StageError::ToolFailed { output, .. } => Some(output),
            _ => None,
        }
    }

    fn from_transition(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => StageError::JobNotFound(id),
            StoreError::InvalidTransition { job_id, from, .. } => StageError::NotRunnable {
                job_id,
                status: from,
            },
            other => StageError::Store(other),
        }
    }
}
