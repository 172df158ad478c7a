use coal_pile_measure::{
    config::AppConfig,
    db::{self, queries::PgJobStore},
    models::stage::StageOutcome,
    routes::metrics::install_exporter,
    services::{
        pipeline::Pipeline,
        queue::{JobQueue, QueueError},
        reconstruction::{MeshroomCli, ReconstructionTool},
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

type WorkerPipeline = Pipeline<PgJobStore, JobQueue, MeshroomCli>;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting pile measurement worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    install_exporter(config.worker_metrics_addr)
        .expect("Failed to install Prometheus metrics exporter");
    tracing::info!(addr = %config.worker_metrics_addr, "Serving worker metrics");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize stage queue");
    let tool = MeshroomCli::new(&config.reconstruction_bin);

    // Stages still run without the tool and fail with a configuration error.
    if let Err(e) = tool.check_available().await {
        tracing::warn!(error = %e, "Reconstruction tool unavailable");
    }

    let pipeline = Arc::new(Pipeline::new(
        PgJobStore::new(db_pool),
        queue,
        tool,
        config.pipeline_settings(),
    ));

    tracing::info!(
        density = config.material_density,
        timeout_secs = config.reconstruction_timeout_secs,
        output_root = %config.output_root.display(),
        "Worker ready, starting stage processing loop"
    );

    loop {
        match process_next_stage(&pipeline).await {
            Ok(true) => {
                tracing::debug!("Stage processed, checking for next work item");
            }
            Ok(false) => {
                tracing::trace!("No work available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Queue error, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Pop and run one stage work item.
/// Returns Ok(true) if a work item was handled, Ok(false) if the queue was empty.
async fn process_next_stage(pipeline: &Arc<WorkerPipeline>) -> Result<bool, QueueError> {
    let queue = pipeline.dispatcher();
    if let Ok(depth) = queue.queue_depth().await {
        metrics::gauge!("pile_queue_depth").set(depth as f64);
    }

    let delivery = match queue.dequeue().await? {
        Some(d) => d,
        None => return Ok(false),
    };

    let task = delivery.task.clone();
    let job_id = task.job_id();
    let stage = task.stage();
    tracing::info!(job_id = %job_id, stage = %stage, "Processing stage");

    // Run on its own task so a panic inside a stage cannot take the worker down.
    let runner = Arc::clone(pipeline);
    let outcome = match tokio::spawn(async move { runner.handle(task).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(job_id = %job_id, stage = %stage, error = %e, "Stage crashed");
            pipeline
                .abort(job_id, stage, format!("stage task crashed: {e}"))
                .await
        }
    };

    match &outcome {
        StageOutcome::Failed { reason, .. } => {
            tracing::warn!(
                job_id = %job_id,
                stage = %stage,
                reason = %reason,
                result = %serde_json::to_string(&outcome).unwrap_or_default(),
                "Stage finished with failure"
            );
        }
        _ => {
            tracing::info!(
                job_id = %job_id,
                stage = %stage,
                result = %serde_json::to_string(&outcome).unwrap_or_default(),
                "Stage finished"
            );
        }
    }

    // No retries: every delivery is acknowledged once its stage has returned.
    queue.complete(&delivery).await?;
    Ok(true)
}
