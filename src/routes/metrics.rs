use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;

/// Install the global Prometheus recorder and register pipeline metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_pipeline_metrics();
    Ok(handle)
}

/// Install the global recorder with its own scrape listener on `addr`.
///
/// For processes without an HTTP router of their own, such as the worker.
/// Must be called from within a tokio runtime.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_pipeline_metrics();
    Ok(())
}

pub fn describe_pipeline_metrics() {
    metrics::describe_counter!("pile_jobs_submitted_total", "Total capture jobs submitted");
    metrics::describe_counter!(
        "pile_stage_completed_total",
        "Pipeline stages that finished successfully, by stage"
    );
    metrics::describe_counter!(
        "pile_stage_failed_total",
        "Pipeline stages that failed, by stage and reason"
    );
    metrics::describe_histogram!(
        "pile_reconstruction_seconds",
        metrics::Unit::Seconds,
        "Wall time of successful reconstruction runs"
    );
    metrics::describe_counter!(
        "pile_volume_fallback_total",
        "Completed measurements by volume source (mesh, convex_hull, unavailable)"
    );
    metrics::describe_gauge!("pile_queue_depth", "Stage work items waiting in the queue");
}

/// GET /metrics: Prometheus text exposition of pipeline counters and timings.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
