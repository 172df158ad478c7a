use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::app_state::AppState;
use crate::services::reconstruction::ReconstructionTool;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub redis: ComponentHealth,
    pub reconstruction_tool: ComponentHealth,
    pub queue_depth: Option<u64>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_result<T, E>(result: Result<T, E>, start: Instant) -> Self {
        match result {
            Ok(_) => Self {
                status: "ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(_) => Self {
                status: "error".to_string(),
                latency_ms: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health: dependency status for the API and the pipeline's external tool.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = Instant::now();
    let database = ComponentHealth::from_result(
        sqlx::query("SELECT 1").execute(&state.db).await,
        start,
    );

    let start = Instant::now();
    let redis = ComponentHealth::from_result(state.queue().health_check().await, start);

    // API hosts may not have the tool installed; reported but not fatal.
    let start = Instant::now();
    let reconstruction_tool =
        ComponentHealth::from_result(state.pipeline.tool().check_available().await, start);

    let queue_depth = state.queue().queue_depth().await.ok();

    let all_healthy = database.is_ok() && redis.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database,
            redis,
            reconstruction_tool,
            queue_depth,
        },
    };

    (status_code, Json(response))
}
