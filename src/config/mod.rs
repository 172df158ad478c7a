use garde::Validate;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// PostgreSQL connection string
    #[garde(length(min = 1))]
    pub database_url: String,

    /// Redis connection string for the stage queue
    #[garde(length(min = 1))]
    pub redis_url: String,

    /// Path to the photogrammetry executable (Meshroom batch CLI)
    #[serde(default = "default_reconstruction_bin")]
    #[garde(skip)]
    pub reconstruction_bin: PathBuf,

    /// Upper bound on a single reconstruction run, in seconds
    #[serde(default = "default_reconstruction_timeout_secs")]
    #[garde(range(min = 1))]
    pub reconstruction_timeout_secs: u64,

    /// Root directory holding one `job_<id>` output directory per job
    #[serde(default = "default_output_root")]
    #[garde(skip)]
    pub output_root: PathBuf,

    /// Directory where uploaded captures are stored
    #[serde(default = "default_upload_dir")]
    #[garde(skip)]
    pub upload_dir: PathBuf,

    /// Bulk material density in kg/m³
    #[serde(default = "default_material_density")]
    #[garde(range(min = 0.001, max = 5000.0))]
    pub material_density: f64,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1))]
    pub max_upload_bytes: usize,

    /// Where the worker serves its Prometheus scrape endpoint
    #[serde(default = "default_worker_metrics_addr")]
    #[garde(skip)]
    pub worker_metrics_addr: SocketAddr,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_reconstruction_bin() -> PathBuf {
    PathBuf::from("/usr/local/bin/meshroom_batch")
}

fn default_reconstruction_timeout_secs() -> u64 {
    2 * 60 * 60
}

fn default_output_root() -> PathBuf {
    PathBuf::from("/tmp/coal_results")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("/tmp/coal_uploads")
}

// Bituminous coal
fn default_material_density() -> f64 {
    1300.0
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_worker_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9091))
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// The subset of configuration the pipeline stages need.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            reconstruction_bin: self.reconstruction_bin.clone(),
            reconstruction_timeout: Duration::from_secs(self.reconstruction_timeout_secs),
            output_root: self.output_root.clone(),
            material_density: self.material_density,
        }
    }
}

/// Per-deployment values consumed by the reconstruction and measurement stages.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub reconstruction_bin: PathBuf,
    pub reconstruction_timeout: Duration,
    pub output_root: PathBuf,
    pub material_density: f64,
}

impl PipelineSettings {
    /// Isolated output directory for one job.
    pub fn output_dir_for(&self, job_id: uuid::Uuid) -> PathBuf {
        self.output_root.join(format!("job_{job_id}"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
