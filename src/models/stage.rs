use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use super::job::Measurements;

/// One unit of pipeline work carried by the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageTask {
    Reconstruct { job_id: Uuid, input_path: String },
    Measure { job_id: Uuid, mesh_path: String },
}

impl StageTask {
    pub fn job_id(&self) -> Uuid {
        match self {
            StageTask::Reconstruct { job_id, .. } | StageTask::Measure { job_id, .. } => *job_id,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            StageTask::Reconstruct { .. } => Stage::Reconstruction,
            StageTask::Measure { .. } => Stage::Measurement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Reconstruction,
    Measurement,
}

/// Where the reported volume came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VolumeSource {
    /// Signed enclosed volume of a watertight mesh.
    Mesh,
    /// Convex hull of the mesh vertices.
    ConvexHull,
    /// Hull could not be built; volume reported as zero.
    Unavailable,
}

/// Structured result of a single stage invocation, consumed by logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StageOutcome {
    Reconstructed {
        model_path: String,
    },
    Measured {
        #[serde(flatten)]
        measurements: Measurements,
        volume_source: VolumeSource,
        vertices: usize,
        faces: usize,
        surface_area: f64,
    },
    Failed {
        error: String,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, StageOutcome::Failed { .. })
    }
}
