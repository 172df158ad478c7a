use garde::Validate;
use serde::{Deserialize, Serialize};

/// Metadata portion of a capture upload.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRequest {
    #[garde(range(min = 1))]
    pub user_id: i64,

    #[garde(length(min = 1, max = 255))]
    pub filename: String,
}

/// Response after submitting a capture for processing.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: uuid::Uuid,
    pub status: String,
    pub message: String,
}

/// Response listing a user's jobs.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<super::job::PileJob>,
}
