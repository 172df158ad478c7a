use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::JobStore;
use crate::models::job::PileJob;
use crate::models::submission::{JobListResponse, SubmitRequest, SubmitResponse};

/// Used until an authentication layer supplies the caller's identity.
const DEFAULT_USER_ID: i64 = 1;

const ARCHIVE_EXTENSIONS: &[&str] = &["zip"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureKind {
    Archive,
    Video,
    Image,
}

fn capture_kind(filename: &str) -> Option<CaptureKind> {
    let ext = std::path::Path::new(filename)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
        Some(CaptureKind::Archive)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(CaptureKind::Video)
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(CaptureKind::Image)
    } else {
        None
    }
}

/// Strip any directory components a client put in the upload name.
fn safe_filename(name: &str) -> Option<String> {
    let base = std::path::Path::new(name).file_name()?.to_str()?;
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

/// POST /api/v1/jobs: Upload a capture (zip of images, video or image) for measurement.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut user_id = DEFAULT_USER_ID;

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .and_then(safe_filename)
                    .ok_or(StatusCode::BAD_REQUEST)?;
                let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                upload = Some((filename, data.to_vec()));
            }
            Some("user_id") => {
                let text = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                user_id = text.trim().parse().map_err(|_| StatusCode::BAD_REQUEST)?;
            }
            _ => {}
        }
    }

    let (filename, data) = upload.ok_or(StatusCode::BAD_REQUEST)?;

    let request = SubmitRequest { user_id, filename };
    request
        .validate()
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let kind = capture_kind(&request.filename).ok_or(StatusCode::UNSUPPORTED_MEDIA_TYPE)?;
    if data.len() > state.max_upload_bytes {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    if kind == CaptureKind::Image {
        image::guess_format(&data).map_err(|_| StatusCode::UNSUPPORTED_MEDIA_TYPE)?;
    }

    let user_dir = state.upload_dir.join(format!("user_{}", request.user_id));
    tokio::fs::create_dir_all(&user_dir).await.map_err(|e| {
        tracing::error!(error = %e, dir = %user_dir.display(), "Failed to create upload directory");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let input_path = user_dir.join(format!("{}_{}", Uuid::new_v4(), request.filename));
    tokio::fs::write(&input_path, &data).await.map_err(|e| {
        tracing::error!(error = %e, path = %input_path.display(), "Failed to store upload");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let job = state
        .pipeline
        .submit(request.user_id, &input_path)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to submit job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: job.status.to_string(),
            message: "Capture submitted for reconstruction".to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: Current state and measurements of a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<PileJob>, StatusCode> {
    match state.pipeline.store().get(job_id).await {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub user_id: Option<i64>,
}

/// GET /api/v1/jobs: Jobs belonging to a user, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<JobListResponse>, StatusCode> {
    let user_id = query.user_id.unwrap_or(DEFAULT_USER_ID);
    let jobs = state
        .pipeline
        .store()
        .list_for_user(user_id)
        .await
        .map_err(|e| {
            tracing::error!(user_id, error = %e, "Failed to list jobs");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(JobListResponse { jobs }))
}
