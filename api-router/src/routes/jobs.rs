use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::storage::types::visual_asset::{ItemKey, VisualType};
use generation_pipeline::{progress::ItemProgress, BatchRequest};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

pub async fn start_job(
    State(state): State<ApiState>,
    Json(request): Json<BatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(
        words = request.word_ids.len(),
        visual_types = request.visual_types.len(),
        skip_existing = request.options.skip_existing,
        "Received batch request"
    );

    let job_id = state.coordinator.start_batch(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job_id, "status": "Pending" })),
    ))
}

pub async fn list_jobs(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.coordinator.list_jobs().await?;

    Ok(Json(jobs))
}

pub async fn get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.reporter.snapshot(&job_id).await?;

    Ok(Json(snapshot))
}

pub async fn stop_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.reporter.request_stop(&job_id).await?;

    Ok(Json(json!({ "job_id": job_id, "status": status })))
}

#[derive(Debug, Deserialize)]
pub struct RetryParams {
    pub word_id: String,
    pub visual_type: VisualType,
}

pub async fn retry_item(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Json(params): Json<RetryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let key = ItemKey::new(params.word_id, params.visual_type);
    let item = state.coordinator.retry_item(&job_id, key).await?;

    Ok(Json(ItemProgress::from(&item)))
}
