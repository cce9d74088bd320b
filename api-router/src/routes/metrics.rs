use axum::{extract::State, response::IntoResponse, Json};

use crate::api_state::ApiState;

/// Retry counters of every outbound call, per label and in total.
pub async fn get_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.coordinator.metrics())
}
