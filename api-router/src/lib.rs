use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{
    jobs::{get_job, list_jobs, retry_item, start_job, stop_job},
    liveness::live,
    metrics::get_metrics,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for the batch API, version 1
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/live", get(live))
        .route("/jobs", post(start_job).get(list_jobs))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/stop", post(stop_job))
        .route("/jobs/{job_id}/retry", post(retry_item))
        .route("/metrics", get(get_metrics))
}
