#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod coordinator;
pub mod invoker;
pub mod pacer;
pub mod pipeline;
pub mod progress;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use coordinator::{BatchRequest, JobCoordinator};
pub use invoker::{InvokeFailure, MetricsSnapshot, ResilientInvoker, RetryPolicy};
pub use pacer::{CallClass, RatePacer};
pub use pipeline::{GenerationConfig, GenerationPipeline, GenerationTuning};
pub use progress::{JobSnapshot, ProgressReporter};

use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, warn};

/// Periodically drops finished jobs older than `retention` from the registry. Never returns.
pub async fn run_retention_loop(
    coordinator: Arc<JobCoordinator>,
    retention: Duration,
    every: Duration,
) {
    loop {
        sleep(every).await;
        match coordinator.prune_jobs(retention).await {
            Ok(0) => debug!("no finished jobs past retention"),
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "failed to prune finished jobs");
                warn!("Backing off for 1s after prune error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
