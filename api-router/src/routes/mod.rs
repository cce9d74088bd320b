pub mod jobs;
pub mod liveness;
pub mod metrics;
