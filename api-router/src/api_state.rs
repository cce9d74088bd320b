use std::sync::Arc;

use generation_pipeline::{JobCoordinator, ProgressReporter};

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<JobCoordinator>,
    pub reporter: ProgressReporter,
}

impl ApiState {
    pub fn new(coordinator: Arc<JobCoordinator>) -> Self {
        let reporter = coordinator.reporter();
        Self {
            coordinator,
            reporter,
        }
    }
}
