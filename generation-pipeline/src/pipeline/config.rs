use std::time::Duration;

use common::utils::config::AppConfig;

use crate::invoker::RetryPolicy;

#[derive(Debug, Clone)]
pub struct GenerationTuning {
    /// Items processed at once when a batch does not say otherwise.
    pub concurrency: usize,
    pub word_interval: Duration,
    pub image_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for GenerationTuning {
    fn default() -> Self {
        Self {
            concurrency: 2,
            word_interval: Duration::from_secs(1),
            image_interval: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationConfig {
    pub tuning: GenerationTuning,
}

impl GenerationConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: GenerationTuning {
                concurrency: config.batch_concurrency.max(1),
                word_interval: Duration::from_millis(config.word_interval_ms),
                image_interval: Duration::from_millis(config.image_interval_ms),
                retry: RetryPolicy::from_config(config),
            },
        }
    }
}
