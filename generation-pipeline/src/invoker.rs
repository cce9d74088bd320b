use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use common::{
    error::{AppError, ServiceError},
    utils::config::AppConfig,
};
use rand::Rng;
use serde::Serialize;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Applied to each attempt separately.
    pub timeout: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            timeout: Duration::from_secs(config.retry_timeout_secs),
            jitter: config.retry_jitter,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.max_delay, self.jitter)
    }
}

/// Delay before retry number `attempt` (zero-based): `min(max, base * 2^attempt)`, plus up to
/// half of that again when `jitter` is set.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
    let delay = base.checked_mul(factor).map_or(max, |d| d.min(max));
    if !jitter {
        return delay;
    }

    let spread_ms = u64::try_from(delay.as_millis() / 2).unwrap_or(u64::MAX);
    if spread_ms == 0 {
        return delay;
    }
    let extra = rand::thread_rng().gen_range(0..=spread_ms);
    delay.saturating_add(Duration::from_millis(extra))
}

/// Terminal outcome of a call whose attempts are used up or whose error is not retryable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{label} failed after {attempts} attempt(s): {error}")]
pub struct InvokeFailure {
    pub label: &'static str,
    pub attempts: u32,
    pub error: ServiceError,
}

impl InvokeFailure {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl From<InvokeFailure> for AppError {
    fn from(failure: InvokeFailure) -> Self {
        AppError::Processing(failure.to_string())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct CallStats {
    requests: u64,
    succeeded: u64,
    failed: u64,
    retried_requests: u64,
    total_retries: u64,
}

impl CallStats {
    fn record(&mut self, retries: u32, ok: bool) {
        self.requests = self.requests.saturating_add(1);
        if ok {
            self.succeeded = self.succeeded.saturating_add(1);
        } else {
            self.failed = self.failed.saturating_add(1);
        }
        if retries > 0 {
            self.retried_requests = self.retried_requests.saturating_add(1);
            self.total_retries = self.total_retries.saturating_add(u64::from(retries));
        }
    }

    fn merge(&mut self, other: &CallStats) {
        self.requests = self.requests.saturating_add(other.requests);
        self.succeeded = self.succeeded.saturating_add(other.succeeded);
        self.failed = self.failed.saturating_add(other.failed);
        self.retried_requests = self.retried_requests.saturating_add(other.retried_requests);
        self.total_retries = self.total_retries.saturating_add(other.total_retries);
    }

    #[allow(clippy::cast_precision_loss)]
    fn view(&self) -> CallStatsView {
        let average = if self.retried_requests == 0 {
            0.0
        } else {
            self.total_retries as f64 / self.retried_requests as f64
        };
        CallStatsView {
            requests: self.requests,
            succeeded: self.succeeded,
            failed: self.failed,
            retried_requests: self.retried_requests,
            total_retries: self.total_retries,
            average_retries_per_retried_request: average,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CallStatsView {
    pub requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried_requests: u64,
    pub total_retries: u64,
    pub average_retries_per_retried_request: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub total: CallStatsView,
    pub by_label: BTreeMap<String, CallStatsView>,
}

/// Observational counters for outbound calls, keyed by call label.
#[derive(Debug, Default)]
pub struct InvokerMetrics {
    stats: Mutex<BTreeMap<&'static str, CallStats>>,
}

impl InvokerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, label: &'static str, retries: u32, ok: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.entry(label).or_default().record(retries, ok);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let mut total = CallStats::default();
        let mut by_label = BTreeMap::new();
        for (label, entry) in stats.iter() {
            total.merge(entry);
            by_label.insert((*label).to_string(), entry.view());
        }
        MetricsSnapshot {
            total: total.view(),
            by_label,
        }
    }
}

/// Runs outbound calls with per-attempt timeouts and exponential backoff on transient failures.
pub struct ResilientInvoker {
    policy: RetryPolicy,
    metrics: Arc<InvokerMetrics>,
}

impl ResilientInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_metrics(policy, Arc::new(InvokerMetrics::new()))
    }

    pub fn with_metrics(policy: RetryPolicy, metrics: Arc<InvokerMetrics>) -> Self {
        Self { policy, metrics }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &Arc<InvokerMetrics> {
        &self.metrics
    }

    pub async fn invoke<T, F, Fut>(
        &self,
        label: &'static str,
        operation: F,
    ) -> Result<T, InvokeFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.invoke_tracked(label, operation)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`ResilientInvoker::invoke`], also reporting how many retries the success took.
    pub async fn invoke_tracked<T, F, Fut>(
        &self,
        label: &'static str,
        mut operation: F,
    ) -> Result<(T, u32), InvokeFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let attempts = AtomicU32::new(0);
        let timeout = self.policy.timeout;
        let max_retries = self.policy.max_attempts.max(1).saturating_sub(1);

        let delays = (0..max_retries).map(|retry| {
            let delay = self.policy.backoff(retry);
            debug!(
                label,
                retry,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "backing off before retry"
            );
            delay
        });

        let action = || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst).saturating_add(1);
            let call = operation();
            async move {
                match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ServiceError::Timeout(format!(
                        "attempt {attempt} got no response within {}ms",
                        timeout.as_millis()
                    ))),
                }
            }
        };

        let should_retry = |err: &ServiceError| {
            let retryable = err.is_retryable();
            warn!(
                label,
                attempt = attempts.load(Ordering::SeqCst),
                error_kind = err.kind(),
                error = %err,
                retryable,
                "outbound call failed"
            );
            retryable
        };

        let result = RetryIf::spawn(delays, action, should_retry).await;

        let attempts = attempts.load(Ordering::SeqCst);
        let retries = attempts.saturating_sub(1);
        self.metrics.record(label, retries, result.is_ok());

        match result {
            Ok(value) => Ok((value, retries)),
            Err(error) => Err(InvokeFailure {
                label,
                attempts,
                error,
            }),
        }
    }
}
