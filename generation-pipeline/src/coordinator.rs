use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        job_store::JobStore,
        types::{
            job::{BatchOptions, ItemStage, Job, JobItem, JobStatus, JobSummary},
            visual_asset::{ItemKey, VisualType},
        },
    },
};
use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, error, info, warn};

use crate::{
    invoker::MetricsSnapshot,
    pipeline::{GenerationPipeline, ItemObserver, NoopObserver},
    progress::{ProgressReporter, StopRegistry},
};

/// Extra attempts for the write that records a finished job.
const TERMINAL_WRITE_RETRIES: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchRequest {
    pub word_ids: Vec<String>,
    pub visual_types: Vec<VisualType>,
    #[serde(default)]
    pub options: BatchOptions,
}

/// The single writer of a running job. Every item update replaces the whole item and the job is
/// persisted as one value while the lock is held.
struct JobState {
    job: Mutex<Job>,
    store: Arc<dyn JobStore>,
}

impl JobState {
    async fn commit(&self, item: JobItem) {
        let mut job = self.job.lock().await;
        let key = item.key();
        if let Err(err) = job.commit_item(item) {
            warn!(job_id = %job.job_id, item = %key, error = %err, "item update rejected");
            return;
        }
        if let Err(err) = self.store.put(&job).await {
            warn!(job_id = %job.job_id, item = %key, error = %err, "failed to persist job progress");
        }
    }

    async fn fail_item(&self, key: &ItemKey, reason: String) {
        let failed = {
            let job = self.job.lock().await;
            job.item(key).filter(|item| !item.is_terminal()).cloned()
        };
        if let Some(mut item) = failed {
            if item.fail(reason).is_ok() {
                self.commit(item).await;
            }
        }
    }
}

#[async_trait]
impl ItemObserver for JobState {
    async fn on_update(&self, item: &JobItem) {
        self.commit(item.clone()).await;
    }
}

/// Owns the job lifecycle: expansion, bounded dispatch, stop handling and single-item retries.
pub struct JobCoordinator {
    jobs: Arc<dyn JobStore>,
    pipeline: Arc<GenerationPipeline>,
    stops: Arc<StopRegistry>,
    retry_lock: Mutex<()>,
}

impl JobCoordinator {
    pub fn new(jobs: Arc<dyn JobStore>, pipeline: Arc<GenerationPipeline>) -> Self {
        Self {
            jobs,
            pipeline,
            stops: Arc::new(StopRegistry::new()),
            retry_lock: Mutex::new(()),
        }
    }

    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter::new(Arc::clone(&self.jobs), Arc::clone(&self.stops))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.pipeline.metrics()
    }

    /// Validates and expands a request into a persisted Pending job.
    ///
    /// Empty word or type lists are rejected without creating a job. A request that expands to
    /// nothing, or whose expansion cannot read the record store, is stored as Failed and the
    /// startup error is returned.
    #[tracing::instrument(
        skip_all,
        fields(words = request.word_ids.len(), visual_types = request.visual_types.len())
    )]
    pub async fn submit(&self, request: BatchRequest) -> Result<Job, AppError> {
        let BatchRequest {
            word_ids,
            visual_types,
            options,
        } = request;

        let word_ids: Vec<String> = word_ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if word_ids.is_empty() {
            return Err(AppError::Validation(
                "at least one word id is required".into(),
            ));
        }
        if visual_types.is_empty() {
            return Err(AppError::Validation(
                "at least one visual type is required".into(),
            ));
        }

        match self
            .expand(&word_ids, &visual_types, options.skip_existing)
            .await
        {
            Ok(keys) if !keys.is_empty() => {
                let job = Job::new(keys, options);
                self.jobs.put(&job).await?;
                self.stops.flag(&job.job_id);
                info!(job_id = %job.job_id, total = job.items.len(), "batch job submitted");
                Ok(job)
            }
            Ok(_) => {
                self.fail_startup(options, "no items left to generate".into())
                    .await
            }
            Err(err) => {
                self.fail_startup(options, format!("could not expand batch: {err}"))
                    .await
            }
        }
    }

    async fn expand(
        &self,
        word_ids: &[String],
        visual_types: &[VisualType],
        skip_existing: bool,
    ) -> Result<Vec<ItemKey>, AppError> {
        let records = self.pipeline.records();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        for word_id in word_ids {
            for visual_type in visual_types {
                let key = ItemKey::new(word_id.clone(), *visual_type);
                if !seen.insert(key.clone()) {
                    continue;
                }
                if skip_existing && records.get_visual_asset(&key).await?.is_some() {
                    debug!(item = %key, "visual already exists; skipping");
                    continue;
                }
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn fail_startup(&self, options: BatchOptions, reason: String) -> Result<Job, AppError> {
        let mut job = Job::new(Vec::new(), options);
        job.mark_failed(reason.clone())?;
        self.jobs.put(&job).await?;
        error!(job_id = %job.job_id, %reason, "batch job failed to start");
        Err(AppError::Startup(format!("job {}: {reason}", job.job_id)))
    }

    /// Submits the request and runs it in the background. Returns the job id.
    pub async fn start_batch(self: &Arc<Self>, request: BatchRequest) -> Result<String, AppError> {
        let job = self.submit(request).await?;
        let coordinator = Arc::clone(self);
        let job_id = job.job_id.clone();
        tokio::spawn(async move {
            if let Err(err) = coordinator.run(&job_id).await {
                error!(%job_id, error = %err, "batch job run failed");
            }
        });
        Ok(job.job_id)
    }

    /// Processes a Pending job to a terminal status.
    ///
    /// Items are dispatched in submission order with at most `concurrency` in flight. The stop
    /// flag is checked before every dispatch; items already running are allowed to finish.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, job_id: &str) -> Result<Job, AppError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
        if job.status != JobStatus::Pending {
            return Err(AppError::Conflict(format!(
                "job {job_id} is already {}",
                job.status.as_str()
            )));
        }

        let stop = self.stops.flag(job_id);
        let outcome = self.drive(job, &stop).await;
        self.stops.remove(job_id);
        outcome
    }

    /// Dispatches the items of a claimed job and writes its terminal state.
    async fn drive(&self, mut job: Job, stop: &AtomicBool) -> Result<Job, AppError> {
        let job_id = job.job_id.clone();
        let concurrency = job
            .options
            .concurrency
            .unwrap_or(self.pipeline.config().tuning.concurrency)
            .max(1);
        let items = job.items.clone();

        job.mark_processing()?;
        self.jobs.put(&job).await?;
        info!(%job_id, total = items.len(), concurrency, "batch job started");

        let state = Arc::new(JobState {
            job: Mutex::new(job),
            store: Arc::clone(&self.jobs),
        });
        let started = Instant::now();

        stream::iter(items)
            .take_while(|_| future::ready(!stop.load(Ordering::SeqCst)))
            .map(|item| {
                let pipeline = Arc::clone(&self.pipeline);
                let state = Arc::clone(&state);
                async move {
                    let key = item.key();
                    let worker_state = Arc::clone(&state);
                    let worker = tokio::spawn(async move {
                        let finished = pipeline.process(item, worker_state.as_ref()).await;
                        worker_state.commit(finished).await;
                    });
                    if let Err(err) = worker.await {
                        error!(item = %key, error = %err, "item worker crashed");
                        state.fail_item(&key, format!("worker crashed: {err}")).await;
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<()>>()
            .await;

        let mut job = state.job.lock().await;
        if stop.load(Ordering::SeqCst) {
            job.stop_requested = true;
            job.mark_cancelled()?;
        } else {
            for item in job.items.iter_mut().filter(|item| !item.is_terminal()) {
                item.fail("item did not report a result")?;
            }
            job.mark_completed()?;
        }
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .map(jitter)
            .take(TERMINAL_WRITE_RETRIES);
        if let Err(err) = Retry::spawn(strategy, || self.jobs.put(&job)).await {
            error!(
                %job_id,
                status = job.status.as_str(),
                error = %err,
                "failed to persist finished job"
            );
            return Err(err);
        }

        let counters = job.counters();
        let metrics = self.pipeline.metrics();
        info!(
            %job_id,
            status = job.status.as_str(),
            total = counters.total,
            processed = counters.processed,
            succeeded = counters.succeeded,
            failed = counters.failed,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            requests = metrics.total.requests,
            retried_requests = metrics.total.retried_requests,
            total_retries = metrics.total.total_retries,
            "batch job finished"
        );

        Ok(job.clone())
    }

    /// Re-runs one failed item of a finished job and swaps in the result.
    #[tracing::instrument(skip(self), fields(item = %key))]
    pub async fn retry_item(&self, job_id: &str, key: ItemKey) -> Result<JobItem, AppError> {
        let _guard = self.retry_lock.lock().await;

        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
        if !job.is_terminal() {
            return Err(AppError::Conflict(format!(
                "job {job_id} is still {}",
                job.status.as_str()
            )));
        }
        let item = job
            .item(&key)
            .ok_or_else(|| AppError::NotFound(format!("item {key} in job {job_id}")))?;
        if item.stage != ItemStage::Failed {
            return Err(AppError::Conflict(format!(
                "item {key} is {}, only failed items can be retried",
                item.stage.as_str()
            )));
        }

        let finished = self
            .pipeline
            .process(JobItem::new(key.clone()), &NoopObserver)
            .await;

        let mut job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
        job.replace_failed_item(finished.clone())?;
        self.jobs.put(&job).await?;

        info!(
            %job_id,
            item = %key,
            stage = finished.stage.as_str(),
            retries = finished.retries,
            "item retried"
        );
        Ok(finished)
    }

    /// Marks jobs left Pending or Processing by a previous process as Failed. Run once at startup,
    /// before any job is submitted.
    pub async fn fail_interrupted_jobs(&self) -> Result<usize, AppError> {
        let mut failed = 0_usize;
        for mut job in self.jobs.list().await? {
            if job.is_terminal() {
                continue;
            }
            job.mark_failed("interrupted before completion")?;
            self.jobs.put(&job).await?;
            warn!(job_id = %job.job_id, "marked interrupted job as failed");
            failed = failed.saturating_add(1);
        }
        Ok(failed)
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>, AppError> {
        Ok(self.jobs.list().await?.iter().map(Job::summary).collect())
    }

    /// Removes terminal jobs that finished more than `retention` ago.
    pub async fn prune_jobs(&self, retention: Duration) -> Result<usize, AppError> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| AppError::Validation(format!("retention out of range: {e}")))?;
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return Ok(0);
        };

        let mut removed = 0_usize;
        for job in self.jobs.list().await? {
            let expired = job.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff);
            if expired {
                self.jobs.remove(&job.job_id).await?;
                self.stops.remove(&job.job_id);
                removed = removed.saturating_add(1);
            }
        }
        if removed > 0 {
            info!(removed, "pruned finished jobs");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pipeline, records, unavailable, MockServices, Operation};
    use common::{
        error::ServiceError,
        storage::{
            job_store::InMemoryJobStore,
            record_store::{InMemoryRecordStore, RecordStore},
        },
    };

    use crate::progress::JobSnapshot;

    struct Harness {
        coordinator: Arc<JobCoordinator>,
        records: Arc<InMemoryRecordStore>,
        services: Arc<MockServices>,
    }

    fn harness(words: &[&str]) -> Harness {
        harness_with_jobs(words, Arc::new(InMemoryJobStore::new()))
    }

    fn harness_with_jobs(words: &[&str], jobs: Arc<dyn JobStore>) -> Harness {
        let records = records(words);
        let services = Arc::new(MockServices::new());
        let pipeline = pipeline(Arc::clone(&records), Arc::clone(&services));
        Harness {
            coordinator: Arc::new(JobCoordinator::new(jobs, pipeline)),
            records,
            services,
        }
    }

    /// Job store whose writes of finished jobs fail a set number of times.
    struct FlakyJobStore {
        inner: InMemoryJobStore,
        terminal_failures: std::sync::atomic::AtomicU32,
    }

    impl FlakyJobStore {
        fn failing(times: u32) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryJobStore::new(),
                terminal_failures: std::sync::atomic::AtomicU32::new(times),
            })
        }
    }

    #[async_trait]
    impl JobStore for FlakyJobStore {
        async fn get(&self, job_id: &str) -> Result<Option<Job>, AppError> {
            self.inner.get(job_id).await
        }

        async fn put(&self, job: &Job) -> Result<(), AppError> {
            if job.is_terminal() {
                let remaining = self.terminal_failures.load(Ordering::SeqCst);
                if remaining > 0 {
                    if remaining != u32::MAX {
                        self.terminal_failures
                            .store(remaining.saturating_sub(1), Ordering::SeqCst);
                    }
                    return Err(AppError::InternalError("job store unavailable".into()));
                }
            }
            self.inner.put(job).await
        }

        async fn list(&self) -> Result<Vec<Job>, AppError> {
            self.inner.list().await
        }

        async fn remove(&self, job_id: &str) -> Result<(), AppError> {
            self.inner.remove(job_id).await
        }
    }

    fn request(words: &[&str], types: &[VisualType]) -> BatchRequest {
        BatchRequest {
            word_ids: words.iter().map(ToString::to_string).collect(),
            visual_types: types.to_vec(),
            options: BatchOptions::default(),
        }
    }

    async fn wait_until_terminal(coordinator: &JobCoordinator, job_id: &str) -> JobSnapshot {
        let reporter = coordinator.reporter();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = reporter.snapshot(job_id).await.expect("snapshot");
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job finishes in time")
    }

    fn stages(job: &Job) -> Vec<ItemStage> {
        job.items.iter().map(|item| item.stage).collect()
    }

    #[tokio::test]
    async fn healthy_batch_completes_every_item() {
        let h = harness(&["alpha", "bravo", "charlie"]);
        let job = h
            .coordinator
            .submit(request(&["alpha", "bravo", "charlie"], &[VisualType::Concept]))
            .await
            .expect("submit");
        assert_eq!(job.status, JobStatus::Pending);

        let finished = h.coordinator.run(&job.job_id).await.expect("run");

        assert_eq!(finished.status, JobStatus::Completed);
        let counters = finished.counters();
        assert_eq!(counters.total, 3);
        assert_eq!(counters.succeeded, 3);
        assert_eq!(counters.failed, 0);
        assert!(finished.completed_at.is_some());
        assert_eq!(h.records.visual_assets().await.len(), 3);
    }

    #[tokio::test]
    async fn finished_job_write_is_retried_after_store_errors() {
        let jobs = FlakyJobStore::failing(2);
        let h = harness_with_jobs(&["alpha"], Arc::clone(&jobs) as Arc<dyn JobStore>);
        let job = h
            .coordinator
            .submit(request(&["alpha"], &[VisualType::Concept]))
            .await
            .expect("submit");

        let finished = h.coordinator.run(&job.job_id).await.expect("run");

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(jobs.terminal_failures.load(Ordering::SeqCst), 0);
        let stored = jobs.get(&job.job_id).await.expect("get").expect("stored job");
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(!h.coordinator.stops.contains(&job.job_id));
    }

    #[tokio::test]
    async fn stop_flag_is_released_when_the_finished_job_cannot_be_written() {
        let jobs = FlakyJobStore::failing(u32::MAX);
        let h = harness_with_jobs(&["alpha"], Arc::clone(&jobs) as Arc<dyn JobStore>);
        let job = h
            .coordinator
            .submit(request(&["alpha"], &[VisualType::Concept]))
            .await
            .expect("submit");

        let err = h
            .coordinator
            .run(&job.job_id)
            .await
            .expect_err("terminal write keeps failing");

        assert!(matches!(err, AppError::InternalError(_)));
        assert!(!h.coordinator.stops.contains(&job.job_id));
    }

    #[tokio::test]
    async fn one_failing_item_does_not_fail_the_job() {
        let h = harness(&["alpha", "bravo", "charlie"]);
        h.services
            .fail_always(Operation::Image, "bravo", unavailable())
            .await;
        let job = h
            .coordinator
            .submit(request(&["alpha", "bravo", "charlie"], &[VisualType::Mnemonic]))
            .await
            .expect("submit");

        let finished = h.coordinator.run(&job.job_id).await.expect("run");

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(
            stages(&finished),
            vec![ItemStage::Succeeded, ItemStage::Failed, ItemStage::Succeeded]
        );
        let counters = finished.counters();
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.processed, counters.succeeded + counters.failed);
    }

    #[tokio::test]
    async fn stop_before_dispatch_cancels_with_nothing_processed() {
        let h = harness(&["alpha", "bravo"]);
        let job = h
            .coordinator
            .submit(request(&["alpha", "bravo"], &[VisualType::Concept]))
            .await
            .expect("submit");

        let status = h
            .coordinator
            .reporter()
            .request_stop(&job.job_id)
            .await
            .expect("stop");
        assert_eq!(status, JobStatus::Pending);

        let finished = h.coordinator.run(&job.job_id).await.expect("run");

        assert_eq!(finished.status, JobStatus::Cancelled);
        assert!(finished.stop_requested);
        assert_eq!(finished.counters().processed, 0);
        assert!(h.services.calls().await.is_empty());
    }

    #[tokio::test]
    async fn stop_mid_run_lets_in_flight_items_finish() {
        let h = harness(&["alpha", "bravo", "charlie"]);
        h.services
            .delay(Operation::Image, "alpha", Duration::from_millis(150))
            .await;
        let mut req = request(&["alpha", "bravo", "charlie"], &[VisualType::Concept]);
        req.options.concurrency = Some(1);
        let job_id = h.coordinator.start_batch(req).await.expect("start");

        let reporter = h.coordinator.reporter();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = reporter.snapshot(&job_id).await.expect("snapshot");
                if snapshot.currently_processing.is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("alpha starts");
        reporter.request_stop(&job_id).await.expect("stop");

        let snapshot = wait_until_terminal(&h.coordinator, &job_id).await;

        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert_eq!(snapshot.processed, 1);
        let stages: Vec<ItemStage> = snapshot
            .per_item_results
            .iter()
            .map(|item| item.stage)
            .collect();
        assert_eq!(
            stages,
            vec![
                ItemStage::Succeeded,
                ItemStage::ContentPending,
                ItemStage::ContentPending
            ]
        );
        assert_eq!(h.services.calls_for(Operation::Content).await, 1);
    }

    #[tokio::test]
    async fn transient_image_failures_are_absorbed_per_item() {
        let h = harness(&["alpha", "bravo", "charlie"]);
        h.services
            .fail(Operation::Image, "bravo", 2, unavailable())
            .await;
        let job = h
            .coordinator
            .submit(request(&["alpha", "bravo", "charlie"], &[VisualType::Concept]))
            .await
            .expect("submit");

        let finished = h.coordinator.run(&job.job_id).await.expect("run");

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.counters().succeeded, 3);
        let retries: Vec<u32> = finished.items.iter().map(|item| item.retries).collect();
        assert_eq!(retries, vec![0, 2, 0]);

        let metrics = h.coordinator.metrics();
        let image = &metrics.by_label["image"];
        assert_eq!(image.requests, 3);
        assert_eq!(image.retried_requests, 1);
        assert_eq!(image.total_retries, 2);
        assert_eq!(metrics.by_label["content"].retried_requests, 0);
    }

    #[tokio::test]
    async fn unparseable_content_is_flagged_as_fallback() {
        let h = harness(&["alpha", "bravo"]);
        h.services
            .fail_always(
                Operation::Content,
                "alpha",
                ServiceError::Parse("trailing characters".into()),
            )
            .await;
        let job = h
            .coordinator
            .submit(request(&["alpha", "bravo"], &[VisualType::Rhyme]))
            .await
            .expect("submit");

        let finished = h.coordinator.run(&job.job_id).await.expect("run");

        let flags: Vec<(ItemStage, bool)> = finished
            .items
            .iter()
            .map(|item| (item.stage, item.fallback_used))
            .collect();
        assert_eq!(
            flags,
            vec![(ItemStage::Succeeded, true), (ItemStage::Succeeded, false)]
        );
    }

    #[tokio::test]
    async fn items_keep_submission_order_when_finishing_out_of_order() {
        let h = harness(&["alpha", "bravo"]);
        h.services
            .delay(Operation::Image, "alpha", Duration::from_millis(80))
            .await;
        let job = h
            .coordinator
            .submit(request(&["alpha", "bravo"], &[VisualType::Concept]))
            .await
            .expect("submit");

        let finished = h.coordinator.run(&job.job_id).await.expect("run");

        let uploads: Vec<String> = h
            .services
            .calls()
            .await
            .into_iter()
            .filter(|call| call.starts_with("upload:"))
            .collect();
        assert_eq!(uploads, vec!["upload:bravo", "upload:alpha"]);
        let words: Vec<&str> = finished
            .items
            .iter()
            .map(|item| item.word_id.as_str())
            .collect();
        assert_eq!(words, vec!["alpha", "bravo"]);
    }

    #[tokio::test]
    async fn snapshots_stay_consistent_while_running() {
        let words = ["alpha", "bravo", "charlie", "delta", "echo"];
        let h = harness(&words);
        for word in &words {
            h.services
                .delay(Operation::Image, word, Duration::from_millis(15))
                .await;
        }
        h.services
            .fail_always(Operation::Image, "charlie", unavailable())
            .await;
        let job_id = h
            .coordinator
            .start_batch(request(&words, &[VisualType::Concept, VisualType::Rhyme]))
            .await
            .expect("start");

        let reporter = h.coordinator.reporter();
        let last = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let snapshot = reporter.snapshot(&job_id).await.expect("snapshot");
                assert_eq!(snapshot.processed, snapshot.succeeded + snapshot.failed);
                assert!(snapshot.processed <= snapshot.total);
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
        })
        .await
        .expect("job finishes");

        assert_eq!(last.status, JobStatus::Completed);
        assert_eq!(last.total, 10);
        assert_eq!(last.failed, 2);
        assert!(last.currently_processing.is_none());
    }

    #[tokio::test]
    async fn empty_lists_are_rejected_without_a_job() {
        let h = harness(&["alpha"]);
        let no_words = h
            .coordinator
            .submit(request(&["  "], &[VisualType::Concept]))
            .await;
        assert!(matches!(no_words, Err(AppError::Validation(_))));

        let no_types = h.coordinator.submit(request(&["alpha"], &[])).await;
        assert!(matches!(no_types, Err(AppError::Validation(_))));

        assert!(h.coordinator.list_jobs().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn fully_skipped_batch_fails_at_startup() {
        let h = harness(&["alpha"]);
        let job = h
            .coordinator
            .submit(request(&["alpha"], &[VisualType::Concept]))
            .await
            .expect("submit");
        h.coordinator.run(&job.job_id).await.expect("first run");

        let mut again = request(&["alpha"], &[VisualType::Concept]);
        again.options.skip_existing = true;
        let err = h
            .coordinator
            .submit(again)
            .await
            .expect_err("nothing to do");
        assert!(matches!(err, AppError::Startup(_)));

        let jobs = h.coordinator.list_jobs().await.expect("list");
        assert_eq!(jobs.len(), 2);
        assert!(jobs
            .iter()
            .any(|summary| summary.status == JobStatus::Failed && summary.error.is_some()));
    }

    #[tokio::test]
    async fn duplicate_pairs_collapse_to_one_item() {
        let h = harness(&["alpha"]);
        let job = h
            .coordinator
            .submit(request(
                &["alpha", "alpha"],
                &[VisualType::Concept, VisualType::Concept, VisualType::Rhyme],
            ))
            .await
            .expect("submit");

        let keys: Vec<ItemKey> = job.items.iter().map(JobItem::key).collect();
        assert_eq!(
            keys,
            vec![
                ItemKey::new("alpha", VisualType::Concept),
                ItemKey::new("alpha", VisualType::Rhyme),
            ]
        );
    }

    #[tokio::test]
    async fn failed_item_can_be_retried_without_duplicate_assets() {
        let h = harness(&["alpha", "bravo"]);
        h.services
            .fail(Operation::Image, "bravo", 4, unavailable())
            .await;
        let job = h
            .coordinator
            .submit(request(&["alpha", "bravo"], &[VisualType::Concept]))
            .await
            .expect("submit");
        let finished = h.coordinator.run(&job.job_id).await.expect("run");
        assert_eq!(finished.counters().failed, 1);

        let bravo = ItemKey::new("bravo", VisualType::Concept);
        let retried = h
            .coordinator
            .retry_item(&job.job_id, bravo.clone())
            .await
            .expect("retry");
        assert_eq!(retried.stage, ItemStage::Succeeded);

        let snapshot = h
            .coordinator
            .reporter()
            .snapshot(&job.job_id)
            .await
            .expect("snapshot");
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.succeeded, 2);
        assert_eq!(snapshot.failed, 0);

        let assets = h.records.visual_assets().await;
        assert_eq!(assets.len(), 2);
        assert!(h
            .records
            .get_visual_asset(&bravo)
            .await
            .expect("record store")
            .is_some());

        let again = h.coordinator.retry_item(&job.job_id, bravo).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn retry_is_refused_while_the_job_is_unfinished() {
        let h = harness(&["alpha"]);
        let job = h
            .coordinator
            .submit(request(&["alpha"], &[VisualType::Concept]))
            .await
            .expect("submit");

        let result = h
            .coordinator
            .retry_item(&job.job_id, ItemKey::new("alpha", VisualType::Concept))
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn a_job_runs_only_once() {
        let h = harness(&["alpha"]);
        let job = h
            .coordinator
            .submit(request(&["alpha"], &[VisualType::Concept]))
            .await
            .expect("submit");
        h.coordinator.run(&job.job_id).await.expect("first run");

        let second = h.coordinator.run(&job.job_id).await;
        assert!(matches!(second, Err(AppError::Conflict(_))));
        assert!(matches!(
            h.coordinator.run("missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn prune_removes_only_expired_terminal_jobs() {
        let h = harness(&["alpha"]);
        let done = h
            .coordinator
            .submit(request(&["alpha"], &[VisualType::Concept]))
            .await
            .expect("submit");
        h.coordinator.run(&done.job_id).await.expect("run");
        let pending = h
            .coordinator
            .submit(request(&["alpha"], &[VisualType::Rhyme]))
            .await
            .expect("submit pending");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let kept = h
            .coordinator
            .prune_jobs(Duration::from_secs(3600))
            .await
            .expect("prune with long retention");
        assert_eq!(kept, 0);

        let removed = h
            .coordinator
            .prune_jobs(Duration::ZERO)
            .await
            .expect("prune");
        assert_eq!(removed, 1);

        let remaining: Vec<String> = h
            .coordinator
            .list_jobs()
            .await
            .expect("list")
            .into_iter()
            .map(|summary| summary.job_id)
            .collect();
        assert_eq!(remaining, vec![pending.job_id]);
    }

    #[tokio::test]
    async fn interrupted_jobs_are_failed_on_recovery() {
        let h = harness(&["alpha"]);
        let done = h
            .coordinator
            .submit(request(&["alpha"], &[VisualType::Concept]))
            .await
            .expect("submit");
        h.coordinator.run(&done.job_id).await.expect("run");
        let stale = h
            .coordinator
            .submit(request(&["alpha"], &[VisualType::Rhyme]))
            .await
            .expect("submit stale");

        let failed = h
            .coordinator
            .fail_interrupted_jobs()
            .await
            .expect("recover");
        assert_eq!(failed, 1);

        let snapshot = h
            .coordinator
            .reporter()
            .snapshot(&stale.job_id)
            .await
            .expect("snapshot");
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(
            snapshot.error.as_deref(),
            Some("interrupted before completion")
        );
        let untouched = h
            .coordinator
            .reporter()
            .snapshot(&done.job_id)
            .await
            .expect("snapshot");
        assert_eq!(untouched.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn metrics_are_shared_across_jobs() {
        let h = harness(&["alpha"]);
        h.services
            .fail(Operation::Content, "alpha", 1, unavailable())
            .await;
        let job = h
            .coordinator
            .submit(request(&["alpha"], &[VisualType::Concept]))
            .await
            .expect("submit");
        h.coordinator.run(&job.job_id).await.expect("run");

        let metrics = h.coordinator.metrics();
        let content = metrics.by_label.get("content").expect("content label");
        assert_eq!(content.requests, 1);
        assert_eq!(content.total_retries, 1);
    }
}
