use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        job_store::JobStore,
        types::{
            job::{ItemStage, Job, JobItem, JobStatus},
            visual_asset::{ItemKey, VisualType},
        },
    },
};
use serde::Serialize;
use tracing::info;

/// Cooperative stop flags for running jobs, shared by the coordinator and the reporter.
#[derive(Debug, Default)]
pub struct StopRegistry {
    flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl StopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag for `job_id`, created unset on first use.
    pub fn flag(&self, job_id: &str) -> Arc<AtomicBool> {
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(flags.entry(job_id.to_string()).or_default())
    }

    pub fn request(&self, job_id: &str) {
        self.flag(job_id).store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self, job_id: &str) -> bool {
        let flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        flags
            .get(job_id)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn remove(&self, job_id: &str) {
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        flags.remove(job_id);
    }

    #[cfg(test)]
    pub fn contains(&self, job_id: &str) -> bool {
        let flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        flags.contains_key(job_id)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ItemProgress {
    pub word_id: String,
    pub visual_type: VisualType,
    pub stage: ItemStage,
    pub image_url: Option<String>,
    pub error: Option<String>,
    pub retries: u32,
    pub fallback_used: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&JobItem> for ItemProgress {
    fn from(item: &JobItem) -> Self {
        Self {
            word_id: item.word_id.clone(),
            visual_type: item.visual_type,
            stage: item.stage,
            image_url: item.artifact.as_ref().map(|asset| asset.image_url.clone()),
            error: item.error.clone(),
            retries: item.retries,
            fallback_used: item.fallback_used,
            started_at: item.started_at,
            finished_at: item.finished_at,
        }
    }
}

/// Point-in-time view of a job, built from one consistent copy.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Earliest in-flight item in submission order.
    pub currently_processing: Option<ItemKey>,
    pub stop_requested: bool,
    pub per_item_results: Vec<ItemProgress>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn from_job(job: &Job, stop_requested: bool) -> Self {
        let counters = job.counters();
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            total: counters.total,
            processed: counters.processed,
            succeeded: counters.succeeded,
            failed: counters.failed,
            currently_processing: job
                .items
                .iter()
                .find(|item| item.is_in_flight())
                .map(JobItem::key),
            stop_requested: job.stop_requested || stop_requested,
            per_item_results: job.items.iter().map(ItemProgress::from).collect(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error.clone(),
        }
    }
}

/// Read side of the job registry plus the stop signal.
#[derive(Clone)]
pub struct ProgressReporter {
    jobs: Arc<dyn JobStore>,
    stops: Arc<StopRegistry>,
}

impl ProgressReporter {
    pub fn new(jobs: Arc<dyn JobStore>, stops: Arc<StopRegistry>) -> Self {
        Self { jobs, stops }
    }

    async fn load(&self, job_id: &str) -> Result<Job, AppError> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))
    }

    pub async fn snapshot(&self, job_id: &str) -> Result<JobSnapshot, AppError> {
        let job = self.load(job_id).await?;
        let stop_requested = !job.is_terminal() && self.stops.is_requested(job_id);
        Ok(JobSnapshot::from_job(&job, stop_requested))
    }

    /// Asks a running job to stop dispatching. Returns the status at the time of the request;
    /// callers poll [`ProgressReporter::snapshot`] until it is terminal.
    pub async fn request_stop(&self, job_id: &str) -> Result<JobStatus, AppError> {
        let job = self.load(job_id).await?;
        if job.is_terminal() {
            return Ok(job.status);
        }
        self.stops.request(job_id);
        info!(%job_id, status = job.status.as_str(), "stop requested");
        Ok(job.status)
    }
}
