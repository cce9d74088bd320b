use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use state_machines::state_machine;
use uuid::Uuid;

use crate::error::AppError;

use super::{
    visual_asset::{ItemKey, VisualAsset, VisualType},
    StoredObject,
};

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    #[serde(rename = "Pending")]
    #[default]
    Pending,
    #[serde(rename = "Processing")]
    Processing,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Failed")]
    Failed,
    #[serde(rename = "Cancelled")]
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Processing => "Processing",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum JobTransition {
    Start,
    Complete,
    Cancel,
    Fail,
}

impl JobTransition {
    fn as_str(&self) -> &'static str {
        match self {
            JobTransition::Start => "start",
            JobTransition::Complete => "complete",
            JobTransition::Cancel => "cancel",
            JobTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: JobLifecycleMachine,
        initial: Pending,
        states: [Pending, Processing, Completed, Failed, Cancelled],
        events {
            start {
                transition: { from: Pending, to: Processing }
            }
            complete {
                transition: { from: Processing, to: Completed }
            }
            cancel {
                transition: { from: Processing, to: Cancelled }
            }
            fail {
                transition: { from: Pending, to: Failed }
                transition: { from: Processing, to: Failed }
            }
        }
    }

    pub(super) fn pending() -> JobLifecycleMachine<(), Pending> {
        JobLifecycleMachine::new(())
    }

    pub(super) fn processing(
    ) -> Result<JobLifecycleMachine<(), Processing>, state_machines::core::GuardError> {
        pending().start().map_err(|(_, guard)| guard)
    }
}

fn invalid_transition(status: JobStatus, event: JobTransition) -> AppError {
    AppError::Conflict(format!(
        "Invalid job transition: {} -> {}",
        status.as_str(),
        event.as_str()
    ))
}

fn compute_next_status(status: JobStatus, event: JobTransition) -> Result<JobStatus, AppError> {
    use lifecycle::{pending, processing};
    match (status, event) {
        (JobStatus::Pending, JobTransition::Start) => pending()
            .start()
            .map(|_| JobStatus::Processing)
            .map_err(|_| invalid_transition(status, event)),
        (JobStatus::Pending, JobTransition::Fail) => pending()
            .fail()
            .map(|_| JobStatus::Failed)
            .map_err(|_| invalid_transition(status, event)),
        (JobStatus::Processing, JobTransition::Complete) => processing()
            .map_err(|_| invalid_transition(status, event))?
            .complete()
            .map(|_| JobStatus::Completed)
            .map_err(|_| invalid_transition(status, event)),
        (JobStatus::Processing, JobTransition::Cancel) => processing()
            .map_err(|_| invalid_transition(status, event))?
            .cancel()
            .map(|_| JobStatus::Cancelled)
            .map_err(|_| invalid_transition(status, event)),
        (JobStatus::Processing, JobTransition::Fail) => processing()
            .map_err(|_| invalid_transition(status, event))?
            .fail()
            .map(|_| JobStatus::Failed)
            .map_err(|_| invalid_transition(status, event)),
        _ => Err(invalid_transition(status, event)),
    }
}

/// Progress of one item through the three-stage pipeline. Stages only move forward.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ItemStage {
    #[default]
    ContentPending,
    ContentDone,
    ImagePending,
    ImageDone,
    PersistPending,
    Succeeded,
    Failed,
}

impl ItemStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStage::ContentPending => "ContentPending",
            ItemStage::ContentDone => "ContentDone",
            ItemStage::ImagePending => "ImagePending",
            ItemStage::ImageDone => "ImageDone",
            ItemStage::PersistPending => "PersistPending",
            ItemStage::Succeeded => "Succeeded",
            ItemStage::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStage::Succeeded | ItemStage::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            ItemStage::ContentPending => 0,
            ItemStage::ContentDone => 1,
            ItemStage::ImagePending => 2,
            ItemStage::ImageDone => 3,
            ItemStage::PersistPending => 4,
            ItemStage::Succeeded => 5,
            ItemStage::Failed => u8::MAX,
        }
    }
}

/// One `(word, visual type)` unit of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobItem {
    pub word_id: String,
    pub visual_type: VisualType,
    pub stage: ItemStage,
    #[serde(default)]
    pub artifact: Option<VisualAsset>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobItem {
    pub fn new(key: ItemKey) -> Self {
        Self {
            word_id: key.word_id,
            visual_type: key.visual_type,
            stage: ItemStage::ContentPending,
            artifact: None,
            error: None,
            retries: 0,
            fallback_used: false,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.word_id.clone(), self.visual_type)
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Records dispatch to a worker without changing the stage.
    pub fn mark_started(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.started_at.is_some() && !self.is_terminal()
    }

    /// Moves to the next non-terminal stage. Skips and backward moves are rejected.
    pub fn advance(&mut self, next: ItemStage) -> Result<(), AppError> {
        if next.is_terminal() || next.rank() != self.stage.rank().saturating_add(1) {
            return Err(self.invalid_stage(next));
        }
        self.mark_started();
        self.stage = next;
        Ok(())
    }

    pub fn succeed(&mut self, artifact: VisualAsset) -> Result<(), AppError> {
        if self.stage != ItemStage::PersistPending {
            return Err(self.invalid_stage(ItemStage::Succeeded));
        }
        self.fallback_used = artifact.fallback_used;
        self.artifact = Some(artifact);
        self.stage = ItemStage::Succeeded;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), AppError> {
        if self.is_terminal() {
            return Err(self.invalid_stage(ItemStage::Failed));
        }
        self.mark_started();
        self.error = Some(reason.into());
        self.stage = ItemStage::Failed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn invalid_stage(&self, next: ItemStage) -> AppError {
        AppError::Conflict(format!(
            "Invalid stage transition for {}: {} -> {}",
            self.key(),
            self.stage.as_str(),
            next.as_str()
        ))
    }
}

/// Options supplied with a batch submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchOptions {
    /// Overrides the configured number of items processed at once.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Leave out `(word, type)` pairs that already have a visual.
    #[serde(default)]
    pub skip_existing: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCounters {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(flatten)]
    pub counters: JobCounters,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// One batch generation run. Items keep submission order; counters are always derived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub items: Vec<JobItem>,
    #[serde(default)]
    pub options: BatchOptions,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stop_requested: bool,
    /// Set only when the job failed before processing began.
    #[serde(default)]
    pub error: Option<String>,
}

impl StoredObject for Job {
    fn table_name() -> &'static str {
        "job"
    }

    fn record_id(&self) -> String {
        self.job_id.clone()
    }
}

impl Job {
    pub fn new(keys: Vec<ItemKey>, options: BatchOptions) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            items: keys.into_iter().map(JobItem::new).collect(),
            options,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            stop_requested: false,
            error: None,
        }
    }

    pub fn counters(&self) -> JobCounters {
        let succeeded = self
            .items
            .iter()
            .filter(|item| item.stage == ItemStage::Succeeded)
            .count();
        let failed = self
            .items
            .iter()
            .filter(|item| item.stage == ItemStage::Failed)
            .count();
        JobCounters {
            total: self.items.len(),
            processed: succeeded.saturating_add(failed),
            succeeded,
            failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn position(&self, key: &ItemKey) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.word_id == key.word_id && item.visual_type == key.visual_type)
    }

    pub fn item(&self, key: &ItemKey) -> Option<&JobItem> {
        self.position(key).and_then(|idx| self.items.get(idx))
    }

    /// Replaces the item with the same key as a whole; a reader never sees half an update.
    pub fn commit_item(&mut self, item: JobItem) -> Result<(), AppError> {
        let key = item.key();
        let slot = self
            .position(&key)
            .and_then(|idx| self.items.get_mut(idx))
            .ok_or_else(|| AppError::NotFound(format!("item {key} in job {}", self.job_id)))?;
        if slot.is_terminal() {
            return Err(AppError::Conflict(format!(
                "item {key} is already {}",
                slot.stage.as_str()
            )));
        }
        *slot = item;
        Ok(())
    }

    /// Swaps a failed item for a freshly processed one once the job has finished.
    pub fn replace_failed_item(&mut self, item: JobItem) -> Result<(), AppError> {
        let key = item.key();
        let slot = self
            .position(&key)
            .and_then(|idx| self.items.get_mut(idx))
            .ok_or_else(|| AppError::NotFound(format!("item {key} in job {}", self.job_id)))?;
        if slot.stage != ItemStage::Failed {
            return Err(AppError::Conflict(format!(
                "item {key} is {}, only failed items can be retried",
                slot.stage.as_str()
            )));
        }
        *slot = item;
        Ok(())
    }

    pub fn mark_processing(&mut self) -> Result<(), AppError> {
        self.status = compute_next_status(self.status, JobTransition::Start)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), AppError> {
        let counters = self.counters();
        if self.stop_requested || counters.processed != counters.total {
            return Err(invalid_transition(self.status, JobTransition::Complete));
        }
        self.status = compute_next_status(self.status, JobTransition::Complete)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<(), AppError> {
        if !self.stop_requested {
            return Err(invalid_transition(self.status, JobTransition::Cancel));
        }
        self.status = compute_next_status(self.status, JobTransition::Cancel)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), AppError> {
        self.status = compute_next_status(self.status, JobTransition::Fail)?;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            status: self.status,
            counters: self.counters(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }
}
