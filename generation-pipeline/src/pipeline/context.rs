use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        record_store::RecordStore,
        types::{
            job::{ItemStage, JobItem},
            visual_asset::ItemKey,
            word_context::WordContext,
        },
    },
};
use tracing::error;

use crate::{invoker::ResilientInvoker, pacer::RatePacer};

use super::{content_draft::ContentDraft, services::GenerationServices};

/// Receives a copy of the item every time it changes stage.
#[async_trait]
pub trait ItemObserver: Send + Sync {
    async fn on_update(&self, item: &JobItem);
}

pub struct NoopObserver;

#[async_trait]
impl ItemObserver for NoopObserver {
    async fn on_update(&self, _item: &JobItem) {}
}

pub struct PipelineContext<'a> {
    pub key: ItemKey,
    pub item: JobItem,
    pub services: &'a dyn GenerationServices,
    pub records: &'a dyn RecordStore,
    pub invoker: &'a ResilientInvoker,
    pub pacer: &'a RatePacer,
    observer: &'a dyn ItemObserver,
    pub word: Option<WordContext>,
    pub draft: Option<ContentDraft>,
    pub image: Option<Bytes>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        item: JobItem,
        services: &'a dyn GenerationServices,
        records: &'a dyn RecordStore,
        invoker: &'a ResilientInvoker,
        pacer: &'a RatePacer,
        observer: &'a dyn ItemObserver,
    ) -> Self {
        Self {
            key: item.key(),
            item,
            services,
            records,
            invoker,
            pacer,
            observer,
            word: None,
            draft: None,
            image: None,
        }
    }

    pub fn word(&self) -> Result<&WordContext, AppError> {
        self.word
            .as_ref()
            .ok_or_else(|| AppError::InternalError("word context expected to be loaded".into()))
    }

    pub fn draft(&self) -> Result<&ContentDraft, AppError> {
        self.draft
            .as_ref()
            .ok_or_else(|| AppError::InternalError("content draft expected to be available".into()))
    }

    pub fn take_draft(&mut self) -> Result<ContentDraft, AppError> {
        self.draft.take().ok_or_else(|| {
            AppError::InternalError("content draft expected to be available for persistence".into())
        })
    }

    pub fn take_image(&mut self) -> Result<Bytes, AppError> {
        self.image.take().ok_or_else(|| {
            AppError::InternalError("image bytes expected to be available for persistence".into())
        })
    }

    pub fn add_retries(&mut self, retries: u32) {
        self.item.retries = self.item.retries.saturating_add(retries);
    }

    pub async fn notify(&self) {
        self.observer.on_update(&self.item).await;
    }

    /// Moves the working item to `stage` and publishes it.
    pub async fn advance(&mut self, stage: ItemStage) -> Result<(), AppError> {
        self.item.advance(stage)?;
        self.notify().await;
        Ok(())
    }

    /// Marks the working item failed with the error's message.
    pub fn abort(&mut self, err: &AppError) {
        let reason = match err {
            AppError::Processing(message) => message.clone(),
            other => other.to_string(),
        };
        error!(
            word_id = %self.key.word_id,
            visual_type = %self.key.visual_type,
            stage = self.item.stage.as_str(),
            error = %reason,
            "visual pipeline aborted"
        );
        if let Err(conflict) = self.item.fail(reason) {
            error!(error = %conflict, "item already terminal when aborting");
        }
    }

    pub fn into_item(self) -> JobItem {
        self.item
    }
}
