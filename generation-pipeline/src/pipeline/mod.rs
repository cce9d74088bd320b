mod config;
mod content_draft;
mod context;
mod fallback;
mod profiles;
mod services;
mod stages;
mod state;


pub use config::{GenerationConfig, GenerationTuning};
pub use content_draft::ContentDraft;
pub use context::{ItemObserver, NoopObserver};
pub use fallback::template_draft;
pub use profiles::StyleProfile;
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultGenerationServices, GenerationServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        record_store::RecordStore,
        store::StorageManager,
        types::{job::JobItem, visual_asset::ItemKey},
    },
    utils::config::AppConfig,
};
use tracing::info;

use crate::{
    invoker::{MetricsSnapshot, ResilientInvoker},
    pacer::RatePacer,
};

use self::{
    context::PipelineContext,
    stages::{load_word, persist_asset, synthesize_content, synthesize_image},
    state::ready,
};

/// Produces one visual per `(word, visual type)` item: content, image, then persistence.
#[allow(clippy::module_name_repetitions)]
pub struct GenerationPipeline {
    records: Arc<dyn RecordStore>,
    pipeline_config: GenerationConfig,
    services: Arc<dyn GenerationServices>,
    invoker: ResilientInvoker,
    pacer: RatePacer,
}

impl GenerationPipeline {
    pub fn new(records: Arc<dyn RecordStore>, config: &AppConfig, storage: StorageManager) -> Self {
        let services = DefaultGenerationServices::new(config.clone(), storage);
        Self::with_services(
            records,
            GenerationConfig::from_app_config(config),
            Arc::new(services),
        )
    }

    pub fn with_services(
        records: Arc<dyn RecordStore>,
        pipeline_config: GenerationConfig,
        services: Arc<dyn GenerationServices>,
    ) -> Self {
        let tuning = &pipeline_config.tuning;
        let invoker = ResilientInvoker::new(tuning.retry.clone());
        let pacer = RatePacer::new(tuning.word_interval, tuning.image_interval);
        Self {
            records,
            pipeline_config,
            services,
            invoker,
            pacer,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.pipeline_config
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.invoker.metrics().snapshot()
    }

    /// Runs every stage for `item` and returns it in a terminal stage. Stage failures end up on
    /// the item, never as an error.
    #[tracing::instrument(
        skip_all,
        fields(word_id = %item.word_id, visual_type = %item.visual_type)
    )]
    pub async fn process(&self, mut item: JobItem, observer: &dyn ItemObserver) -> JobItem {
        item.mark_started();
        let mut ctx = PipelineContext::new(
            item,
            self.services.as_ref(),
            self.records.as_ref(),
            &self.invoker,
            &self.pacer,
            observer,
        );
        ctx.notify().await;

        if let Err(err) = self.drive_pipeline(&mut ctx).await {
            ctx.abort(&err);
        }
        ctx.into_item()
    }

    /// Processes a fresh item outside of any job.
    pub async fn process_item(&self, key: ItemKey) -> JobItem {
        self.process(JobItem::new(key), &NoopObserver).await
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    async fn drive_pipeline(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let pipeline_started = Instant::now();

        load_word(ctx).await?;
        let machine = ready();

        let stage_start = Instant::now();
        let machine = synthesize_content(machine, ctx).await?;
        let content_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = synthesize_image(machine, ctx).await?;
        let image_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = persist_asset(machine, ctx).await?;
        let persist_duration = stage_start.elapsed();

        info!(
            word_id = %ctx.key.word_id,
            visual_type = %ctx.key.visual_type,
            retries = ctx.item.retries,
            fallback_used = ctx.item.fallback_used,
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            content_ms = Self::duration_millis(content_duration),
            image_ms = Self::duration_millis(image_duration),
            persist_ms = Self::duration_millis(persist_duration),
            "visual generated"
        );

        Ok(())
    }
}
