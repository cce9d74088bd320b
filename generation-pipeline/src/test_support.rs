use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::ServiceError,
    storage::{
        record_store::InMemoryRecordStore,
        types::{
            job::{ItemStage, JobItem},
            visual_asset::VisualType,
            word_context::WordContext,
        },
    },
};
use tokio::sync::Mutex;

use crate::{
    invoker::RetryPolicy,
    pipeline::{
        ContentDraft, GenerationConfig, GenerationPipeline, GenerationServices, GenerationTuning,
        ItemObserver, StyleProfile,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Content,
    Image,
    Upload,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Content => "content",
            Operation::Image => "image",
            Operation::Upload => "upload",
        }
    }
}

struct Fault {
    operation: Operation,
    word_id: String,
    remaining: u32,
    error: ServiceError,
}

/// Scriptable services. Prompts quote the word id so image calls can be attributed to a word.
#[derive(Default)]
pub struct MockServices {
    calls: Mutex<Vec<String>>,
    faults: Mutex<Vec<Fault>>,
    delays: Mutex<HashMap<(Operation, String), Duration>>,
}

impl MockServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `times` calls of `operation` for `word_id`.
    pub async fn fail(&self, operation: Operation, word_id: &str, times: u32, error: ServiceError) {
        self.faults.lock().await.push(Fault {
            operation,
            word_id: word_id.to_string(),
            remaining: times,
            error,
        });
    }

    pub async fn fail_always(&self, operation: Operation, word_id: &str, error: ServiceError) {
        self.fail(operation, word_id, u32::MAX, error).await;
    }

    pub async fn delay(&self, operation: Operation, word_id: &str, delay: Duration) {
        self.delays
            .lock()
            .await
            .insert((operation, word_id.to_string()), delay);
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn calls_for(&self, operation: Operation) -> usize {
        let prefix = format!("{}:", operation.as_str());
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .count()
    }

    async fn enter(&self, operation: Operation, word_id: &str) -> Result<(), ServiceError> {
        self.calls
            .lock()
            .await
            .push(format!("{}:{word_id}", operation.as_str()));

        let delay = self
            .delays
            .lock()
            .await
            .get(&(operation, word_id.to_string()))
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut faults = self.faults.lock().await;
        if let Some(fault) = faults
            .iter_mut()
            .find(|f| f.operation == operation && f.word_id == word_id && f.remaining > 0)
        {
            if fault.remaining != u32::MAX {
                fault.remaining = fault.remaining.saturating_sub(1);
            }
            return Err(fault.error.clone());
        }
        Ok(())
    }
}

fn quoted_word(prompt: &str) -> String {
    prompt.split('"').nth(1).unwrap_or_default().to_string()
}

#[async_trait]
impl GenerationServices for MockServices {
    async fn synthesize_content(
        &self,
        visual_type: VisualType,
        word: &WordContext,
    ) -> Result<ContentDraft, ServiceError> {
        self.enter(Operation::Content, &word.word_id).await?;
        Ok(ContentDraft {
            image_prompt: format!("{visual_type} picture of \"{}\"", word.word_id),
            caption_primary: format!("{} caption", word.headword),
            caption_secondary: format!("{} 说明", word.headword),
        })
    }

    async fn synthesize_image(
        &self,
        prompt: &str,
        _profile: &StyleProfile,
    ) -> Result<Bytes, ServiceError> {
        let word_id = quoted_word(prompt);
        self.enter(Operation::Image, &word_id).await?;
        Ok(Bytes::from(format!("png:{word_id}")))
    }

    async fn upload_asset(&self, key: &str, _bytes: Bytes) -> Result<String, ServiceError> {
        let word_id = key.split('/').nth(1).unwrap_or_default().to_string();
        self.enter(Operation::Upload, &word_id).await?;
        Ok(format!("/assets/{key}"))
    }
}

/// Collects the stage of every published item update.
#[derive(Default)]
pub struct RecordingObserver {
    pub updates: Mutex<Vec<(String, ItemStage)>>,
}

#[async_trait]
impl ItemObserver for RecordingObserver {
    async fn on_update(&self, item: &JobItem) {
        self.updates
            .lock()
            .await
            .push((item.word_id.clone(), item.stage));
    }
}

pub fn unavailable() -> ServiceError {
    ServiceError::Status {
        status: 503,
        body: "upstream overloaded".into(),
    }
}

pub fn word(word_id: &str) -> WordContext {
    let mut ctx = WordContext::new(word_id, word_id);
    ctx.definitions = vec![format!("meaning of {word_id}")];
    ctx.translations = vec![format!("{word_id} 的意思")];
    ctx
}

pub fn records(word_ids: &[&str]) -> Arc<InMemoryRecordStore> {
    Arc::new(InMemoryRecordStore::with_words(
        word_ids.iter().map(|id| word(id)),
    ))
}

pub fn fast_config() -> GenerationConfig {
    GenerationConfig {
        tuning: GenerationTuning {
            concurrency: 2,
            word_interval: Duration::ZERO,
            image_interval: Duration::ZERO,
            retry: RetryPolicy {
                max_attempts: 4,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                timeout: Duration::from_secs(5),
                jitter: false,
            },
        },
    }
}

pub fn pipeline(
    records: Arc<InMemoryRecordStore>,
    services: Arc<MockServices>,
) -> Arc<GenerationPipeline> {
    Arc::new(GenerationPipeline::with_services(
        records,
        fast_config(),
        services,
    ))
}
