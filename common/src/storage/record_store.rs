use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::AppError;

use super::{
    db::SurrealDbClient,
    types::{
        visual_asset::{ItemKey, VisualAsset},
        word_context::WordContext,
        StoredObject,
    },
};

/// Vocabulary records and the visuals attached to them.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_word_context(&self, word_id: &str) -> Result<Option<WordContext>, AppError>;

    /// Writes the asset under its `(word_id, visual_type)` key, replacing any previous one.
    async fn upsert_visual_asset(&self, asset: VisualAsset) -> Result<VisualAsset, AppError>;

    async fn get_visual_asset(&self, key: &ItemKey) -> Result<Option<VisualAsset>, AppError>;
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    words: RwLock<HashMap<String, WordContext>>,
    assets: RwLock<HashMap<ItemKey, VisualAsset>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_words(words: impl IntoIterator<Item = WordContext>) -> Self {
        let words = words
            .into_iter()
            .map(|ctx| (ctx.word_id.clone(), ctx))
            .collect();
        Self {
            words: RwLock::new(words),
            assets: RwLock::default(),
        }
    }

    pub async fn insert_word_context(&self, ctx: WordContext) {
        self.words.write().await.insert(ctx.word_id.clone(), ctx);
    }

    pub async fn visual_assets(&self) -> Vec<VisualAsset> {
        let mut assets: Vec<VisualAsset> = self.assets.read().await.values().cloned().collect();
        assets.sort_by_key(VisualAsset::key);
        assets
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_word_context(&self, word_id: &str) -> Result<Option<WordContext>, AppError> {
        Ok(self.words.read().await.get(word_id).cloned())
    }

    async fn upsert_visual_asset(&self, mut asset: VisualAsset) -> Result<VisualAsset, AppError> {
        let mut assets = self.assets.write().await;
        if let Some(existing) = assets.get(&asset.key()) {
            asset.created_at = existing.created_at;
        }
        assets.insert(asset.key(), asset.clone());
        Ok(asset)
    }

    async fn get_visual_asset(&self, key: &ItemKey) -> Result<Option<VisualAsset>, AppError> {
        Ok(self.assets.read().await.get(key).cloned())
    }
}

pub struct SurrealRecordStore {
    db: Arc<SurrealDbClient>,
}

impl SurrealRecordStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    pub async fn store_word_context(&self, ctx: WordContext) -> Result<(), AppError> {
        self.db.upsert_item(ctx).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SurrealRecordStore {
    async fn get_word_context(&self, word_id: &str) -> Result<Option<WordContext>, AppError> {
        Ok(self.db.get_item::<WordContext>(word_id).await?)
    }

    async fn upsert_visual_asset(&self, mut asset: VisualAsset) -> Result<VisualAsset, AppError> {
        if let Some(existing) = self
            .db
            .get_item::<VisualAsset>(&asset.record_id())
            .await?
        {
            asset.created_at = existing.created_at;
        }
        asset.updated_at = Utc::now();
        let stored = self.db.upsert_item(asset).await?;
        stored.ok_or_else(|| AppError::InternalError("visual asset upsert returned nothing".into()))
    }

    async fn get_visual_asset(&self, key: &ItemKey) -> Result<Option<VisualAsset>, AppError> {
        Ok(self.db.get_item::<VisualAsset>(&key.record_id()).await?)
    }
}
