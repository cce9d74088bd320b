use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::AppError;

use super::{db::SurrealDbClient, types::job::Job};

/// Registry of batch jobs. Each `put` replaces the whole job, so readers always see a
/// consistent copy.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, job_id: &str) -> Result<Option<Job>, AppError>;

    async fn put(&self, job: &Job) -> Result<(), AppError>;

    /// All jobs, oldest first.
    async fn list(&self) -> Result<Vec<Job>, AppError>;

    async fn remove(&self, job_id: &str) -> Result<(), AppError>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<Job>, AppError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn put(&self, job: &Job) -> Result<(), AppError> {
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Job>, AppError> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn remove(&self, job_id: &str) -> Result<(), AppError> {
        self.jobs.write().await.remove(job_id);
        Ok(())
    }
}

pub struct SurrealJobStore {
    db: Arc<SurrealDbClient>,
}

impl SurrealJobStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for SurrealJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<Job>, AppError> {
        Ok(self.db.get_item::<Job>(job_id).await?)
    }

    async fn put(&self, job: &Job) -> Result<(), AppError> {
        self.db.upsert_item(job.clone()).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Job>, AppError> {
        let mut jobs = self.db.get_all_stored_items::<Job>().await?;
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn remove(&self, job_id: &str) -> Result<(), AppError> {
        self.db.delete_item::<Job>(job_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{
        job::{BatchOptions, JobStatus},
        visual_asset::{ItemKey, VisualType},
    };
    use uuid::Uuid;

    fn sample_job(words: &[&str]) -> Job {
        Job::new(
            words
                .iter()
                .map(|w| ItemKey::new(*w, VisualType::Mnemonic))
                .collect(),
            BatchOptions::default(),
        )
    }

    async fn exercise_store(store: &dyn JobStore) {
        let mut first = sample_job(&["w-1", "w-2"]);
        let second = sample_job(&["w-3"]);
        store.put(&first).await.expect("put first");
        store.put(&second).await.expect("put second");

        first.mark_processing().expect("start");
        first.items[0].fail("image timeout").expect("fail item");
        store.put(&first).await.expect("overwrite first");

        let fetched = store
            .get(&first.job_id)
            .await
            .expect("get")
            .expect("job present");
        assert_eq!(fetched.status, JobStatus::Processing);
        assert_eq!(fetched.counters().failed, 1);
        assert_eq!(
            fetched
                .items
                .iter()
                .map(|i| i.word_id.as_str())
                .collect::<Vec<_>>(),
            vec!["w-1", "w-2"]
        );

        let listed = store.list().await.expect("list");
        assert_eq!(listed.len(), 2);

        store.remove(&second.job_id).await.expect("remove");
        assert!(store.get(&second.job_id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn in_memory_store_overwrites_and_lists() {
        let store = InMemoryJobStore::new();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn surreal_store_overwrites_and_lists() {
        let db = SurrealDbClient::memory("job_store_test", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        db.ensure_initialized().await.expect("indexes");
        let store = SurrealJobStore::new(Arc::new(db));
        exercise_store(&store).await;
    }
}
