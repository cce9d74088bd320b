use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_content_model")]
    pub content_model: String,
    /// Falls back to `openai_api_key` when unset.
    #[serde(default)]
    pub image_api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub image_base_url: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default = "default_surrealdb_address")]
    pub surrealdb_address: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_username: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_public_asset_base_url")]
    pub public_asset_base_url: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_primary_locale")]
    pub primary_locale: String,
    #[serde(default = "default_secondary_locale")]
    pub secondary_locale: String,
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    #[serde(default = "default_image_interval_ms")]
    pub image_interval_ms: u64,
    #[serde(default = "default_word_interval_ms")]
    pub word_interval_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_retry_timeout_secs")]
    pub retry_timeout_secs: u64,
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: bool,
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
}

fn default_surrealdb_address() -> String {
    "ws://127.0.0.1:8000".to_string()
}

fn default_surrealdb_credential() -> String {
    "root".to_string()
}

fn default_surrealdb_namespace() -> String {
    "vocab".to_string()
}

fn default_surrealdb_database() -> String {
    "visuals".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_content_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_image_model() -> String {
    "gpt-image-1".to_string()
}

fn default_image_size() -> u32 {
    1024
}

fn default_public_asset_base_url() -> String {
    "/assets".to_string()
}

fn default_http_port() -> u16 {
    3000
}

fn default_primary_locale() -> String {
    "en".to_string()
}

fn default_secondary_locale() -> String {
    "zh-CN".to_string()
}

fn default_batch_concurrency() -> usize {
    2
}

fn default_image_interval_ms() -> u64 {
    2_000
}

fn default_word_interval_ms() -> u64 {
    1_000
}

fn default_retry_max_attempts() -> u32 {
    4
}

fn default_retry_base_delay_ms() -> u64 {
    300
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_retry_timeout_secs() -> u64 {
    30
}

fn default_retry_jitter() -> bool {
    true
}

fn default_job_retention_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            content_model: default_content_model(),
            image_api_key: None,
            image_base_url: default_base_url(),
            image_model: default_image_model(),
            image_size: default_image_size(),
            surrealdb_address: default_surrealdb_address(),
            surrealdb_username: default_surrealdb_credential(),
            surrealdb_password: default_surrealdb_credential(),
            surrealdb_namespace: default_surrealdb_namespace(),
            surrealdb_database: default_surrealdb_database(),
            data_dir: default_data_dir(),
            storage: default_storage_kind(),
            public_asset_base_url: default_public_asset_base_url(),
            http_port: default_http_port(),
            primary_locale: default_primary_locale(),
            secondary_locale: default_secondary_locale(),
            batch_concurrency: default_batch_concurrency(),
            image_interval_ms: default_image_interval_ms(),
            word_interval_ms: default_word_interval_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_timeout_secs: default_retry_timeout_secs(),
            retry_jitter: default_retry_jitter(),
            job_retention_secs: default_job_retention_secs(),
        }
    }
}

impl AppConfig {
    pub fn image_api_key(&self) -> &str {
        self.image_api_key
            .as_deref()
            .unwrap_or(self.openai_api_key.as_str())
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_source_rate_limits() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.image_interval_ms, 2_000);
        assert_eq!(cfg.word_interval_ms, 1_000);
        assert_eq!(cfg.retry_max_attempts, 4);
        assert_eq!(cfg.retry_base_delay_ms, 300);
        assert_eq!(cfg.retry_max_delay_ms, 10_000);
        assert_eq!(cfg.retry_timeout_secs, 30);
        assert!(cfg.retry_jitter);
    }

    #[test]
    fn loads_with_only_the_api_key_set() {
        let cfg: AppConfig = Config::builder()
            .set_override("openai_api_key", "sk-test")
            .expect("override")
            .build()
            .expect("build")
            .try_deserialize()
            .expect("deserialize without database keys");

        assert_eq!(cfg.openai_api_key, "sk-test");
        assert_eq!(cfg.surrealdb_address, "ws://127.0.0.1:8000");
        assert_eq!(cfg.surrealdb_namespace, "vocab");
        assert_eq!(cfg.surrealdb_database, "visuals");
        assert_eq!(cfg.storage, StorageKind::Local);
    }

    #[test]
    fn image_key_falls_back_to_openai_key() {
        let mut cfg = AppConfig {
            openai_api_key: "sk-content".into(),
            ..Default::default()
        };
        assert_eq!(cfg.image_api_key(), "sk-content");

        cfg.image_api_key = Some("sk-image".into());
        assert_eq!(cfg.image_api_key(), "sk-image");
    }
}
