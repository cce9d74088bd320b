use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        job_store::{InMemoryJobStore, JobStore, SurrealJobStore},
        record_store::{InMemoryRecordStore, RecordStore, SurrealRecordStore},
        store::StorageManager,
        types::{job::BatchOptions, visual_asset::VisualType, word_context::WordContext},
    },
    utils::config::{get_config, AppConfig},
};
use generation_pipeline::{
    BatchRequest, GenerationPipeline, JobCoordinator, JobSnapshot, ProgressReporter,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Generate vocabulary visuals for a batch of words", long_about = None)]
struct Cli {
    /// Word ids to generate visuals for, comma separated
    #[arg(long, value_delimiter = ',')]
    words: Vec<String>,

    /// Visual types to generate, comma separated
    #[arg(long = "types", value_delimiter = ',', default_value = "concept,mnemonic,rhyme")]
    visual_types: Vec<String>,

    /// Items processed at once (defaults to `batch_concurrency`)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Skip word/type pairs that already have a visual
    #[arg(long)]
    skip_existing: bool,

    /// JSON array of word records; runs against in-memory stores instead of SurrealDB
    #[arg(long)]
    words_file: Option<PathBuf>,

    /// How often progress is polled, in milliseconds
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,
}

impl Cli {
    fn visual_types(&self) -> Result<Vec<VisualType>, AppError> {
        self.visual_types.iter().map(|value| value.parse()).collect()
    }

    fn options(&self) -> BatchOptions {
        BatchOptions {
            concurrency: self.concurrency,
            skip_existing: self.skip_existing,
        }
    }
}

struct Stores {
    records: Arc<dyn RecordStore>,
    jobs: Arc<dyn JobStore>,
    word_ids: Vec<String>,
}

async fn open_stores(cli: &Cli, config: &AppConfig) -> Result<Stores, Box<dyn std::error::Error>> {
    if let Some(path) = &cli.words_file {
        let raw = tokio::fs::read_to_string(path).await?;
        let words: Vec<WordContext> = serde_json::from_str(&raw)?;
        info!(words = words.len(), path = %path.display(), "loaded word records");

        let word_ids = if cli.words.is_empty() {
            words.iter().map(|word| word.word_id.clone()).collect()
        } else {
            cli.words.clone()
        };
        return Ok(Stores {
            records: Arc::new(InMemoryRecordStore::with_words(words)),
            jobs: Arc::new(InMemoryJobStore::new()),
            word_ids,
        });
    }

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    Ok(Stores {
        records: Arc::new(SurrealRecordStore::new(Arc::clone(&db))),
        jobs: Arc::new(SurrealJobStore::new(db)),
        word_ids: cli.words.clone(),
    })
}

/// Polls until the job is terminal. The first Ctrl-C asks the job to stop; in-flight items
/// still finish.
async fn watch(
    reporter: &ProgressReporter,
    job_id: &str,
    every: Duration,
) -> Result<JobSnapshot, AppError> {
    let mut ticker = tokio::time::interval(every);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stop_sent = false;
    let mut last_processed = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = &mut ctrl_c, if !stop_sent => {
                stop_sent = true;
                match result {
                    Ok(()) => {
                        let status = reporter.request_stop(job_id).await?;
                        info!(%job_id, status = status.as_str(), "stop requested; waiting for in-flight items");
                    }
                    Err(err) => warn!(error = %err, "could not listen for ctrl-c"),
                }
                continue;
            }
        }

        let snapshot = reporter.snapshot(job_id).await?;
        if last_processed != Some(snapshot.processed) {
            info!(
                %job_id,
                status = snapshot.status.as_str(),
                processed = snapshot.processed,
                total = snapshot.total,
                succeeded = snapshot.succeeded,
                failed = snapshot.failed,
                current = snapshot.currently_processing.as_ref().map(ToString::to_string),
                "progress"
            );
            last_processed = Some(snapshot.processed);
        }
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let visual_types = cli.visual_types()?;
    let stores = open_stores(&cli, &config).await?;
    let storage = StorageManager::new(&config).await?;

    let pipeline = Arc::new(GenerationPipeline::new(stores.records, &config, storage));
    let coordinator = Arc::new(JobCoordinator::new(stores.jobs, pipeline));

    let job_id = coordinator
        .start_batch(BatchRequest {
            word_ids: stores.word_ids,
            visual_types,
            options: cli.options(),
        })
        .await?;
    info!(%job_id, "batch started");

    let snapshot = watch(
        &coordinator.reporter(),
        &job_id,
        Duration::from_millis(cli.poll_interval_ms.max(1)),
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    println!("{}", serde_json::to_string_pretty(&coordinator.metrics())?);

    Ok(())
}
