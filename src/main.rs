use clap::Parser;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload_mover::config::MoverConfig;
use upload_mover::infrastructure::database::{self, PostgresSupplier};
use upload_mover::infrastructure::storage;
use upload_mover::models::{FileStatus, FileWrite};
use upload_mover::services::connection::ConnectionManager;
use upload_mover::services::destination::MetadataDestinationLoader;
use upload_mover::services::metadata::{ManifestStore, SeaManifestStore, write_files_with_retry};
use upload_mover::services::multipart::{CHUNK_SIZE, MultipartCopier};
use upload_mover::services::pending::{PendingFileSource, StorePendingFileSource};
use upload_mover::services::storage_cache::StorageResolverCache;
use upload_mover::services::worker::MigrationWorkerPool;
use upload_mover::MoverError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// What to run (migrate, requeue)
    #[arg(short, long, default_value = "migrate")]
    mode: String,

    /// Manifest whose files are put back into the upload queue (requeue mode)
    #[arg(long)]
    manifest: Option<String>,

    /// Concurrent file workers, overrides MOVER_WORKERS
    #[arg(short, long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upload_mover=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Upload Mover [Mode: {}]...", args.mode);

    let mut config = MoverConfig::from_env()?;
    if let Some(workers) = args.workers.filter(|w| *w > 0) {
        config.worker_count = workers;
    }
    info!(
        "⚙️  Config: Workers={}, Part Workers={}, Timeout={}min, Manifest Table={}, File Table={}",
        config.worker_count,
        config.part_workers,
        config.copy_timeout.as_secs() / 60,
        config.manifest_table,
        config.manifest_file_table
    );

    // 2. Metadata Store, reached through the token-refreshing connection
    let connections = database::setup_database(&config).await?;
    let store: Arc<dyn ManifestStore> = Arc::new(SeaManifestStore::with_source(
        connections.clone(),
        &config.manifest_table,
        &config.manifest_file_table,
    ));

    let outcome = match args.mode.as_str() {
        "migrate" => migrate(&config, store, connections.clone()).await,
        "requeue" => match args.manifest {
            Some(manifest_id) => requeue(store.as_ref(), &manifest_id).await,
            None => Err(anyhow::anyhow!("--manifest is required in requeue mode")),
        },
        other => Err(anyhow::anyhow!("Unknown mode '{}'", other)),
    };

    if let Err(e) = connections.close().await {
        error!("Failed to close database connection: {}", e);
    }
    outcome?;

    info!("👋 Upload Mover exited cleanly.");
    Ok(())
}

async fn migrate(
    config: &MoverConfig,
    store: Arc<dyn ManifestStore>,
    connections: Arc<ConnectionManager<PostgresSupplier>>,
) -> anyhow::Result<()> {
    // 3. Destination resolution; organization queries share the refreshing connection
    let loader = Arc::new(MetadataDestinationLoader::new(
        store.clone(),
        connections.clone(),
        config.default_storage_bucket.clone(),
    ));
    let cache = Arc::new(StorageResolverCache::new(loader));
    let clients = storage::setup_client_factory(config).await;

    // 4. Worker Pool
    let pool = Arc::new(
        MigrationWorkerPool::new(
            cache,
            clients,
            store.clone(),
            MultipartCopier::new(CHUNK_SIZE, config.part_workers),
            config.upload_bucket.clone(),
            config.copy_timeout,
        )
        .await?,
    );

    let (tx, rx) = mpsc::channel(config.worker_count * 2);
    let source = StorePendingFileSource::new(store, config.scan_page_size);
    let scanner = tokio::spawn(async move { source.scan(tx).await });

    let summary = pool.run(config.worker_count, rx).await;

    // A failed scan is fatal even though the files it did find were processed.
    scanner.await??;

    info!(
        "📊 Run complete: {} migrated, {} left for the next run",
        summary.migrated, summary.failed
    );
    Ok(())
}

async fn requeue(store: &dyn ManifestStore, manifest_id: &str) -> anyhow::Result<()> {
    let files = store.list_files(manifest_id).await?;
    info!("🔁 Requeueing {} files of manifest {}", files.len(), manifest_id);

    let writes = files
        .into_iter()
        .filter(|f| f.status != FileStatus::Uploaded)
        .map(|mut f| {
            f.status = FileStatus::Uploaded;
            FileWrite::Put(f)
        })
        .collect::<Vec<_>>();

    let outcome = write_files_with_retry(store, writes).await?;
    info!("✅ {} files requeued", outcome.updated);

    if !outcome.failed_files.is_empty() {
        return Err(MoverError::BatchPartialFailure {
            failed_files: outcome.failed_files,
        }
        .into());
    }
    Ok(())
}
