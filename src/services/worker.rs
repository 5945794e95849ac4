use crate::error::{MoverError, Result};
use crate::models::{FileStatus, ObjectLocation, PendingFile};
use crate::services::client_factory::ClientFactory;
use crate::services::metadata::ManifestStore;
use crate::services::multipart::{MAX_SINGLE_COPY_SIZE, MultipartCopier};
use crate::services::storage::ObjectStore;
use crate::services::storage_cache::StorageResolverCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub migrated: usize,
    pub failed: usize,
}

/// Moves pending files from the upload bucket into their organization's
/// storage bucket.
///
/// A file that fails at any step is logged and skipped with its status left
/// untouched, so the next run of the pipeline picks it up again.
pub struct MigrationWorkerPool {
    cache: Arc<StorageResolverCache>,
    clients: Arc<dyn ClientFactory>,
    store: Arc<dyn ManifestStore>,
    copier: MultipartCopier,
    upload_bucket: String,
    upload_client: Arc<dyn ObjectStore>,
    single_copy_limit: i64,
    timeout: Duration,
}

impl MigrationWorkerPool {
    /// Fails when the upload bucket's region cannot be resolved.
    pub async fn new(
        cache: Arc<StorageResolverCache>,
        clients: Arc<dyn ClientFactory>,
        store: Arc<dyn ManifestStore>,
        copier: MultipartCopier,
        upload_bucket: String,
        timeout: Duration,
    ) -> Result<Self> {
        let (upload_client, region) = clients.client_for(&upload_bucket).await?;
        tracing::info!(
            "🪣 Upload bucket {} is in {} ({})",
            upload_bucket,
            region.full_name,
            region.region_code
        );

        Ok(Self {
            cache,
            clients,
            store,
            copier,
            upload_bucket,
            upload_client,
            single_copy_limit: MAX_SINGLE_COPY_SIZE,
            timeout,
        })
    }

    /// Objects larger than `limit` bytes go through the multipart engine.
    pub fn with_single_copy_limit(mut self, limit: i64) -> Self {
        self.single_copy_limit = limit;
        self
    }

    /// Drains `source` with `worker_count` concurrent workers and returns once
    /// the channel is closed and every worker has finished.
    pub async fn run(
        self: Arc<Self>,
        worker_count: usize,
        source: mpsc::Receiver<PendingFile>,
    ) -> MigrationSummary {
        let source = Arc::new(Mutex::new(source));
        let mut workers = JoinSet::new();

        tracing::info!("👷 Starting {} migration workers", worker_count.max(1));
        for worker_id in 0..worker_count.max(1) {
            let pool = self.clone();
            let source = source.clone();
            workers.spawn(async move { pool.work(worker_id, source).await });
        }

        let mut summary = MigrationSummary::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(worker) => {
                    summary.migrated += worker.migrated;
                    summary.failed += worker.failed;
                }
                Err(e) => tracing::error!("Migration worker crashed: {}", e),
            }
        }

        tracing::info!(
            "🏁 Migration finished: {} migrated, {} failed",
            summary.migrated,
            summary.failed
        );
        summary
    }

    async fn work(
        &self,
        worker_id: usize,
        source: Arc<Mutex<mpsc::Receiver<PendingFile>>>,
    ) -> MigrationSummary {
        let mut summary = MigrationSummary::default();
        loop {
            let next = source.lock().await.recv().await;
            let Some(file) = next else {
                break;
            };

            match self.migrate(&file).await {
                Ok(destination) => {
                    summary.migrated += 1;
                    tracing::info!(
                        "✅ [worker {}] Migrated manifest={} upload={} -> {}",
                        worker_id,
                        file.manifest_id,
                        file.upload_id,
                        destination
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        "❌ [worker {}] Skipping manifest={} upload={}: {}",
                        worker_id,
                        file.manifest_id,
                        file.upload_id,
                        e
                    );
                }
            }
        }
        tracing::debug!("Worker {} drained the queue", worker_id);
        summary
    }

    /// Copies one file and marks it finalized. Returns the destination.
    pub async fn migrate(&self, file: &PendingFile) -> Result<ObjectLocation> {
        let destination = self.cache.get_or_load(&file.manifest_id).await?;
        let (client, region) = self.clients.client_for(&destination.storage_bucket).await?;

        let source = ObjectLocation::new(self.upload_bucket.as_str(), file.source_key());
        let target = ObjectLocation::new(
            destination.storage_bucket.as_str(),
            destination.object_key(&file.upload_id),
        );

        let size = match file.size {
            Some(size) => size,
            None => self.upload_client.object_size(&source).await?,
        };

        tracing::debug!(
            "Copying {} -> {} ({} bytes, {})",
            source,
            target,
            size,
            region.region_code
        );

        if size > self.single_copy_limit {
            self.copier
                .copy(client, self.timeout, &source, &target, size)
                .await?;
        } else {
            tokio::time::timeout(self.timeout, client.copy_object(&source, &target))
                .await
                .map_err(|_| MoverError::Timeout {
                    bucket: target.bucket.clone(),
                    key: target.key.clone(),
                    timeout: self.timeout,
                })??;
        }

        self.store
            .update_file_status(&file.manifest_id, &file.upload_id, FileStatus::Finalized)
            .await?;
        Ok(target)
    }
}
