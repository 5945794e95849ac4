use crate::error::{MoverError, Result};
use crate::models::StorageDestination;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Computes the destination of a manifest on a cache miss.
#[async_trait]
pub trait DestinationLoader: Send + Sync {
    async fn load(&self, manifest_id: &str) -> Result<StorageDestination>;
}

/// Process-lifetime memo of manifest id -> storage destination.
///
/// Hits are served from the map without locking. Misses are loaded under a
/// single lock shared by all keys, so at most one load runs at any time and
/// each manifest is loaded at most once. Entries never expire; a failed load
/// caches nothing and the next lookup retries it.
pub struct StorageResolverCache {
    entries: DashMap<String, StorageDestination>,
    load_lock: Mutex<()>,
    loader: Arc<dyn DestinationLoader>,
}

impl StorageResolverCache {
    pub fn new(loader: Arc<dyn DestinationLoader>) -> Self {
        Self {
            entries: DashMap::new(),
            load_lock: Mutex::new(()),
            loader,
        }
    }

    pub async fn get_or_load(&self, manifest_id: &str) -> Result<StorageDestination> {
        if let Some(hit) = self.entries.get(manifest_id) {
            return Ok(hit.value().clone());
        }

        let _guard = self.load_lock.lock().await;
        if let Some(hit) = self.entries.get(manifest_id) {
            return Ok(hit.value().clone());
        }

        let destination =
            self.loader
                .load(manifest_id)
                .await
                .map_err(|e| MoverError::Resolve {
                    manifest_id: manifest_id.to_string(),
                    source: Box::new(e),
                })?;

        tracing::debug!(
            "Resolved manifest {} -> bucket {} (org {}, dataset {})",
            manifest_id,
            destination.storage_bucket,
            destination.organization_id,
            destination.dataset_id
        );
        self.entries
            .insert(manifest_id.to_string(), destination.clone());
        Ok(destination)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
