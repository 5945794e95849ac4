use crate::error::{MoverError, Result};
use crate::models::StorageDestination;
use crate::services::connection::{ConnectionManager, ConnectionSupplier};
use crate::services::metadata::ManifestStore;
use crate::services::storage_cache::DestinationLoader;
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves a manifest's destination from the metadata store: manifest record
/// first, then the owning organization's bucket, falling back to the default
/// bucket when the organization has none.
pub struct MetadataDestinationLoader<S: ConnectionSupplier> {
    store: Arc<dyn ManifestStore>,
    connections: Arc<ConnectionManager<S>>,
    default_bucket: String,
}

impl<S: ConnectionSupplier> MetadataDestinationLoader<S> {
    pub fn new(
        store: Arc<dyn ManifestStore>,
        connections: Arc<ConnectionManager<S>>,
        default_bucket: String,
    ) -> Self {
        Self {
            store,
            connections,
            default_bucket,
        }
    }
}

#[async_trait]
impl<S: ConnectionSupplier> DestinationLoader for MetadataDestinationLoader<S> {
    async fn load(&self, manifest_id: &str) -> Result<StorageDestination> {
        let manifest = self
            .store
            .get_manifest(manifest_id)
            .await?
            .ok_or_else(|| MoverError::ManifestNotFound(manifest_id.to_string()))?;

        let queries = self.connections.get_queries().await?;
        let organization = queries
            .get_organization(manifest.organization_id)
            .await?
            .ok_or(MoverError::OrganizationNotFound(manifest.organization_id))?;

        let storage_bucket = organization
            .storage_bucket
            .filter(|bucket| !bucket.trim().is_empty())
            .unwrap_or_else(|| self.default_bucket.clone());

        Ok(StorageDestination {
            organization_id: organization.id,
            storage_bucket,
            dataset_id: manifest.dataset_id,
        })
    }
}
