use crate::error::{MoverError, Result};
use crate::services::region::{self, RegionDescriptor};
use crate::services::storage::{ObjectStore, S3ObjectStore};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::config::Region;
use dashmap::DashMap;
use std::sync::Arc;

/// Hands out object store clients bound to the region a bucket lives in.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn client_for(&self, bucket: &str) -> Result<(Arc<dyn ObjectStore>, RegionDescriptor)>;
}

/// Builds S3 clients from a shared base configuration, one per region.
pub struct RegionalClientFactory {
    base: SdkConfig,
    force_path_style: bool,
    clients: DashMap<&'static str, Arc<dyn ObjectStore>>,
}

impl RegionalClientFactory {
    pub fn new(base: SdkConfig, force_path_style: bool) -> Self {
        Self {
            base,
            force_path_style,
            clients: DashMap::new(),
        }
    }

    fn build_client(&self, descriptor: &RegionDescriptor) -> Arc<dyn ObjectStore> {
        let s3_config = aws_sdk_s3::config::Builder::from(&self.base)
            .region(Region::new(descriptor.region_code))
            .force_path_style(self.force_path_style)
            .build();

        tracing::debug!(
            "☁️  Built S3 client for {} ({})",
            descriptor.full_name,
            descriptor.region_code
        );
        Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::from_conf(s3_config)))
    }
}

#[async_trait]
impl ClientFactory for RegionalClientFactory {
    async fn client_for(&self, bucket: &str) -> Result<(Arc<dyn ObjectStore>, RegionDescriptor)> {
        let descriptor = region::resolve(bucket).ok_or_else(|| MoverError::UnresolvableRegion {
            bucket: bucket.to_string(),
        })?;

        let client = self
            .clients
            .entry(descriptor.region_code)
            .or_insert_with(|| self.build_client(&descriptor))
            .value()
            .clone();

        Ok((client, descriptor))
    }
}
