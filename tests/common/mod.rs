#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use upload_mover::models::{
    CompletedPartInfo, FileStatus, FileWrite, ManifestFileRecord, ManifestRecord, ObjectLocation,
    OrganizationRecord,
};
use upload_mover::services::client_factory::ClientFactory;
use upload_mover::services::metadata::{ManifestStore, OrganizationQueries};
use upload_mover::services::region::{self, RegionDescriptor};
use upload_mover::services::storage::{ObjectStore, PartCopyRequest};
use upload_mover::{MoverError, Result};

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartCall {
    pub upload_id: String,
    pub part_number: i32,
    pub range: String,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    pub sizes: Mutex<HashMap<String, i64>>,
    pub direct_copies: Mutex<Vec<(ObjectLocation, ObjectLocation)>>,
    pub sessions: Mutex<Vec<ObjectLocation>>,
    pub part_calls: Mutex<Vec<PartCall>>,
    pub completed: Mutex<Vec<(String, Vec<CompletedPartInfo>)>>,
    pub aborts: AtomicUsize,
    pub fail_part: Mutex<Option<i32>>,
    pub fail_abort: bool,
    pub withhold_upload_id: bool,
    /// Later parts finish first when set, to scramble completion order.
    pub reverse_latency: bool,
    pub part_delay: Option<Duration>,
    pub copy_delay: Option<Duration>,
    pub fail_complete: bool,
    pub session_counter: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, location: &ObjectLocation, size: i64) -> Self {
        self.sizes
            .lock()
            .unwrap()
            .insert(location.to_string(), size);
        self
    }

    pub fn failing_part(self, part_number: i32) -> Self {
        *self.fail_part.lock().unwrap() = Some(part_number);
        self
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn part_calls(&self) -> Vec<PartCall> {
        self.part_calls.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<(String, Vec<CompletedPartInfo>)> {
        self.completed.lock().unwrap().clone()
    }

    pub fn direct_copies(&self) -> Vec<(ObjectLocation, ObjectLocation)> {
        self.direct_copies.lock().unwrap().clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

fn store_error(operation: &'static str, location: &ObjectLocation) -> MoverError {
    MoverError::ObjectStore {
        operation,
        bucket: location.bucket.clone(),
        key: location.key.clone(),
        message: "simulated failure".to_string(),
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn object_size(&self, location: &ObjectLocation) -> Result<i64> {
        self.sizes
            .lock()
            .unwrap()
            .get(&location.to_string())
            .copied()
            .ok_or_else(|| store_error("HeadObject", location))
    }

    async fn copy_object(
        &self,
        source: &ObjectLocation,
        destination: &ObjectLocation,
    ) -> Result<()> {
        if let Some(delay) = self.copy_delay {
            tokio::time::sleep(delay).await;
        }
        self.direct_copies
            .lock()
            .unwrap()
            .push((source.clone(), destination.clone()));
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        destination: &ObjectLocation,
    ) -> Result<Option<String>> {
        if self.withhold_upload_id {
            return Ok(None);
        }
        let n = self.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions.lock().unwrap().push(destination.clone());
        Ok(Some(format!("session-{}", n)))
    }

    async fn upload_part_copy(&self, request: &PartCopyRequest<'_>) -> Result<String> {
        if self.reverse_latency {
            let delay = 50u64.saturating_sub(request.part_number as u64 * 5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if let Some(delay) = self.part_delay {
            tokio::time::sleep(delay).await;
        }
        self.part_calls.lock().unwrap().push(PartCall {
            upload_id: request.upload_id.to_string(),
            part_number: request.part_number,
            range: request.range.clone(),
        });
        if *self.fail_part.lock().unwrap() == Some(request.part_number) {
            return Err(store_error("UploadPartCopy", request.destination));
        }
        Ok(format!("\"etag-{}\"", request.part_number))
    }

    async fn complete_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> Result<()> {
        if self.fail_complete {
            return Err(store_error("CompleteMultipartUpload", destination));
        }
        self.completed
            .lock()
            .unwrap()
            .push((upload_id.to_string(), parts.to_vec()));
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        destination: &ObjectLocation,
        _upload_id: &str,
    ) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        if self.fail_abort {
            return Err(store_error("AbortMultipartUpload", destination));
        }
        Ok(())
    }
}

/// Resolves regions like the real factory but always hands out one store.
pub struct SingleStoreFactory {
    pub store: Arc<MemoryObjectStore>,
}

#[async_trait]
impl ClientFactory for SingleStoreFactory {
    async fn client_for(&self, bucket: &str) -> Result<(Arc<dyn ObjectStore>, RegionDescriptor)> {
        let region = region::resolve(bucket).ok_or_else(|| MoverError::UnresolvableRegion {
            bucket: bucket.to_string(),
        })?;
        Ok((self.store.clone(), region))
    }
}

// ---------------------------------------------------------------------------
// Metadata store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryManifestStore {
    pub manifests: Mutex<HashMap<String, ManifestRecord>>,
    pub files: Mutex<HashMap<String, ManifestFileRecord>>,
    /// Upload ids whose writes stay unprocessed for this many `write_batch` calls.
    pub unprocessed_calls: usize,
    pub unprocessed_ids: HashSet<String>,
    pub write_batch_calls: AtomicUsize,
    /// `pending_page` fails once it has served this many pages.
    pub fail_page_after: Option<usize>,
    pub pending_page_calls: AtomicUsize,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_manifest(&self, id: &str, organization_id: i64, dataset_id: i64) {
        self.manifests.lock().unwrap().insert(
            id.to_string(),
            ManifestRecord {
                id: id.to_string(),
                organization_id,
                dataset_id,
                status: "Completed".to_string(),
            },
        );
    }

    pub fn add_file(&self, manifest_id: &str, upload_id: &str, size: Option<i64>) {
        self.files.lock().unwrap().insert(
            upload_id.to_string(),
            ManifestFileRecord {
                upload_id: upload_id.to_string(),
                manifest_id: manifest_id.to_string(),
                file_path: format!("data/{}.bin", upload_id),
                size,
                status: FileStatus::Uploaded,
            },
        );
    }

    pub fn status_of(&self, upload_id: &str) -> Option<FileStatus> {
        self.files
            .lock()
            .unwrap()
            .get(upload_id)
            .map(|f| f.status)
    }
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    async fn get_manifest(&self, manifest_id: &str) -> Result<Option<ManifestRecord>> {
        Ok(self.manifests.lock().unwrap().get(manifest_id).cloned())
    }

    async fn list_files(&self, manifest_id: &str) -> Result<Vec<ManifestFileRecord>> {
        let mut files: Vec<_> = self
            .files
            .lock()
            .unwrap()
            .values()
            .filter(|f| f.manifest_id == manifest_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.upload_id.cmp(&b.upload_id));
        Ok(files)
    }

    async fn pending_page(
        &self,
        after: Option<&str>,
        limit: u64,
    ) -> Result<Vec<ManifestFileRecord>> {
        let served = self.pending_page_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_page_after.is_some_and(|limit| served >= limit) {
            return Err(MoverError::Database(sea_orm::DbErr::Conn(
                sea_orm::RuntimeErr::Internal("connection reset".to_string()),
            )));
        }
        let mut files: Vec<_> = self
            .files
            .lock()
            .unwrap()
            .values()
            .filter(|f| f.status == FileStatus::Uploaded)
            .filter(|f| after.is_none_or(|a| f.upload_id.as_str() > a))
            .cloned()
            .collect();
        files.sort_by(|a, b| a.upload_id.cmp(&b.upload_id));
        files.truncate(limit as usize);
        Ok(files)
    }

    async fn update_file_status(
        &self,
        manifest_id: &str,
        upload_id: &str,
        status: FileStatus,
    ) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        match files.get_mut(upload_id) {
            Some(f) if f.manifest_id == manifest_id => {
                f.status = status;
                Ok(())
            }
            _ => Err(MoverError::Database(sea_orm::DbErr::RecordNotUpdated)),
        }
    }

    async fn write_batch(&self, writes: &[FileWrite]) -> Result<Vec<FileWrite>> {
        let call = self.write_batch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut unprocessed = Vec::new();
        let mut files = self.files.lock().unwrap();

        for write in writes {
            if call <= self.unprocessed_calls && self.unprocessed_ids.contains(write.upload_id()) {
                unprocessed.push(write.clone());
                continue;
            }
            match write {
                FileWrite::Put(record) => {
                    files.insert(record.upload_id.clone(), record.clone());
                }
                FileWrite::Delete { upload_id, .. } => {
                    files.remove(upload_id);
                }
            }
        }
        Ok(unprocessed)
    }
}

#[derive(Debug, Default)]
pub struct MemoryOrganizations {
    pub organizations: HashMap<i64, OrganizationRecord>,
}

impl MemoryOrganizations {
    pub fn with(mut self, id: i64, storage_bucket: Option<&str>) -> Self {
        self.organizations.insert(
            id,
            OrganizationRecord {
                id,
                name: format!("org-{}", id),
                storage_bucket: storage_bucket.map(str::to_string),
            },
        );
        self
    }
}

#[async_trait]
impl OrganizationQueries for MemoryOrganizations {
    async fn get_organization(&self, organization_id: i64) -> Result<Option<OrganizationRecord>> {
        Ok(self.organizations.get(&organization_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Relational connection
// ---------------------------------------------------------------------------

pub mod connection {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use upload_mover::services::connection::{ConnectionSupplier, ManagedConnection};

    #[derive(Debug, Clone)]
    pub struct FakeConnection {
        pub generation: usize,
        pub healthy: Arc<AtomicBool>,
        pub closed: Arc<AtomicBool>,
        pub organizations: Arc<MemoryOrganizations>,
    }

    #[async_trait]
    impl ManagedConnection for FakeConnection {
        async fn probe(&self) -> Result<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(MoverError::Database(sea_orm::DbErr::Conn(
                    sea_orm::RuntimeErr::Internal("connection reset".to_string()),
                )))
            }
        }

        async fn release(self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn queries(&self) -> Arc<dyn OrganizationQueries> {
            self.organizations.clone()
        }
    }

    /// Hands out numbered connections; every connection shares the same
    /// organization table.
    pub struct FakeSupplier {
        pub auth_duration: Duration,
        pub connects: Arc<AtomicUsize>,
        pub issued: Arc<Mutex<Vec<FakeConnection>>>,
        /// Connections issued from now on fail their probe.
        pub issue_unhealthy: Arc<AtomicBool>,
        pub organizations: Arc<MemoryOrganizations>,
    }

    impl FakeSupplier {
        pub fn new(auth_duration: Duration) -> Self {
            Self::with_organizations(auth_duration, MemoryOrganizations::default())
        }

        pub fn with_organizations(auth_duration: Duration, orgs: MemoryOrganizations) -> Self {
            Self {
                auth_duration,
                connects: Arc::new(AtomicUsize::new(0)),
                issued: Arc::new(Mutex::new(Vec::new())),
                issue_unhealthy: Arc::new(AtomicBool::new(false)),
                organizations: Arc::new(orgs),
            }
        }
    }

    #[async_trait]
    impl ConnectionSupplier for FakeSupplier {
        type Connection = FakeConnection;

        async fn connect(&self) -> Result<(FakeConnection, Duration)> {
            let generation = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
            let connection = FakeConnection {
                generation,
                healthy: Arc::new(AtomicBool::new(!self.issue_unhealthy.load(Ordering::SeqCst))),
                closed: Arc::new(AtomicBool::new(false)),
                organizations: self.organizations.clone(),
            };
            self.issued.lock().unwrap().push(connection.clone());
            Ok((connection, self.auth_duration))
        }
    }
}
