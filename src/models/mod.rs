use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a single uploaded file as recorded in the manifest file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    Registered,
    /// Upload into the staging bucket is complete; the file waits for the mover.
    Uploaded,
    /// Copied into permanent storage.
    Finalized,
    Verified,
    Failed,
    Removed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Registered => "Registered",
            FileStatus::Uploaded => "Uploaded",
            FileStatus::Finalized => "Finalized",
            FileStatus::Verified => "Verified",
            FileStatus::Failed => "Failed",
            FileStatus::Removed => "Removed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Registered" => Ok(FileStatus::Registered),
            "Uploaded" => Ok(FileStatus::Uploaded),
            "Finalized" => Ok(FileStatus::Finalized),
            "Verified" => Ok(FileStatus::Verified),
            "Failed" => Ok(FileStatus::Failed),
            "Removed" => Ok(FileStatus::Removed),
            other => Err(format!("unknown file status '{}'", other)),
        }
    }
}

/// One file waiting to be moved out of the staging bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFile {
    pub manifest_id: String,
    pub upload_id: String,
    pub status: FileStatus,
    /// Object size when the file record carries it; otherwise probed.
    pub size: Option<i64>,
}

impl PendingFile {
    /// Key of the staged object inside the upload bucket.
    pub fn source_key(&self) -> String {
        format!("{}/{}", self.manifest_id, self.upload_id)
    }
}

impl From<ManifestFileRecord> for PendingFile {
    fn from(record: ManifestFileRecord) -> Self {
        Self {
            manifest_id: record.manifest_id,
            upload_id: record.upload_id,
            status: record.status,
            size: record.size,
        }
    }
}

/// Where the files of one manifest must land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDestination {
    pub organization_id: i64,
    pub storage_bucket: String,
    pub dataset_id: i64,
}

impl StorageDestination {
    pub fn object_key(&self, upload_id: &str) -> String {
        format!(
            "O{}/D{}/{}",
            self.organization_id, self.dataset_id, upload_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub id: String,
    pub organization_id: i64,
    pub dataset_id: i64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFileRecord {
    pub upload_id: String,
    pub manifest_id: String,
    pub file_path: String,
    pub size: Option<i64>,
    pub status: FileStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationRecord {
    pub id: i64,
    pub name: String,
    pub storage_bucket: Option<String>,
}

/// A single item of a batched write against the manifest file table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileWrite {
    Put(ManifestFileRecord),
    Delete { manifest_id: String, upload_id: String },
}

impl FileWrite {
    pub fn upload_id(&self) -> &str {
        match self {
            FileWrite::Put(record) => &record.upload_id,
            FileWrite::Delete { upload_id, .. } => upload_id,
        }
    }
}

/// Result of a retried batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub updated: usize,
    pub removed: usize,
    /// Upload ids that were still unprocessed once the retry budget ran out.
    pub failed_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPartInfo {
    pub part_number: i32,
    pub e_tag: String,
}
