use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MoverError>;

#[derive(Error, Debug)]
pub enum MoverError {
    #[error("No known region for bucket '{bucket}'")]
    UnresolvableRegion { bucket: String },

    #[error("Destination returned no multipart upload id for {bucket}/{key}")]
    NoUploadId { bucket: String, key: String },

    #[error("Connection refresh failed: {0}")]
    ConnectionRefresh(String),

    #[error("{} file writes remained unprocessed after retries", failed_files.len())]
    BatchPartialFailure { failed_files: Vec<String> },

    #[error("Missing required configuration value {0}")]
    MissingConfig(&'static str),

    #[error("Invalid configuration value for {name}: {value}")]
    InvalidConfig { name: &'static str, value: String },

    #[error("Manifest {0} not found")]
    ManifestNotFound(String),

    #[error("Organization {0} not found")]
    OrganizationNotFound(i64),

    #[error("S3 {operation} failed for {bucket}/{key}: {message}")]
    ObjectStore {
        operation: &'static str,
        bucket: String,
        key: String,
        message: String,
    },

    #[error("Copy to {bucket}/{key} did not finish within {timeout:?}")]
    Timeout {
        bucket: String,
        key: String,
        timeout: Duration,
    },

    #[error("Resolving storage for manifest {manifest_id}: {source}")]
    Resolve {
        manifest_id: String,
        #[source]
        source: Box<MoverError>,
    },

    #[error("Pending file scan failed: {0}")]
    Scan(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl MoverError {
    pub(crate) fn object_store(
        operation: &'static str,
        bucket: &str,
        key: &str,
        err: impl std::error::Error,
    ) -> Self {
        MoverError::ObjectStore {
            operation,
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: aws_sdk_s3::error::DisplayErrorContext(err).to_string(),
        }
    }
}
