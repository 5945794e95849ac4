use crate::error::{MoverError, Result};
use std::env;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MINUTES: u64 = 60;

/// Runtime configuration for the mover process
#[derive(Debug, Clone)]
pub struct MoverConfig {
    /// Table holding manifest records
    pub manifest_table: String,

    /// Table holding per-file records of every manifest
    pub manifest_file_table: String,

    /// Staging bucket files are uploaded into
    pub upload_bucket: String,

    /// Destination bucket for organizations without their own
    pub default_storage_bucket: String,

    /// Metadata database URL
    pub database_url: String,

    /// Per-file copy deadline (default: 60 minutes)
    pub copy_timeout: Duration,

    /// Concurrent file workers (default: 20)
    pub worker_count: usize,

    /// Concurrent part-copy workers per multipart file (default: 10)
    pub part_workers: usize,

    /// Page size of the pending file scan (default: 100)
    pub scan_page_size: u64,

    /// File holding the current database auth token, re-read on every reconnect
    pub db_auth_token_file: Option<String>,

    /// How long a database connection stays authorized (default: 15 minutes)
    pub db_auth_ttl: Duration,

    /// S3 endpoint override (MinIO, localstack)
    pub s3_endpoint: Option<String>,
}

impl Default for MoverConfig {
    fn default() -> Self {
        Self {
            manifest_table: "manifests".to_string(),
            manifest_file_table: "manifest_files".to_string(),
            upload_bucket: "uploads-use1".to_string(),
            default_storage_bucket: "storage-use1".to_string(),
            database_url: "sqlite::memory:".to_string(),
            copy_timeout: Duration::from_secs(DEFAULT_TIMEOUT_MINUTES * 60),
            worker_count: 20,
            part_workers: 10,
            scan_page_size: 100,
            db_auth_token_file: None,
            db_auth_ttl: Duration::from_secs(15 * 60),
            s3_endpoint: None,
        }
    }
}

impl MoverConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(MoverError::MissingConfig(name))
        };

        let worker_count = match lookup("MOVER_WORKERS") {
            Some(v) => parse_positive("MOVER_WORKERS", &v)?,
            None => default.worker_count,
        };
        let part_workers = match lookup("MOVER_PART_WORKERS") {
            Some(v) => parse_positive("MOVER_PART_WORKERS", &v)?,
            None => default.part_workers,
        };

        Ok(Self {
            manifest_table: required("MANIFEST_TABLE")?,
            manifest_file_table: required("MANIFEST_FILE_TABLE")?,
            upload_bucket: required("UPLOAD_BUCKET")?,
            default_storage_bucket: required("STORAGE_BUCKET")?,
            database_url: required("DATABASE_URL")?,

            copy_timeout: parse_timeout_minutes(lookup("MOVER_TIMEOUT_MINUTES").as_deref()),

            worker_count,
            part_workers,

            scan_page_size: lookup("MOVER_SCAN_PAGE_SIZE")
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default.scan_page_size),

            db_auth_token_file: lookup("DB_AUTH_TOKEN_FILE").filter(|v| !v.is_empty()),

            db_auth_ttl: lookup("DB_AUTH_TTL_SECONDS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.db_auth_ttl),

            s3_endpoint: lookup("S3_ENDPOINT").filter(|v| !v.is_empty()),
        })
    }
}

/// Non-numeric, zero or absent values fall back to the 60 minute default.
pub fn parse_timeout_minutes(value: Option<&str>) -> Duration {
    let minutes = value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|m| *m > 0)
        .unwrap_or(DEFAULT_TIMEOUT_MINUTES);
    Duration::from_secs(minutes * 60)
}

fn parse_positive(name: &'static str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(MoverError::InvalidConfig {
            name,
            value: value.to_string(),
        }),
    }
}
