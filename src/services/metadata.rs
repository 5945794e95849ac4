use crate::entities::prelude::*;
use crate::error::{MoverError, Result};
use crate::models::{
    BatchOutcome, FileStatus, FileWrite, ManifestFileRecord, ManifestRecord, OrganizationRecord,
};
use crate::services::connection::{ConnectionManager, ConnectionSupplier};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Alias, Expr, OnConflict, Order, Query};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, FromQueryResult};
use std::sync::Arc;
use std::time::Duration;

/// Most items a single batched write carries.
pub const BATCH_WRITE_LIMIT: usize = 25;
pub const BATCH_WRITE_RETRIES: u32 = 3;
pub const BATCH_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Key-value side of the metadata store: manifests and their files, keyed by
/// manifest id and upload id.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn get_manifest(&self, manifest_id: &str) -> Result<Option<ManifestRecord>>;
    async fn list_files(&self, manifest_id: &str) -> Result<Vec<ManifestFileRecord>>;
    /// Files in `Uploaded` status ordered by upload id, strictly after `after`.
    async fn pending_page(&self, after: Option<&str>, limit: u64)
    -> Result<Vec<ManifestFileRecord>>;
    async fn update_file_status(
        &self,
        manifest_id: &str,
        upload_id: &str,
        status: FileStatus,
    ) -> Result<()>;
    /// Applies as many writes as possible and hands back the unprocessed ones.
    async fn write_batch(&self, writes: &[FileWrite]) -> Result<Vec<FileWrite>>;
}

/// Hands out the connection a store should run its next statement on.
#[async_trait]
pub trait DatabaseSource: Send + Sync {
    async fn database(&self) -> Result<DatabaseConnection>;
}

#[async_trait]
impl DatabaseSource for DatabaseConnection {
    async fn database(&self) -> Result<DatabaseConnection> {
        Ok(self.clone())
    }
}

#[async_trait]
impl<S> DatabaseSource for ConnectionManager<S>
where
    S: ConnectionSupplier<Connection = DatabaseConnection>,
{
    async fn database(&self) -> Result<DatabaseConnection> {
        self.get_connection().await
    }
}

/// Relational side of the metadata store.
#[async_trait]
pub trait OrganizationQueries: Send + Sync {
    async fn get_organization(&self, organization_id: i64) -> Result<Option<OrganizationRecord>>;
}

/// Applies `writes` in batches of [`BATCH_WRITE_LIMIT`], retrying unprocessed
/// items up to [`BATCH_WRITE_RETRIES`] times with linear backoff. Items still
/// unprocessed afterwards are reported in `failed_files` and no longer counted
/// as updated or removed.
pub async fn write_files_with_retry(
    store: &dyn ManifestStore,
    writes: Vec<FileWrite>,
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome {
        updated: writes
            .iter()
            .filter(|w| matches!(w, FileWrite::Put(_)))
            .count(),
        removed: writes
            .iter()
            .filter(|w| matches!(w, FileWrite::Delete { .. }))
            .count(),
        failed_files: Vec::new(),
    };

    for batch in writes.chunks(BATCH_WRITE_LIMIT) {
        let mut unprocessed = submitted(batch, store.write_batch(batch).await?);
        let mut retry = 0;

        while !unprocessed.is_empty() && retry < BATCH_WRITE_RETRIES {
            retry += 1;
            tracing::warn!(
                "{} file writes unprocessed, retry {}/{}",
                unprocessed.len(),
                retry,
                BATCH_WRITE_RETRIES
            );
            tokio::time::sleep(BATCH_RETRY_BACKOFF * retry).await;
            unprocessed = submitted(&unprocessed, store.write_batch(&unprocessed).await?);
        }

        for write in unprocessed {
            match write {
                FileWrite::Put(_) => outcome.updated = outcome.updated.saturating_sub(1),
                FileWrite::Delete { .. } => outcome.removed = outcome.removed.saturating_sub(1),
            }
            outcome.failed_files.push(write.upload_id().to_string());
        }
    }

    if !outcome.failed_files.is_empty() {
        tracing::error!(
            "{} file writes failed after {} retries: {:?}",
            outcome.failed_files.len(),
            BATCH_WRITE_RETRIES,
            outcome.failed_files
        );
    }
    Ok(outcome)
}

/// Keeps the unprocessed writes that belong to `batch`, each at most once.
fn submitted(batch: &[FileWrite], unprocessed: Vec<FileWrite>) -> Vec<FileWrite> {
    let mut kept: Vec<FileWrite> = Vec::with_capacity(unprocessed.len());
    for write in unprocessed {
        if !batch.contains(&write) {
            tracing::warn!("Ignoring unprocessed write for {} that was never submitted", write.upload_id());
            continue;
        }
        if !kept.contains(&write) {
            kept.push(write);
        }
    }
    kept
}

#[derive(Debug, FromQueryResult)]
struct ManifestRow {
    id: String,
    organization_id: i64,
    dataset_id: i64,
    status: String,
}

#[derive(Debug, FromQueryResult)]
struct ManifestFileRow {
    upload_id: String,
    manifest_id: String,
    file_path: String,
    size: Option<i64>,
    status: String,
}

impl TryFrom<ManifestFileRow> for ManifestFileRecord {
    type Error = MoverError;

    fn try_from(row: ManifestFileRow) -> Result<Self> {
        let status = row
            .status
            .parse::<FileStatus>()
            .map_err(|e| MoverError::Database(DbErr::Custom(e)))?;
        Ok(Self {
            upload_id: row.upload_id,
            manifest_id: row.manifest_id,
            file_path: row.file_path,
            size: row.size,
            status,
        })
    }
}

fn col(name: &str) -> Alias {
    Alias::new(name)
}

const FILE_COLUMNS: [&str; 5] = ["upload_id", "manifest_id", "file_path", "size", "status"];

/// [`ManifestStore`] over two tables whose names come from configuration.
#[derive(Clone)]
pub struct SeaManifestStore {
    source: Arc<dyn DatabaseSource>,
    manifest_table: String,
    file_table: String,
}

impl SeaManifestStore {
    pub fn new(db: DatabaseConnection, manifest_table: &str, file_table: &str) -> Self {
        Self::with_source(Arc::new(db), manifest_table, file_table)
    }

    /// Store whose connection is fetched per call, e.g. from a
    /// [`ConnectionManager`] that refreshes expiring credentials.
    pub fn with_source(
        source: Arc<dyn DatabaseSource>,
        manifest_table: &str,
        file_table: &str,
    ) -> Self {
        Self {
            source,
            manifest_table: manifest_table.to_string(),
            file_table: file_table.to_string(),
        }
    }

    pub async fn put_manifest(&self, manifest: &ManifestRecord) -> Result<()> {
        let db = self.source.database().await?;
        let stmt = Query::insert()
            .into_table(col(&self.manifest_table))
            .columns([
                col("id"),
                col("organization_id"),
                col("dataset_id"),
                col("status"),
            ])
            .values([
                manifest.id.clone().into(),
                manifest.organization_id.into(),
                manifest.dataset_id.into(),
                manifest.status.clone().into(),
            ])
            .map_err(|e| DbErr::Custom(e.to_string()))?
            .on_conflict(
                OnConflict::column(col("id"))
                    .update_columns([col("organization_id"), col("dataset_id"), col("status")])
                    .to_owned(),
            )
            .to_owned();

        db.execute(db.get_database_backend().build(&stmt)).await?;
        Ok(())
    }

    async fn select_files(
        &self,
        filter: impl FnOnce(&mut sea_orm::sea_query::SelectStatement),
    ) -> Result<Vec<ManifestFileRecord>> {
        let db = self.source.database().await?;
        let mut query = Query::select();
        query
            .columns(FILE_COLUMNS.map(col))
            .from(col(&self.file_table))
            .order_by(col("upload_id"), Order::Asc);
        filter(&mut query);

        let rows = ManifestFileRow::find_by_statement(db.get_database_backend().build(&query))
            .all(&db)
            .await?;
        rows.into_iter().map(ManifestFileRecord::try_from).collect()
    }

    async fn apply(
        &self,
        db: &DatabaseConnection,
        write: &FileWrite,
    ) -> std::result::Result<(), DbErr> {
        let backend = db.get_database_backend();
        let stmt = match write {
            FileWrite::Put(record) => {
                let insert = Query::insert()
                    .into_table(col(&self.file_table))
                    .columns([
                        col("upload_id"),
                        col("manifest_id"),
                        col("file_path"),
                        col("size"),
                        col("status"),
                        col("updated_at"),
                    ])
                    .values([
                        record.upload_id.clone().into(),
                        record.manifest_id.clone().into(),
                        record.file_path.clone().into(),
                        record.size.into(),
                        record.status.as_str().into(),
                        Utc::now().into(),
                    ])
                    .map_err(|e| DbErr::Custom(e.to_string()))?
                    .on_conflict(
                        OnConflict::column(col("upload_id"))
                            .update_columns([
                                col("manifest_id"),
                                col("file_path"),
                                col("size"),
                                col("status"),
                                col("updated_at"),
                            ])
                            .to_owned(),
                    )
                    .to_owned();
                backend.build(&insert)
            }
            FileWrite::Delete {
                manifest_id,
                upload_id,
            } => {
                let delete = Query::delete()
                    .from_table(col(&self.file_table))
                    .and_where(Expr::col(col("manifest_id")).eq(manifest_id.as_str()))
                    .and_where(Expr::col(col("upload_id")).eq(upload_id.as_str()))
                    .to_owned();
                backend.build(&delete)
            }
        };

        db.execute(stmt).await?;
        Ok(())
    }
}

#[async_trait]
impl ManifestStore for SeaManifestStore {
    async fn get_manifest(&self, manifest_id: &str) -> Result<Option<ManifestRecord>> {
        let db = self.source.database().await?;
        let query = Query::select()
            .columns([
                col("id"),
                col("organization_id"),
                col("dataset_id"),
                col("status"),
            ])
            .from(col(&self.manifest_table))
            .and_where(Expr::col(col("id")).eq(manifest_id))
            .to_owned();

        let row = ManifestRow::find_by_statement(db.get_database_backend().build(&query))
            .one(&db)
            .await?;

        Ok(row.map(|r| ManifestRecord {
            id: r.id,
            organization_id: r.organization_id,
            dataset_id: r.dataset_id,
            status: r.status,
        }))
    }

    async fn list_files(&self, manifest_id: &str) -> Result<Vec<ManifestFileRecord>> {
        self.select_files(|q| {
            q.and_where(Expr::col(col("manifest_id")).eq(manifest_id));
        })
        .await
    }

    async fn pending_page(
        &self,
        after: Option<&str>,
        limit: u64,
    ) -> Result<Vec<ManifestFileRecord>> {
        self.select_files(|q| {
            q.and_where(Expr::col(col("status")).eq(FileStatus::Uploaded.as_str()))
                .limit(limit);
            if let Some(after) = after {
                q.and_where(Expr::col(col("upload_id")).gt(after));
            }
        })
        .await
    }

    async fn update_file_status(
        &self,
        manifest_id: &str,
        upload_id: &str,
        status: FileStatus,
    ) -> Result<()> {
        let stmt = Query::update()
            .table(col(&self.file_table))
            .values([
                (col("status"), Expr::value(status.as_str())),
                (col("updated_at"), Expr::value(Utc::now())),
            ])
            .and_where(Expr::col(col("manifest_id")).eq(manifest_id))
            .and_where(Expr::col(col("upload_id")).eq(upload_id))
            .to_owned();

        let db = self.source.database().await?;
        let res = db
            .execute(db.get_database_backend().build(&stmt))
            .await?;
        if res.rows_affected() == 0 {
            return Err(MoverError::Database(DbErr::RecordNotUpdated));
        }
        Ok(())
    }

    async fn write_batch(&self, writes: &[FileWrite]) -> Result<Vec<FileWrite>> {
        let db = self.source.database().await?;
        let mut unprocessed = Vec::new();
        for write in writes {
            if let Err(e) = self.apply(&db, write).await {
                tracing::warn!("File write for {} not applied: {}", write.upload_id(), e);
                unprocessed.push(write.clone());
            }
        }
        Ok(unprocessed)
    }
}

/// [`OrganizationQueries`] bound to one connection handed out by the
/// connection manager.
#[derive(Clone)]
pub struct SeaOrganizationQueries {
    db: DatabaseConnection,
}

impl SeaOrganizationQueries {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OrganizationQueries for SeaOrganizationQueries {
    async fn get_organization(&self, organization_id: i64) -> Result<Option<OrganizationRecord>> {
        let org = Organizations::find_by_id(organization_id)
            .one(&self.db)
            .await?;

        Ok(org.map(|o| OrganizationRecord {
            id: o.id,
            name: o.name,
            storage_bucket: o.storage_bucket,
        }))
    }
}
