use crate::error::{MoverError, Result};
use crate::models::{CompletedPartInfo, ObjectLocation};
use crate::services::storage::{ObjectStore, PartCopyRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Part size for chunked copies. 105 MiB keeps a 5 TiB object within the
/// 10,000 part limit of the destination store.
pub const CHUNK_SIZE: i64 = 105 * 1024 * 1024;

/// Largest object a single CopyObject call accepts (5 GiB).
pub const MAX_SINGLE_COPY_SIZE: i64 = 5 * 1024 * 1024 * 1024;

pub const DEFAULT_PART_WORKERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartCopyTask {
    pub part_number: i32,
    pub start: i64,
    /// Inclusive.
    pub end: i64,
}

impl PartCopyTask {
    pub fn range(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Splits `[0, size)` into consecutive parts numbered from 1.
pub fn part_tasks(size: i64, chunk_size: i64) -> impl Iterator<Item = PartCopyTask> {
    let chunk_size = chunk_size.max(1);
    (0..size.max(0))
        .step_by(chunk_size as usize)
        .enumerate()
        .map(move |(index, start)| PartCopyTask {
            part_number: index as i32 + 1,
            start,
            end: (start + chunk_size - 1).min(size - 1),
        })
}

/// Copies one object server-side, in parallel ranged parts.
///
/// A session ends either completed or with an abort attempted; it is never
/// left open on a failure path.
#[derive(Debug, Clone)]
pub struct MultipartCopier {
    chunk_size: i64,
    workers: usize,
}

impl Default for MultipartCopier {
    fn default() -> Self {
        Self::new(CHUNK_SIZE, DEFAULT_PART_WORKERS)
    }
}

impl MultipartCopier {
    pub fn new(chunk_size: i64, workers: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            workers: workers.max(1),
        }
    }

    pub fn chunk_size(&self) -> i64 {
        self.chunk_size
    }

    pub async fn copy(
        &self,
        client: Arc<dyn ObjectStore>,
        timeout: Duration,
        source: &ObjectLocation,
        destination: &ObjectLocation,
        size: i64,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let timed_out = || MoverError::Timeout {
            bucket: destination.bucket.clone(),
            key: destination.key.clone(),
            timeout,
        };

        let upload_id = tokio::time::timeout_at(deadline, client.create_multipart_upload(destination))
            .await
            .map_err(|_| timed_out())??
            .ok_or_else(|| MoverError::NoUploadId {
                bucket: destination.bucket.clone(),
                key: destination.key.clone(),
            })?;

        tracing::info!(
            "📤 Multipart copy {} -> {} started (upload_id: {}, size: {})",
            source,
            destination,
            upload_id,
            size
        );

        let copied = tokio::time::timeout_at(
            deadline,
            self.copy_parts(client.clone(), source, destination, &upload_id, size),
        )
        .await
        .unwrap_or_else(|_| Err(timed_out()));

        let mut parts = match copied {
            Ok(parts) => parts,
            Err(e) => {
                abort_advisory(client.as_ref(), destination, &upload_id).await;
                return Err(e);
            }
        };

        parts.sort_by_key(|p| p.part_number);

        let completed = tokio::time::timeout_at(
            deadline,
            client.complete_multipart_upload(destination, &upload_id, &parts),
        )
        .await
        .unwrap_or_else(|_| Err(timed_out()));

        if let Err(e) = completed {
            abort_advisory(client.as_ref(), destination, &upload_id).await;
            return Err(e);
        }

        tracing::info!(
            "✅ Multipart copy to {} completed with {} parts",
            destination,
            parts.len()
        );
        Ok(())
    }

    /// Runs the part pool: one producer feeding a bounded queue, a fixed set
    /// of workers draining it and one aggregator collecting their results.
    async fn copy_parts(
        &self,
        client: Arc<dyn ObjectStore>,
        source: &ObjectLocation,
        destination: &ObjectLocation,
        upload_id: &str,
        size: i64,
    ) -> Result<Vec<CompletedPartInfo>> {
        let (task_tx, task_rx) = mpsc::channel::<PartCopyTask>(self.workers);
        let (result_tx, mut result_rx) = mpsc::channel::<CompletedPartInfo>(self.workers);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let chunk_size = self.chunk_size;
        let producer = tokio::spawn(async move {
            for task in part_tasks(size, chunk_size) {
                if task_tx.send(task).await.is_err() {
                    // Every worker has exited.
                    break;
                }
            }
        });

        let aggregator = tokio::spawn(async move {
            let mut parts = Vec::new();
            while let Some(part) = result_rx.recv().await {
                parts.push(part);
            }
            parts
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let client = client.clone();
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let source = source.clone();
            let destination = destination.clone();
            let upload_id = upload_id.to_string();

            workers.spawn(async move {
                loop {
                    let next = task_rx.lock().await.recv().await;
                    let Some(task) = next else {
                        return Ok(());
                    };

                    let request = PartCopyRequest {
                        source: &source,
                        destination: &destination,
                        upload_id: &upload_id,
                        part_number: task.part_number,
                        range: task.range(),
                    };

                    let e_tag = match client.upload_part_copy(&request).await {
                        Ok(e_tag) => e_tag,
                        Err(e) => {
                            tracing::warn!(
                                "Part worker {} failed on part {} ({}): {}",
                                worker_id,
                                task.part_number,
                                request.range,
                                e
                            );
                            return Err(e);
                        }
                    };

                    let part = CompletedPartInfo {
                        part_number: task.part_number,
                        e_tag: e_tag.trim_matches('"').to_string(),
                    };
                    if result_tx.send(part).await.is_err() {
                        return Ok(());
                    }
                }
            });
        }
        drop(result_tx);
        drop(task_rx);

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(MoverError::from).and_then(|r| r);
            if let Err(e) = outcome
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }

        producer.await?;
        let parts = aggregator.await?;

        match first_error {
            Some(e) => Err(e),
            None => Ok(parts),
        }
    }
}

/// Best-effort cleanup of a failed session. The outcome is advisory only: a
/// failure here is logged and never replaces the error that caused the abort.
pub async fn abort_advisory(client: &dyn ObjectStore, destination: &ObjectLocation, upload_id: &str) {
    match client.abort_multipart_upload(destination, upload_id).await {
        Ok(()) => tracing::warn!(
            "🧹 Aborted multipart upload {} for {}",
            upload_id,
            destination
        ),
        Err(e) => tracing::error!(
            "Failed to abort multipart upload {} for {}: {}",
            upload_id,
            destination,
            e
        ),
    }
}
