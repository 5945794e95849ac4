use crate::error::{MoverError, Result};
use crate::models::PendingFile;
use crate::services::metadata::ManifestStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Produces the files that finished uploading but have not been moved yet.
#[async_trait]
pub trait PendingFileSource: Send + Sync {
    /// Sends every pending file into `sink` and returns how many were sent.
    /// The channel closes when the sender is dropped on return.
    async fn scan(&self, sink: mpsc::Sender<PendingFile>) -> Result<usize>;
}

/// Pages through the manifest file table by upload id. Keyset paging keeps the
/// scan stable while workers flip statuses of rows already handed out.
pub struct StorePendingFileSource {
    store: Arc<dyn ManifestStore>,
    page_size: u64,
}

impl StorePendingFileSource {
    pub fn new(store: Arc<dyn ManifestStore>, page_size: u64) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl PendingFileSource for StorePendingFileSource {
    async fn scan(&self, sink: mpsc::Sender<PendingFile>) -> Result<usize> {
        let mut after: Option<String> = None;
        let mut sent = 0;

        loop {
            let page = self
                .store
                .pending_page(after.as_deref(), self.page_size)
                .await
                .map_err(|e| MoverError::Scan(e.to_string()))?;
            let page_len = page.len() as u64;

            tracing::debug!("Scanned page of {} pending files", page_len);
            for record in page {
                after = Some(record.upload_id.clone());
                if sink.send(PendingFile::from(record)).await.is_err() {
                    return Err(MoverError::Scan(
                        "worker pool stopped receiving files".to_string(),
                    ));
                }
                sent += 1;
            }

            if page_len < self.page_size {
                break;
            }
        }

        tracing::info!("🔎 Pending file scan finished: {} files queued", sent);
        Ok(sent)
    }
}
