mod common;

use common::MemoryManifestStore;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::time::Duration;
use upload_mover::Result;
use upload_mover::models::{
    BatchOutcome, FileStatus, FileWrite, ManifestFileRecord, ManifestRecord,
};
use upload_mover::services::metadata::{ManifestStore, write_files_with_retry};

fn put(upload_id: &str) -> FileWrite {
    FileWrite::Put(ManifestFileRecord {
        upload_id: upload_id.to_string(),
        manifest_id: "manifest-1".to_string(),
        file_path: format!("data/{}.bin", upload_id),
        size: Some(10),
        status: FileStatus::Uploaded,
    })
}

#[tokio::test(start_paused = true)]
async fn test_transiently_unprocessed_writes_are_retried() {
    let store = MemoryManifestStore {
        unprocessed_calls: 2,
        unprocessed_ids: HashSet::from(["u-03".to_string(), "u-27".to_string()]),
        ..Default::default()
    };
    let writes: Vec<_> = (0..30).map(|i| put(&format!("u-{:02}", i))).collect();

    let outcome = write_files_with_retry(&store, writes).await.unwrap();

    assert_eq!(outcome.updated, 30);
    assert_eq!(outcome.removed, 0);
    assert!(outcome.failed_files.is_empty());
    // First batch: initial attempt plus two retries. Second batch goes through at once.
    assert_eq!(store.write_batch_calls.load(Ordering::SeqCst), 4);
    assert_eq!(store.files.lock().unwrap().len(), 30);
}

#[tokio::test(start_paused = true)]
async fn test_persistently_unprocessed_writes_are_reported() {
    let store = MemoryManifestStore {
        unprocessed_calls: usize::MAX,
        unprocessed_ids: HashSet::from(["u-1".to_string(), "u-2".to_string()]),
        ..Default::default()
    };
    store.add_file("manifest-1", "u-2", Some(5));
    store.add_file("manifest-1", "u-3", Some(5));

    let writes = vec![
        put("u-1"),
        FileWrite::Delete {
            manifest_id: "manifest-1".to_string(),
            upload_id: "u-2".to_string(),
        },
        FileWrite::Delete {
            manifest_id: "manifest-1".to_string(),
            upload_id: "u-3".to_string(),
        },
        put("u-4"),
    ];

    let started = tokio::time::Instant::now();
    let outcome = write_files_with_retry(&store, writes).await.unwrap();

    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.removed, 1);
    assert_eq!(outcome.failed_files, vec!["u-1".to_string(), "u-2".to_string()]);
    assert_eq!(store.write_batch_calls.load(Ordering::SeqCst), 4);
    // Linear backoff: 100ms + 200ms + 300ms.
    assert!(started.elapsed() >= Duration::from_millis(600));

    assert!(store.status_of("u-4").is_some());
    assert!(store.status_of("u-3").is_none());
    assert!(store.status_of("u-2").is_some());
}

#[tokio::test]
async fn test_empty_write_set() {
    let store = MemoryManifestStore::new();
    let outcome = write_files_with_retry(&store, Vec::new()).await.unwrap();
    assert_eq!(outcome, BatchOutcome::default());
    assert_eq!(store.write_batch_calls.load(Ordering::SeqCst), 0);
}

/// Reports writes as unprocessed that it was never handed, duplicates included.
struct ConfusedStore;

#[async_trait::async_trait]
impl ManifestStore for ConfusedStore {
    async fn get_manifest(&self, _: &str) -> Result<Option<ManifestRecord>> {
        Ok(None)
    }

    async fn list_files(&self, _: &str) -> Result<Vec<ManifestFileRecord>> {
        Ok(Vec::new())
    }

    async fn pending_page(&self, _: Option<&str>, _: u64) -> Result<Vec<ManifestFileRecord>> {
        Ok(Vec::new())
    }

    async fn update_file_status(&self, _: &str, _: &str, _: FileStatus) -> Result<()> {
        Ok(())
    }

    async fn write_batch(&self, writes: &[FileWrite]) -> Result<Vec<FileWrite>> {
        let foreign = FileWrite::Delete {
            manifest_id: "manifest-9".to_string(),
            upload_id: "u-foreign".to_string(),
        };
        let mut unprocessed = vec![foreign.clone(), foreign];
        unprocessed.extend(writes.iter().take(1).cloned());
        unprocessed.extend(writes.iter().take(1).cloned());
        Ok(unprocessed)
    }
}

#[tokio::test(start_paused = true)]
async fn test_unknown_unprocessed_writes_do_not_skew_counts() {
    let outcome = write_files_with_retry(&ConfusedStore, vec![put("u-1"), put("u-2")])
        .await
        .unwrap();

    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.removed, 0);
    assert_eq!(outcome.failed_files, vec!["u-1".to_string()]);
}
