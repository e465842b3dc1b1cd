//! Integration tests for the storage scanner: walk bounds, TTL caching and
//! the reentrancy guard

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use commitboard_core::backend::memory::{MemoryDocumentStore, MemoryObjectStore};
use commitboard_core::backend::{
    FileKeyValueStore, FolderListing, KeyValueStore, ManualClock, MemoryKeyValueStore,
    ObjectMetadata, ObjectStore,
};
use commitboard_core::config::StorageConfig;
use commitboard_core::{CoreError, DataEvent, EventBus, StorageScanner};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const MB: u64 = 1024 * 1024;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap(),
    ))
}

fn scanner_with(
    objects: Arc<dyn ObjectStore>,
    local: Arc<dyn KeyValueStore>,
    clock: Arc<ManualClock>,
    config: StorageConfig,
) -> StorageScanner {
    StorageScanner::new(
        Arc::new(MemoryDocumentStore::new()),
        objects,
        local,
        clock,
        config,
        EventBus::default(),
    )
}

#[tokio::test]
async fn test_walk_respects_subfolder_and_path_bounds() {
    let objects = Arc::new(MemoryObjectStore::new());
    objects.put_object("receipts/top.pdf", MB, Some("application/pdf"));
    for i in 0..25 {
        objects.put_object(&format!("receipts/sub-{i:02}/r.png"), MB, Some("image/png"));
    }
    // Two levels down is never visited
    objects.put_object("receipts/sub-00/deep/hidden.png", 100 * MB, Some("image/png"));

    let long_name = "x".repeat(220);
    objects.put_object(&format!("logos/{long_name}/a.png"), MB, Some("image/png"));
    objects.put_object("logos/short/a.png", MB, Some("image/png"));

    let scanner = scanner_with(
        objects.clone(),
        Arc::new(MemoryKeyValueStore::new()),
        clock(),
        StorageConfig::default(),
    );
    let (snapshot, report) = scanner.scan_with_report().await;

    // receipts: top.pdf + 20 subfolders; logos: short only
    assert_eq!(snapshot.files, 1);
    assert_eq!(snapshot.images, 21);
    assert_eq!(report.subfolders_scanned, 21);
    assert_eq!(report.subfolders_skipped, 6);

    let listed = objects.listed_folders();
    assert_eq!(listed.len(), 7 + 21);
    assert!(listed.contains(&"receipts/sub-19".to_string()));
    assert!(!listed.contains(&"receipts/sub-20".to_string()));
    assert!(!listed.iter().any(|f| f.contains("deep")));
    assert!(!listed.iter().any(|f| f.len() > 200));
}

#[tokio::test]
async fn test_cached_usage_expires_after_ttl() {
    let objects = Arc::new(MemoryObjectStore::new());
    objects.put_object("logos/a.png", 10 * MB, Some("image/png"));
    let clock = clock();

    let scanner = scanner_with(
        objects.clone(),
        Arc::new(MemoryKeyValueStore::new()),
        clock.clone(),
        StorageConfig::default(),
    );

    let first = scanner.usage().await;
    assert_eq!(first.images, 1);
    assert_eq!(scanner.scans_performed(), 1);

    // Still fresh: served from cache even though the store changed
    objects.put_object("logos/b.png", 10 * MB, Some("image/png"));
    clock.advance(ChronoDuration::minutes(29));
    assert_eq!(scanner.usage().await, first);
    assert_eq!(scanner.scans_performed(), 1);

    clock.advance(ChronoDuration::minutes(2));
    let rescanned = scanner.usage().await;
    assert_eq!(rescanned.images, 2);
    assert_eq!(scanner.scans_performed(), 2);
}

#[tokio::test]
async fn test_manual_refresh_bypasses_fresh_cache() {
    let objects = Arc::new(MemoryObjectStore::new());
    let scanner = scanner_with(
        objects.clone(),
        Arc::new(MemoryKeyValueStore::new()),
        clock(),
        StorageConfig::default(),
    );

    scanner.usage().await;
    objects.put_object("payments/p.pdf", MB, Some("application/pdf"));
    let refreshed = scanner.refresh().await;
    assert_eq!(refreshed.files, 1);
    assert_eq!(scanner.scans_performed(), 2);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("local-store.json");
    let objects = Arc::new(MemoryObjectStore::new());
    objects.put_object("logos/a.png", MB, Some("image/png"));
    let clock = clock();

    let first = scanner_with(
        objects.clone(),
        Arc::new(FileKeyValueStore::open(&path).unwrap()),
        clock.clone(),
        StorageConfig::default(),
    );
    let snapshot = first.usage().await;
    drop(first);

    let second = scanner_with(
        objects,
        Arc::new(FileKeyValueStore::open(&path).unwrap()),
        clock,
        StorageConfig::default(),
    );
    assert_eq!(second.usage().await, snapshot);
    assert_eq!(second.scans_performed(), 0);
}

#[tokio::test]
async fn test_invalidate_forces_rescan() {
    let scanner = scanner_with(
        Arc::new(MemoryObjectStore::new()),
        Arc::new(MemoryKeyValueStore::new()),
        clock(),
        StorageConfig::default(),
    );
    scanner.usage().await;
    scanner.invalidate();
    scanner.usage().await;
    assert_eq!(scanner.scans_performed(), 2);
}

/// Object store that yields before answering, so scans overlap
struct SlowObjectStore {
    inner: MemoryObjectStore,
}

#[async_trait]
impl ObjectStore for SlowObjectStore {
    async fn list(&self, folder: &str) -> Result<FolderListing, CoreError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.inner.list(folder).await
    }

    async fn metadata(&self, path: &str) -> Result<ObjectMetadata, CoreError> {
        self.inner.metadata(path).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_refreshes_share_one_scan() {
    let inner = MemoryObjectStore::new();
    inner.put_object("logos/a.png", MB, Some("image/png"));
    let objects = Arc::new(SlowObjectStore { inner });

    let scanner = scanner_with(
        objects.clone(),
        Arc::new(MemoryKeyValueStore::new()),
        clock(),
        StorageConfig::default(),
    );

    let (a, b) = tokio::join!(scanner.refresh(), scanner.refresh());
    assert_eq!(a, b);
    assert_eq!(a.images, 1);
    assert_eq!(scanner.scans_performed(), 1);
    assert_eq!(objects.inner.list_calls(), 7);

    // Once finished, the slot is free again
    scanner.refresh().await;
    assert_eq!(scanner.scans_performed(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_auto_scan_is_opt_in_and_delayed() {
    let objects = Arc::new(MemoryObjectStore::new());
    let disabled = Arc::new(scanner_with(
        objects.clone(),
        Arc::new(MemoryKeyValueStore::new()),
        clock(),
        StorageConfig::default(),
    ));
    assert!(!disabled.schedule_auto_scan());

    let config = StorageConfig {
        auto_scan: true,
        ..StorageConfig::default()
    };
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let scanner = Arc::new(StorageScanner::new(
        Arc::new(MemoryDocumentStore::new()),
        objects,
        Arc::new(MemoryKeyValueStore::new()),
        clock(),
        config,
        events,
    ));
    assert!(scanner.schedule_auto_scan());

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(scanner.scans_performed(), 0);

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, DataEvent::StorageScanned));
    assert_eq!(scanner.scans_performed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_auto_scan_never_runs() {
    let config = StorageConfig {
        auto_scan: true,
        ..StorageConfig::default()
    };
    let scanner = Arc::new(scanner_with(
        Arc::new(MemoryObjectStore::new()),
        Arc::new(MemoryKeyValueStore::new()),
        clock(),
        config,
    ));
    assert!(scanner.schedule_auto_scan());
    scanner.cancel_auto_scan();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(scanner.scans_performed(), 0);
}
