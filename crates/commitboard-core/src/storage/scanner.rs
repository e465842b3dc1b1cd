//! Storage usage scanner
//!
//! Walks each known top-level folder plus one level of subfolders. Anything
//! that fails is skipped and recorded in the [`ScanReport`]; only an
//! unavailable object store aborts the walk, which resets the gauge to zeros.

use super::TtlCache;
use crate::backend::{Clock, DocumentStore, KeyValueStore, ObjectStore};
use crate::config::StorageConfig;
use crate::error::{CoreError, ScanIssue, ScanReport};
use crate::event::{DataEvent, EventBus};
use commitboard_types::models::storage::bytes_to_gb;
use commitboard_types::StorageUsageSnapshot;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type InFlight = watch::Receiver<Option<StorageUsageSnapshot>>;

#[derive(Debug, Default)]
struct Tally {
    bytes: u64,
    images: u64,
    files: u64,
}

enum Role {
    Leader(watch::Sender<Option<StorageUsageSnapshot>>),
    Follower(InFlight),
}

/// Clears the in-flight slot even if the leading scan is cancelled
struct InFlightGuard<'a> {
    slot: &'a Mutex<Option<InFlight>>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

pub struct StorageScanner {
    documents: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    cache: TtlCache<StorageUsageSnapshot>,
    config: StorageConfig,
    state: watch::Sender<StorageUsageSnapshot>,
    events: EventBus,
    in_flight: Mutex<Option<InFlight>>,
    auto_scan: Mutex<Option<JoinHandle<()>>>,
    scans: AtomicUsize,
}

impl StorageScanner {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        local: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: StorageConfig,
        events: EventBus,
    ) -> Self {
        let cache = TtlCache::new(local, Arc::clone(&clock), config.ttl());
        let (state, _) = watch::channel(StorageUsageSnapshot::empty(config.capacity_gb));

        Self {
            documents,
            objects,
            clock,
            cache,
            config,
            state,
            events,
            in_flight: Mutex::new(None),
            auto_scan: Mutex::new(None),
            scans: AtomicUsize::new(0),
        }
    }

    /// Current gauge without triggering anything
    pub fn snapshot(&self) -> StorageUsageSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StorageUsageSnapshot> {
        self.state.subscribe()
    }

    /// Number of walks actually performed (cache hits and followers excluded)
    pub fn scans_performed(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Usage, served from the local cache while it is fresh
    pub async fn usage(&self) -> StorageUsageSnapshot {
        if let Some((cached, stored_at)) = self.cache.get_with_timestamp(&self.config.cache_key) {
            debug!(stored_at = %stored_at, "Storage usage served from cache");
            self.state.send_replace(cached.clone());
            self.events.publish(DataEvent::StorageScanned);
            return cached;
        }
        self.refresh().await
    }

    /// Rescan regardless of the cache
    ///
    /// While a scan is running, further callers wait for its result instead of
    /// starting their own.
    pub async fn refresh(&self) -> StorageUsageSnapshot {
        let role = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => {
                debug!("Storage scan already running, waiting for it");
                match rx.wait_for(Option::is_some).await {
                    Ok(result) => result.as_ref().cloned().unwrap_or_default(),
                    // Leader was cancelled before finishing
                    Err(_) => self.snapshot(),
                }
            }
            Role::Leader(tx) => {
                let _guard = InFlightGuard {
                    slot: &self.in_flight,
                };
                let snapshot = self.scan_and_store().await;
                let _ = tx.send(Some(snapshot.clone()));
                snapshot
            }
        }
    }

    /// Drop the cached gauge and reset to zeros
    pub fn invalidate(&self) {
        if let Err(e) = self.cache.invalidate(&self.config.cache_key) {
            warn!(error = %e, "Failed to clear cached storage usage");
        }
        self.state
            .send_replace(StorageUsageSnapshot::empty(self.config.capacity_gb));
    }

    /// Run the first automatic scan after the configured delay
    ///
    /// Returns false when auto-scan is not enabled. Must be called from within
    /// a tokio runtime.
    pub fn schedule_auto_scan(self: &Arc<Self>) -> bool {
        if !self.config.auto_scan {
            debug!("Storage auto-scan disabled");
            return false;
        }

        let delay = self.config.auto_scan_delay();
        let scanner = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(scanner) = scanner.upgrade() {
                scanner.usage().await;
            }
        });

        if let Some(previous) = self.auto_scan.lock().replace(handle) {
            previous.abort();
        }
        debug!(delay_secs = delay.as_secs(), "Storage auto-scan scheduled");
        true
    }

    pub fn cancel_auto_scan(&self) {
        if let Some(handle) = self.auto_scan.lock().take() {
            handle.abort();
            debug!("Storage auto-scan cancelled");
        }
    }

    async fn scan_and_store(&self) -> StorageUsageSnapshot {
        self.state.send_modify(|s| s.loading = true);

        let (snapshot, report) = self.scan_with_report().await;
        let (warnings, errors, fatal) = report.issue_count();
        info!(
            used_gb = snapshot.used,
            documents = snapshot.documents,
            images = snapshot.images,
            files = snapshot.files,
            warnings,
            errors,
            fatal,
            "Storage scan finished"
        );

        if !report.has_fatal_issues() {
            if let Err(e) = self
                .cache
                .put(&self.config.cache_key, &snapshot, self.clock.now())
            {
                warn!(error = %e, "Failed to cache storage usage");
            }
        }

        self.state.send_replace(snapshot.clone());
        self.events.publish(DataEvent::StorageScanned);
        snapshot
    }

    /// Walk the store once, bypassing cache and reentrancy guard
    pub async fn scan_with_report(&self) -> (StorageUsageSnapshot, ScanReport) {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let mut report = ScanReport::new();

        match self.walk(&mut report).await {
            Ok(snapshot) => (snapshot, report),
            Err(e) => {
                error!(error = %e, "Object store unavailable, resetting storage usage");
                report.add_fatal("storage", e.to_string());
                (StorageUsageSnapshot::empty(self.config.capacity_gb), report)
            }
        }
    }

    async fn walk(&self, report: &mut ScanReport) -> Result<StorageUsageSnapshot, CoreError> {
        let documents = self.count_documents(report).await;
        let mut tally = Tally::default();

        for folder in &self.config.folders {
            let listing = match self.objects.list(folder).await {
                Ok(listing) => listing,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    debug!(folder = %folder, error = %e, "Skipping folder");
                    report.folders_failed += 1;
                    report.add_issue(ScanIssue::error(folder.as_str(), e.to_string()));
                    continue;
                }
            };
            report.folders_scanned += 1;
            self.tally_items(&listing.items, &mut tally, report).await?;

            let overflow = listing
                .prefixes
                .len()
                .saturating_sub(self.config.max_subfolders);
            if overflow > 0 {
                debug!(folder = %folder, overflow, "Subfolder cap reached");
                report.subfolders_skipped += overflow;
            }

            for subfolder in listing.prefixes.iter().take(self.config.max_subfolders) {
                if subfolder.len() > self.config.max_path_len {
                    report.subfolders_skipped += 1;
                    report.add_warning(subfolder.as_str(), "path too long");
                    continue;
                }

                match self.objects.list(subfolder).await {
                    Ok(sub) => {
                        report.subfolders_scanned += 1;
                        self.tally_items(&sub.items, &mut tally, report).await?;
                    }
                    Err(e) if e.is_unavailable() => return Err(e),
                    Err(e) => {
                        debug!(subfolder = %subfolder, error = %e, "Skipping subfolder");
                        report.subfolders_skipped += 1;
                        report.add_issue(ScanIssue::error(subfolder.as_str(), e.to_string()));
                    }
                }
            }
        }

        Ok(StorageUsageSnapshot {
            used: bytes_to_gb(tally.bytes),
            total: self.config.capacity_gb,
            documents,
            images: tally.images,
            files: tally.files,
            loading: false,
            error: None,
        })
    }

    /// Sum of collection sizes, or the placeholder when nothing could be counted
    async fn count_documents(&self, report: &mut ScanReport) -> u64 {
        let mut total = 0;
        for collection in &self.config.collections {
            match self.documents.count(collection).await {
                Ok(count) => {
                    report.collections_counted += 1;
                    total += count;
                }
                Err(e) => {
                    debug!(collection = %collection, error = %e, "Skipping collection count");
                    report.collections_failed += 1;
                    report.add_issue(ScanIssue::error(collection.as_str(), e.to_string()));
                }
            }
        }

        if report.collections_counted == 0 && !self.config.collections.is_empty() {
            debug!(
                placeholder = self.config.placeholder_documents,
                "No collection could be counted"
            );
            return self.config.placeholder_documents;
        }
        total
    }

    async fn tally_items(
        &self,
        items: &[String],
        tally: &mut Tally,
        report: &mut ScanReport,
    ) -> Result<(), CoreError> {
        for item in items {
            match self.objects.metadata(item).await {
                Ok(meta) => {
                    tally.bytes += meta.size;
                    if meta.is_image() {
                        tally.images += 1;
                    } else {
                        tally.files += 1;
                    }
                }
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    report.items_failed += 1;
                    report.add_warning(item.as_str(), e.to_string());
                }
            }
        }
        Ok(())
    }
}

impl Drop for StorageScanner {
    fn drop(&mut self) {
        if let Some(handle) = self.auto_scan.lock().take() {
            handle.abort();
        }
    }
}
