//! Live stats client
//!
//! One driver task owns every stats subscription and is the only writer of
//! the [`MetricsCache`]. State machine:
//!
//! ```text
//! uninitialized --summary exists--> optimized
//! uninitialized --summary absent--> fallback
//! fallback      --summary appears-> optimized   (raw listeners dropped)
//! optimized     --summary removed-> fallback
//! ```

use super::{aggregate, MetricsCache, StatsMode};
use crate::backend::{
    Clock, CollectionQuery, DocPath, Document, DocumentStore, Listener, RemoteProcedures,
};
use crate::config::StatsConfig;
use crate::error::CoreError;
use crate::event::{DataEvent, EventBus};
use chrono::{DateTime, Local, Utc};
use commitboard_types::{AggregateSnapshot, CommitmentRecord, PaymentRecord};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of a manual refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The summary was rewritten at `last_updated`
    Completed { last_updated: DateTime<Utc> },
    /// The job was triggered but the summary did not advance in time
    TimedOut,
}

pub struct StatsAggregatorClient {
    store: Arc<dyn DocumentStore>,
    procedures: Arc<dyn RemoteProcedures>,
    clock: Arc<dyn Clock>,
    config: StatsConfig,
    summary_path: DocPath,
    state: Arc<watch::Sender<MetricsCache>>,
    events: EventBus,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl StatsAggregatorClient {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        procedures: Arc<dyn RemoteProcedures>,
        clock: Arc<dyn Clock>,
        config: StatsConfig,
        events: EventBus,
    ) -> Result<Self, CoreError> {
        let summary_path = DocPath::parse(&config.summary_document)?;
        let (state, _) = watch::channel(MetricsCache::default());

        Ok(Self {
            store,
            procedures,
            clock,
            config,
            summary_path,
            state: Arc::new(state),
            events,
            driver: Mutex::new(None),
        })
    }

    /// Start following the summary. No-op when already active.
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(&self) {
        let mut driver = self.driver.lock();
        if driver.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        self.state.send_replace(MetricsCache {
            loading: true,
            ..MetricsCache::default()
        });

        let task = Driver {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            summary_path: self.summary_path.clone(),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        };
        *driver = Some(tokio::spawn(task.run()));
        debug!(summary = %self.summary_path, "Stats client activated");
    }

    /// Release every subscription and forget the cached metrics
    pub async fn deactivate(&self) {
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            debug!("Stats client deactivated");
        }
        self.state.send_replace(MetricsCache::default());
    }

    pub fn is_active(&self) -> bool {
        self.driver
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn snapshot(&self) -> MetricsCache {
        self.state.borrow().clone()
    }

    pub fn mode(&self) -> StatsMode {
        self.state.borrow().mode
    }

    pub fn subscribe(&self) -> watch::Receiver<MetricsCache> {
        self.state.subscribe()
    }

    /// Ask the remote job to rebuild the summary and wait for it to land
    ///
    /// Completes once the live metrics come from a summary whose `lastUpdated`
    /// is strictly newer than the one seen before the call. A client that was
    /// just activated is given the same timeout to apply its first summary
    /// emission, so an existing summary is never mistaken for the rebuilt one.
    pub async fn refresh(&self) -> Result<RefreshOutcome, CoreError> {
        let timeout = self.config.refresh_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.state.subscribe();

        let first_emission =
            |cache: &MetricsCache| !cache.loading || cache.mode != StatsMode::Uninitialized;
        let settled = tokio::time::timeout_at(deadline, rx.wait_for(first_emission))
            .await
            .map(|r| r.map(|cache| cache.last_updated));
        let baseline = match settled {
            Ok(Ok(last_updated)) => last_updated,
            Ok(Err(_)) => return Err(dropped_during_refresh()),
            Err(_) => {
                debug!("Stats still loading, refreshing against the current summary");
                rx.borrow_and_update().last_updated
            }
        };
        let procedure = &self.config.recompute_procedure;

        info!(procedure = %procedure, "Requesting stats recomputation");
        let response = self.procedures.call(procedure).await.map_err(|e| {
            error!(procedure = %procedure, error = %e, "Stats recomputation failed");
            e
        })?;
        debug!(procedure = %procedure, response = %response, "Recomputation accepted");

        let advanced = |cache: &MetricsCache| {
            cache.is_optimized()
                && match (cache.last_updated, baseline) {
                    (Some(current), Some(before)) => current > before,
                    (Some(_), None) => true,
                    (None, _) => false,
                }
        };

        let landed = tokio::time::timeout_at(deadline, rx.wait_for(advanced))
            .await
            .map(|r| r.map(|cache| cache.last_updated));
        match landed {
            Ok(Ok(last_updated)) => match last_updated {
                Some(last_updated) => Ok(RefreshOutcome::Completed { last_updated }),
                None => Ok(RefreshOutcome::TimedOut),
            },
            Ok(Err(_)) => Err(dropped_during_refresh()),
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Summary did not advance before the refresh timeout"
                );
                Ok(RefreshOutcome::TimedOut)
            }
        }
    }
}

fn dropped_during_refresh() -> CoreError {
    CoreError::Unavailable {
        message: "stats client dropped during refresh".to_string(),
    }
}

impl Drop for StatsAggregatorClient {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.lock().take() {
            handle.abort();
        }
    }
}

/// Raw collections subscribed while the summary is absent
struct FallbackFeed {
    commitments: Listener<Vec<Document>>,
    payments: Listener<Vec<Document>>,
    commitments_open: bool,
    payments_open: bool,
    latest_commitments: Option<Vec<CommitmentRecord>>,
    latest_payments: Option<Vec<PaymentRecord>>,
}

enum RawEmission {
    Commitments(Option<Result<Vec<Document>, CoreError>>),
    Payments(Option<Result<Vec<Document>, CoreError>>),
}

impl FallbackFeed {
    fn open(store: &dyn DocumentStore, config: &StatsConfig) -> Self {
        Self {
            commitments: store
                .subscribe_collection(&CollectionQuery::all(&config.commitments_collection)),
            payments: store.subscribe_collection(&CollectionQuery::all(&config.payments_collection)),
            commitments_open: true,
            payments_open: true,
            latest_commitments: None,
            latest_payments: None,
        }
    }

    async fn next(&mut self) -> RawEmission {
        if !self.commitments_open && !self.payments_open {
            return std::future::pending().await;
        }
        tokio::select! {
            emission = self.commitments.next(), if self.commitments_open => {
                RawEmission::Commitments(emission)
            }
            emission = self.payments.next(), if self.payments_open => {
                RawEmission::Payments(emission)
            }
        }
    }

    fn ready(&self) -> Option<(&[CommitmentRecord], &[PaymentRecord])> {
        match (&self.latest_commitments, &self.latest_payments) {
            (Some(c), Some(p)) => Some((c, p)),
            _ => None,
        }
    }
}

async fn next_raw(feed: &mut Option<FallbackFeed>) -> RawEmission {
    match feed {
        Some(feed) => feed.next().await,
        None => std::future::pending().await,
    }
}

enum Step {
    Summary(Option<Result<Option<Document>, CoreError>>),
    Raw(RawEmission),
}

struct Driver {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: StatsConfig,
    summary_path: DocPath,
    state: Arc<watch::Sender<MetricsCache>>,
    events: EventBus,
}

impl Driver {
    async fn run(self) {
        let mut summary = self.store.subscribe_document(&self.summary_path);
        let mut summary_open = true;
        let mut fallback: Option<FallbackFeed> = None;

        loop {
            let step = tokio::select! {
                emission = summary.next(), if summary_open => Step::Summary(emission),
                emission = next_raw(&mut fallback) => Step::Raw(emission),
            };

            match step {
                Step::Summary(Some(Ok(Some(doc)))) => match doc.decode::<AggregateSnapshot>() {
                    Ok(snapshot) => {
                        if fallback.take().is_some() {
                            info!("Summary appeared, leaving fallback mode");
                        }
                        self.publish_snapshot(snapshot);
                    }
                    Err(e) => self.on_error("summary", e),
                },
                Step::Summary(Some(Ok(None))) => {
                    if fallback.is_none() {
                        info!(summary = %self.summary_path, "Summary absent, recomputing from raw collections");
                        fallback = Some(FallbackFeed::open(self.store.as_ref(), &self.config));
                        self.enter_fallback();
                    }
                }
                Step::Summary(Some(Err(e))) => self.on_error("summary", e),
                Step::Summary(None) => {
                    debug!("Summary listener closed");
                    summary_open = false;
                }
                Step::Raw(emission) => {
                    if let Some(feed) = fallback.as_mut() {
                        self.on_raw(feed, emission);
                    }
                }
            }
        }
    }

    fn publish_snapshot(&self, snapshot: AggregateSnapshot) {
        let previous = self.state.borrow().mode;
        self.state.send_replace(MetricsCache {
            metrics: snapshot.metrics,
            mode: StatsMode::Optimized,
            loading: false,
            error: None,
            last_updated: snapshot.last_updated,
        });

        if previous != StatsMode::Optimized {
            self.events
                .publish(DataEvent::StatsModeChanged(StatsMode::Optimized));
        }
        self.events.publish(DataEvent::MetricsUpdated);
    }

    fn enter_fallback(&self) {
        self.state.send_modify(|cache| {
            cache.mode = StatsMode::Fallback;
            cache.loading = true;
            cache.last_updated = None;
            cache.metrics = Default::default();
        });
        self.events
            .publish(DataEvent::StatsModeChanged(StatsMode::Fallback));
    }

    fn on_raw(&self, feed: &mut FallbackFeed, emission: RawEmission) {
        match emission {
            RawEmission::Commitments(Some(Ok(docs))) => {
                feed.latest_commitments = Some(decode_all(&self.config.commitments_collection, &docs));
            }
            RawEmission::Payments(Some(Ok(docs))) => {
                feed.latest_payments = Some(decode_all(&self.config.payments_collection, &docs));
            }
            RawEmission::Commitments(Some(Err(e))) => {
                return self.on_error(&self.config.commitments_collection, e)
            }
            RawEmission::Payments(Some(Err(e))) => {
                return self.on_error(&self.config.payments_collection, e)
            }
            RawEmission::Commitments(None) => {
                feed.commitments_open = false;
                return;
            }
            RawEmission::Payments(None) => {
                feed.payments_open = false;
                return;
            }
        }

        let Some((commitments, payments)) = feed.ready() else {
            return;
        };
        let now = self.clock.now().with_timezone(&Local);
        let metrics = aggregate(commitments, payments, &now);
        debug!(
            commitments = commitments.len(),
            payments = payments.len(),
            "Recomputed metrics from raw collections"
        );

        self.state.send_replace(MetricsCache {
            metrics,
            mode: StatsMode::Fallback,
            loading: false,
            error: None,
            last_updated: None,
        });
        self.events.publish(DataEvent::MetricsUpdated);
    }

    fn on_error(&self, source: &str, err: CoreError) {
        if err.is_benign() {
            debug!(source, error = %err, "Stats listener lost permission");
            self.state.send_modify(|cache| {
                cache.error = None;
                cache.loading = false;
            });
            return;
        }

        warn!(source, error = %err, "Stats listener failed");
        let message = err.to_string();
        self.state.send_modify(|cache| {
            cache.error = Some(message.clone());
            cache.loading = false;
        });
        self.events.publish(DataEvent::ListenerError(message));
    }
}

/// Decode every document, dropping the ones that do not fit the record shape
fn decode_all<T: DeserializeOwned>(collection: &str, docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode::<T>() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(collection, id = %doc.id, error = %e, "Skipping malformed record");
                None
            }
        })
        .collect()
}
