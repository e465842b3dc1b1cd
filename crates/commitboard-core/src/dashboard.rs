//! Session orchestration
//!
//! The dashboard owns the three live components and follows the
//! authentication context: sign-in activates them, sign-out tears each one
//! down and drops every session-derived cache.

use crate::alerts::AlertStore;
use crate::auth::{AuthContext, AuthState};
use crate::backend::{Clock, DocumentStore, KeyValueStore, ObjectStore, RemoteProcedures};
use crate::config::DashboardConfig;
use crate::error::CoreError;
use crate::event::{DataEvent, EventBus};
use crate::stats::StatsAggregatorClient;
use crate::storage::StorageScanner;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// External collaborators the dashboard runs against
#[derive(Clone)]
pub struct Backends {
    pub documents: Arc<dyn DocumentStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub procedures: Arc<dyn RemoteProcedures>,
    /// Per-client local persistence
    pub local: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
}

pub struct Dashboard {
    auth: AuthContext,
    stats: StatsAggregatorClient,
    storage: Arc<StorageScanner>,
    alerts: AlertStore,
    events: EventBus,
    active_user: tokio::sync::Mutex<Option<String>>,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl Dashboard {
    pub fn new(
        backends: Backends,
        config: DashboardConfig,
        auth: AuthContext,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let events = EventBus::default_capacity();

        let stats = StatsAggregatorClient::new(
            Arc::clone(&backends.documents),
            Arc::clone(&backends.procedures),
            Arc::clone(&backends.clock),
            config.stats,
            events.clone(),
        )?;
        let storage = Arc::new(StorageScanner::new(
            Arc::clone(&backends.documents),
            Arc::clone(&backends.objects),
            Arc::clone(&backends.local),
            Arc::clone(&backends.clock),
            config.storage,
            events.clone(),
        ));
        let alerts = AlertStore::new(
            Arc::clone(&backends.documents),
            Arc::clone(&backends.clock),
            config.alerts,
            events.clone(),
        );

        Ok(Self {
            auth,
            stats,
            storage,
            alerts,
            events,
            active_user: tokio::sync::Mutex::new(None),
            follower: Mutex::new(None),
        })
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn stats(&self) -> &StatsAggregatorClient {
        &self.stats
    }

    pub fn storage(&self) -> &Arc<StorageScanner> {
        &self.storage
    }

    pub fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn active_user(&self) -> Option<String> {
        self.active_user.lock().await.clone()
    }

    /// Activate every component for `user_id`
    ///
    /// A different user's session is ended first.
    pub async fn start_session(&self, user_id: &str) {
        let mut active = self.active_user.lock().await;
        match active.as_deref() {
            Some(current) if current == user_id => return,
            Some(_) => self.teardown().await,
            None => {}
        }

        self.stats.activate();
        self.alerts.activate(user_id);
        self.storage.schedule_auto_scan();

        *active = Some(user_id.to_string());
        info!(user = user_id, "Dashboard session started");
        self.events
            .publish(DataEvent::SessionStarted(user_id.to_string()));
    }

    /// Tear down every component and drop session caches
    pub async fn end_session(&self) {
        let mut active = self.active_user.lock().await;
        let Some(user) = active.take() else {
            return;
        };
        self.teardown().await;
        info!(user = %user, "Dashboard session ended");
        self.events.publish(DataEvent::SessionEnded);
    }

    async fn teardown(&self) {
        self.storage.cancel_auto_scan();
        tokio::join!(self.stats.deactivate(), self.alerts.deactivate());
        self.storage.invalidate();
    }

    /// Follow the auth context until [`Dashboard::stop`]
    ///
    /// Must be called from within a tokio runtime.
    pub fn follow_auth(self: &Arc<Self>) {
        let mut rx = self.auth.subscribe();
        let dashboard = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            loop {
                let state = rx.borrow_and_update().clone();
                let Some(dashboard) = dashboard.upgrade() else {
                    break;
                };
                dashboard.apply_auth(&state).await;
                drop(dashboard);

                if rx.changed().await.is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.follower.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn apply_auth(&self, state: &AuthState) {
        match (&state.user_id, state.loading) {
            (_, true) => debug!("Auth still resolving"),
            (Some(user), false) => self.start_session(user).await,
            (None, false) => self.end_session().await,
        }
    }

    /// Stop following auth and end any session
    pub async fn stop(&self) {
        let follower = self.follower.lock().take();
        if let Some(follower) = follower {
            follower.abort();
            let _ = follower.await;
        }
        self.end_session().await;
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        if let Some(follower) = self.follower.lock().take() {
            follower.abort();
        }
    }
}
