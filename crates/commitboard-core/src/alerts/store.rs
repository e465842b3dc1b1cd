//! Live alert view and read-state writes
//!
//! Two independent listeners per session: the most recent alerts and the
//! user's alert configuration. Either can fail without affecting the other.

use super::BatchCommitter;
use crate::backend::{
    Clock, CollectionQuery, DocPath, Direction, Document, DocumentStore, DocumentUpdate, JsonMap,
};
use crate::config::AlertsConfig;
use crate::error::CoreError;
use crate::event::{DataEvent, EventBus};
use commitboard_types::{AlertBucket, AlertConfig, AlertRecord};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What alert views render
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsView {
    /// Newest first
    pub alerts: Vec<AlertRecord>,
    /// Critical and error alerts
    pub critical_alerts: Vec<AlertRecord>,
    pub warning_alerts: Vec<AlertRecord>,
    /// Info, success and unclassified alerts
    pub info_alerts: Vec<AlertRecord>,
    pub unread_count: usize,
    pub total_count: usize,
    pub config: AlertConfig,
    /// No stored configuration; `config` holds the local default
    pub config_is_default: bool,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for AlertsView {
    fn default() -> Self {
        Self {
            alerts: Vec::new(),
            critical_alerts: Vec::new(),
            warning_alerts: Vec::new(),
            info_alerts: Vec::new(),
            unread_count: 0,
            total_count: 0,
            config: AlertConfig::default(),
            config_is_default: true,
            loading: false,
            error: None,
        }
    }
}

impl AlertsView {
    fn set_alerts(&mut self, alerts: Vec<AlertRecord>) {
        let bucket = |b: AlertBucket| -> Vec<AlertRecord> {
            alerts
                .iter()
                .filter(|a| a.severity.bucket() == b)
                .cloned()
                .collect()
        };
        self.critical_alerts = bucket(AlertBucket::Critical);
        self.warning_alerts = bucket(AlertBucket::Warning);
        self.info_alerts = bucket(AlertBucket::Info);
        self.unread_count = alerts.iter().filter(|a| !a.read).count();
        self.total_count = alerts.len();
        self.alerts = alerts;
    }

    pub fn unread_ids(&self) -> Vec<String> {
        self.alerts
            .iter()
            .filter(|a| !a.read)
            .map(|a| a.id.clone())
            .collect()
    }
}

struct Session {
    user_id: String,
    alerts_task: JoinHandle<()>,
    config_task: JoinHandle<()>,
}

pub struct AlertStore {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: AlertsConfig,
    state: Arc<watch::Sender<AlertsView>>,
    events: EventBus,
    session: Mutex<Option<Session>>,
}

impl AlertStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: AlertsConfig,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(AlertsView::default());
        Self {
            store,
            clock,
            config,
            state: Arc::new(state),
            events,
            session: Mutex::new(None),
        }
    }

    /// Follow alerts for `user_id`. Switching users replaces the listeners.
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(&self, user_id: &str) {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|s| s.user_id == user_id) {
            return;
        }
        if let Some(previous) = session.take() {
            previous.alerts_task.abort();
            previous.config_task.abort();
        }

        self.state.send_replace(AlertsView {
            loading: true,
            ..AlertsView::default()
        });

        let query = CollectionQuery::all(&self.config.collection)
            .order_by("createdAt", Direction::Descending)
            .limit(self.config.limit);
        let config_path = DocPath::new(&self.config.config_collection, user_id);

        let alerts_task = tokio::spawn(follow_alerts(
            Arc::clone(&self.store),
            query,
            Arc::clone(&self.state),
            self.events.clone(),
        ));
        let config_task = tokio::spawn(follow_config(
            Arc::clone(&self.store),
            config_path,
            Arc::clone(&self.state),
            self.events.clone(),
        ));

        *session = Some(Session {
            user_id: user_id.to_string(),
            alerts_task,
            config_task,
        });
        debug!(user = user_id, "Alert store activated");
    }

    /// Release both listeners and clear the view
    pub async fn deactivate(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.alerts_task.abort();
            session.config_task.abort();
            let _ = session.alerts_task.await;
            let _ = session.config_task.await;
            debug!(user = %session.user_id, "Alert store deactivated");
        }
        self.state.send_replace(AlertsView::default());
    }

    pub fn current_user(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.user_id.clone())
    }

    pub fn view(&self) -> AlertsView {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AlertsView> {
        self.state.subscribe()
    }

    /// Mark one alert read by the current user
    pub async fn mark_as_read(&self, alert_id: &str) -> Result<(), CoreError> {
        let user_id = self.current_user().ok_or(CoreError::NotAuthenticated)?;
        let update = DocumentUpdate {
            path: DocPath::new(&self.config.collection, alert_id),
            fields: self.read_fields(&user_id),
        };

        self.store.update(update).await.map_err(|e| {
            error!(alert = alert_id, error = %e, "Failed to mark alert as read");
            e
        })?;
        debug!(alert = alert_id, "Alert marked as read");
        Ok(())
    }

    /// Mark every unread alert in the live view read, atomically
    ///
    /// Returns how many alerts were written. Nothing unread means no store
    /// call at all.
    pub async fn mark_all_as_read(&self) -> Result<usize, CoreError> {
        let user_id = self.current_user().ok_or(CoreError::NotAuthenticated)?;
        let unread = self.state.borrow().unread_ids();
        if unread.is_empty() {
            debug!("No unread alerts");
            return Ok(0);
        }

        let mut batch = BatchCommitter::new(Arc::clone(&self.store));
        for id in unread {
            batch.update(
                DocPath::new(&self.config.collection, id),
                self.read_fields(&user_id),
            );
        }

        let written = batch.commit().await.map_err(|e| {
            error!(error = %e, "Failed to mark all alerts as read");
            e
        })?;
        info!(count = written, "Marked alerts as read");
        Ok(written)
    }

    fn read_fields(&self, user_id: &str) -> JsonMap {
        let mut fields = JsonMap::new();
        fields.insert("read".to_string(), Value::Bool(true));
        fields.insert(
            "readAt".to_string(),
            Value::String(self.clock.now().to_rfc3339()),
        );
        fields.insert("readBy".to_string(), Value::String(user_id.to_string()));
        fields
    }
}

impl Drop for AlertStore {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().take() {
            session.alerts_task.abort();
            session.config_task.abort();
        }
    }
}

async fn follow_alerts(
    store: Arc<dyn DocumentStore>,
    query: CollectionQuery,
    state: Arc<watch::Sender<AlertsView>>,
    events: EventBus,
) {
    let mut listener = store.subscribe_collection(&query);
    while let Some(emission) = listener.next().await {
        match emission {
            Ok(docs) => {
                let alerts = decode_alerts(&docs);
                debug!(count = alerts.len(), "Alerts updated");
                state.send_modify(|view| {
                    view.set_alerts(alerts);
                    view.loading = false;
                    view.error = None;
                });
                events.publish(DataEvent::AlertsUpdated);
            }
            Err(e) => on_listener_error(&state, &events, "alerts", e),
        }
    }
}

async fn follow_config(
    store: Arc<dyn DocumentStore>,
    path: DocPath,
    state: Arc<watch::Sender<AlertsView>>,
    events: EventBus,
) {
    let mut listener = store.subscribe_document(&path);
    while let Some(emission) = listener.next().await {
        let stored = match emission {
            Ok(Some(doc)) => match doc.decode::<AlertConfig>() {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(path = %path, error = %e, "Unreadable alert config, using default");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                on_listener_error(&state, &events, "alert config", e);
                continue;
            }
        };

        state.send_modify(|view| {
            view.config_is_default = stored.is_none();
            view.config = stored.unwrap_or_default();
        });
        events.publish(DataEvent::AlertConfigChanged);
    }
}

fn decode_alerts(docs: &[Document]) -> Vec<AlertRecord> {
    docs.iter()
        .filter_map(|doc| match doc.decode::<AlertRecord>() {
            Ok(alert) => Some(alert),
            Err(e) => {
                warn!(id = %doc.id, error = %e, "Skipping malformed alert");
                None
            }
        })
        .collect()
}

fn on_listener_error(
    state: &watch::Sender<AlertsView>,
    events: &EventBus,
    source: &str,
    err: CoreError,
) {
    if err.is_benign() {
        debug!(source, error = %err, "Alert listener lost permission");
        state.send_modify(|view| {
            view.loading = false;
            view.error = None;
        });
        return;
    }

    error!(source, error = %err, "Alert listener failed");
    let message = err.to_string();
    state.send_modify(|view| {
        view.loading = false;
        view.error = Some(message.clone());
    });
    events.publish(DataEvent::ListenerError(message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryDocumentStore;
    use crate::backend::SystemClock;
    use commitboard_types::AlertSeverity;
    use serde_json::json;
    use std::time::Duration;

    fn alert_store(store: &MemoryDocumentStore) -> AlertStore {
        AlertStore::new(
            Arc::new(store.clone()),
            Arc::new(SystemClock),
            AlertsConfig::default(),
            EventBus::default(),
        )
    }

    fn seed(store: &MemoryDocumentStore, id: &str, value: Value) {
        store.set_document(
            &DocPath::new("alerts", id),
            value.as_object().cloned().unwrap(),
        );
    }

    async fn settle(alerts: &AlertStore, f: impl FnMut(&AlertsView) -> bool) {
        let mut rx = alerts.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
            .await
            .expect("alert view did not settle")
            .unwrap();
    }

    #[tokio::test]
    async fn test_view_partitions_by_severity() {
        let store = MemoryDocumentStore::new();
        seed(&store, "a1", json!({"severity": "critical", "createdAt": "2026-01-01"}));
        seed(&store, "a2", json!({"type": "error", "createdAt": "2026-01-02", "read": true}));
        seed(&store, "a3", json!({"severity": "warning", "createdAt": "2026-01-03"}));
        seed(&store, "a4", json!({"severity": "success", "createdAt": "2026-01-04"}));
        seed(&store, "a5", json!({"createdAt": "2026-01-05"}));

        let alerts = alert_store(&store);
        alerts.activate("uid-1");
        settle(&alerts, |v| v.total_count == 5).await;

        let view = alerts.view();
        assert_eq!(view.alerts[0].id, "a5");
        assert_eq!(view.critical_alerts.len(), 2);
        assert_eq!(view.warning_alerts.len(), 1);
        assert_eq!(view.info_alerts.len(), 2);
        assert_eq!(view.info_alerts[1].severity, AlertSeverity::Success);
        assert_eq!(view.unread_count, 4);

        alerts.deactivate().await;
        assert_eq!(store.active_listeners(), 0);
    }

    #[tokio::test]
    async fn test_config_defaults_when_absent() {
        let store = MemoryDocumentStore::new();
        let alerts = alert_store(&store);
        alerts.activate("uid-1");
        settle(&alerts, |v| !v.loading).await;

        let view = alerts.view();
        assert!(view.config_is_default);
        assert!(!view.config.info_alerts);
        assert!(store
            .document(&DocPath::new("alertsConfig", "uid-1"))
            .is_none());

        store.set_document(
            &DocPath::new("alertsConfig", "uid-1"),
            json!({"infoAlerts": true}).as_object().cloned().unwrap(),
        );
        settle(&alerts, |v| !v.config_is_default).await;
        assert!(alerts.view().config.info_alerts);
        assert!(alerts.view().config.critical_alerts);
    }

    #[tokio::test]
    async fn test_mark_as_read_requires_session() {
        let store = MemoryDocumentStore::new();
        let alerts = alert_store(&store);
        assert!(matches!(
            alerts.mark_as_read("a1").await,
            Err(CoreError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_mark_as_read_records_reader() {
        let store = MemoryDocumentStore::new();
        seed(&store, "a1", json!({"severity": "info"}));
        let alerts = alert_store(&store);
        alerts.activate("uid-9");

        alerts.mark_as_read("a1").await.unwrap();
        let doc = store.document(&DocPath::new("alerts", "a1")).unwrap();
        assert_eq!(doc["read"], json!(true));
        assert_eq!(doc["readBy"], json!("uid-9"));
        assert!(doc.contains_key("readAt"));

        assert!(alerts.mark_as_read("missing").await.is_err());
    }
}
