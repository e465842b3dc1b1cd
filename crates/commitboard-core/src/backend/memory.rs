//! In-memory backends with failure injection and operation counters
//!
//! Live subscriptions behave like the hosted store: the first emission carries
//! the current state, every write re-emits to the affected subscribers, and a
//! revoked permission pushes an error to existing subscribers.

use super::{
    CollectionQuery, DocPath, Document, DocumentStore, DocumentUpdate, FolderListing, JsonMap,
    Listener, ObjectMetadata, ObjectStore, RemoteProcedures, MAX_BATCH_WRITES,
};
use crate::error::CoreError;
use async_trait::async_trait;
use commitboard_types::lenient;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

type DocTx = mpsc::UnboundedSender<Result<Option<Document>, CoreError>>;
type QueryTx = mpsc::UnboundedSender<Result<Vec<Document>, CoreError>>;

enum Subscriber {
    Document { path: DocPath, tx: DocTx },
    Query { query: CollectionQuery, tx: QueryTx },
}

impl Subscriber {
    fn collection(&self) -> &str {
        match self {
            Subscriber::Document { path, .. } => &path.collection,
            Subscriber::Query { query, .. } => &query.collection,
        }
    }
}

/// Snapshot of the operations a [`MemoryDocumentStore`] has served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub counts: usize,
    pub updates: usize,
    /// Batch commit round trips
    pub batches: usize,
    /// Writes carried by successful batches
    pub batch_writes: usize,
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    counts: AtomicUsize,
    updates: AtomicUsize,
    batches: AtomicUsize,
    batch_writes: AtomicUsize,
}

#[derive(Default)]
struct DocInner {
    collections: DashMap<String, BTreeMap<String, JsonMap>>,
    denied: RwLock<HashSet<String>>,
    unavailable: AtomicBool,
    reject_batches: AtomicBool,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscriber: AtomicU64,
    counters: Counters,
}

/// Document store held entirely in memory
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<DocInner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from `{ "<collection>": { "<id>": { ...fields } } }`
    pub fn from_fixture(fixture: &Value) -> Result<Self, CoreError> {
        let store = Self::new();
        let collections = fixture.as_object().ok_or_else(|| CoreError::InvalidConfig {
            message: "document fixture must be an object of collections".to_string(),
        })?;

        for (collection, docs) in collections {
            let docs = docs.as_object().ok_or_else(|| CoreError::InvalidConfig {
                message: format!("collection {collection} must be an object of documents"),
            })?;
            for (id, data) in docs {
                let data = data.as_object().cloned().ok_or_else(|| CoreError::InvalidConfig {
                    message: format!("document {collection}/{id} must be an object"),
                })?;
                store.set_document(&DocPath::new(collection.as_str(), id.as_str()), data);
            }
        }

        Ok(store)
    }

    /// Every collection, in the shape accepted by [`MemoryDocumentStore::from_fixture`]
    pub fn to_fixture(&self) -> Value {
        let mut collections = JsonMap::new();
        for entry in self.inner.collections.iter() {
            let docs: JsonMap = entry
                .value()
                .iter()
                .map(|(id, data)| (id.clone(), Value::Object(data.clone())))
                .collect();
            collections.insert(entry.key().clone(), Value::Object(docs));
        }
        Value::Object(collections)
    }

    /// Current documents of a collection, in id order
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Create or replace a document, as an external writer would
    pub fn set_document(&self, path: &DocPath, data: JsonMap) {
        self.inner
            .collections
            .entry(path.collection.clone())
            .or_default()
            .insert(path.id.clone(), data);
        self.notify(&path.collection);
    }

    /// Delete a document, as an external writer would
    pub fn remove_document(&self, path: &DocPath) {
        if let Some(mut docs) = self.inner.collections.get_mut(&path.collection) {
            docs.remove(&path.id);
        }
        self.notify(&path.collection);
    }

    /// Current stored fields of a document
    pub fn document(&self, path: &DocPath) -> Option<JsonMap> {
        self.inner
            .collections
            .get(&path.collection)
            .and_then(|docs| docs.get(&path.id).cloned())
    }

    /// Revoke access to a collection; live subscribers receive the error
    pub fn deny_collection(&self, collection: &str) {
        self.inner.denied.write().insert(collection.to_string());
        let subscribers = self.inner.subscribers.lock();
        for subscriber in subscribers.values() {
            if subscriber.collection() != collection {
                continue;
            }
            let err = || CoreError::permission_denied(collection);
            match subscriber {
                Subscriber::Document { tx, .. } => {
                    let _ = tx.send(Err(err()));
                }
                Subscriber::Query { tx, .. } => {
                    let _ = tx.send(Err(err()));
                }
            }
        }
    }

    pub fn allow_collection(&self, collection: &str) {
        self.inner.denied.write().remove(collection);
    }

    /// Simulate a transport outage: every call fails with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner
            .unavailable
            .store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Make every batch commit fail without applying anything
    pub fn reject_batches(&self, reject: bool) {
        self.inner.reject_batches.store(reject, AtomicOrdering::SeqCst);
    }

    pub fn operations(&self) -> OperationCounts {
        let c = &self.inner.counters;
        OperationCounts {
            gets: c.gets.load(AtomicOrdering::SeqCst),
            counts: c.counts.load(AtomicOrdering::SeqCst),
            updates: c.updates.load(AtomicOrdering::SeqCst),
            batches: c.batches.load(AtomicOrdering::SeqCst),
            batch_writes: c.batch_writes.load(AtomicOrdering::SeqCst),
        }
    }

    /// Number of live subscriptions not yet released
    pub fn active_listeners(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    fn check_access(&self, collection: &str) -> Result<(), CoreError> {
        if self.inner.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(CoreError::Unavailable {
                message: "document store offline".to_string(),
            });
        }
        if self.inner.denied.read().contains(collection) {
            return Err(CoreError::permission_denied(collection));
        }
        Ok(())
    }

    fn read_document(&self, path: &DocPath) -> Option<Document> {
        self.document(path).map(|data| Document::new(path.id.clone(), data))
    }

    fn run_query(&self, query: &CollectionQuery) -> Vec<Document> {
        let mut docs = self.documents(&query.collection);

        if let Some(order) = &query.order_by {
            docs.sort_by(|a, b| {
                let ordering = compare_fields(a.data.get(&order.field), b.data.get(&order.field));
                match order.direction {
                    super::Direction::Ascending => ordering,
                    super::Direction::Descending => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        docs
    }

    fn register(&self, subscriber: Subscriber) -> impl FnOnce() + Send + 'static {
        let id = self
            .inner
            .next_subscriber
            .fetch_add(1, AtomicOrdering::SeqCst);
        self.inner.subscribers.lock().insert(id, subscriber);

        let weak: Weak<DocInner> = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.lock().remove(&id);
                trace!(subscriber = id, "Listener released");
            }
        }
    }

    /// Re-emit current state to every subscriber of `collection`
    fn notify(&self, collection: &str) {
        if self.check_access(collection).is_err() {
            return;
        }
        let subscribers = self.inner.subscribers.lock();
        for subscriber in subscribers.values() {
            match subscriber {
                Subscriber::Document { path, tx } if path.collection == collection => {
                    let _ = tx.send(Ok(self.read_document(path)));
                }
                Subscriber::Query { query, tx } if query.collection == collection => {
                    let _ = tx.send(Ok(self.run_query(query)));
                }
                _ => {}
            }
        }
    }
}

/// Order by timestamp or number; anything else sorts first
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let key = |value: Option<&Value>| {
        value.and_then(|v| {
            lenient::timestamp_from_value(v)
                .map(|ts| ts.timestamp_millis() as f64)
                .or_else(|| v.as_f64())
        })
    };
    key(a).partial_cmp(&key(b)).unwrap_or(Ordering::Equal)
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, CoreError> {
        self.inner.counters.gets.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_access(&path.collection)?;
        Ok(self.read_document(path))
    }

    fn subscribe_document(&self, path: &DocPath) -> Listener<Option<Document>> {
        if let Err(e) = self.check_access(&path.collection) {
            return Listener::failed(e);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(self.read_document(path)));
        let unsubscribe = self.register(Subscriber::Document {
            path: path.clone(),
            tx,
        });
        debug!(path = %path, "Document listener attached");
        Listener::new(rx, unsubscribe)
    }

    fn subscribe_collection(&self, query: &CollectionQuery) -> Listener<Vec<Document>> {
        if let Err(e) = self.check_access(&query.collection) {
            return Listener::failed(e);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(self.run_query(query)));
        let unsubscribe = self.register(Subscriber::Query {
            query: query.clone(),
            tx,
        });
        debug!(collection = %query.collection, "Collection listener attached");
        Listener::new(rx, unsubscribe)
    }

    async fn count(&self, collection: &str) -> Result<u64, CoreError> {
        self.inner.counters.counts.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_access(collection)?;
        Ok(self
            .inner
            .collections
            .get(collection)
            .map(|docs| docs.len() as u64)
            .unwrap_or(0))
    }

    async fn update(&self, update: DocumentUpdate) -> Result<(), CoreError> {
        self.inner.counters.updates.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_access(&update.path.collection)?;

        {
            let mut docs = self
                .inner
                .collections
                .get_mut(&update.path.collection)
                .ok_or_else(|| CoreError::NotFound {
                    resource: update.path.to_string(),
                })?;
            let doc = docs
                .get_mut(&update.path.id)
                .ok_or_else(|| CoreError::NotFound {
                    resource: update.path.to_string(),
                })?;
            doc.extend(update.fields);
        }

        self.notify(&update.path.collection);
        Ok(())
    }

    async fn commit_batch(&self, updates: Vec<DocumentUpdate>) -> Result<(), CoreError> {
        self.inner.counters.batches.fetch_add(1, AtomicOrdering::SeqCst);

        if updates.len() > MAX_BATCH_WRITES {
            return Err(CoreError::BatchTooLarge {
                size: updates.len(),
                limit: MAX_BATCH_WRITES,
            });
        }
        if self.inner.reject_batches.load(AtomicOrdering::SeqCst) {
            return Err(CoreError::BatchRejected {
                message: "commit rejected by store".to_string(),
            });
        }

        // Validate everything before touching anything
        for update in &updates {
            self.check_access(&update.path.collection)?;
            if self.document(&update.path).is_none() {
                return Err(CoreError::NotFound {
                    resource: update.path.to_string(),
                });
            }
        }

        let mut touched = BTreeSet::new();
        let write_count = updates.len();
        for update in updates {
            if let Some(mut docs) = self.inner.collections.get_mut(&update.path.collection) {
                if let Some(doc) = docs.get_mut(&update.path.id) {
                    doc.extend(update.fields);
                }
            }
            touched.insert(update.path.collection);
        }

        self.inner
            .counters
            .batch_writes
            .fetch_add(write_count, AtomicOrdering::SeqCst);

        for collection in touched {
            self.notify(&collection);
        }
        Ok(())
    }
}

/// Object store held in memory; paths use `/` separators
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, ObjectMetadata>>,
    denied_folders: RwLock<HashSet<String>>,
    broken_items: RwLock<HashSet<String>>,
    unavailable: AtomicBool,
    listed: Mutex<Vec<String>>,
    metadata_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from `{ "<path>": { "size": n, "contentType": "..." } }`
    pub fn from_fixture(fixture: &Value) -> Result<Self, CoreError> {
        let store = Self::new();
        let objects = fixture.as_object().ok_or_else(|| CoreError::InvalidConfig {
            message: "object fixture must be an object keyed by path".to_string(),
        })?;
        for (path, meta) in objects {
            let size = meta.get("size").and_then(Value::as_u64).unwrap_or(0);
            let content_type = meta
                .get("contentType")
                .and_then(Value::as_str)
                .map(str::to_string);
            store.put_object(path, size, content_type.as_deref());
        }
        Ok(store)
    }

    pub fn put_object(&self, path: &str, size: u64, content_type: Option<&str>) {
        self.objects.write().insert(
            path.trim_matches('/').to_string(),
            ObjectMetadata {
                size,
                content_type: content_type.map(str::to_string),
            },
        );
    }

    /// Listing this folder (or anything below it) fails with permission denied
    pub fn deny_folder(&self, folder: &str) {
        self.denied_folders
            .write()
            .insert(folder.trim_matches('/').to_string());
    }

    /// Metadata lookups for this object fail
    pub fn break_item(&self, path: &str) {
        self.broken_items
            .write()
            .insert(path.trim_matches('/').to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Every folder passed to `list`, in call order
    pub fn listed_folders(&self) -> Vec<String> {
        self.listed.lock().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.listed.lock().len()
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(AtomicOrdering::SeqCst)
    }

    fn is_denied(&self, folder: &str) -> bool {
        self.denied_folders
            .read()
            .iter()
            .any(|denied| folder == denied || folder.starts_with(&format!("{denied}/")))
    }

    fn check_available(&self) -> Result<(), CoreError> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(CoreError::Unavailable {
                message: "object store offline".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, folder: &str) -> Result<FolderListing, CoreError> {
        let folder = folder.trim_matches('/');
        self.listed.lock().push(folder.to_string());
        self.check_available()?;
        if self.is_denied(folder) {
            return Err(CoreError::permission_denied(folder));
        }

        let prefix = format!("{folder}/");
        let mut items = Vec::new();
        let mut prefixes = BTreeSet::new();

        for path in self.objects.read().keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    prefixes.insert(format!("{prefix}{child}"));
                }
                None => items.push(path.clone()),
            }
        }

        Ok(FolderListing {
            items,
            prefixes: prefixes.into_iter().collect(),
        })
    }

    async fn metadata(&self, path: &str) -> Result<ObjectMetadata, CoreError> {
        self.metadata_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_available()?;
        let path = path.trim_matches('/');
        if self.broken_items.read().contains(path) {
            return Err(CoreError::backend(path, "metadata unavailable"));
        }
        self.objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                resource: path.to_string(),
            })
    }
}

type Procedure = Arc<dyn Fn() -> Result<Value, CoreError> + Send + Sync>;

/// Remote procedures backed by local closures
#[derive(Default)]
pub struct MemoryProcedures {
    handlers: RwLock<HashMap<String, Procedure>>,
    calls: DashMap<String, usize>,
}

impl MemoryProcedures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl Fn() -> Result<Value, CoreError> + Send + Sync + 'static,
    ) {
        self.handlers.write().insert(name.into(), Arc::new(handler));
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.get(name).map(|c| *c.value()).unwrap_or(0)
    }
}

#[async_trait]
impl RemoteProcedures for MemoryProcedures {
    async fn call(&self, name: &str) -> Result<Value, CoreError> {
        *self.calls.entry(name.to_string()).or_insert(0) += 1;
        let handler = self
            .handlers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::RemoteCall {
                procedure: name.to_string(),
                message: "procedure not registered".to_string(),
            })?;
        handler()
    }
}
