//! Ports to the external collaborators
//!
//! The metrics layer never talks to a concrete database. It sees:
//! - [`DocumentStore`]: keyed documents, live subscriptions, atomic batches
//! - [`ObjectStore`]: folder listings and object metadata
//! - [`RemoteProcedures`]: named server-side jobs
//! - [`KeyValueStore`]: per-client local persistence
//! - [`Clock`]: the current instant
//!
//! In-memory implementations live in [`memory`] and back the tests and the CLI.

pub mod clock;
pub mod kv;
pub mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};

use crate::error::CoreError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

/// Field map of a stored document
pub type JsonMap = serde_json::Map<String, Value>;

/// Maximum number of writes a single atomic batch may carry
pub const MAX_BATCH_WRITES: usize = 500;

/// `collection/id` address of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
    pub collection: String,
    pub id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Parse `collection/id`
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let (collection, id) = raw
            .split_once('/')
            .ok_or_else(|| invalid("expected collection/id"))?;
        if collection.is_empty() || id.is_empty() {
            return Err(invalid("empty segment"));
        }
        if id.contains('/') {
            return Err(invalid("nested paths are not supported"));
        }
        Ok(Self::new(collection, id))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document as delivered by the store
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: JsonMap,
}

impl Document {
    pub fn new(id: impl Into<String>, data: JsonMap) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Decode into a typed record; the document id is injected as `id`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        let mut data = self.data.clone();
        data.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(data)).map_err(|e| CoreError::Decode {
            resource: self.id.clone(),
            message: e.to_string(),
            source: e,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Live query over one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    pub collection: String,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl CollectionQuery {
    /// Whole collection, store order
    pub fn all(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            order_by: None,
            limit: None,
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Partial update of one document (fields are merged)
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentUpdate {
    pub path: DocPath,
    pub fields: JsonMap,
}

/// Live subscription handle
///
/// Emissions arrive in order; the first one carries the current state.
/// Dropping the listener unsubscribes.
pub struct Listener<T> {
    rx: mpsc::UnboundedReceiver<Result<T, CoreError>>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Listener<T> {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Result<T, CoreError>>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A listener that reports one error and then closes
    pub fn failed(error: CoreError) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Err(error));
        Self {
            rx,
            unsubscribe: None,
        }
    }

    /// Next emission, `None` once the store closed the subscription
    pub async fn next(&mut self) -> Option<Result<T, CoreError>> {
        self.rx.recv().await
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("subscribed", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Document-oriented store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// One-shot read of a single document
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, CoreError>;

    /// Live view of a single document (`None` while it does not exist)
    fn subscribe_document(&self, path: &DocPath) -> Listener<Option<Document>>;

    /// Live view of an ordered, optionally limited collection query
    fn subscribe_collection(&self, query: &CollectionQuery) -> Listener<Vec<Document>>;

    /// Number of documents in a collection
    async fn count(&self, collection: &str) -> Result<u64, CoreError>;

    /// Merge fields into an existing document
    async fn update(&self, update: DocumentUpdate) -> Result<(), CoreError>;

    /// Apply every update or none of them, in one round trip
    async fn commit_batch(&self, updates: Vec<DocumentUpdate>) -> Result<(), CoreError>;
}

/// Result of listing one folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderListing {
    /// Full paths of the objects directly in the folder
    pub items: Vec<String>,
    /// Full paths of the child folders
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub size: u64,
    pub content_type: Option<String>,
}

impl ObjectMetadata {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false)
    }
}

/// Remote object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, folder: &str) -> Result<FolderListing, CoreError>;

    async fn metadata(&self, path: &str) -> Result<ObjectMetadata, CoreError>;
}

/// Named server-side procedures
#[async_trait]
pub trait RemoteProcedures: Send + Sync {
    /// Invoke a parameterless procedure; the response is informational only
    async fn call(&self, name: &str) -> Result<Value, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_doc_path_parse() {
        let path = DocPath::parse("system_stats/dashboard").unwrap();
        assert_eq!(path.collection, "system_stats");
        assert_eq!(path.id, "dashboard");
        assert_eq!(path.to_string(), "system_stats/dashboard");

        assert!(DocPath::parse("dashboard").is_err());
        assert!(DocPath::parse("/dashboard").is_err());
        assert!(DocPath::parse("a/b/c").is_err());
    }

    #[test]
    fn test_document_decode_injects_id() {
        #[derive(serde::Deserialize)]
        struct Named {
            id: String,
            name: String,
        }

        let data = json!({"id": "stale", "name": "acme"});
        let doc = Document::new("c-1", data.as_object().cloned().unwrap());
        let named: Named = doc.decode().unwrap();
        assert_eq!(named.id, "c-1");
        assert_eq!(named.name, "acme");
    }

    #[tokio::test]
    async fn test_failed_listener_closes() {
        let mut listener: Listener<Vec<Document>> =
            Listener::failed(CoreError::permission_denied("alerts"));
        assert!(matches!(listener.next().await, Some(Err(e)) if e.is_benign()));
        assert!(listener.next().await.is_none());
    }

    #[test]
    fn test_image_classification() {
        let image = ObjectMetadata {
            size: 1,
            content_type: Some("image/png".into()),
        };
        let pdf = ObjectMetadata {
            size: 1,
            content_type: Some("application/pdf".into()),
        };
        assert!(image.is_image());
        assert!(!pdf.is_image());
        assert!(!ObjectMetadata::default().is_image());
    }
}
