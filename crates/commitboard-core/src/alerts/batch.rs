//! Atomic multi-document writes

use crate::backend::{DocPath, DocumentStore, DocumentUpdate, JsonMap, MAX_BATCH_WRITES};
use crate::error::CoreError;
use std::sync::Arc;
use tracing::debug;

/// Collects updates and commits them in a single round trip
///
/// Either every update lands or none does. An empty batch never reaches the
/// store.
pub struct BatchCommitter {
    store: Arc<dyn DocumentStore>,
    updates: Vec<DocumentUpdate>,
}

impl BatchCommitter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            updates: Vec::new(),
        }
    }

    pub fn update(&mut self, path: DocPath, fields: JsonMap) -> &mut Self {
        self.updates.push(DocumentUpdate { path, fields });
        self
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Commit once; returns the number of documents written
    pub async fn commit(self) -> Result<usize, CoreError> {
        let size = self.updates.len();
        if size == 0 {
            return Ok(0);
        }
        if size > MAX_BATCH_WRITES {
            return Err(CoreError::BatchTooLarge {
                size,
                limit: MAX_BATCH_WRITES,
            });
        }

        self.store.commit_batch(self.updates).await?;
        debug!(writes = size, "Batch committed");
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryDocumentStore;
    use serde_json::json;

    fn read_flag() -> JsonMap {
        json!({"read": true}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_empty_batch_skips_store() {
        let store = MemoryDocumentStore::new();
        let written = BatchCommitter::new(Arc::new(store.clone()))
            .commit()
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(store.operations().batches, 0);
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected_locally() {
        let store = MemoryDocumentStore::new();
        let mut batch = BatchCommitter::new(Arc::new(store.clone()));
        for i in 0..=MAX_BATCH_WRITES {
            batch.update(DocPath::new("alerts", format!("a{i}")), read_flag());
        }

        assert!(matches!(
            batch.commit().await,
            Err(CoreError::BatchTooLarge { size: 501, limit: 500 })
        ));
        assert_eq!(store.operations().batches, 0);
    }

    #[tokio::test]
    async fn test_commit_applies_all() {
        let store = MemoryDocumentStore::new();
        for id in ["a1", "a2"] {
            store.set_document(&DocPath::new("alerts", id), JsonMap::new());
        }

        let mut batch = BatchCommitter::new(Arc::new(store.clone()));
        batch
            .update(DocPath::new("alerts", "a1"), read_flag())
            .update(DocPath::new("alerts", "a2"), read_flag());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.commit().await.unwrap(), 2);

        assert_eq!(store.operations().batch_writes, 2);
        assert_eq!(
            store.document(&DocPath::new("alerts", "a2")).unwrap()["read"],
            json!(true)
        );
    }
}
