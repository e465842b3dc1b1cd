//! Keyed, timestamped cache over the local key/value store
//!
//! Entries are stored as `{"timestamp": ..., "value": ...}` JSON. Expiry is
//! judged against an injected clock, never the wall clock directly.

use crate::backend::{Clock, KeyValueStore};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct StoredEntry<V> {
    timestamp: DateTime<Utc>,
    value: V,
}

#[derive(Serialize)]
struct EntryRef<'a, V> {
    timestamp: DateTime<Utc>,
    value: &'a V,
}

pub struct TtlCache<V> {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    _value: PhantomData<fn() -> V>,
}

impl<V> TtlCache<V>
where
    V: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            _value: PhantomData,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`
    ///
    /// Expired, unreadable and corrupt entries are all misses.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_with_timestamp(key).map(|(value, _)| value)
    }

    /// Fresh value for `key` together with the instant it was stored
    pub fn get_with_timestamp(&self, key: &str) -> Option<(V, DateTime<Utc>)> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Local cache read failed");
                return None;
            }
        };

        let entry: StoredEntry<V> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "Ignoring corrupt cache entry");
                return None;
            }
        };

        // An entry from the future (clock skew) counts as fresh
        let age = self.clock.now().signed_duration_since(entry.timestamp);
        let expired = age.to_std().map(|age| age >= self.ttl).unwrap_or(false);
        if expired {
            debug!(key, age_secs = age.num_seconds(), "Cache entry expired");
            return None;
        }

        Some((entry.value, entry.timestamp))
    }

    pub fn put(&self, key: &str, value: &V, timestamp: DateTime<Utc>) -> Result<(), CoreError> {
        let json = serde_json::to_string(&EntryRef { timestamp, value }).map_err(|e| {
            CoreError::Decode {
                resource: key.to_string(),
                message: e.to_string(),
                source: e,
            }
        })?;
        self.store.set(key, json)
    }

    pub fn invalidate(&self, key: &str) -> Result<(), CoreError> {
        self.store.remove(key)
    }
}
