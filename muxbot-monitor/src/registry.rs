//! Once-Registry and basic row ledger
//!
//! Both are single JSON maps in the key-value store keyed by session key.
//! The registry remembers when the enrichment bundle was last written so a
//! session sends it at most once per retention window.

use crate::store::KeyValueStore;
use chrono::{DateTime, Duration, Utc};
use muxbot_common::time;
use muxbot_common::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Store key of the once-registry map
pub const ONCE_KEY: &str = "muxOnceWritten";

/// Store key of the basic row ledger map
pub const BASIC_ROWS_KEY: &str = "muxBasicRows";

/// Markers older than this are purged and the session re-arms
pub fn once_retention() -> Duration {
    Duration::days(7)
}

/// Registry value: epoch millis of the last enrichment write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnceMarker {
    pub t: i64,
}

impl OnceMarker {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            t: at.timestamp_millis(),
        }
    }

    pub fn written_at(&self) -> Option<DateTime<Utc>> {
        time::millis_to_datetime(self.t)
    }
}

pub type OnceMap = BTreeMap<String, OnceMarker>;

#[derive(Clone)]
pub struct OnceRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl OnceRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the registry with expired and malformed entries purged
    ///
    /// The purge is not persisted until the next [`save`](Self::save).
    /// A store read failure yields an empty registry.
    pub async fn load(&self) -> OnceMap {
        self.load_at(time::now()).await
    }

    pub async fn load_at(&self, now: DateTime<Utc>) -> OnceMap {
        let stored = match self.store.get(ONCE_KEY).await {
            Ok(Some(value)) => value,
            Ok(None) => return OnceMap::new(),
            Err(e) => {
                warn!(error = %e, "Once-registry read failed; treating as empty");
                return OnceMap::new();
            }
        };

        let Some(entries) = stored.as_object() else {
            warn!("Once-registry is not a JSON object; treating as empty");
            return OnceMap::new();
        };

        let retention = once_retention();
        let mut map = OnceMap::new();
        for (key, entry) in entries {
            let marker = marker_millis(entry)
                .map(|t| OnceMarker { t })
                .filter(|marker| {
                    marker
                        .written_at()
                        .is_some_and(|at| !time::is_expired(at, retention, now))
                });
            match marker {
                Some(marker) => {
                    map.insert(key.clone(), marker);
                }
                None => debug!(session_key = %key, "Purging once-registry entry"),
            }
        }
        map
    }

    /// Overwrite the stored registry
    pub async fn save(&self, map: &OnceMap) -> Result<()> {
        let value = serde_json::to_value(map)?;
        self.store.set(ONCE_KEY, &value).await
    }

    /// Record an enrichment write; also persists any pending purge
    pub async fn mark_sent(&self, session_key: &str, at: DateTime<Utc>) -> Result<()> {
        let mut map = self.load_at(at).await;
        map.insert(session_key.to_string(), OnceMarker::at(at));
        self.save(&map).await
    }
}

/// Positive epoch millis from `{"t": ...}`; anything else is malformed
fn marker_millis(entry: &Value) -> Option<i64> {
    let t = entry.get("t")?;
    let millis = t.as_i64().or_else(|| t.as_f64().map(|f| f as i64))?;
    (millis > 0).then_some(millis)
}

/// Highest peak already appended as a basic row, per session
#[derive(Clone)]
pub struct PeakRowLedger {
    store: Arc<dyn KeyValueStore>,
}

impl PeakRowLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn load(&self) -> Map<String, Value> {
        match self.store.get(BASIC_ROWS_KEY).await {
            Ok(Some(Value::Object(map))) => map,
            Ok(_) => Map::new(),
            Err(e) => {
                warn!(error = %e, "Basic row ledger read failed; treating as empty");
                Map::new()
            }
        }
    }

    /// 0 when nothing was appended yet
    pub async fn last_peak(&self, session_key: &str) -> u64 {
        self.load()
            .await
            .get(session_key)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub async fn record(&self, session_key: &str, peak: u64) -> Result<()> {
        let mut map = self.load().await;
        map.insert(session_key.to_string(), Value::from(peak));
        self.store.set(BASIC_ROWS_KEY, &Value::Object(map)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use muxbot_common::Error;
    use serde_json::json;

    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Value>> {
            Err(Error::Internal("disk unplugged".to_string()))
        }
        async fn set(&self, _key: &str, _value: &Value) -> Result<()> {
            Err(Error::Internal("disk unplugged".to_string()))
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    fn millis_days_ago(now: DateTime<Utc>, days: i64) -> i64 {
        (now - Duration::days(days)).timestamp_millis()
    }

    #[tokio::test]
    async fn test_load_purges_old_and_malformed_entries() {
        let store = Arc::new(MemoryStore::new());
        let now = time::now();
        store
            .set(
                ONCE_KEY,
                &json!({
                    "stale": {"t": millis_days_ago(now, 8)},
                    "fresh": {"t": millis_days_ago(now, 6)},
                    "no-time": {},
                    "zero": {"t": 0},
                    "text": {"t": "yesterday"},
                }),
            )
            .await
            .unwrap();

        let registry = OnceRegistry::new(store.clone());
        let map = registry.load_at(now).await;

        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["fresh"]);

        // Purge is not persisted by load
        let raw = store.get(ONCE_KEY).await.unwrap().unwrap();
        assert!(raw.get("stale").is_some());
    }

    #[tokio::test]
    async fn test_mark_sent_persists_marker_and_purge() {
        let store = Arc::new(MemoryStore::new());
        let now = time::now();
        store
            .set(ONCE_KEY, &json!({"stale": {"t": millis_days_ago(now, 8)}}))
            .await
            .unwrap();

        let registry = OnceRegistry::new(store.clone());
        registry.mark_sent("evt-1", now).await.unwrap();

        let raw = store.get(ONCE_KEY).await.unwrap().unwrap();
        assert_eq!(raw, json!({"evt-1": {"t": now.timestamp_millis()}}));
        assert_eq!(registry.load_at(now).await.get("evt-1"), Some(&OnceMarker::at(now)));
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_empty() {
        let registry = OnceRegistry::new(Arc::new(BrokenStore));
        assert!(registry.load().await.is_empty());
        assert!(registry.mark_sent("evt-1", time::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_non_object_registry_is_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(ONCE_KEY, &json!([1, 2, 3])).await.unwrap();
        assert!(OnceRegistry::new(store).load().await.is_empty());
    }

    #[tokio::test]
    async fn test_ledger_tracks_last_peak_per_session() {
        let store = Arc::new(MemoryStore::new());
        let ledger = PeakRowLedger::new(store.clone());

        assert_eq!(ledger.last_peak("evt-1").await, 0);
        ledger.record("evt-1", 120).await.unwrap();
        ledger.record("evt-2", 7).await.unwrap();

        assert_eq!(ledger.last_peak("evt-1").await, 120);
        assert_eq!(ledger.last_peak("evt-2").await, 7);
        assert_eq!(
            store.get(BASIC_ROWS_KEY).await.unwrap(),
            Some(json!({"evt-1": 120, "evt-2": 7}))
        );
    }
}
