//! In-process record store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::{Mutation, RecordStore, StoreError, Transition};
use crate::ratelimit::RateLimitRecord;

/// Record store held in a sharded concurrent map.
///
/// A transaction holds the shard lock for its key while the body runs, so
/// transactions on one key are serialized and never retried.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, RateLimitRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove every record.
    pub fn clear(&self) {
        self.records.clear();
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn run_transaction<T, F>(&self, key: &str, mut f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnMut(Option<&RateLimitRecord>) -> Transition<T> + Send,
    {
        let value = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let Transition { mutation, value } = f(Some(entry.get()));
                match mutation {
                    Mutation::Put(record) => {
                        entry.insert(record);
                    }
                    Mutation::Delete => {
                        entry.remove();
                    }
                    Mutation::Keep => {}
                }
                value
            }
            Entry::Vacant(entry) => {
                let Transition { mutation, value } = f(None);
                if let Mutation::Put(record) = mutation {
                    entry.insert(record);
                }
                value
            }
        };

        trace!(key = %key, "Committed in-memory transaction");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn record(tokens: f64) -> RateLimitRecord {
        let now = Utc::now();
        RateLimitRecord {
            tokens,
            capacity: 5,
            refill_rate: 0.0,
            last_refill: now,
            reset_at: now,
            fail_count: 0,
            blocked_until: None,
            count: 0,
            last_attempt: None,
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());

        let seen = store
            .run_transaction("k", |current| Transition::put(record(3.0), current.is_some()))
            .await
            .unwrap();
        assert!(!seen);
        assert_eq!(store.get("k").await.unwrap().unwrap().tokens, 3.0);

        let seen = store
            .run_transaction("k", |current| Transition::delete(current.is_some()))
            .await
            .unwrap();
        assert!(seen);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_keep_leaves_record() {
        let store = MemoryStore::new();
        store
            .run_transaction("k", |_| Transition::put(record(2.0), ()))
            .await
            .unwrap();
        store
            .run_transaction("k", |_| Transition::keep(()))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().tokens, 2.0);
        assert_eq!(store.len(), 1);

        // Keep and Delete on a missing key are no-ops
        store.run_transaction("missing", |_| Transition::keep(())).await.unwrap();
        store.run_transaction("missing", |_| Transition::delete(())).await.unwrap();
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transactions_serialize_per_key() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();

        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .run_transaction("shared", |current| {
                        let tokens = current.map_or(0.0, |r| r.tokens) + 1.0;
                        Transition::put(record(tokens), ())
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("shared").await.unwrap().unwrap().tokens, 50.0);
    }
}
