//! Record store persisted as a JSON snapshot on disk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Mutation, RecordStore, StoreError, Transition};
use crate::ratelimit::RateLimitRecord;

/// Bumped whenever the persisted record layout changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    namespace: String,
    version: u32,
    #[serde(default)]
    records: BTreeMap<String, RateLimitRecord>,
}

impl Snapshot {
    fn empty(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            version: SCHEMA_VERSION,
            records: BTreeMap::new(),
        }
    }
}

/// A durable store keeping every record of one namespace in a single file.
///
/// All transactions are serialized through one async mutex. Writes go to a
/// temporary file that is then renamed over the snapshot on a blocking task
/// that owns the lock, so a dropped transaction still finishes its commit
/// before the next one loads.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    namespace: String,
    lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Open (lazily) a store at `path` for the given namespace.
    pub fn new(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Namespace this store reads and writes.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn load(&self) -> Result<Snapshot, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Snapshot::empty(&self.namespace));
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.namespace != self.namespace {
            return Err(StoreError::Incompatible(format!(
                "{} holds namespace '{}', expected '{}'",
                self.path.display(),
                snapshot.namespace,
                self.namespace
            )));
        }
        if snapshot.version != SCHEMA_VERSION {
            return Err(StoreError::Incompatible(format!(
                "{} has schema version {}, expected {}",
                self.path.display(),
                snapshot.version,
                SCHEMA_VERSION
            )));
        }
        Ok(snapshot)
    }
}

fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    let written = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, path));
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl RecordStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut snapshot = self.load().await?;
        Ok(snapshot.records.remove(key))
    }

    async fn run_transaction<T, F>(&self, key: &str, mut f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnMut(Option<&RateLimitRecord>) -> Transition<T> + Send,
    {
        let guard = self.lock.clone().lock_owned().await;
        let mut snapshot = self.load().await?;

        let Transition { mutation, value } = f(snapshot.records.get(key));
        let changed = match mutation {
            Mutation::Put(record) => {
                snapshot.records.insert(key.to_string(), record);
                true
            }
            Mutation::Delete => snapshot.records.remove(key).is_some(),
            Mutation::Keep => false,
        };

        if changed {
            let bytes = serde_json::to_vec_pretty(&snapshot)?;
            let path = self.path.clone();
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                write_snapshot(&path, &bytes)
            })
            .await
            .map_err(|e| StoreError::Unavailable(format!("snapshot writer failed: {}", e)))??;
            debug!(
                key = %key,
                path = %self.path.display(),
                "Persisted record store snapshot"
            );
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("turnstile-{}", uuid::Uuid::new_v4()))
            .join("store.json")
    }

    fn record(tokens: f64) -> RateLimitRecord {
        let now = Utc::now();
        RateLimitRecord {
            tokens,
            capacity: 5,
            refill_rate: 5.0 / 60_000.0,
            last_refill: now,
            reset_at: now,
            fail_count: 0,
            blocked_until: None,
            count: 1,
            last_attempt: Some(now),
        }
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let store = FileStore::new(temp_path(), "rate_limits");
        assert!(store.get("anything").await.unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let path = temp_path();
        let store = FileStore::new(&path, "rate_limits");
        store
            .run_transaction("identity_u1_login", |_| Transition::put(record(4.0), ()))
            .await
            .unwrap();

        let reopened = FileStore::new(&path, "rate_limits");
        let loaded = reopened.get("identity_u1_login").await.unwrap().unwrap();
        assert_eq!(loaded.tokens, 4.0);
        assert_eq!(loaded.count, 1);

        reopened
            .run_transaction("identity_u1_login", |_| Transition::delete(()))
            .await
            .unwrap();
        assert!(store.get("identity_u1_login").await.unwrap().is_none());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_namespace_mismatch_is_incompatible() {
        let path = temp_path();
        FileStore::new(&path, "rate_limits")
            .run_transaction("k", |_| Transition::put(record(1.0), ()))
            .await
            .unwrap();

        let other = FileStore::new(&path, "projects");
        let err = other.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Incompatible(_)));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();

        let store = FileStore::new(&path, "rate_limits");
        let err = store
            .run_transaction("k", |_| Transition::keep(()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_dropped_transactions_leave_no_temp_files() {
        let path = temp_path();
        let store = FileStore::new(&path, "rate_limits");

        for i in 0..50u64 {
            let key = format!("identity_u{}_login", i);
            let transaction =
                store.run_transaction(&key, |_| Transition::put(record(i as f64), ()));
            let _ = tokio::time::timeout(std::time::Duration::from_micros(i * 20), transaction)
                .await;
        }

        // Waits for any commit still in flight
        let snapshot_ok = store.get("identity_u0_login").await;
        assert!(snapshot_ok.is_ok());

        let dir = path.parent().unwrap();
        if dir.exists() {
            let leftovers: Vec<_> = std::fs::read_dir(dir)
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".tmp"))
                .collect();
            assert!(leftovers.is_empty(), "stale temp files: {:?}", leftovers);
        }

        let _ = std::fs::remove_dir_all(dir);
    }
}
