//! Durable record storage.
//!
//! The limiter talks to storage only through [`RecordStore`]. A store must
//! make [`RecordStore::run_transaction`] linearizable per key: two concurrent
//! transactions on the same key never both observe the same prior record.
//! Transactions on different keys are independent.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::ratelimit::RateLimitRecord;

/// Default namespace that keeps rate limit records apart from other data.
pub const DEFAULT_NAMESPACE: &str = "rate_limits";

/// Errors raised by a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record store unavailable: {0}")]
    Unavailable(String),
    #[error("Record store transaction timed out after {0:?}")]
    Timeout(Duration),
    #[error("Incompatible record store: {0}")]
    Incompatible(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Change to apply to a record when a transaction commits.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Store this record under the key
    Put(RateLimitRecord),
    /// Remove the record
    Delete,
    /// Leave the stored record as it is
    Keep,
}

/// What a transaction body hands back to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<T> {
    /// Change to commit
    pub mutation: Mutation,
    /// Value returned to the caller of `run_transaction`
    pub value: T,
}

impl<T> Transition<T> {
    pub fn put(record: RateLimitRecord, value: T) -> Self {
        Self {
            mutation: Mutation::Put(record),
            value,
        }
    }

    pub fn delete(value: T) -> Self {
        Self {
            mutation: Mutation::Delete,
            value,
        }
    }

    pub fn keep(value: T) -> Self {
        Self {
            mutation: Mutation::Keep,
            value,
        }
    }
}

/// Keyed record storage with atomic read-modify-write.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read a record without modifying it.
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError>;

    /// Run `f` against the current record for `key` and commit its mutation
    /// atomically.
    ///
    /// Implementations may invoke `f` more than once when they retry on
    /// contention; only the last invocation's mutation is committed.
    async fn run_transaction<T, F>(&self, key: &str, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnMut(Option<&RateLimitRecord>) -> Transition<T> + Send;
}
