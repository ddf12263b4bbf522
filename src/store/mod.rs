//! Key-value storage backends
//!
//! Both the nonce store and the revocation store are written against
//! [`KeyValueStore`], so running a single instance or a fleet is a matter of
//! configuration:
//! - `MemoryStore` keeps entries in process memory with lazy expiry
//! - `RedisStore` shares entries between processes through Redis
//!
//! Besides plain keys, a store keeps scored indexes (a sorted set on Redis) so
//! callers can count and age entries without enumerating the keyspace.

mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Config, StoreBackend};

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt store entry: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Bound applied by [`KeyValueStore::insert_bounded`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub max_len: usize,
    /// Members scored at or below this are dropped before anything else
    pub stale_score: i64,
    /// Minimum number of oldest members evicted once stale ones are gone
    pub evict_batch: usize,
}

impl Capacity {
    /// No bound at all
    pub fn unbounded() -> Self {
        Self {
            max_len: usize::MAX,
            stale_score: i64::MIN,
            evict_batch: 0,
        }
    }
}

/// Members removed to make room during a bounded insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trimmed {
    pub stale: usize,
    pub evicted: usize,
}

/// Uniform key-value contract shared by every backend
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; expired entries read as absent
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous value and expiry
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Set a new time-to-live on an existing key, returning whether the key existed
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Atomically replace `expected` with `new`, keeping the remaining TTL.
    ///
    /// Returns `false` when the key is absent or holds a different value.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
    ) -> Result<bool, StoreError>;

    /// Values of several keys at once, `None` for absent ones
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Write `key` and add it to the scored `index` as one atomic step.
    ///
    /// When the index is already at `capacity.max_len`, members scored at or
    /// below `capacity.stale_score` are removed first, then the lowest-scored
    /// members, so the index never exceeds its bound. Removed members lose their
    /// keys too.
    async fn insert_bounded(
        &self,
        index: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        score: i64,
        capacity: Capacity,
    ) -> Result<Trimmed, StoreError>;

    async fn index_len(&self, index: &str) -> Result<usize, StoreError>;

    /// Members scored at or below `max_score`, lowest score first
    async fn index_range(&self, index: &str, max_score: i64) -> Result<Vec<String>, StoreError>;

    /// Remove members from `index` along with their keys, returning how many were indexed
    async fn remove_indexed(&self, index: &str, keys: &[String]) -> Result<usize, StoreError>;

    /// Cheap liveness check
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Drop entries whose TTL has elapsed. Backends with native expiry do nothing.
    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// Build the store selected by configuration
pub async fn connect(config: &Config) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    match &config.store_backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-process key-value store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis { url } => {
            let store = RedisStore::connect(url, config.store_timeout).await?;
            Ok(Arc::new(store))
        }
    }
}
