//! Single-use challenge nonces
//!
//! Nonces live in the shared key-value store under `{namespace}:{value}` as JSON
//! records, indexed by issue time in `{namespace}-index`. Consumption is a
//! compare-and-swap on the serialized record, so two requests racing on the same
//! nonce cannot both win, whichever backend is in use. Issuance is one bounded
//! insert, so the capacity ceiling holds across every process sharing the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::{Capacity, KeyValueStore, StoreError, Trimmed};

/// Random bytes per nonce (hex-encoded to 32 characters)
const NONCE_BYTES: usize = 16;

/// Share of the ceiling evicted when cleanup alone cannot make room
const EVICTION_DIVISOR: usize = 10;

/// Stored nonce state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRecord {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub used: bool,
}

impl NonceRecord {
    fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.issued_at)
            .to_std()
            .map(|age| age > window)
            .unwrap_or(false)
    }
}

/// Result of presenting a nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The nonce was unused and is now marked used
    Consumed,
    NotFound,
    AlreadyUsed,
    Expired,
}

/// Nonce counts for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NonceStats {
    pub total: usize,
    pub used: usize,
    pub unused: usize,
    pub expired: usize,
}

/// Nonce store tuning
#[derive(Debug, Clone)]
pub struct NonceSettings {
    /// How long an issued nonce stays redeemable
    pub ttl: Duration,
    /// Interval of the background sweep; also the grace period before the
    /// backing store drops a record on its own
    pub sweep_interval: Duration,
    /// Maximum number of tracked nonces
    pub max_entries: usize,
    /// Key prefix shared by every process issuing against the same store
    pub namespace: String,
}

impl Default for NonceSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(300),
            max_entries: 10_000,
            namespace: "nonce".to_string(),
        }
    }
}

/// Issues and redeems challenge nonces
pub struct NonceStore {
    store: Arc<dyn KeyValueStore>,
    settings: NonceSettings,
    index: String,
}

impl NonceStore {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: NonceSettings) -> Self {
        Self {
            store,
            index: format!("{}-index", settings.namespace),
            settings: NonceSettings {
                max_entries: settings.max_entries.max(1),
                ..settings
            },
        }
    }

    /// Issue a fresh nonce, making room first if the store is at capacity
    pub async fn issue(&self) -> Result<String, StoreError> {
        let record = NonceRecord {
            value: generate_nonce(),
            issued_at: Utc::now(),
            used: false,
        };

        let max_entries = self.settings.max_entries;
        let capacity = Capacity {
            max_len: max_entries,
            stale_score: self.stale_score(record.issued_at),
            evict_batch: (max_entries / EVICTION_DIVISOR).max(1),
        };
        let trimmed = self.insert(&record, capacity).await?;

        if trimmed.evicted > 0 {
            warn!(
                swept = trimmed.stale,
                evicted = trimmed.evicted,
                max_entries,
                "Nonce store at capacity, evicted oldest pending nonces"
            );
        } else if trimmed.stale > 0 {
            debug!(swept = trimmed.stale, "Swept expired nonces to make room");
        }

        debug!(nonce = %record.value, "Issued nonce");
        Ok(record.value)
    }

    /// Atomically mark a nonce used if it exists, is unused and is within the window
    pub async fn consume(&self, nonce: &str) -> Result<ConsumeOutcome, StoreError> {
        let key = self.storage_key(nonce);

        let Some(raw) = self.store.get(&key).await? else {
            return Ok(ConsumeOutcome::NotFound);
        };
        let record: NonceRecord = serde_json::from_str(&raw)?;

        if record.used {
            return Ok(ConsumeOutcome::AlreadyUsed);
        }
        if record.is_expired(Utc::now(), self.settings.ttl) {
            return Ok(ConsumeOutcome::Expired);
        }

        let spent = serde_json::to_string(&NonceRecord {
            used: true,
            ..record
        })?;

        if self.store.compare_and_swap(&key, &raw, &spent).await? {
            return Ok(ConsumeOutcome::Consumed);
        }

        // Lost the race: someone else marked it, or it was swept/evicted meanwhile
        if self.store.exists(&key).await? {
            Ok(ConsumeOutcome::AlreadyUsed)
        } else {
            Ok(ConsumeOutcome::NotFound)
        }
    }

    /// Remove every record older than the expiry window, used or not
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let stale = self
            .store
            .index_range(&self.index, self.stale_score(Utc::now()))
            .await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let removed = self.store.remove_indexed(&self.index, &stale).await?;
        if removed > 0 {
            let remaining = self.store.index_len(&self.index).await?;
            info!(removed, remaining, "Swept expired nonces");
        }
        Ok(removed)
    }

    /// Counts after an expiry sweep
    pub async fn stats(&self) -> Result<NonceStats, StoreError> {
        self.sweep_expired().await?;

        let keys = self.store.index_range(&self.index, i64::MAX).await?;
        let values = self.store.get_many(&keys).await?;

        let now = Utc::now();
        let mut stats = NonceStats::default();
        for (key, raw) in keys.iter().zip(values) {
            // Dropped by the backing TTL but not yet unindexed
            let Some(raw) = raw else { continue };
            let record = match serde_json::from_str::<NonceRecord>(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable nonce record");
                    continue;
                }
            };

            stats.total += 1;
            if record.used {
                stats.used += 1;
            } else {
                stats.unused += 1;
            }
            if record.is_expired(now, self.settings.ttl) {
                stats.expired += 1;
            }
        }
        Ok(stats)
    }

    #[cfg(test)]
    pub(crate) async fn put_record(&self, record: &NonceRecord) -> Result<(), StoreError> {
        self.insert(record, Capacity::unbounded()).await.map(|_| ())
    }

    /// Write a record with a backing-store TTL past the expiry window, so a
    /// networked store drops it even without a sweeper
    async fn insert(
        &self,
        record: &NonceRecord,
        capacity: Capacity,
    ) -> Result<Trimmed, StoreError> {
        let ttl = self.settings.ttl + self.settings.sweep_interval;
        self.store
            .insert_bounded(
                &self.index,
                &self.storage_key(&record.value),
                &serde_json::to_string(record)?,
                Some(ttl),
                record.issued_at.timestamp_millis(),
                capacity,
            )
            .await
    }

    /// Highest issue-time score that is past the expiry window at `now`
    fn stale_score(&self, now: DateTime<Utc>) -> i64 {
        chrono::Duration::from_std(self.settings.ttl)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .map_or(i64::MIN, |cutoff| cutoff.timestamp_millis() - 1)
    }

    fn storage_key(&self, nonce: &str) -> String {
        format!("{}:{nonce}", self.settings.namespace)
    }
}

/// 128 random bits as lowercase hex: URL-safe and valid inside a sign-in message
fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::store::MemoryStore;

    fn nonce_store(max_entries: usize) -> NonceStore {
        NonceStore::new(
            Arc::new(MemoryStore::new()),
            NonceSettings {
                max_entries,
                ..NonceSettings::default()
            },
        )
    }

    async fn insert_aged(store: &NonceStore, value: &str, age_secs: i64, used: bool) {
        store
            .put_record(&NonceRecord {
                value: value.to_string(),
                issued_at: Utc::now() - chrono::Duration::seconds(age_secs),
                used,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_issued_nonces_are_unique_and_url_safe() {
        let store = nonce_store(10_000);
        let mut seen = HashSet::new();

        for _ in 0..500 {
            let nonce = store.issue().await.unwrap();
            assert_eq!(nonce.len(), NONCE_BYTES * 2);
            assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
            assert!(seen.insert(nonce));
        }
    }

    #[tokio::test]
    async fn test_consume_once() {
        let store = nonce_store(100);
        let nonce = store.issue().await.unwrap();

        assert_eq!(store.consume(&nonce).await.unwrap(), ConsumeOutcome::Consumed);
        assert_eq!(
            store.consume(&nonce).await.unwrap(),
            ConsumeOutcome::AlreadyUsed
        );
    }

    #[tokio::test]
    async fn test_consume_unknown_and_expired() {
        let store = nonce_store(100);
        assert_eq!(
            store.consume("deadbeefdeadbeef").await.unwrap(),
            ConsumeOutcome::NotFound
        );

        insert_aged(&store, "agedagedaged", 11 * 60, false).await;
        assert_eq!(
            store.consume("agedagedaged").await.unwrap(),
            ConsumeOutcome::Expired
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_has_single_winner() {
        let store = Arc::new(nonce_store(100));
        let nonce = store.issue().await.unwrap();
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let nonce = nonce.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    store.consume(&nonce).await.unwrap()
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap());
        }

        let winners = outcomes
            .iter()
            .filter(|o| **o == ConsumeOutcome::Consumed)
            .count();
        assert_eq!(winners, 1);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, ConsumeOutcome::Consumed | ConsumeOutcome::AlreadyUsed)));
    }

    #[tokio::test]
    async fn test_capacity_never_exceeded_and_oldest_evicted_first() {
        let store = nonce_store(10);

        let mut issued = Vec::new();
        for _ in 0..25 {
            issued.push(store.issue().await.unwrap());
            let stats = store.stats().await.unwrap();
            assert!(stats.total <= 10, "store grew to {}", stats.total);
        }

        // The first nonces were evicted, the latest survive
        assert_eq!(
            store.consume(&issued[0]).await.unwrap(),
            ConsumeOutcome::NotFound
        );
        assert_eq!(
            store.consume(issued.last().unwrap()).await.unwrap(),
            ConsumeOutcome::Consumed
        );
    }

    #[tokio::test]
    async fn test_capacity_prefers_expired_over_live() {
        let store = nonce_store(3);
        insert_aged(&store, "stale0000001", 20 * 60, false).await;
        let live_a = store.issue().await.unwrap();
        let live_b = store.issue().await.unwrap();

        // At the ceiling: the stale record is swept and nothing live is evicted
        let live_c = store.issue().await.unwrap();

        for nonce in [&live_a, &live_b, &live_c] {
            assert_eq!(store.consume(nonce).await.unwrap(), ConsumeOutcome::Consumed);
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = nonce_store(100);
        let fresh = store.issue().await.unwrap();
        insert_aged(&store, "oldunused0001", 11 * 60, false).await;
        insert_aged(&store, "oldused00001", 11 * 60, true).await;

        assert_eq!(store.sweep_expired().await.unwrap(), 2);
        assert_eq!(store.consume(&fresh).await.unwrap(), ConsumeOutcome::Consumed);
        assert_eq!(
            store.consume("oldunused0001").await.unwrap(),
            ConsumeOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_stats_sweep_before_counting() {
        let store = nonce_store(100);
        let a = store.issue().await.unwrap();
        store.issue().await.unwrap();
        store.issue().await.unwrap();
        store.consume(&a).await.unwrap();
        insert_aged(&store, "expired00001", 30 * 60, false).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            NonceStats {
                total: 3,
                used: 1,
                unused: 2,
                expired: 0,
            }
        );
    }

    /// Memory store that counts round trips, split by kind
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        bounded_inserts: AtomicUsize,
        other_calls: AtomicUsize,
    }

    impl CountingStore {
        fn other(&self) {
            self.other_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn reset(&self) {
            self.bounded_inserts.store(0, Ordering::SeqCst);
            self.other_calls.store(0, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl KeyValueStore for CountingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.other();
            self.inner.get(key).await
        }
        async fn set(
            &self,
            key: &str,
            value: &str,
            ttl: Option<Duration>,
        ) -> Result<(), StoreError> {
            self.other();
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.other();
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.other();
            self.inner.exists(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.other();
            self.inner.expire(key, ttl).await
        }
        async fn compare_and_swap(
            &self,
            key: &str,
            expected: &str,
            new: &str,
        ) -> Result<bool, StoreError> {
            self.other();
            self.inner.compare_and_swap(key, expected, new).await
        }
        async fn insert_bounded(
            &self,
            index: &str,
            key: &str,
            value: &str,
            ttl: Option<Duration>,
            score: i64,
            capacity: Capacity,
        ) -> Result<Trimmed, StoreError> {
            self.bounded_inserts.fetch_add(1, Ordering::SeqCst);
            self.inner
                .insert_bounded(index, key, value, ttl, score, capacity)
                .await
        }
        async fn index_len(&self, index: &str) -> Result<usize, StoreError> {
            self.other();
            self.inner.index_len(index).await
        }
        async fn index_range(
            &self,
            index: &str,
            max_score: i64,
        ) -> Result<Vec<String>, StoreError> {
            self.other();
            self.inner.index_range(index, max_score).await
        }
        async fn remove_indexed(&self, index: &str, keys: &[String]) -> Result<usize, StoreError> {
            self.other();
            self.inner.remove_indexed(index, keys).await
        }
    }

    #[tokio::test]
    async fn test_issue_is_one_store_call_regardless_of_size() {
        let counting = Arc::new(CountingStore::default());
        let store = NonceStore::new(
            counting.clone(),
            NonceSettings {
                max_entries: 5_000,
                ..NonceSettings::default()
            },
        );

        for _ in 0..4_900 {
            store.issue().await.unwrap();
        }

        // Below the ceiling, then across it
        counting.reset();
        for _ in 0..200 {
            store.issue().await.unwrap();
        }
        assert_eq!(counting.bounded_inserts.load(Ordering::SeqCst), 200);
        assert_eq!(counting.other_calls.load(Ordering::SeqCst), 0);

        // Crossing the ceiling evicted one batch of 500, then 99 more were added
        assert_eq!(counting.inner.index_len("nonce-index").await.unwrap(), 4_600);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let shared: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let settings = |namespace: &str| NonceSettings {
            max_entries: 2,
            namespace: namespace.to_string(),
            ..NonceSettings::default()
        };
        let left = NonceStore::new(shared.clone(), settings("left"));
        let right = NonceStore::new(shared, settings("right"));

        let kept = left.issue().await.unwrap();
        for _ in 0..5 {
            right.issue().await.unwrap();
        }

        assert_eq!(right.stats().await.unwrap().total, 2);
        assert_eq!(left.consume(&kept).await.unwrap(), ConsumeOutcome::Consumed);
        assert_eq!(right.consume(&kept).await.unwrap(), ConsumeOutcome::NotFound);
    }
}
