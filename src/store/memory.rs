//! In-process key-value store

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{Capacity, KeyValueStore, StoreError, Trimmed};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Members ordered by score, with a reverse lookup for removal
#[derive(Debug, Default)]
struct ScoredIndex {
    by_score: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
}

impl ScoredIndex {
    fn len(&self) -> usize {
        self.scores.len()
    }

    fn insert(&mut self, member: &str, score: i64) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.by_score.remove(&(previous, member.to_string()));
        }
        self.by_score.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => self.by_score.remove(&(score, member.to_string())),
            None => false,
        }
    }

    fn pop_lowest(&mut self) -> Option<(i64, String)> {
        let (score, member) = self.by_score.pop_first()?;
        self.scores.remove(&member);
        Some((score, member))
    }

    /// Remove every member scored at or below `max_score`
    fn pop_through(&mut self, max_score: i64) -> Vec<String> {
        let mut removed = Vec::new();
        while self
            .by_score
            .first()
            .is_some_and(|(score, _)| *score <= max_score)
        {
            if let Some((_, member)) = self.pop_lowest() {
                removed.push(member);
            }
        }
        removed
    }

    fn range(&self, max_score: i64) -> Vec<String> {
        self.by_score
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .map(|(_, member)| member.clone())
            .collect()
    }
}

/// Process-local store on a sharded map.
///
/// Expired entries are treated as absent on read and removed lazily;
/// [`KeyValueStore::purge_expired`] reclaims entries nobody reads again.
/// Locks are held per shard for the duration of a single key operation; a
/// bounded insert holds its index entry across the trim and the write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    indexes: DashMap<String, ScoredIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        None
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_value(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        // get_mut holds the shard write lock across the check and the write
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) && entry.value == expected => {
                entry.value = new.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
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
        let mut members = self.indexes.entry(index.to_string()).or_default();
        let mut trimmed = Trimmed::default();

        if members.len() >= capacity.max_len {
            for member in members.pop_through(capacity.stale_score) {
                self.entries.remove(&member);
                trimmed.stale += 1;
            }
        }
        if members.len() >= capacity.max_len {
            let count = capacity
                .evict_batch
                .max(members.len() + 1 - capacity.max_len);
            for _ in 0..count {
                let Some((_, member)) = members.pop_lowest() else {
                    break;
                };
                self.entries.remove(&member);
                trimmed.evicted += 1;
            }
        }

        members.insert(key, score);
        self.entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(trimmed)
    }

    async fn index_len(&self, index: &str) -> Result<usize, StoreError> {
        Ok(self.indexes.get(index).map_or(0, |members| members.len()))
    }

    async fn index_range(&self, index: &str, max_score: i64) -> Result<Vec<String>, StoreError> {
        Ok(self
            .indexes
            .get(index)
            .map(|members| members.range(max_score))
            .unwrap_or_default())
    }

    async fn remove_indexed(&self, index: &str, keys: &[String]) -> Result<usize, StoreError> {
        let mut removed = 0;
        if let Some(mut members) = self.indexes.get_mut(index) {
            for key in keys {
                if members.remove(key) {
                    removed += 1;
                }
            }
        }
        for key in keys {
            self.entries.remove(key);
        }
        Ok(removed)
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self
                .entries
                .remove_if(&key, |_, entry| entry.is_expired(now))
                .is_some()
            {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Purged expired in-memory entries");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();

        store.set("a", "1", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.exists("a").await.unwrap());

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_lazily() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        // The read removed the entry
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_extends_and_ignores_missing() {
        let store = MemoryStore::new();
        store.set("k", "v", Some(Duration::from_secs(1))).await.unwrap();

        assert!(store.expire("k", Duration::from_secs(60)).await.unwrap());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.exists("k").await.unwrap());

        assert!(!store.expire("missing", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();
        store.set("k", "old", None).await.unwrap();

        assert!(!store.compare_and_swap("k", "other", "new").await.unwrap());
        assert!(store.compare_and_swap("k", "old", "new").await.unwrap());
        assert!(!store.compare_and_swap("k", "old", "newer").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));

        assert!(!store.compare_and_swap("absent", "", "x").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_and_swap_keeps_ttl() {
        let store = MemoryStore::new();
        store.set("k", "a", Some(Duration::from_secs(5))).await.unwrap();
        assert!(store.compare_and_swap("k", "a", "b").await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store.set("nonce:1", "a", None).await.unwrap();
        store
            .set("nonce:2", "b", Some(Duration::from_secs(1)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_bounded_evicts_lowest_scores() {
        let store = MemoryStore::new();
        let capacity = Capacity {
            max_len: 4,
            stale_score: i64::MIN,
            evict_batch: 2,
        };

        for score in 0..4 {
            let trimmed = store
                .insert_bounded("idx", &format!("k{score}"), "v", None, score, capacity)
                .await
                .unwrap();
            assert_eq!(trimmed, Trimmed::default());
        }

        let trimmed = store
            .insert_bounded("idx", "k4", "v", None, 4, capacity)
            .await
            .unwrap();
        assert_eq!(trimmed, Trimmed { stale: 0, evicted: 2 });
        assert_eq!(store.index_len("idx").await.unwrap(), 3);
        assert_eq!(store.get("k0").await.unwrap(), None);
        assert_eq!(store.get("k1").await.unwrap(), None);
        assert_eq!(
            store.index_range("idx", i64::MAX).await.unwrap(),
            vec!["k2", "k3", "k4"]
        );
    }

    #[tokio::test]
    async fn test_insert_bounded_drops_stale_before_evicting() {
        let store = MemoryStore::new();
        let capacity = Capacity {
            max_len: 3,
            stale_score: 10,
            evict_batch: 1,
        };

        store.insert_bounded("idx", "old", "v", None, 5, capacity).await.unwrap();
        store.insert_bounded("idx", "a", "v", None, 20, capacity).await.unwrap();
        store.insert_bounded("idx", "b", "v", None, 30, capacity).await.unwrap();

        let trimmed = store
            .insert_bounded("idx", "c", "v", None, 40, capacity)
            .await
            .unwrap();
        assert_eq!(trimmed, Trimmed { stale: 1, evicted: 0 });
        assert!(!store.exists("old").await.unwrap());
        assert!(store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_index_range_and_remove() {
        let store = MemoryStore::new();
        for (key, score) in [("b", 2), ("a", 1), ("c", 3)] {
            store
                .insert_bounded("idx", key, "v", None, score, Capacity::unbounded())
                .await
                .unwrap();
        }

        assert_eq!(store.index_range("idx", 2).await.unwrap(), vec!["a", "b"]);

        let removed = store
            .remove_indexed("idx", &["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.index_len("idx").await.unwrap(), 2);
        assert!(!store.exists("a").await.unwrap());
        assert_eq!(store.index_len("other").await.unwrap(), 0);
    }
}
