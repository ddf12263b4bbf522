//! Redis-backed key-value store
//!
//! Shares nonces and revocations across every server process. Each call,
//! including checking a connection out of the pool, is bounded by the
//! configured timeout so an unreachable Redis turns into an error instead of
//! a hung request.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tracing::{debug, info};

use super::{Capacity, KeyValueStore, StoreError, Trimmed};

/// Replace the value only if it still equals ARGV[1], preserving the TTL
const COMPARE_AND_SWAP_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current ~= ARGV[1] then
    return 0
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl > 0 then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ttl)
else
    redis.call('SET', KEYS[1], ARGV[2])
end
return 1
";

/// Trim a full sorted-set index (stale members first, then the oldest), then
/// SET the key and ZADD it. Returns {stale, evicted}.
///
/// KEYS: index, key. ARGV: value, ttl_ms (0 = none), score, max_len,
/// stale_score, evict_batch.
const INSERT_BOUNDED_SCRIPT: &str = r"
local max_len = tonumber(ARGV[4])
local stale, evicted = 0, 0

if redis.call('ZCARD', KEYS[1]) >= max_len then
    local members = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[5])
    for _, member in ipairs(members) do
        redis.call('DEL', member)
    end
    stale = #members
    if stale > 0 then
        redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[5])
    end
end

local len = redis.call('ZCARD', KEYS[1])
if len >= max_len then
    local count = math.max(tonumber(ARGV[6]), len + 1 - max_len)
    local members = redis.call('ZRANGE', KEYS[1], 0, count - 1)
    for _, member in ipairs(members) do
        redis.call('DEL', member)
    end
    evicted = #members
    redis.call('ZREMRANGEBYRANK', KEYS[1], 0, count - 1)
end

local ttl = tonumber(ARGV[2])
if ttl > 0 then
    redis.call('SET', KEYS[2], ARGV[1], 'PX', ttl)
else
    redis.call('SET', KEYS[2], ARGV[1])
end
redis.call('ZADD', KEYS[1], ARGV[3], KEYS[2])
return {stale, evicted}
";

/// Keys per DEL/ZREM batch when removing indexed members
const REMOVE_BATCH: usize = 500;

#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    op_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Create the pool and check the server answers PING
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis pool: {e}")))?;

        let store = Self { pool, op_timeout };
        store.ping().await?;

        info!(timeout_ms = op_timeout.as_millis() as u64, "Redis store connected");
        Ok(store)
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to get Redis connection: {e}")))
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.op_timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))?
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            conn.get(key).await.map_err(unavailable)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(millis(ttl));
            }
            cmd.query_async::<_, ()>(&mut *conn)
                .await
                .map_err(unavailable)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let removed: i64 = conn.del(key).await.map_err(unavailable)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            conn.exists(key).await.map_err(unavailable)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(millis(ttl))
                .query_async::<_, bool>(&mut *conn)
                .await
                .map_err(unavailable)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
    ) -> Result<bool, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let swapped: i32 = redis::Script::new(COMPARE_AND_SWAP_SCRIPT)
                .key(key)
                .arg(expected)
                .arg(new)
                .invoke_async(&mut *conn)
                .await
                .map_err(unavailable)?;
            Ok(swapped == 1)
        })
        .await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.bounded(async {
            let mut conn = self.connection().await?;
            redis::cmd("MGET")
                .arg(keys)
                .query_async(&mut *conn)
                .await
                .map_err(unavailable)
        })
        .await
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
        self.bounded(async {
            let mut conn = self.connection().await?;
            let (stale, evicted): (usize, usize) = redis::Script::new(INSERT_BOUNDED_SCRIPT)
                .key(index)
                .key(key)
                .arg(value)
                .arg(ttl.map_or(0, millis))
                .arg(score)
                .arg(capacity.max_len)
                .arg(capacity.stale_score)
                .arg(capacity.evict_batch)
                .invoke_async(&mut *conn)
                .await
                .map_err(unavailable)?;
            Ok(Trimmed { stale, evicted })
        })
        .await
    }

    async fn index_len(&self, index: &str) -> Result<usize, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            conn.zcard::<_, usize>(index).await.map_err(unavailable)
        })
        .await
    }

    async fn index_range(&self, index: &str, max_score: i64) -> Result<Vec<String>, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let members: Vec<String> = conn
                .zrangebyscore(index, "-inf", max_score)
                .await
                .map_err(unavailable)?;
            debug!(index, count = members.len(), "Read Redis index range");
            Ok(members)
        })
        .await
    }

    async fn remove_indexed(&self, index: &str, keys: &[String]) -> Result<usize, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.bounded(async {
            let mut conn = self.connection().await?;
            let mut removed = 0;
            for batch in keys.chunks(REMOVE_BATCH) {
                let (_, unindexed): (usize, usize) = redis::pipe()
                    .atomic()
                    .del(batch)
                    .zrem(index, batch)
                    .query_async(&mut *conn)
                    .await
                    .map_err(unavailable)?;
                removed += unindexed;
            }
            Ok(removed)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            redis::cmd("PING")
                .query_async::<_, String>(&mut *conn)
                .await
                .map_err(unavailable)?;
            Ok(())
        })
        .await
    }
}
