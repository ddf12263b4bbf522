//! Token revocation (logout)
//!
//! Revocations are written to the shared store under `revoked:{token_id}` with
//! a TTL that ends just after the token's own expiry, so the store forgets
//! them once they no longer matter.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{KeyValueStore, StoreError};

const KEY_PREFIX: &str = "revoked:";

/// Added to the remaining token lifetime; covers the final second the token
/// still validates in
const EXPIRY_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RevocationRecord {
    token_id: String,
    expires_at: DateTime<Utc>,
}

pub struct RevocationStore {
    store: Arc<dyn KeyValueStore>,
    max_ttl: Duration,
}

impl RevocationStore {
    /// `max_ttl` bounds how long any record is kept
    pub fn new(store: Arc<dyn KeyValueStore>, max_ttl: Duration) -> Self {
        Self { store, max_ttl }
    }

    /// Record `token_id` as revoked until `natural_expiry`.
    ///
    /// Tokens already past expiry need no record.
    pub async fn revoke(
        &self,
        token_id: &str,
        natural_expiry: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some(ttl) = self.ttl_until(natural_expiry, Utc::now()) else {
            tracing::debug!(token_id, "Token already expired, nothing to revoke");
            return Ok(());
        };

        let record = serde_json::to_string(&RevocationRecord {
            token_id: token_id.to_string(),
            expires_at: natural_expiry,
        })?;
        self.store
            .set(&storage_key(token_id), &record, Some(ttl))
            .await?;

        tracing::info!(token_id, ttl_secs = ttl.as_secs(), "Session token revoked");
        Ok(())
    }

    pub async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError> {
        self.store.exists(&storage_key(token_id)).await
    }

    fn ttl_until(&self, natural_expiry: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
        let remaining = natural_expiry.signed_duration_since(now).to_std().ok()?;
        if remaining.is_zero() {
            return None;
        }
        // Whole seconds, rounded up
        let whole = Duration::from_secs(remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0));
        Some((whole + EXPIRY_MARGIN).min(self.max_ttl + EXPIRY_MARGIN))
    }
}

fn storage_key(token_id: &str) -> String {
    format!("{KEY_PREFIX}{token_id}")
}
