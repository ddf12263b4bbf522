//! Authentication service
//!
//! Ties nonces, challenge verification, session tokens and revocations together
//! behind the operations the HTTP layer needs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::challenge::{ChallengeError, ChallengeVerifier};
use super::crypto::{EthereumVerifier, SignatureVerifier};
use super::jwt::{IssuedToken, SessionClaims, SessionError, SessionService};
use super::nonce::{NonceSettings, NonceStats, NonceStore};
use super::revocation::RevocationStore;
use crate::config::Config;
use crate::store::{KeyValueStore, StoreError};

/// Sign-in errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Authentication store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Why the authentication gate refused a token
#[derive(Error, Debug)]
pub enum GateError {
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("token revoked")]
    Revoked,

    #[error("authentication store unavailable")]
    StoreUnavailable(#[source] StoreError),
}

/// Authentication service
pub struct AuthService {
    store: Arc<dyn KeyValueStore>,
    nonces: Arc<NonceStore>,
    challenges: ChallengeVerifier,
    sessions: SessionService,
    revocations: RevocationStore,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        nonces: Arc<NonceStore>,
        challenges: ChallengeVerifier,
        sessions: SessionService,
        revocations: RevocationStore,
    ) -> Self {
        Self {
            store,
            nonces,
            challenges,
            sessions,
            revocations,
        }
    }

    /// Wire every component onto one shared store
    pub fn from_config(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, SessionError> {
        Self::with_verifier(config, store, Arc::new(EthereumVerifier))
    }

    /// Same as [`from_config`](Self::from_config) with a custom signature primitive
    pub fn with_verifier(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self, SessionError> {
        let nonces = Arc::new(NonceStore::new(
            store.clone(),
            NonceSettings {
                ttl: config.nonce_ttl,
                sweep_interval: config.nonce_sweep_interval,
                max_entries: config.nonce_max_entries,
                ..NonceSettings::default()
            },
        ));
        let challenges =
            ChallengeVerifier::new(nonces.clone(), verifier, config.siwe_domain.clone());
        let sessions = SessionService::new(
            &config.session_secret,
            config.session_issuer.clone(),
            config.session_audience.clone(),
            config.session_ttl,
        )?;
        let revocations = RevocationStore::new(store.clone(), config.revocation_max_ttl);

        Ok(Self::new(store, nonces, challenges, sessions, revocations))
    }

    pub fn nonces(&self) -> &Arc<NonceStore> {
        &self.nonces
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    pub async fn issue_nonce(&self) -> Result<String, AuthError> {
        Ok(self.nonces.issue().await?)
    }

    /// Verify a signed challenge and issue a session token for its address
    pub async fn sign_in(&self, message: &str, signature: &str) -> Result<IssuedToken, AuthError> {
        let address = match self.challenges.verify(message, signature).await {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!(reason = e.code(), "Sign-in rejected");
                return Err(e.into());
            }
        };

        let issued = self.sessions.issue(&address)?;
        tracing::info!(
            address = %issued.claims.address,
            token_id = %issued.claims.token_id,
            "Session issued"
        );
        Ok(issued)
    }

    /// Authentication gate: token must verify and must not be revoked.
    ///
    /// A store failure denies access.
    pub async fn authenticate(&self, token: &str) -> Result<SessionClaims, GateError> {
        let claims = self.sessions.verify(token).ok_or(GateError::InvalidToken)?;

        match self.revocations.is_revoked(&claims.token_id).await {
            Ok(false) => Ok(claims),
            Ok(true) => {
                tracing::debug!(token_id = %claims.token_id, "Revoked token presented");
                Err(GateError::Revoked)
            }
            Err(e) => {
                tracing::error!(error = %e, token_id = %claims.token_id, "Revocation check failed");
                Err(GateError::StoreUnavailable(e))
            }
        }
    }

    /// Revoke a session until its natural expiry
    pub async fn logout(&self, token_id: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        Ok(self.revocations.revoke(token_id, expires_at).await?)
    }

    /// Round trip to the backing store
    pub async fn ping_store(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    pub async fn nonce_stats(&self) -> Result<NonceStats, AuthError> {
        Ok(self.nonces.stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::auth::crypto::test_support::{personal_sign, wallet, wallet_address};
    use crate::auth::message::SignInMessage;
    use crate::store::{Capacity, MemoryStore, Trimmed};

    fn config() -> Config {
        Config {
            session_secret: "unit-test-secret-unit-test-secret".to_string(),
            ..Config::default()
        }
    }

    fn service() -> AuthService {
        AuthService::from_config(&config(), Arc::new(MemoryStore::new())).unwrap()
    }

    fn challenge(address: &str, nonce: &str) -> String {
        SignInMessage {
            domain: "localhost".to_string(),
            address: address.to_string(),
            statement: None,
            uri: "http://localhost:3001".to_string(),
            version: "1".to_string(),
            chain_id: 1,
            nonce: nonce.to_string(),
            issued_at: Utc::now(),
            expiration_time: None,
            not_before: None,
            request_id: None,
            resources: Vec::new(),
        }
        .to_string()
    }

    #[tokio::test]
    async fn test_sign_in_logout_gate() {
        let auth = service();
        let key = wallet(3);
        let address = wallet_address(&key).to_uppercase().replacen("0X", "0x", 1);

        let message = challenge(&address, &auth.issue_nonce().await.unwrap());
        let signature = personal_sign(&key, &message);
        let issued = auth.sign_in(&message, &signature).await.unwrap();
        assert_eq!(issued.claims.address, address.to_lowercase());

        let claims = auth.authenticate(&issued.token).await.unwrap();
        assert_eq!(claims, issued.claims);

        auth.logout(&claims.token_id, claims.expires_at).await.unwrap();
        assert!(matches!(
            auth.authenticate(&issued.token).await,
            Err(GateError::Revoked)
        ));
        // The token itself is still well formed
        assert!(auth.sessions().verify(&issued.token).is_some());
    }

    #[tokio::test]
    async fn test_sign_in_replay_rejected() {
        let auth = service();
        let key = wallet(3);
        let message = challenge(&wallet_address(&key), &auth.issue_nonce().await.unwrap());
        let signature = personal_sign(&key, &message);

        auth.sign_in(&message, &signature).await.unwrap();
        let err = auth.sign_in(&message, &signature).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Challenge(ChallengeError::NonceAlreadyUsed)
        ));
        assert_eq!(err.to_string(), "nonce already used");
    }

    #[tokio::test]
    async fn test_invalid_token_rejected() {
        let auth = service();
        assert!(matches!(
            auth.authenticate("garbage").await,
            Err(GateError::InvalidToken)
        ));
    }

    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn exists(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Timeout(Duration::from_millis(500)))
        }
        async fn expire(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn compare_and_swap(&self, _: &str, _: &str, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn insert_bounded(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Option<Duration>,
            _: i64,
            _: Capacity,
        ) -> Result<Trimmed, StoreError> {
            Err(StoreError::Timeout(Duration::from_millis(500)))
        }
        async fn index_len(&self, _: &str) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn index_range(&self, _: &str, _: i64) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn remove_indexed(&self, _: &str, _: &[String]) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_gate_fails_closed_when_store_is_down() {
        let auth = AuthService::from_config(&config(), Arc::new(BrokenStore)).unwrap();
        let token = auth.sessions().issue("0xabc").unwrap().token;

        assert!(matches!(
            auth.authenticate(&token).await,
            Err(GateError::StoreUnavailable(_))
        ));
        assert!(matches!(auth.issue_nonce().await, Err(AuthError::Store(_))));
    }
}
