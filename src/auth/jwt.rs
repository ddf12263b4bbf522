//! Session token generation and validation
//!
//! Session tokens are HS256 JWTs bound to a lowercase wallet address. They are
//! self-contained: the server keeps no copy, only later revocations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Session token errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session secret must not be empty")]
    EmptySecret,

    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),
}

/// JWT claims carried by a session token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (lowercase wallet address)
    pub sub: String,
    pub iss: String,
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
    /// JWT ID (for revocation)
    pub jti: String,
}

/// Verified session, as seen by the rest of the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionClaims {
    pub address: String,
    pub token_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A freshly issued token and its claims
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
}

/// Issues and verifies session tokens
#[derive(Clone)]
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl SessionService {
    pub fn new(
        secret: &str,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, SessionError> {
        if secret.is_empty() {
            return Err(SessionError::EmptySecret);
        }

        let issuer = issuer.into();
        let audience = audience.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_audience(&[audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "aud", "sub", "jti"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
            audience,
            ttl,
        })
    }

    /// Issue a token for `address`, normalized to lowercase
    pub fn issue(&self, address: &str) -> Result<IssuedToken, SessionError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX / 2);

        let claims = Claims {
            sub: address.to_lowercase(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now.saturating_add(ttl),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SessionError::EncodingFailed(e.to_string()))?;

        let claims = to_session_claims(claims).ok_or_else(|| {
            SessionError::EncodingFailed("Timestamp out of range".to_string())
        })?;

        Ok(IssuedToken { token, claims })
    }

    /// Verify signature, issuer, audience and expiry.
    ///
    /// Every failure yields `None`; callers treat it as "not authenticated".
    pub fn verify(&self, token: &str) -> Option<SessionClaims> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => to_session_claims(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "Session token rejected");
                None
            }
        }
    }
}

fn to_session_claims(claims: Claims) -> Option<SessionClaims> {
    Some(SessionClaims {
        issued_at: DateTime::from_timestamp(claims.iat, 0)?,
        expires_at: DateTime::from_timestamp(claims.exp, 0)?,
        address: claims.sub,
        token_id: claims.jti,
    })
}
